//! Bounded retries for lookups that miss because a character has not
//! spawned yet.

use log::{debug, warn};
use shared::SessionId;

#[derive(Debug, Clone, PartialEq)]
struct PendingLookup {
    session: SessionId,
    waited: f32,
}

#[derive(Debug)]
pub struct RetryQueue {
    pending: Vec<PendingLookup>,
    timeout: f32,
    interval: f32,
    since_poll: f32,
}

impl RetryQueue {
    pub fn new(timeout: f32, interval: f32) -> Self {
        Self {
            pending: Vec::new(),
            timeout,
            interval,
            since_poll: 0.0,
        }
    }

    /// Queues a lookup for `session`. Returns false if one is already queued.
    pub fn enqueue(&mut self, session: SessionId) -> bool {
        if self.contains(session) {
            return false;
        }
        debug!("Queued lookup retry for participant {}", session);
        self.pending.push(PendingLookup {
            session,
            waited: 0.0,
        });
        true
    }

    pub fn contains(&self, session: SessionId) -> bool {
        self.pending.iter().any(|p| p.session == session)
    }

    pub fn cancel(&mut self, session: SessionId) {
        self.pending.retain(|p| p.session != session);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.since_poll = 0.0;
    }

    /// Advances the queue. Every `interval` seconds each pending lookup is
    /// retried through `resolve`, which returns true once it succeeded.
    /// Lookups still missing after `timeout` are dropped and returned.
    pub fn poll<F>(&mut self, dt: f32, mut resolve: F) -> Vec<SessionId>
    where
        F: FnMut(SessionId) -> bool,
    {
        if self.pending.is_empty() {
            self.since_poll = 0.0;
            return Vec::new();
        }
        for lookup in &mut self.pending {
            lookup.waited += dt;
        }
        self.since_poll += dt;
        if self.since_poll + 1e-4 < self.interval {
            return Vec::new();
        }
        self.since_poll = 0.0;

        let mut abandoned = Vec::new();
        let timeout = self.timeout;
        self.pending.retain(|lookup| {
            if resolve(lookup.session) {
                return false;
            }
            if lookup.waited + 1e-4 >= timeout {
                warn!(
                    "Gave up looking up participant {} after {:.1}s",
                    lookup.session, lookup.waited
                );
                abandoned.push(lookup.session);
                return false;
            }
            true
        });
        abandoned
    }
}
