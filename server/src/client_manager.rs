//! Session bookkeeping for the authority.
//!
//! A session is one observer connection, identified by a [`SessionId`] and
//! its UDP source address. The manager is responsible for:
//! - admitting sessions up to the configured capacity
//! - resolving the real issuer of a packet from its source address
//! - buffering movement inputs and handing them out in arrival order
//! - dropping sessions that went silent
//!
//! Nothing here knows about the game itself. The network layer pairs every
//! admission and removal with the matching call on the simulation.

use log::info;
use shared::{InputState, SessionId};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// How long a session may stay silent before it is dropped.
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(5);

/// One connected observer.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub addr: SocketAddr,
    /// Refreshed by every packet, heartbeats included.
    pub last_seen: Instant,
    /// Highest movement input sequence already applied to the simulation.
    pub last_processed_input: u32,
    pub pending_inputs: Vec<InputState>,
}

impl Session {
    pub fn new(id: SessionId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            last_seen: Instant::now(),
            last_processed_input: 0,
            pending_inputs: Vec::new(),
        }
    }

    /// Buffers an input, keeping the buffer ordered by sequence. Stale or
    /// duplicate sequences are ignored.
    pub fn queue_input(&mut self, input: InputState) -> bool {
        self.last_seen = Instant::now();
        if input.sequence <= self.last_processed_input
            || self
                .pending_inputs
                .iter()
                .any(|queued| queued.sequence == input.sequence)
        {
            return false;
        }
        self.pending_inputs.push(input);
        self.pending_inputs.sort_by_key(|i| i.sequence);
        true
    }

    pub fn is_silent_for(&self, timeout: Duration) -> bool {
        self.last_seen.elapsed() > timeout
    }
}

pub struct SessionManager {
    sessions: HashMap<SessionId, Session>,
    next_id: SessionId,
    capacity: usize,
}

impl SessionManager {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: HashMap::new(),
            next_id: 1,
            capacity,
        }
    }

    /// Admits a new session. Returns `None` when the server is full.
    ///
    /// An address that is already connected keeps its existing session, so a
    /// retransmitted `Connect` does not create a second participant.
    pub fn admit(&mut self, addr: SocketAddr) -> Option<SessionId> {
        if let Some(existing) = self.session_for(addr) {
            self.touch(existing);
            return Some(existing);
        }
        if self.sessions.len() >= self.capacity {
            return None;
        }

        let id = self.next_id;
        self.next_id += 1;
        info!("Session {} opened from {}", id, addr);
        self.sessions.insert(id, Session::new(id, addr));
        Some(id)
    }

    pub fn remove(&mut self, id: SessionId) -> bool {
        match self.sessions.remove(&id) {
            Some(session) => {
                info!("Session {} closed ({})", session.id, session.addr);
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    /// The session bound to a source address. This is the only trusted
    /// source of issuer identity.
    pub fn session_for(&self, addr: SocketAddr) -> Option<SessionId> {
        self.sessions
            .values()
            .find(|session| session.addr == addr)
            .map(|session| session.id)
    }

    pub fn touch(&mut self, id: SessionId) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.last_seen = Instant::now();
        }
    }

    pub fn queue_input(&mut self, id: SessionId, input: InputState) -> bool {
        self.sessions
            .get_mut(&id)
            .map(|session| session.queue_input(input))
            .unwrap_or(false)
    }

    /// Every unapplied input across all sessions, oldest timestamp first.
    pub fn inputs_in_arrival_order(&self) -> Vec<(SessionId, InputState)> {
        let mut inputs: Vec<(SessionId, InputState)> = self
            .sessions
            .values()
            .flat_map(|session| {
                session
                    .pending_inputs
                    .iter()
                    .filter(|input| input.sequence > session.last_processed_input)
                    .map(|input| (session.id, input.clone()))
            })
            .collect();
        inputs.sort_by_key(|(id, input)| (input.timestamp, *id, input.sequence));
        inputs
    }

    pub fn mark_processed(&mut self, id: SessionId, sequence: u32) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.last_processed_input = session.last_processed_input.max(sequence);
            session
                .pending_inputs
                .retain(|input| input.sequence > session.last_processed_input);
        }
    }

    pub fn last_processed_input(&self, id: SessionId) -> u32 {
        self.sessions
            .get(&id)
            .map(|session| session.last_processed_input)
            .unwrap_or(0)
    }

    /// Removes and returns the sessions silent for longer than `timeout`.
    pub fn expire_silent(&mut self, timeout: Duration) -> Vec<SessionId> {
        let expired: Vec<SessionId> = self
            .sessions
            .values()
            .filter(|session| session.is_silent_for(timeout))
            .map(|session| session.id)
            .collect();
        for id in &expired {
            self.remove(*id);
        }
        expired
    }

    pub fn addresses(&self) -> Vec<(SessionId, SocketAddr)> {
        self.sessions
            .values()
            .map(|session| (session.id, session.addr))
            .collect()
    }

    pub fn addr_of(&self, id: SessionId) -> Option<SocketAddr> {
        self.sessions.get(&id).map(|session| session.addr)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn input(sequence: u32, timestamp: u64) -> InputState {
        InputState {
            sequence,
            timestamp,
            move_x: 1.0,
            move_z: 0.0,
        }
    }

    #[test]
    fn test_admit_assigns_increasing_ids() {
        let mut manager = SessionManager::new(4);
        assert_eq!(manager.admit(addr(9001)), Some(1));
        assert_eq!(manager.admit(addr(9002)), Some(2));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn test_capacity_is_enforced() {
        let mut manager = SessionManager::new(1);
        assert!(manager.admit(addr(9001)).is_some());
        assert_eq!(manager.admit(addr(9002)), None);
    }

    #[test]
    fn test_reconnect_from_same_address_reuses_session() {
        let mut manager = SessionManager::new(1);
        let first = manager.admit(addr(9001));
        assert_eq!(manager.admit(addr(9001)), first);
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_issuer_is_resolved_by_address() {
        let mut manager = SessionManager::new(4);
        let a = manager.admit(addr(9001)).unwrap();
        let b = manager.admit(addr(9002)).unwrap();
        assert_eq!(manager.session_for(addr(9002)), Some(b));
        assert_eq!(manager.session_for(addr(9001)), Some(a));
        assert_eq!(manager.session_for(addr(9003)), None);
    }

    #[test]
    fn test_inputs_sorted_and_deduplicated() {
        let mut manager = SessionManager::new(4);
        let a = manager.admit(addr(9001)).unwrap();
        let b = manager.admit(addr(9002)).unwrap();
        assert!(manager.queue_input(a, input(2, 30)));
        assert!(manager.queue_input(b, input(1, 20)));
        assert!(manager.queue_input(a, input(1, 10)));
        assert!(!manager.queue_input(a, input(1, 10)));

        let order: Vec<(SessionId, u32)> = manager
            .inputs_in_arrival_order()
            .into_iter()
            .map(|(id, input)| (id, input.sequence))
            .collect();
        assert_eq!(order, vec![(a, 1), (b, 1), (a, 2)]);
    }

    #[test]
    fn test_processed_inputs_are_dropped() {
        let mut manager = SessionManager::new(4);
        let a = manager.admit(addr(9001)).unwrap();
        manager.queue_input(a, input(1, 10));
        manager.queue_input(a, input(2, 20));
        manager.mark_processed(a, 1);
        assert_eq!(manager.last_processed_input(a), 1);
        assert_eq!(manager.get(a).unwrap().pending_inputs.len(), 1);
        assert!(!manager.queue_input(a, input(1, 10)));
    }

    #[test]
    fn test_silent_sessions_expire() {
        let mut manager = SessionManager::new(4);
        let a = manager.admit(addr(9001)).unwrap();
        let b = manager.admit(addr(9002)).unwrap();
        manager.sessions.get_mut(&a).unwrap().last_seen = Instant::now() - Duration::from_secs(6);

        assert_eq!(manager.expire_silent(SESSION_TIMEOUT), vec![a]);
        assert!(manager.get(a).is_none());
        assert!(manager.get(b).is_some());
    }

    #[test]
    fn test_touch_keeps_session_alive() {
        let mut manager = SessionManager::new(4);
        let a = manager.admit(addr(9001)).unwrap();
        manager.sessions.get_mut(&a).unwrap().last_seen = Instant::now() - Duration::from_secs(6);
        manager.touch(a);
        assert!(manager.expire_silent(SESSION_TIMEOUT).is_empty());
    }
}
