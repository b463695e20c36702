use shared::{Event, SessionId};

/// One authority-to-observer message. `targets == None` means everyone.
#[derive(Debug, Clone, PartialEq)]
pub struct Broadcast {
    pub event: Event,
    pub targets: Option<Vec<SessionId>>,
}

/// Messages produced during a tick, delivered by the network layer afterwards.
#[derive(Debug, Default)]
pub struct Outbox {
    queue: Vec<Broadcast>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn all(&mut self, event: Event) {
        self.queue.push(Broadcast {
            event,
            targets: None,
        });
    }

    pub fn to(&mut self, session: SessionId, event: Event) {
        self.queue.push(Broadcast {
            event,
            targets: Some(vec![session]),
        });
    }

    /// Targeted broadcast; dropped when nobody is listed.
    pub fn to_many(&mut self, sessions: Vec<SessionId>, event: Event) {
        if sessions.is_empty() {
            return;
        }
        self.queue.push(Broadcast {
            event,
            targets: Some(sessions),
        });
    }

    pub fn drain(&mut self) -> Vec<Broadcast> {
        std::mem::take(&mut self.queue)
    }

    pub fn pending(&self) -> &[Broadcast] {
        &self.queue
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Broadcast {
    pub fn reaches(&self, session: SessionId) -> bool {
        match &self.targets {
            None => true,
            Some(targets) => targets.contains(&session),
        }
    }
}
