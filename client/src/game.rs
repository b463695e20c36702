use log::{debug, info, warn};
use shared::{
    AgentMode, AgentView, ClockView, DoorView, Event, HideoutView, InputState, Packet,
    ParticipantView, RendezvousView, RoundStatus, SessionId, MAX_HEALTH,
};
use std::collections::{BTreeMap, VecDeque};

/// How many notices the observer keeps around.
pub const NOTICE_LOG_LIMIT: usize = 32;

/// The observer's copy of authority state, fed by snapshots and events.
#[derive(Debug)]
pub struct ObserverState {
    pub session_id: Option<SessionId>,
    pub tick: u32,
    pub clock: Option<ClockView>,
    pub participants: BTreeMap<SessionId, ParticipantView>,
    pub agents: Vec<AgentView>,
    pub doors: Vec<DoorView>,
    pub hideouts: Vec<HideoutView>,
    pub rendezvous: Option<RendezvousView>,
    pub own_role: Option<String>,
    pub carrier: bool,
    pub can_move: bool,
    pub alive: bool,
    pub health: f32,
    pub seconds_left: Option<u32>,
    pub last_processed_input: u32,
    /// Inputs sent but not yet acknowledged by a snapshot.
    pub input_history: Vec<InputState>,
    notices: VecDeque<String>,
}

impl Default for ObserverState {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverState {
    pub fn new() -> Self {
        Self {
            session_id: None,
            tick: 0,
            clock: None,
            participants: BTreeMap::new(),
            agents: Vec::new(),
            doors: Vec::new(),
            hideouts: Vec::new(),
            rendezvous: None,
            own_role: None,
            carrier: false,
            can_move: true,
            alive: true,
            health: MAX_HEALTH,
            seconds_left: None,
            last_processed_input: 0,
            input_history: Vec::new(),
            notices: VecDeque::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.session_id.is_some()
    }

    pub fn notices(&self) -> impl Iterator<Item = &String> {
        self.notices.iter()
    }

    pub fn push_notice(&mut self, message: String) {
        info!("{}", message);
        if self.notices.len() == NOTICE_LOG_LIMIT {
            self.notices.pop_front();
        }
        self.notices.push_back(message);
    }

    pub fn record_input(&mut self, input: InputState) {
        self.input_history.push(input);
    }

    /// Applies one packet from the authority. Returns false if it was
    /// ignored, e.g. a snapshot older than the one already applied.
    pub fn apply_packet(&mut self, packet: Packet) -> bool {
        match packet {
            Packet::Connected { session_id } => {
                self.session_id = Some(session_id);
                self.push_notice(format!("connected as participant {}", session_id));
                true
            }
            Packet::Disconnected { reason } => {
                warn!("Disconnected: {}", reason);
                self.session_id = None;
                true
            }
            Packet::Event(event) => {
                self.apply_event(event);
                true
            }
            Packet::Snapshot {
                tick,
                last_processed_input,
                clock,
                participants,
                agents,
                doors,
                hideouts,
                rendezvous,
                ..
            } => {
                if tick < self.tick {
                    debug!("Dropped stale snapshot {} (have {})", tick, self.tick);
                    return false;
                }
                self.tick = tick;
                self.clock = Some(clock);
                self.participants = participants.into_iter().map(|p| (p.id, p)).collect();
                self.agents = agents;
                self.doors = doors;
                self.hideouts = hideouts;
                self.rendezvous = Some(rendezvous);

                self.last_processed_input = last_processed_input;
                self.input_history
                    .retain(|input| input.sequence > last_processed_input);

                if let Some(me) = self.session_id.and_then(|id| self.participants.get(&id)) {
                    self.alive = me.alive;
                    if me.role.is_some() {
                        self.own_role = me.role.clone();
                    }
                }
                true
            }
            other => {
                warn!("Unexpected packet from authority: {:?}", other);
                false
            }
        }
    }

    pub fn apply_event(&mut self, event: Event) {
        match event {
            Event::PhaseChanged { phase, day } => {
                if let Some(clock) = self.clock.as_mut() {
                    clock.phase = phase;
                    clock.day = day;
                    clock.status = RoundStatus::Running;
                }
            }
            Event::DayStarted { day } => self.push_notice(format!("day {} begins", day)),
            Event::NightStarted { day } => self.push_notice(format!("night {} falls", day)),
            Event::GameOver { day } => {
                if let Some(clock) = self.clock.as_mut() {
                    clock.status = RoundStatus::Over;
                }
                self.push_notice(format!("the round is over after {} days", day));
            }
            Event::TimeRemaining {
                seconds_left,
                warning,
                ..
            } => {
                self.seconds_left = Some(seconds_left);
                if warning {
                    debug!("{}s left", seconds_left);
                }
            }
            Event::MovementPermission { can_move } => self.can_move = can_move,
            Event::RoleAssigned { role } => {
                self.push_notice(format!("your role is {}", role));
                self.own_role = Some(role);
            }
            Event::CarrierAssigned => {
                self.carrier = true;
                self.push_notice("you carry the infection".to_string());
            }
            Event::InfectFeedback { message, .. } => self.push_notice(message),
            Event::InfectionResolved { outcome } => {
                self.push_notice(format!("you survived the night ({:?})", outcome))
            }
            Event::Notice { message } => self.push_notice(message),
            Event::Denied { reason } => self.push_notice(format!("denied: {}", reason)),
            Event::DeathNotice { position, cause } => self.push_notice(format!(
                "someone died at ({:.1}, {:.1}) by {:?}",
                position.x, position.z, cause
            )),
            Event::YouDied { cause } => {
                self.alive = false;
                self.can_move = false;
                self.health = 0.0;
                self.push_notice(format!("you died ({:?})", cause));
            }
            Event::Damaged { health } => self.health = health,
            Event::AgentSpawned { agent, position } => {
                if !self.agents.iter().any(|a| a.id == agent) {
                    self.agents.push(AgentView {
                        id: agent,
                        position,
                        mode: AgentMode::Search,
                    });
                }
            }
            Event::DoorState { door, open, busy } => {
                match self.doors.iter_mut().find(|d| d.id == door) {
                    Some(view) => {
                        view.open = open;
                        view.busy = busy;
                    }
                    None => self.doors.push(DoorView {
                        id: door,
                        open,
                        busy,
                    }),
                }
            }
            Event::HideoutState { hideout, occupied } => {
                match self.hideouts.iter_mut().find(|h| h.id == hideout) {
                    Some(view) => view.occupied = occupied,
                    None => self.hideouts.push(HideoutView {
                        id: hideout,
                        occupied,
                    }),
                }
            }
            Event::RendezvousChanged { state, alive_count } => {
                self.rendezvous = Some(RendezvousView { state, alive_count });
            }
            Event::RendezvousCountdown { seconds_left } => {
                self.push_notice(format!("the bell arms in {}s", seconds_left))
            }
            Event::Teleported { session, position } => {
                if let Some(participant) = self.participants.get_mut(&session) {
                    participant.position = Some(position);
                }
            }
            Event::DeathEffect { .. } | Event::AttackCue { .. } => {}
        }
    }
}
