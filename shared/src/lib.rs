use serde::{Deserialize, Serialize};
use std::fmt;

pub mod math;

pub use math::Vec3;

pub const PROTOCOL_VERSION: u32 = 1;
pub const PARTICIPANT_SPEED: f32 = 3.0;
pub const CARRIER_NIGHT_SPEED_MULTIPLIER: f32 = 1.5;
pub const MAX_HEALTH: f32 = 100.0;
pub const CHARACTER_RADIUS: f32 = 0.4;
pub const TELEPORT_SLOTS: usize = 8;

pub type SessionId = u32;
pub type AgentId = u32;

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Day,
    Night,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Day => write!(f, "day"),
            Phase::Night => write!(f, "night"),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RoundStatus {
    Lobby,
    Running,
    Over,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum RendezvousState {
    Disabled,
    Waiting,
    Ready,
    Activated,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    Search,
    Chase,
    Attack,
    Idle,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectId {
    Door(u32),
    Hideout(u32),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum DeathCause {
    Attack,
    Infection,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub enum InfectionOutcome {
    Protected,
    Immunized,
    MaskSaved,
}

/// Observer to authority requests. The authority validates every one of them.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Command {
    StartGame,
    ToggleDayNight,
    Infect { target: SessionId },
    Protect { target: SessionId },
    Immunize { target: SessionId },
    EquipMask,
    Interact { object: ObjectId },
}

/// Authority to observer notifications. Targeting is decided by the sender.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Event {
    PhaseChanged {
        phase: Phase,
        day: u32,
    },
    DayStarted {
        day: u32,
    },
    NightStarted {
        day: u32,
    },
    GameOver {
        day: u32,
    },
    TimeRemaining {
        seconds_left: u32,
        warning: bool,
        night: bool,
    },
    MovementPermission {
        can_move: bool,
    },
    RoleAssigned {
        role: String,
    },
    CarrierAssigned,
    InfectFeedback {
        success: bool,
        message: String,
    },
    InfectionResolved {
        outcome: InfectionOutcome,
    },
    Notice {
        message: String,
    },
    Denied {
        reason: String,
    },
    DeathNotice {
        position: Vec3,
        cause: DeathCause,
    },
    YouDied {
        cause: DeathCause,
    },
    DeathEffect {
        position: Vec3,
    },
    Damaged {
        health: f32,
    },
    AgentSpawned {
        agent: AgentId,
        position: Vec3,
    },
    AttackCue {
        agent: AgentId,
        variant: u8,
        duration: f32,
    },
    DoorState {
        door: u32,
        open: bool,
        busy: bool,
    },
    HideoutState {
        hideout: u32,
        occupied: bool,
    },
    RendezvousChanged {
        state: RendezvousState,
        alive_count: u32,
    },
    RendezvousCountdown {
        seconds_left: u32,
    },
    Teleported {
        session: SessionId,
        position: Vec3,
    },
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClockView {
    pub status: RoundStatus,
    pub phase: Phase,
    pub day: u32,
    pub max_days: u32,
    pub seconds_left: f32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ParticipantView {
    pub id: SessionId,
    pub position: Option<Vec3>,
    pub alive: bool,
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AgentView {
    pub id: AgentId,
    pub position: Vec3,
    pub mode: AgentMode,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct DoorView {
    pub id: u32,
    pub open: bool,
    pub busy: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HideoutView {
    pub id: u32,
    pub occupied: bool,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct RendezvousView {
    pub state: RendezvousState,
    pub alive_count: u32,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum Packet {
    Connect {
        client_version: u32,
    },
    Heartbeat,
    Input {
        sequence: u32,
        timestamp: u64,
        move_x: f32,
        move_z: f32,
    },
    Command {
        issuer: SessionId,
        command: Command,
    },
    Disconnect,

    Connected {
        session_id: SessionId,
    },
    Event(Event),
    Snapshot {
        tick: u32,
        timestamp: u64,
        last_processed_input: u32,
        clock: ClockView,
        participants: Vec<ParticipantView>,
        agents: Vec<AgentView>,
        doors: Vec<DoorView>,
        hideouts: Vec<HideoutView>,
        rendezvous: RendezvousView,
    },
    Disconnected {
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct InputState {
    pub sequence: u32,
    pub timestamp: u64,
    pub move_x: f32,
    pub move_z: f32,
}

impl InputState {
    /// Movement direction on the ground plane, clamped to unit length.
    pub fn direction(&self) -> Vec3 {
        let dir = Vec3::flat(self.move_x, self.move_z);
        if dir.length() > 1.0 {
            dir.normalized()
        } else {
            dir
        }
    }
}
