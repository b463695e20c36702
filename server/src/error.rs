use shared::{Phase, SessionId};

/// How a rejected command is classified for logging and feedback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidCommand,
    LookupMiss,
    StateConflict,
}

/// Why the authority refused a command. Every variant is reported back to
/// the issuer as a private feedback message and never aborts the tick.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("issuer {claimed} does not match session {actual}")]
    IssuerMismatch { claimed: SessionId, actual: SessionId },
    #[error("only the host can do that")]
    NotHost,
    #[error("the round has already started")]
    RoundAlreadyStarted,
    #[error("the round is not running")]
    RoundNotRunning,
    #[error("no participants are connected")]
    NoParticipants,
    #[error("cannot {action} during the {phase}")]
    WrongPhase { action: &'static str, phase: Phase },
    #[error("you do not have that ability")]
    MissingCapability,
    #[error("ability already used")]
    AbilityUsed,
    #[error("you have no live character")]
    NoCharacter,
    #[error("target not found")]
    TargetNotFound,
    #[error("target is out of range")]
    OutOfRange,
    #[error("cannot target yourself")]
    SelfTarget,
    #[error("target is already infected")]
    AlreadyPending,
    #[error("gas mask already used")]
    MaskUsed,
    #[error("unknown object")]
    UnknownObject,
    #[error("the door is busy")]
    DoorBusy,
    #[error("a player is in the doorway")]
    DoorBlocked,
    #[error("someone is already hiding there")]
    HideoutOccupied,
    #[error("you are already hiding somewhere else")]
    AlreadyHidden,
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::NoCharacter | CommandError::TargetNotFound => ErrorKind::LookupMiss,
            CommandError::DoorBusy
            | CommandError::DoorBlocked
            | CommandError::HideoutOccupied
            | CommandError::AlreadyHidden
            | CommandError::AlreadyPending
            | CommandError::MaskUsed => ErrorKind::StateConflict,
            _ => ErrorKind::InvalidCommand,
        }
    }
}

/// Problems found while validating a [`crate::config::GameConfig`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("role catalogue is empty")]
    EmptyCatalogue,
    #[error("unknown role name `{0}`")]
    UnknownRole(String),
    #[error("role catalogue lists the Carrier more than once")]
    DuplicateCarrier,
    #[error("role catalogue needs at least one role besides the Carrier")]
    NoOrdinaryRoles,
    #[error("mandatory role `{0}` is not in the catalogue")]
    MandatoryNotInCatalogue(String),
    #[error("{0} must be positive")]
    NonPositive(&'static str),
    #[error("max_days must be at least 1")]
    NoDays,
    #[error("tick rate must be between 1 and 240")]
    TickRate,
}
