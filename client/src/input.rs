use shared::{Command, InputState, ObjectId};
use std::time::{SystemTime, UNIX_EPOCH};

/// What a console line asks the observer to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientAction {
    Command(Command),
    Move { x: f32, z: f32 },
    Quit,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty line")]
    Empty,
    #[error("unknown command '{0}'")]
    Unknown(String),
    #[error("missing {0}")]
    MissingArgument(&'static str),
    #[error("'{0}' is not a number")]
    BadNumber(String),
}

pub const HELP: &str = "commands: start | toggle | infect <id> | protect <id> | \
immunize <id> | mask | door <id> | hide <id> | move <x> <z> | stop | quit";

/// Parses one console line.
pub fn parse_line(line: &str) -> Result<ClientAction, ParseError> {
    let mut words = line.split_whitespace();
    let verb = words.next().ok_or(ParseError::Empty)?.to_ascii_lowercase();
    let mut arg = |what: &'static str| words.next().ok_or(ParseError::MissingArgument(what));

    let action = match verb.as_str() {
        "start" => ClientAction::Command(Command::StartGame),
        "toggle" => ClientAction::Command(Command::ToggleDayNight),
        "infect" => ClientAction::Command(Command::Infect {
            target: number(arg("target id")?)?,
        }),
        "protect" => ClientAction::Command(Command::Protect {
            target: number(arg("target id")?)?,
        }),
        "immunize" => ClientAction::Command(Command::Immunize {
            target: number(arg("target id")?)?,
        }),
        "mask" => ClientAction::Command(Command::EquipMask),
        "door" => ClientAction::Command(Command::Interact {
            object: ObjectId::Door(number(arg("door id")?)?),
        }),
        "hide" => ClientAction::Command(Command::Interact {
            object: ObjectId::Hideout(number(arg("hideout id")?)?),
        }),
        "move" => {
            let x = number(arg("x")?)?;
            let z = number(arg("z")?)?;
            ClientAction::Move { x, z }
        }
        "stop" => ClientAction::Move { x: 0.0, z: 0.0 },
        "quit" | "exit" => ClientAction::Quit,
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(action)
}

fn number<T: std::str::FromStr>(raw: &str) -> Result<T, ParseError> {
    raw.parse()
        .map_err(|_| ParseError::BadNumber(raw.to_string()))
}

/// Numbers movement inputs so the authority can acknowledge them.
pub struct InputManager {
    next_sequence: u32,
}

impl Default for InputManager {
    fn default() -> Self {
        Self::new()
    }
}

impl InputManager {
    pub fn new() -> Self {
        Self { next_sequence: 1 }
    }

    pub fn next_input(&mut self, move_x: f32, move_z: f32) -> InputState {
        let input = InputState {
            sequence: self.next_sequence,
            timestamp: timestamp_millis(),
            move_x,
            move_z,
        };
        self.next_sequence += 1;
        input
    }
}

fn timestamp_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
