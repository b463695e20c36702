//! # Authority library
//!
//! The authoritative simulation core for a social-deduction survival round.
//! Observers connect over UDP, send commands and movement inputs, and receive
//! targeted events plus their own tailored snapshot every tick. Everything
//! that decides the outcome of a round runs here.
//!
//! ## Round structure
//!
//! A round starts in the lobby. The host starts it, every participant is
//! dealt a role, and the round then alternates day and night until the last
//! day has passed. Exactly one participant is the Carrier, who may infect one
//! other participant per night. Pending infections are resolved a few seconds
//! after dawn, in a fixed priority order decided when the infection was
//! requested. Participants who die, whether converted or attacked, come back
//! as hostile agents that hunt the living.
//!
//! ## Tick order
//!
//! [`game::GameState::update`] advances the subsystems in this order:
//! 1. delayed character spawns
//! 2. movement for participants allowed to move
//! 3. the day/night countdown and the phase transition hooks
//! 4. morning infection resolution
//! 5. door cooldowns
//! 6. hostile agents
//! 7. the rendezvous bell
//! 8. lookup retries and movement permission updates
//!
//! No subsystem blocks or sleeps. Every timed behaviour is a countdown field
//! advanced by the tick delta.
//!
//! ## Modules
//!
//! - `config` and `error`: tunables, validation and the rejection taxonomy
//! - `world`: participants and the generational character arena
//! - `day_night`, `roles`, `infection`: round clock and role engine
//! - `agent`: the hostile agent state machine
//! - `door`, `hideout`, `rendezvous`: interactable arbitration
//! - `events`, `lookup`, `timer`, `geometry`: shared plumbing
//! - `client_manager` and `network`: sessions and the UDP main loop

pub mod agent;
pub mod client_manager;
pub mod config;
pub mod day_night;
pub mod door;
pub mod error;
pub mod events;
pub mod game;
pub mod geometry;
pub mod hideout;
pub mod infection;
pub mod lookup;
pub mod network;
pub mod rendezvous;
pub mod roles;
pub mod timer;
pub mod world;
