//! # Observer client library
//!
//! A headless observer for the authority. It connects over UDP, keeps a
//! projection of everything the authority chooses to tell it, and turns
//! typed console lines into commands and movement inputs.
//!
//! The observer never decides anything. Every command it sends is validated
//! by the authority, and its projection is overwritten by each snapshot.
//!
//! ## Modules
//!
//! ### `game`
//! [`game::ObserverState`] applies snapshots and events. Snapshots replace
//! the replicated views wholesale and acknowledge buffered inputs. Events
//! patch the views between snapshots and feed a bounded notice log.
//!
//! ### `input`
//! Console parsing and input sequencing.
//!
//! ### `network`
//! The UDP loop: inbound packets, console lines and a one-second heartbeat
//! multiplexed with `tokio::select!`.

pub mod game;
pub mod input;
pub mod network;
