//! Hideout occupancy.
//!
//! Each hideout holds at most one occupant. The registry keeps the reverse
//! mapping as well, so agent detection can skip hidden participants and the
//! rendezvous can evict them without scanning every hideout.

use crate::config::HideoutLayout;
use crate::error::CommandError;
use crate::events::Outbox;
use crate::world::World;
use log::{debug, info};
use shared::{Event, HideoutView, SessionId, Vec3};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Hideout {
    pub id: u32,
    pub entrance: Vec3,
    pub hide_position: Vec3,
    occupant: Option<SessionId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HideOutcome {
    Entered,
    Exited,
}

#[derive(Debug, Default)]
pub struct HideoutRegistry {
    hideouts: Vec<Hideout>,
    by_occupant: HashMap<SessionId, u32>,
    range: f32,
}

impl HideoutRegistry {
    pub fn new(layouts: &[HideoutLayout], range: f32) -> Self {
        Self {
            hideouts: layouts
                .iter()
                .enumerate()
                .map(|(id, layout)| Hideout {
                    id: id as u32,
                    entrance: layout.entrance,
                    hide_position: layout.hide_position,
                    occupant: None,
                })
                .collect(),
            by_occupant: HashMap::new(),
            range,
        }
    }

    pub fn get(&self, id: u32) -> Option<&Hideout> {
        self.hideouts.get(id as usize)
    }

    pub fn occupant(&self, id: u32) -> Option<SessionId> {
        self.get(id).and_then(|h| h.occupant)
    }

    pub fn is_hidden(&self, session: SessionId) -> bool {
        self.by_occupant.contains_key(&session)
    }

    pub fn hideout_of(&self, session: SessionId) -> Option<u32> {
        self.by_occupant.get(&session).copied()
    }

    /// Enter when the hideout is empty, leave when the requester is the
    /// occupant, refuse otherwise.
    pub fn request(
        &mut self,
        id: u32,
        session: SessionId,
        world: &mut World,
        outbox: &mut Outbox,
    ) -> Result<HideOutcome, CommandError> {
        let hideout = self
            .hideouts
            .get_mut(id as usize)
            .ok_or(CommandError::UnknownObject)?;
        if !world.is_alive(session) {
            return Err(CommandError::NoCharacter);
        }
        let position = world
            .position_of(session)
            .ok_or(CommandError::NoCharacter)?;

        match hideout.occupant {
            None => {
                if self.by_occupant.contains_key(&session) {
                    return Err(CommandError::AlreadyHidden);
                }
                if position.planar_distance(hideout.entrance) > self.range {
                    return Err(CommandError::OutOfRange);
                }
                hideout.occupant = Some(session);
                self.by_occupant.insert(session, id);
                if let Some(character) = world.character_of_mut(session) {
                    character.position = hideout.hide_position;
                }
                info!("Participant {} hid in hideout {}", session, id);
                outbox.all(Event::HideoutState {
                    hideout: id,
                    occupied: true,
                });
                outbox.to(
                    session,
                    Event::Notice {
                        message: "you are hiding".to_string(),
                    },
                );
                Ok(HideOutcome::Entered)
            }
            Some(occupant) if occupant == session => {
                hideout.occupant = None;
                self.by_occupant.remove(&session);
                if let Some(character) = world.character_of_mut(session) {
                    character.position = hideout.entrance;
                }
                info!("Participant {} left hideout {}", session, id);
                outbox.all(Event::HideoutState {
                    hideout: id,
                    occupied: false,
                });
                Ok(HideOutcome::Exited)
            }
            Some(_) => Err(CommandError::HideoutOccupied),
        }
    }

    /// Evicts `session` to the hideout entrance. Returns false if they were
    /// not hiding.
    pub fn force_unhide(&mut self, session: SessionId, world: &mut World, outbox: &mut Outbox) -> bool {
        let Some(id) = self.release(session, outbox) else {
            return false;
        };
        if let (Some(hideout), Some(character)) =
            (self.hideouts.get(id as usize), world.character_of_mut(session))
        {
            character.position = hideout.entrance;
        }
        debug!("Participant {} forced out of hideout {}", session, id);
        true
    }

    /// Clears any occupancy held by `session` without moving anything.
    pub fn release(&mut self, session: SessionId, outbox: &mut Outbox) -> Option<u32> {
        let id = self.by_occupant.remove(&session)?;
        if let Some(hideout) = self.hideouts.get_mut(id as usize) {
            if hideout.occupant == Some(session) {
                hideout.occupant = None;
            }
        }
        outbox.all(Event::HideoutState {
            hideout: id,
            occupied: false,
        });
        Some(id)
    }

    pub fn views(&self) -> Vec<HideoutView> {
        self.hideouts
            .iter()
            .map(|h| HideoutView {
                id: h.id,
                occupied: h.occupant.is_some(),
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.by_occupant.clear();
        for hideout in &mut self.hideouts {
            hideout.occupant = None;
        }
    }
}
