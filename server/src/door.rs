//! Door arbitration.
//!
//! A door is a solid panel plus a doorway trigger. Toggling takes the door's
//! busy flag for the cooldown period, so two participants racing for the same
//! door get exactly one toggle between them. Closed or busy doors also block
//! agent sight and agent wander destinations.

use crate::agent::AgentSystem;
use crate::config::{DoorLayout, InteractConfig};
use crate::error::CommandError;
use crate::events::Outbox;
use crate::geometry::Aabb;
use crate::timer::Countdown;
use crate::world::World;
use log::{debug, info};
use shared::{DoorView, Event, SessionId, Vec3};

#[derive(Debug, Clone)]
pub struct Door {
    pub id: u32,
    pub panel: Aabb,
    pub trigger: Aabb,
    open: bool,
    busy: bool,
    cooldown: Countdown,
}

impl Door {
    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Closed or mid-swing doors are opaque to agents.
    fn is_opaque(&self) -> bool {
        !self.open || self.busy
    }
}

#[derive(Debug, Default)]
pub struct DoorSystem {
    doors: Vec<Door>,
    cooldown: f32,
    range: f32,
}

impl DoorSystem {
    pub fn new(layouts: &[DoorLayout], config: &InteractConfig) -> Self {
        Self {
            doors: layouts
                .iter()
                .enumerate()
                .map(|(id, layout)| Door {
                    id: id as u32,
                    panel: layout.panel,
                    trigger: layout.trigger,
                    open: false,
                    busy: false,
                    cooldown: Countdown::idle(),
                })
                .collect(),
            cooldown: config.door_cooldown,
            range: config.range,
        }
    }

    pub fn get(&self, id: u32) -> Option<&Door> {
        self.doors.get(id as usize)
    }

    /// Toggles door `id` for `session`. Returns the new open state.
    pub fn request_toggle(
        &mut self,
        id: u32,
        session: SessionId,
        world: &World,
        agents: &mut AgentSystem,
        outbox: &mut Outbox,
    ) -> Result<bool, CommandError> {
        let door = self
            .doors
            .get_mut(id as usize)
            .ok_or(CommandError::UnknownObject)?;
        if door.busy {
            return Err(CommandError::DoorBusy);
        }
        let position = world
            .position_of(session)
            .filter(|_| world.is_alive(session))
            .ok_or(CommandError::NoCharacter)?;
        if position.planar_distance(door.panel.center()) > self.range {
            return Err(CommandError::OutOfRange);
        }

        door.busy = true;
        if door.open {
            let doorway_blocked = world
                .alive_sessions()
                .into_iter()
                .filter_map(|s| world.position_of(s))
                .any(|p| door.trigger.contains(p));
            if doorway_blocked {
                door.busy = false;
                debug!("Door {} close denied, doorway occupied", id);
                return Err(CommandError::DoorBlocked);
            }
        }

        let displaced = agents.displace_from(&door.panel);
        if displaced > 0 {
            debug!("Door {} pushed {} agents clear", id, displaced);
        }

        door.open = !door.open;
        door.cooldown.start(self.cooldown);
        info!(
            "Participant {} {} door {}",
            session,
            if door.open { "opened" } else { "closed" },
            id
        );
        outbox.all(Event::DoorState {
            door: id,
            open: door.open,
            busy: true,
        });
        outbox.to(
            session,
            Event::Notice {
                message: if door.open {
                    "the door is open".to_string()
                } else {
                    "the door is closed".to_string()
                },
            },
        );
        Ok(door.open)
    }

    /// Releases doors whose cooldown ran out.
    pub fn tick(&mut self, dt: f32, outbox: &mut Outbox) {
        for door in &mut self.doors {
            if door.cooldown.advance(dt) {
                door.busy = false;
                outbox.all(Event::DoorState {
                    door: door.id,
                    open: door.open,
                    busy: false,
                });
            }
        }
    }

    pub fn blocks_sight(&self, from: Vec3, to: Vec3) -> bool {
        self.doors
            .iter()
            .any(|d| d.is_opaque() && d.panel.intersects_segment(from, to))
    }

    /// True when a closed or busy door panel overlaps the sphere.
    pub fn blocks_point(&self, point: Vec3, radius: f32) -> bool {
        self.doors
            .iter()
            .any(|d| d.is_opaque() && d.panel.intersects_sphere(point, radius))
    }

    /// True when a closed panel stands in the way of a body at `point`.
    pub fn blocks_movement(&self, point: Vec3, radius: f32) -> bool {
        self.doors
            .iter()
            .any(|d| !d.open && d.panel.intersects_sphere(point, radius))
    }

    pub fn views(&self) -> Vec<DoorView> {
        self.doors
            .iter()
            .map(|d| DoorView {
                id: d.id,
                open: d.open,
                busy: d.busy,
            })
            .collect()
    }

    pub fn reset(&mut self) {
        for door in &mut self.doors {
            door.open = false;
            door.busy = false;
            door.cooldown.stop();
        }
    }
}
