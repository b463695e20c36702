//! Infection requests and their morning resolution.
//!
//! An infection is only ever *pending* during the night. What decides its
//! fate is the set of protections that were active when the Carrier acted, so
//! that snapshot is frozen into the target's state on the spot and read back
//! in priority order once the morning grace delay runs out.

use crate::config::{InfectionConfig, RoundConfig};
use crate::day_night::DayNightCycle;
use crate::error::CommandError;
use crate::events::Outbox;
use crate::roles::{Capability, RoleBook};
use crate::timer::Countdown;
use crate::world::World;
use log::{debug, info};
use shared::{Event, InfectionOutcome, Phase, SessionId};
use std::collections::HashSet;

/// Protections that were active at the instant an infection was requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProtectionSnapshot {
    pub protection: bool,
    pub immunity: bool,
    pub mask: bool,
}

impl ProtectionSnapshot {
    pub fn any(&self) -> bool {
        self.protection || self.immunity || self.mask
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Protected,
    Immunized,
    MaskSaved,
    Converted,
}

impl Resolution {
    pub fn outcome(&self) -> Option<InfectionOutcome> {
        match self {
            Resolution::Protected => Some(InfectionOutcome::Protected),
            Resolution::Immunized => Some(InfectionOutcome::Immunized),
            Resolution::MaskSaved => Some(InfectionOutcome::MaskSaved),
            Resolution::Converted => None,
        }
    }
}

/// Private per-participant infection bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InfectionState {
    pub is_infected: bool,
    pub pending_infection: bool,
    pub protected_this_night: bool,
    pub snapshot: ProtectionSnapshot,
    pub under_protection: bool,
    pub immune_from_consumable: bool,
    pub mask_equipped: bool,
    pub mask_consumed: bool,
}

impl InfectionState {
    /// Marks the infection as pending and freezes the protection snapshot.
    /// Returns false, changing nothing, if an infection is already pending.
    pub fn mark_pending(&mut self) -> bool {
        if self.pending_infection {
            return false;
        }
        self.snapshot = ProtectionSnapshot {
            protection: self.under_protection,
            immunity: self.immune_from_consumable,
            mask: self.mask_equipped,
        };
        self.protected_this_night = self.snapshot.any();
        self.pending_infection = true;
        self.is_infected = true;
        true
    }

    /// Settles a pending infection. Exactly one branch applies, in the order
    /// protection, immunity, mask, conversion. Without a pending infection
    /// this does nothing and returns `None`.
    pub fn resolve(&mut self) -> Option<Resolution> {
        if !self.pending_infection {
            return None;
        }

        let resolution = if self.snapshot.protection {
            self.is_infected = false;
            Resolution::Protected
        } else if self.snapshot.immunity {
            self.is_infected = false;
            self.immune_from_consumable = false;
            Resolution::Immunized
        } else if self.snapshot.mask {
            self.is_infected = false;
            self.mask_equipped = false;
            self.mask_consumed = true;
            Resolution::MaskSaved
        } else {
            self.is_infected = true;
            Resolution::Converted
        };

        self.pending_infection = false;
        self.protected_this_night = false;
        self.snapshot = ProtectionSnapshot::default();
        Some(resolution)
    }

    pub fn equip_mask(&mut self) -> Result<(), CommandError> {
        if self.mask_equipped || self.mask_consumed {
            return Err(CommandError::MaskUsed);
        }
        self.mask_equipped = true;
        Ok(())
    }
}

#[derive(Debug)]
pub struct InfectionEngine {
    config: InfectionConfig,
    grace: f32,
    attempt_used: bool,
    protect_used: HashSet<SessionId>,
    immunize_used: HashSet<SessionId>,
    resolution: Countdown,
}

impl InfectionEngine {
    pub fn new(round: &RoundConfig, config: &InfectionConfig) -> Self {
        Self {
            config: config.clone(),
            grace: round.morning_grace,
            attempt_used: false,
            protect_used: HashSet::new(),
            immunize_used: HashSet::new(),
            resolution: Countdown::idle(),
        }
    }

    pub fn attempt_used(&self) -> bool {
        self.attempt_used
    }

    pub fn resolution_pending(&self) -> bool {
        self.resolution.is_running()
    }

    pub fn reset(&mut self) {
        self.attempt_used = false;
        self.protect_used.clear();
        self.immunize_used.clear();
        self.resolution.stop();
    }

    /// Night refreshes every once-per-cycle ability.
    pub fn on_night_start(&mut self) {
        self.attempt_used = false;
        self.protect_used.clear();
        self.immunize_used.clear();
    }

    pub fn on_day_start(&mut self) {
        self.resolution.start(self.grace);
    }

    /// Returns true on the tick the morning resolution is due.
    pub fn tick(&mut self, dt: f32) -> bool {
        self.resolution.advance(dt)
    }

    pub fn request_infect(
        &mut self,
        issuer: SessionId,
        target: SessionId,
        world: &mut World,
        roles: &RoleBook,
        cycle: &DayNightCycle,
        outbox: &mut Outbox,
    ) -> Result<(), CommandError> {
        if !cycle.is_running() {
            return Err(CommandError::RoundNotRunning);
        }
        if cycle.phase() != Phase::Night {
            return Err(CommandError::WrongPhase {
                action: "infect",
                phase: cycle.phase(),
            });
        }
        if !roles.is_carrier(issuer) {
            return Err(CommandError::MissingCapability);
        }
        let origin = world
            .position_of(issuer)
            .filter(|_| world.is_alive(issuer))
            .ok_or(CommandError::NoCharacter)?;
        if self.attempt_used {
            return Err(CommandError::AbilityUsed);
        }
        if target == issuer {
            return Err(CommandError::SelfTarget);
        }
        let target_pos = world
            .position_of(target)
            .filter(|_| world.is_alive(target))
            .ok_or(CommandError::TargetNotFound)?;
        if origin.planar_distance(target_pos) > self.config.infect_range {
            return Err(CommandError::OutOfRange);
        }

        let state = &mut world
            .participant_mut(target)
            .ok_or(CommandError::TargetNotFound)?
            .infection;
        if !state.mark_pending() {
            return Err(CommandError::AlreadyPending);
        }
        self.attempt_used = true;
        debug!(
            "Infection pending on {} (protected snapshot: {:?})",
            target, state.snapshot
        );
        outbox.to(
            issuer,
            Event::InfectFeedback {
                success: true,
                message: "infection succeeded".to_string(),
            },
        );
        Ok(())
    }

    pub fn request_protect(
        &mut self,
        issuer: SessionId,
        target: SessionId,
        world: &mut World,
        roles: &RoleBook,
        cycle: &DayNightCycle,
        outbox: &mut Outbox,
    ) -> Result<(), CommandError> {
        Self::check_support(
            issuer,
            target,
            Capability::Nurse,
            &self.protect_used,
            self.config.protect_range,
            world,
            roles,
            cycle,
        )?;
        if let Some(participant) = world.participant_mut(target) {
            participant.infection.under_protection = true;
        }
        self.protect_used.insert(issuer);
        outbox.to(
            issuer,
            Event::Notice {
                message: format!("participant {} is protected tonight", target),
            },
        );
        Ok(())
    }

    pub fn request_immunize(
        &mut self,
        issuer: SessionId,
        target: SessionId,
        world: &mut World,
        roles: &RoleBook,
        cycle: &DayNightCycle,
        outbox: &mut Outbox,
    ) -> Result<(), CommandError> {
        Self::check_support(
            issuer,
            target,
            Capability::Pharmacist,
            &self.immunize_used,
            self.config.immunize_range,
            world,
            roles,
            cycle,
        )?;
        if let Some(participant) = world.participant_mut(target) {
            participant.infection.immune_from_consumable = true;
        }
        self.immunize_used.insert(issuer);
        outbox.to(
            issuer,
            Event::Notice {
                message: format!("participant {} received an immunity dose", target),
            },
        );
        Ok(())
    }

    pub fn equip_mask(
        &mut self,
        issuer: SessionId,
        world: &mut World,
        cycle: &DayNightCycle,
        outbox: &mut Outbox,
    ) -> Result<(), CommandError> {
        if !world.is_alive(issuer) {
            return Err(CommandError::NoCharacter);
        }
        if cycle.is_night() {
            return Err(CommandError::WrongPhase {
                action: "equip a gas mask",
                phase: Phase::Night,
            });
        }
        world
            .participant_mut(issuer)
            .ok_or(CommandError::NoCharacter)?
            .infection
            .equip_mask()?;
        outbox.to(
            issuer,
            Event::Notice {
                message: "gas mask equipped".to_string(),
            },
        );
        Ok(())
    }

    /// Settles every pending infection. Survivors hear privately how they
    /// were saved; the sessions returned must be converted by the caller.
    pub fn resolve_morning(&mut self, world: &mut World, outbox: &mut Outbox) -> Vec<SessionId> {
        let mut converted = Vec::new();
        for participant in world.participants_mut() {
            if let Some(resolution) = participant.infection.resolve() {
                match resolution.outcome() {
                    Some(outcome) => {
                        info!(
                            "Participant {} survived the night ({:?})",
                            participant.session, outcome
                        );
                        outbox.to(participant.session, Event::InfectionResolved { outcome });
                    }
                    None => converted.push(participant.session),
                }
            }
            participant.infection.under_protection = false;
        }
        converted
    }

    #[allow(clippy::too_many_arguments)]
    fn check_support(
        issuer: SessionId,
        target: SessionId,
        capability: Capability,
        used: &HashSet<SessionId>,
        range: f32,
        world: &World,
        roles: &RoleBook,
        cycle: &DayNightCycle,
    ) -> Result<(), CommandError> {
        if !cycle.is_running() {
            return Err(CommandError::RoundNotRunning);
        }
        if !roles.has(issuer, capability) {
            return Err(CommandError::MissingCapability);
        }
        let origin = world
            .position_of(issuer)
            .filter(|_| world.is_alive(issuer))
            .ok_or(CommandError::NoCharacter)?;
        if used.contains(&issuer) {
            return Err(CommandError::AbilityUsed);
        }
        let target_pos = world
            .position_of(target)
            .filter(|_| world.is_alive(target))
            .ok_or(CommandError::TargetNotFound)?;
        if origin.planar_distance(target_pos) > range {
            return Err(CommandError::OutOfRange);
        }
        Ok(())
    }
}
