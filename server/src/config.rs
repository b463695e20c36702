//! Tunables for a round, grouped by the subsystem that reads them.
//!
//! `GameConfig::default()` is a playable setup on the built-in map. The server
//! binary overrides the handful of values exposed on its command line and then
//! calls [`GameConfig::validate`] before anything is bound.

use crate::error::ConfigError;
use crate::geometry::Aabb;
use crate::roles::Capability;
use shared::{Phase, Vec3, CARRIER_NIGHT_SPEED_MULTIPLIER, PARTICIPANT_SPEED};
use std::time::Duration;

/// Which phases hostile agents are allowed to act in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HuntPhase {
    Always,
    DayOnly,
    NightOnly,
}

impl HuntPhase {
    pub fn allows(&self, phase: Phase) -> bool {
        match self {
            HuntPhase::Always => true,
            HuntPhase::DayOnly => phase == Phase::Day,
            HuntPhase::NightOnly => phase == Phase::Night,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoundConfig {
    pub max_days: u32,
    pub day_duration: f32,
    pub night_duration: f32,
    /// Delay after dawn before pending infections are resolved.
    pub morning_grace: f32,
    /// Remaining seconds at or below which the countdown is flagged as a warning.
    pub warning_threshold: f32,
}

#[derive(Debug, Clone)]
pub struct RoleConfig {
    pub catalogue: Vec<String>,
    pub mandatory: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct InfectionConfig {
    pub infect_range: f32,
    pub protect_range: f32,
    pub immunize_range: f32,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub move_speed: f32,
    pub detection_radius: f32,
    pub wait_min: f32,
    pub wait_max: f32,
    pub attack_range: f32,
    pub attack_delay: f32,
    pub attack_damage: f32,
    pub attack_variants: u8,
    pub body_radius: f32,
    /// Clearance a wander destination needs from obstacles and shut doors.
    pub clearance: f32,
    pub hunt: HuntPhase,
}

#[derive(Debug, Clone)]
pub struct InteractConfig {
    pub range: f32,
    pub door_cooldown: f32,
}

#[derive(Debug, Clone)]
pub struct RendezvousConfig {
    pub arm_delay: f32,
    pub slot_distance: f32,
    pub first_usable_day: u32,
}

#[derive(Debug, Clone)]
pub struct MovementConfig {
    pub speed: f32,
    pub carrier_night_multiplier: f32,
    /// Delay between a session joining and its character existing.
    pub spawn_delay: f32,
    pub lookup_timeout: f32,
    pub lookup_interval: f32,
}

#[derive(Debug, Clone)]
pub struct DoorLayout {
    /// Solid panel while the door is shut.
    pub panel: Aabb,
    /// Doorway volume checked before closing.
    pub trigger: Aabb,
}

#[derive(Debug, Clone)]
pub struct HideoutLayout {
    pub entrance: Vec3,
    pub hide_position: Vec3,
}

#[derive(Debug, Clone)]
pub struct RendezvousLayout {
    pub trigger: Aabb,
    pub point: Vec3,
}

#[derive(Debug, Clone)]
pub struct MapLayout {
    pub walls: Vec<Aabb>,
    pub doors: Vec<DoorLayout>,
    pub hideouts: Vec<HideoutLayout>,
    pub rendezvous: RendezvousLayout,
    pub lobby_spawn: Vec3,
    pub spawn_area: Aabb,
    pub spawn_separation: f32,
    pub spawn_attempts: u32,
}

impl Default for MapLayout {
    fn default() -> Self {
        Self {
            walls: vec![
                Aabb::floor_rect(-16.0, -16.0, 16.0, -15.0),
                Aabb::floor_rect(-16.0, 15.0, 16.0, 16.0),
                Aabb::floor_rect(-16.0, -15.0, -15.0, 15.0),
                Aabb::floor_rect(15.0, -15.0, 16.0, 15.0),
                // Partition with a single doorway at z in [-1, 1].
                Aabb::floor_rect(4.8, -15.0, 5.2, -1.0),
                Aabb::floor_rect(4.8, 1.0, 5.2, 15.0),
            ],
            doors: vec![DoorLayout {
                panel: Aabb::floor_rect(4.9, -1.0, 5.1, 1.0),
                trigger: Aabb::floor_rect(4.0, -1.0, 6.0, 1.0),
            }],
            hideouts: vec![
                HideoutLayout {
                    entrance: Vec3::flat(-10.0, 10.0),
                    hide_position: Vec3::flat(-10.0, 12.0),
                },
                HideoutLayout {
                    entrance: Vec3::flat(10.0, -10.0),
                    hide_position: Vec3::flat(10.0, -12.0),
                },
            ],
            rendezvous: RendezvousLayout {
                trigger: Aabb::floor_rect(-2.0, -2.0, 2.0, 2.0),
                point: Vec3::ZERO,
            },
            lobby_spawn: Vec3::flat(-8.0, -8.0),
            spawn_area: Aabb::floor_rect(-13.0, -13.0, 3.0, 13.0),
            spawn_separation: 1.0,
            spawn_attempts: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GameConfig {
    pub tick_rate: u32,
    pub max_clients: usize,
    pub seed: Option<u64>,
    pub round: RoundConfig,
    pub roles: RoleConfig,
    pub infection: InfectionConfig,
    pub agent: AgentConfig,
    pub interact: InteractConfig,
    pub rendezvous: RendezvousConfig,
    pub movement: MovementConfig,
    pub map: MapLayout,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            max_clients: 16,
            seed: None,
            round: RoundConfig {
                max_days: 7,
                day_duration: 60.0,
                night_duration: 30.0,
                morning_grace: 5.0,
                warning_threshold: 10.0,
            },
            roles: RoleConfig {
                catalogue: Capability::ALL
                    .iter()
                    .map(|c| c.role_name().to_string())
                    .collect(),
                mandatory: vec![Capability::Carrier.role_name().to_string()],
            },
            infection: InfectionConfig {
                infect_range: 2.0,
                protect_range: 3.0,
                immunize_range: 3.0,
            },
            agent: AgentConfig {
                move_speed: 2.0,
                detection_radius: 8.0,
                wait_min: 1.0,
                wait_max: 3.0,
                attack_range: 1.0,
                attack_delay: 0.5,
                attack_damage: 50.0,
                attack_variants: 2,
                body_radius: 0.4,
                clearance: 0.15,
                hunt: HuntPhase::Always,
            },
            interact: InteractConfig {
                range: 1.5,
                door_cooldown: 1.0,
            },
            rendezvous: RendezvousConfig {
                arm_delay: 5.0,
                slot_distance: 2.0,
                first_usable_day: 2,
            },
            movement: MovementConfig {
                speed: PARTICIPANT_SPEED,
                carrier_night_multiplier: CARRIER_NIGHT_SPEED_MULTIPLIER,
                spawn_delay: 0.1,
                lookup_timeout: 3.0,
                lookup_interval: 0.15,
            },
            map: MapLayout::default(),
        }
    }
}

impl GameConfig {
    pub fn tick_duration(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate.max(1)))
    }

    pub fn tick_seconds(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > 240 {
            return Err(ConfigError::TickRate);
        }
        if self.round.max_days == 0 {
            return Err(ConfigError::NoDays);
        }

        for (name, value) in [
            ("day_duration", self.round.day_duration),
            ("night_duration", self.round.night_duration),
            ("agent.move_speed", self.agent.move_speed),
            ("agent.attack_delay", self.agent.attack_delay),
            ("agent.wait_max", self.agent.wait_max),
            ("interact.range", self.interact.range),
            ("movement.speed", self.movement.speed),
            ("movement.lookup_interval", self.movement.lookup_interval),
        ] {
            if value <= 0.0 {
                return Err(ConfigError::NonPositive(name));
            }
        }
        if self.agent.wait_min < 0.0 || self.agent.wait_min > self.agent.wait_max {
            return Err(ConfigError::NonPositive("agent.wait_min"));
        }
        if self.agent.attack_variants == 0 {
            return Err(ConfigError::NonPositive("agent.attack_variants"));
        }

        if self.roles.catalogue.is_empty() {
            return Err(ConfigError::EmptyCatalogue);
        }
        let mut carriers = 0;
        for name in &self.roles.catalogue {
            match Capability::from_role_name(name) {
                Some(Capability::Carrier) => carriers += 1,
                Some(_) => {}
                None => return Err(ConfigError::UnknownRole(name.clone())),
            }
        }
        if carriers > 1 {
            return Err(ConfigError::DuplicateCarrier);
        }
        if carriers == self.roles.catalogue.len() {
            return Err(ConfigError::NoOrdinaryRoles);
        }
        for name in &self.roles.mandatory {
            let capability = Capability::from_role_name(name)
                .ok_or_else(|| ConfigError::UnknownRole(name.clone()))?;
            let listed = self
                .roles
                .catalogue
                .iter()
                .any(|entry| Capability::from_role_name(entry) == Some(capability));
            if !listed {
                return Err(ConfigError::MandatoryNotInCatalogue(name.clone()));
            }
        }
        Ok(())
    }
}
