use crate::agent::{AgentContext, AgentSystem};
use crate::config::GameConfig;
use crate::day_night::{DayNightCycle, Transition};
use crate::door::DoorSystem;
use crate::error::{CommandError, ConfigError, ErrorKind};
use crate::events::{Broadcast, Outbox};
use crate::geometry::{SpatialQuery, StaticGeometry};
use crate::hideout::HideoutRegistry;
use crate::infection::InfectionEngine;
use crate::lookup::RetryQueue;
use crate::rendezvous::Rendezvous;
use crate::roles::{assign_roles, Capability, RoleBook, RoleCatalogue};
use crate::timer::Countdown;
use crate::world::World;
use log::{debug, info, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::{
    AgentId, Command, DeathCause, Event, InputState, ObjectId, Packet, ParticipantView,
    RoundStatus, SessionId, Vec3, CHARACTER_RADIUS,
};
use std::collections::HashSet;

#[derive(Debug, Clone)]
struct PendingSpawn {
    session: SessionId,
    position: Vec3,
    delay: Countdown,
}

/// The authoritative simulation. Commands and inputs go in, the tick advances
/// every subsystem in a fixed order, and the results come out as broadcasts
/// in the outbox plus per-observer snapshots.
pub struct GameState {
    pub tick: u32,
    config: GameConfig,
    world: World,
    cycle: DayNightCycle,
    catalogue: RoleCatalogue,
    roles: RoleBook,
    infection: InfectionEngine,
    agents: AgentSystem,
    doors: DoorSystem,
    hideouts: HideoutRegistry,
    rendezvous: Rendezvous,
    outbox: Outbox,
    rng: StdRng,
    spatial: Box<dyn SpatialQuery>,
    pending_spawns: Vec<PendingSpawn>,
    lookups: RetryQueue,
    /// Sessions whose lookup timed out. They are not retried until their
    /// character spawns or they leave.
    abandoned_lookups: HashSet<SessionId>,
    join_order: Vec<SessionId>,
}

impl GameState {
    pub fn new(config: GameConfig) -> Result<Self, ConfigError> {
        let spatial = Box::new(StaticGeometry::new(config.map.walls.clone()));
        Self::with_spatial(config, spatial)
    }

    /// Builds the simulation on top of a caller-provided geometry.
    pub fn with_spatial(
        config: GameConfig,
        spatial: Box<dyn SpatialQuery>,
    ) -> Result<Self, ConfigError> {
        let catalogue = RoleCatalogue::from_config(&config.roles)?;
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            tick: 0,
            world: World::new(),
            cycle: DayNightCycle::new(&config.round),
            catalogue,
            roles: RoleBook::new(),
            infection: InfectionEngine::new(&config.round, &config.infection),
            agents: AgentSystem::new(&config.agent),
            doors: DoorSystem::new(&config.map.doors, &config.interact),
            hideouts: HideoutRegistry::new(&config.map.hideouts, config.interact.range),
            rendezvous: Rendezvous::new(&config.map.rendezvous, &config.rendezvous),
            outbox: Outbox::new(),
            rng,
            spatial,
            pending_spawns: Vec::new(),
            lookups: RetryQueue::new(
                config.movement.lookup_timeout,
                config.movement.lookup_interval,
            ),
            abandoned_lookups: HashSet::new(),
            join_order: Vec::new(),
            config,
        })
    }

    pub fn config(&self) -> &GameConfig {
        &self.config
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    /// Movement-permission lookups still waiting for a character.
    pub fn pending_lookups(&self) -> usize {
        self.lookups.len()
    }

    pub fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    pub fn cycle(&self) -> &DayNightCycle {
        &self.cycle
    }

    pub fn roles(&self) -> &RoleBook {
        &self.roles
    }

    pub fn infection(&self) -> &InfectionEngine {
        &self.infection
    }

    pub fn agents(&self) -> &AgentSystem {
        &self.agents
    }

    pub fn doors(&self) -> &DoorSystem {
        &self.doors
    }

    pub fn hideouts(&self) -> &HideoutRegistry {
        &self.hideouts
    }

    pub fn rendezvous(&self) -> &Rendezvous {
        &self.rendezvous
    }

    pub fn status(&self) -> RoundStatus {
        self.cycle.status()
    }

    /// The earliest-connected session still present.
    pub fn host(&self) -> Option<SessionId> {
        self.join_order.first().copied()
    }

    pub fn pending_broadcasts(&self) -> &[Broadcast] {
        self.outbox.pending()
    }

    pub fn drain_outbox(&mut self) -> Vec<Broadcast> {
        self.outbox.drain()
    }

    /// Registers a new session. Sessions joining a running round watch as
    /// spectators; lobby joiners get a character after the spawn delay.
    pub fn add_participant(&mut self, session: SessionId) {
        if self.world.participant(session).is_some() {
            return;
        }
        let alive = self.cycle.status() == RoundStatus::Lobby;
        self.world.add_participant(session, alive);
        self.join_order.push(session);

        if alive {
            self.pending_spawns.push(PendingSpawn {
                session,
                position: self.config.map.lobby_spawn,
                delay: Countdown::running(self.config.movement.spawn_delay),
            });
        } else {
            self.outbox.to(
                session,
                Event::Notice {
                    message: "a round is in progress, you are spectating".to_string(),
                },
            );
        }
    }

    /// Drops a session. No agent rises from a participant who simply left.
    pub fn remove_participant(&mut self, session: SessionId) {
        if self.world.participant(session).is_none() {
            return;
        }
        self.agents.release_target(session);
        self.hideouts.release(session, &mut self.outbox);
        self.pending_spawns.retain(|p| p.session != session);
        self.lookups.cancel(session);
        self.abandoned_lookups.remove(&session);
        self.join_order.retain(|s| *s != session);
        self.world.remove_participant(session);
    }

    pub fn set_move_intent(&mut self, session: SessionId, input: &InputState) {
        if let Some(participant) = self.world.participant_mut(session) {
            participant.move_intent = input.direction();
        }
    }

    /// Spawns a hostile agent directly. Used by scenario setups.
    pub fn spawn_agent(&mut self, position: Vec3) -> AgentId {
        self.agents.spawn(position, &mut self.outbox)
    }

    /// Validates and applies one command. A rejection is reported privately
    /// to `session` and returned; it never disturbs the tick.
    pub fn handle_command(
        &mut self,
        session: SessionId,
        claimed_issuer: SessionId,
        command: &Command,
    ) -> Result<(), CommandError> {
        let result = self.execute(session, claimed_issuer, command);
        if let Err(err) = &result {
            match err.kind() {
                ErrorKind::InvalidCommand => {
                    warn!("Rejected {:?} from {}: {}", command, session, err)
                }
                ErrorKind::LookupMiss | ErrorKind::StateConflict => {
                    debug!("Denied {:?} from {}: {}", command, session, err)
                }
            }
            let event = match command {
                Command::Infect { .. } => Event::InfectFeedback {
                    success: false,
                    message: err.to_string(),
                },
                _ => Event::Denied {
                    reason: err.to_string(),
                },
            };
            self.outbox.to(session, event);
        }
        result
    }

    fn execute(
        &mut self,
        session: SessionId,
        claimed_issuer: SessionId,
        command: &Command,
    ) -> Result<(), CommandError> {
        if claimed_issuer != session {
            return Err(CommandError::IssuerMismatch {
                claimed: claimed_issuer,
                actual: session,
            });
        }
        if self.world.participant(session).is_none() {
            return Err(CommandError::NoCharacter);
        }

        match *command {
            Command::StartGame => self.start_game(session),
            Command::ToggleDayNight => {
                if self.host() != Some(session) {
                    return Err(CommandError::NotHost);
                }
                let transition = self
                    .cycle
                    .toggle(&mut self.outbox)
                    .ok_or(CommandError::RoundNotRunning)?;
                self.apply_transition(transition);
                Ok(())
            }
            Command::Infect { target } => self.infection.request_infect(
                session,
                target,
                &mut self.world,
                &self.roles,
                &self.cycle,
                &mut self.outbox,
            ),
            Command::Protect { target } => self.infection.request_protect(
                session,
                target,
                &mut self.world,
                &self.roles,
                &self.cycle,
                &mut self.outbox,
            ),
            Command::Immunize { target } => self.infection.request_immunize(
                session,
                target,
                &mut self.world,
                &self.roles,
                &self.cycle,
                &mut self.outbox,
            ),
            Command::EquipMask => {
                self.infection
                    .equip_mask(session, &mut self.world, &self.cycle, &mut self.outbox)
            }
            Command::Interact { object } => self.interact(session, object),
        }
    }

    fn interact(&mut self, session: SessionId, object: ObjectId) -> Result<(), CommandError> {
        if self.cycle.is_running() && self.cycle.is_night() {
            return Err(CommandError::WrongPhase {
                action: "interact",
                phase: self.cycle.phase(),
            });
        }
        match object {
            ObjectId::Door(id) => self
                .doors
                .request_toggle(id, session, &self.world, &mut self.agents, &mut self.outbox)
                .map(|_| ()),
            ObjectId::Hideout(id) => self
                .hideouts
                .request(id, session, &mut self.world, &mut self.outbox)
                .map(|_| ()),
        }
    }

    fn start_game(&mut self, session: SessionId) -> Result<(), CommandError> {
        if self.host() != Some(session) {
            return Err(CommandError::NotHost);
        }
        if self.cycle.status() != RoundStatus::Lobby {
            return Err(CommandError::RoundAlreadyStarted);
        }
        let seats: Vec<SessionId> = self
            .world
            .participants()
            .filter(|p| p.alive)
            .map(|p| p.session)
            .collect();
        if seats.is_empty() {
            return Err(CommandError::NoParticipants);
        }

        self.infection.reset();
        self.agents.clear();
        self.doors.reset();
        self.hideouts.clear();
        for participant in self.world.participants_mut() {
            participant.infection = Default::default();
        }

        let assignments = assign_roles(&self.catalogue, &seats, &mut self.rng);
        self.roles
            .record(&self.catalogue, assignments, &mut self.rng);
        for seat in &seats {
            if let Some(assignment) = self.roles.assignment(*seat) {
                self.outbox.to(
                    *seat,
                    Event::RoleAssigned {
                        role: assignment.role_name.clone(),
                    },
                );
                if assignment.capability == Capability::Carrier {
                    self.outbox.to(*seat, Event::CarrierAssigned);
                }
            }
        }

        let spawns = self.pick_spawns(seats.len());
        for (seat, position) in seats.iter().zip(spawns) {
            if let Some(pending) = self.pending_spawns.iter_mut().find(|p| p.session == *seat) {
                pending.position = position;
            } else if let Some(character) = self.world.character_of_mut(*seat) {
                character.position = position;
                self.outbox.all(Event::Teleported {
                    session: *seat,
                    position,
                });
            }
        }

        info!("Round started with {} participants", seats.len());
        let transition = self.cycle.start_round(&mut self.outbox);
        self.apply_transition(transition);
        Ok(())
    }

    /// Random points in the spawn area keeping the configured separation.
    /// After the last attempt the final candidate is taken as is.
    fn pick_spawns(&mut self, count: usize) -> Vec<Vec3> {
        let area = self.config.map.spawn_area;
        let separation = self.config.map.spawn_separation;
        let attempts = self.config.map.spawn_attempts.max(1);
        let mut chosen: Vec<Vec3> = Vec::with_capacity(count);
        for _ in 0..count {
            let mut candidate = area.center().with_y(0.0);
            for _ in 0..attempts {
                candidate = Vec3::flat(
                    self.rng.gen_range(area.min.x..=area.max.x),
                    self.rng.gen_range(area.min.z..=area.max.z),
                );
                let spaced = chosen
                    .iter()
                    .all(|c| c.planar_distance(candidate) >= separation);
                if spaced && !self.spatial.overlaps_obstacle(candidate, CHARACTER_RADIUS) {
                    break;
                }
            }
            chosen.push(candidate);
        }
        chosen
    }

    fn apply_transition(&mut self, transition: Transition) {
        match transition {
            Transition::NightStarted { .. } => {
                self.infection.on_night_start();
                self.rendezvous.on_night_start(&mut self.outbox);
            }
            Transition::DayStarted { day } => {
                self.infection.on_day_start();
                self.rendezvous
                    .on_day_start(day, &self.world, &mut self.outbox);
            }
            Transition::GameOver { .. } => {
                self.rendezvous.reset(&mut self.outbox);
            }
        }
    }

    /// Advances the whole simulation by `dt` seconds.
    pub fn update(&mut self, dt: f32) {
        self.tick = self.tick.wrapping_add(1);

        self.process_spawns(dt);
        self.integrate_movement(dt);

        if let Some(transition) = self.cycle.tick(dt, &mut self.outbox) {
            self.apply_transition(transition);
        }
        if self.infection.tick(dt) {
            let converted = self
                .infection
                .resolve_morning(&mut self.world, &mut self.outbox);
            for session in converted {
                self.kill(session, DeathCause::Infection);
            }
        }
        self.doors.tick(dt, &mut self.outbox);

        let active =
            self.cycle.is_running() && self.config.agent.hunt.allows(self.cycle.phase());
        let kills = {
            let mut ctx = AgentContext {
                world: &mut self.world,
                hideouts: &self.hideouts,
                doors: &self.doors,
                spatial: self.spatial.as_ref(),
                outbox: &mut self.outbox,
            };
            self.agents.tick(dt, active, &mut ctx, &mut self.rng)
        };
        for kill in kills {
            debug!("Agent {} killed participant {}", kill.agent, kill.session);
            self.kill(kill.session, DeathCause::Attack);
        }

        self.rendezvous
            .tick(dt, &mut self.world, &mut self.hideouts, &mut self.outbox);
        self.poll_lookups(dt);
        self.refresh_movement();

        if self.tick % 60 == 0 {
            debug!(
                "Tick {}: {} alive, {} agents, {} queued broadcasts",
                self.tick,
                self.world.alive_count(),
                self.agents.len(),
                self.outbox.len()
            );
        }
    }

    fn process_spawns(&mut self, dt: f32) {
        let mut due = Vec::new();
        self.pending_spawns.retain_mut(|pending| {
            if pending.delay.advance(dt) {
                due.push((pending.session, pending.position));
                false
            } else {
                true
            }
        });
        for (session, position) in due {
            if self.world.participant(session).is_some_and(|p| p.alive) {
                self.world.spawn_character(session, position);
                self.abandoned_lookups.remove(&session);
            }
        }
    }

    fn integrate_movement(&mut self, dt: f32) {
        let running_night = self.cycle.is_running() && self.cycle.is_night();
        for session in self.world.alive_sessions() {
            let Some(intent) = self.world.participant(session).map(|p| p.move_intent) else {
                continue;
            };
            if intent == Vec3::ZERO {
                continue;
            }
            let carrier = self.roles.is_carrier(session);
            if !self
                .cycle
                .may_move(carrier, self.hideouts.is_hidden(session))
            {
                continue;
            }
            let mut speed = self.config.movement.speed;
            if running_night && carrier {
                speed *= self.config.movement.carrier_night_multiplier;
            }

            let spatial = self.spatial.as_ref();
            let doors = &self.doors;
            let blocked = |p: Vec3| {
                spatial.overlaps_obstacle(p, CHARACTER_RADIUS)
                    || doors.blocks_movement(p, CHARACTER_RADIUS)
            };
            if let Some(character) = self.world.character_of_mut(session) {
                character.position = slide(character.position, intent * (speed * dt), blocked);
            }
        }
    }

    /// Characters without a body yet get their first movement permission
    /// once the lookup succeeds.
    fn poll_lookups(&mut self, dt: f32) {
        let world = &mut self.world;
        let cycle = &self.cycle;
        let roles = &self.roles;
        let hideouts = &self.hideouts;
        let outbox = &mut self.outbox;
        let abandoned = self.lookups.poll(dt, |session| {
            if world.handle_of(session).is_none() {
                return false;
            }
            let can_move = cycle.may_move(roles.is_carrier(session), hideouts.is_hidden(session));
            if let Some(participant) = world.participant_mut(session) {
                participant.may_move = can_move;
            }
            outbox.to(session, Event::MovementPermission { can_move });
            true
        });
        self.abandoned_lookups.extend(abandoned);
    }

    /// Unicasts movement permission to each owner whose permission changed.
    fn refresh_movement(&mut self) {
        for session in self.world.sessions() {
            let Some(participant) = self.world.participant(session) else {
                continue;
            };
            if !participant.alive {
                continue;
            }
            if participant.character.is_none() {
                if !self.abandoned_lookups.contains(&session) {
                    self.lookups.enqueue(session);
                }
                continue;
            }
            if self.lookups.contains(session) {
                continue;
            }
            let can_move = self.cycle.may_move(
                self.roles.is_carrier(session),
                self.hideouts.is_hidden(session),
            );
            if participant.may_move == can_move {
                continue;
            }
            if let Some(participant) = self.world.participant_mut(session) {
                participant.may_move = can_move;
            }
            self.outbox
                .to(session, Event::MovementPermission { can_move });
        }
    }

    /// Death path shared by agent kills and infection conversion. Returns
    /// false when the participant was already dead.
    fn kill(&mut self, session: SessionId, cause: DeathCause) -> bool {
        let Some(participant) = self.world.participant_mut(session) else {
            return false;
        };
        if !participant.alive {
            return false;
        }
        participant.alive = false;
        participant.move_intent = Vec3::ZERO;

        self.agents.release_target(session);
        self.hideouts.release(session, &mut self.outbox);
        self.lookups.cancel(session);
        let Some(character) = self.world.destroy_character(session) else {
            return true;
        };

        let position = character.position;
        info!("Participant {} died ({:?})", session, cause);
        self.outbox.all(Event::DeathNotice { position, cause });
        self.outbox.to(session, Event::YouDied { cause });
        self.agents.spawn(position, &mut self.outbox);
        true
    }

    /// Tailored snapshot for one observer. Only the observer sees their own
    /// true role.
    pub fn snapshot_for(
        &self,
        observer: SessionId,
        last_processed_input: u32,
        timestamp: u64,
    ) -> Packet {
        let participants = self
            .world
            .participants()
            .map(|p| ParticipantView {
                id: p.session,
                position: self.world.position_of(p.session),
                alive: p.alive,
                role: self.roles.visible_role(p.session, observer),
            })
            .collect();
        Packet::Snapshot {
            tick: self.tick,
            timestamp,
            last_processed_input,
            clock: self.cycle.view(),
            participants,
            agents: self.agents.views(),
            doors: self.doors.views(),
            hideouts: self.hideouts.views(),
            rendezvous: self.rendezvous.view(),
        }
    }
}

/// Moves by `delta`, sliding along whichever axis is still free when the
/// full step would end inside something.
fn slide<F: Fn(Vec3) -> bool>(from: Vec3, delta: Vec3, blocked: F) -> Vec3 {
    let full = from + delta;
    if !blocked(full) {
        return full;
    }
    let along_x = Vec3::new(from.x + delta.x, from.y, from.z);
    if delta.x != 0.0 && !blocked(along_x) {
        return along_x;
    }
    let along_z = Vec3::new(from.x, from.y, from.z + delta.z);
    if delta.z != 0.0 && !blocked(along_z) {
        return along_z;
    }
    from
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use assert_approx_eq::assert_approx_eq;
    use shared::{Phase, RendezvousState};
    use tokio_test::assert_ok;

    fn config() -> GameConfig {
        GameConfig {
            seed: Some(7),
            ..GameConfig::default()
        }
    }

    fn lobby(count: u32) -> GameState {
        let mut game = GameState::new(config()).unwrap();
        for session in 1..=count {
            game.add_participant(session);
        }
        game.update(0.2);
        game
    }

    fn started(count: u32) -> GameState {
        let mut game = lobby(count);
        assert_ok!(game.handle_command(1, 1, &Command::StartGame));
        game.drain_outbox();
        game
    }

    fn place(game: &mut GameState, session: SessionId, x: f32, z: f32) {
        game.world_mut().character_of_mut(session).unwrap().position = Vec3::flat(x, z);
    }

    fn to_night(game: &mut GameState) {
        assert_ok!(game.handle_command(1, 1, &Command::ToggleDayNight));
        assert_eq!(game.cycle().phase(), Phase::Night);
    }

    #[test]
    fn test_characters_spawn_after_delay() {
        let mut game = GameState::new(config()).unwrap();
        game.add_participant(1);
        assert!(game.world().character_of(1).is_none());
        game.update(0.05);
        assert!(game.world().character_of(1).is_none());
        game.update(0.06);
        assert!(game.world().character_of(1).is_some());
    }

    #[test]
    fn test_first_permission_arrives_once_character_exists() {
        let mut game = GameState::new(config()).unwrap();
        game.add_participant(1);
        for _ in 0..10 {
            game.update(0.05);
        }
        let permissions: Vec<_> = game
            .drain_outbox()
            .into_iter()
            .filter(|b| matches!(b.event, Event::MovementPermission { .. }))
            .collect();
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].targets, Some(vec![1]));
    }

    #[test]
    fn test_only_host_starts() {
        let mut game = lobby(3);
        assert_eq!(
            game.handle_command(2, 2, &Command::StartGame),
            Err(CommandError::NotHost)
        );
        let denied = game
            .pending_broadcasts()
            .iter()
            .any(|b| b.reaches(2) && matches!(b.event, Event::Denied { .. }));
        assert!(denied);
        assert_eq!(game.status(), RoundStatus::Lobby);
        assert_ok!(game.handle_command(1, 1, &Command::StartGame));
        assert_eq!(game.status(), RoundStatus::Running);
        assert_eq!(
            game.handle_command(1, 1, &Command::StartGame),
            Err(CommandError::RoundAlreadyStarted)
        );
    }

    #[test]
    fn test_issuer_mismatch_rejected() {
        let mut game = lobby(2);
        assert_eq!(
            game.handle_command(2, 1, &Command::StartGame),
            Err(CommandError::IssuerMismatch {
                claimed: 1,
                actual: 2
            })
        );
    }

    #[test]
    fn test_start_deals_one_carrier_and_private_roles() {
        let mut game = lobby(5);
        game.handle_command(1, 1, &Command::StartGame).unwrap();
        let broadcasts = game.drain_outbox();
        let carrier = game.roles().carrier().unwrap();
        for session in 1..=5 {
            let roles: Vec<_> = broadcasts
                .iter()
                .filter(|b| matches!(b.event, Event::RoleAssigned { .. }))
                .filter(|b| b.targets == Some(vec![session]))
                .collect();
            assert_eq!(roles.len(), 1);
        }
        let carrier_notices: Vec<_> = broadcasts
            .iter()
            .filter(|b| b.event == Event::CarrierAssigned)
            .collect();
        assert_eq!(carrier_notices.len(), 1);
        assert_eq!(carrier_notices[0].targets, Some(vec![carrier]));
    }

    #[test]
    fn test_spawns_are_separated() {
        let game = started(6);
        let positions: Vec<Vec3> = (1..=6)
            .map(|s| game.world().position_of(s).unwrap())
            .collect();
        let area = game.config().map.spawn_area;
        for (i, a) in positions.iter().enumerate() {
            assert!(area.contains(*a));
            for b in &positions[i + 1..] {
                assert!(a.planar_distance(*b) >= 1.0);
            }
        }
    }

    #[test]
    fn test_late_joiner_is_spectator() {
        let mut game = started(3);
        game.add_participant(9);
        game.update(0.2);
        assert!(!game.world().is_alive(9));
        assert!(game.world().character_of(9).is_none());
        assert_eq!(
            game.handle_command(9, 9, &Command::EquipMask),
            Err(CommandError::NoCharacter)
        );
    }

    #[test]
    fn test_daytime_freezes_nobody_and_night_freezes_non_carriers() {
        let mut game = started(4);
        let carrier = game.roles().carrier().unwrap();
        let other = (1..=4).find(|s| *s != carrier).unwrap();
        to_night(&mut game);
        game.update(0.01);
        let broadcasts = game.drain_outbox();
        assert!(broadcasts.iter().any(|b| b.targets == Some(vec![other])
            && b.event == Event::MovementPermission { can_move: false }));
        assert!(!broadcasts
            .iter()
            .any(|b| b.targets == Some(vec![carrier])
                && matches!(b.event, Event::MovementPermission { .. })));
    }

    #[test]
    fn test_carrier_moves_faster_at_night() {
        let mut game = started(3);
        let carrier = game.roles().carrier().unwrap();
        place(&mut game, carrier, -10.0, 0.0);
        to_night(&mut game);
        let input = InputState {
            sequence: 1,
            timestamp: 0,
            move_x: 1.0,
            move_z: 0.0,
        };
        game.set_move_intent(carrier, &input);
        game.update(1.0);
        let x = game.world().position_of(carrier).unwrap().x;
        assert_approx_eq!(x, -10.0 + 3.0 * 1.5, 0.001);
    }

    #[test]
    fn test_walls_stop_movement() {
        let mut game = started(2);
        place(&mut game, 1, 14.05, 10.0);
        let input = InputState {
            sequence: 1,
            timestamp: 0,
            move_x: 1.0,
            move_z: 0.0,
        };
        game.set_move_intent(1, &input);
        for _ in 0..10 {
            game.update(0.1);
        }
        let position = game.world().position_of(1).unwrap();
        assert!(position.x + CHARACTER_RADIUS <= 15.0);
    }

    #[test]
    fn test_interaction_rejected_at_night() {
        let mut game = started(3);
        place(&mut game, 2, -10.0, 10.5);
        to_night(&mut game);
        assert!(matches!(
            game.handle_command(2, 2, &Command::Interact { object: ObjectId::Hideout(0) }),
            Err(CommandError::WrongPhase { .. })
        ));
    }

    #[test]
    fn test_infection_converts_at_morning() {
        let mut game = started(4);
        let carrier = game.roles().carrier().unwrap();
        let victim = (1..=4).find(|s| *s != carrier).unwrap();
        place(&mut game, carrier, 0.0, 8.0);
        place(&mut game, victim, 1.0, 8.0);
        to_night(&mut game);
        game.handle_command(carrier, carrier, &Command::Infect { target: victim })
            .unwrap();
        game.handle_command(1, 1, &Command::ToggleDayNight).unwrap();
        assert_eq!(game.cycle().day(), 2);
        assert!(game.world().is_alive(victim));

        for _ in 0..55 {
            game.update(0.1);
        }
        assert!(!game.world().is_alive(victim));
        assert_eq!(game.agents().len(), 1);
        let broadcasts = game.drain_outbox();
        assert!(broadcasts.iter().any(|b| b.targets.is_none()
            && matches!(
                b.event,
                Event::DeathNotice {
                    cause: DeathCause::Infection,
                    ..
                }
            )));
    }

    #[test]
    fn test_infect_rejection_uses_infect_feedback() {
        let mut game = started(3);
        let carrier = game.roles().carrier().unwrap();
        let target = (1..=3).find(|s| *s != carrier).unwrap();
        assert!(game
            .handle_command(carrier, carrier, &Command::Infect { target })
            .is_err());
        let feedback = game.drain_outbox().into_iter().find(|b| {
            b.targets == Some(vec![carrier])
                && matches!(b.event, Event::InfectFeedback { success: false, .. })
        });
        assert!(feedback.is_some());
    }

    #[test]
    fn test_disconnect_spawns_no_agent() {
        let mut game = started(3);
        game.remove_participant(2);
        game.update(0.1);
        assert!(game.agents().is_empty());
        assert!(game.world().participant(2).is_none());
    }

    #[test]
    fn test_host_passes_on_after_leave() {
        let mut game = lobby(3);
        assert_eq!(game.host(), Some(1));
        game.remove_participant(1);
        assert_eq!(game.host(), Some(2));
        assert!(game.handle_command(2, 2, &Command::StartGame).is_ok());
    }

    #[test]
    fn test_kill_guarded_against_repeat() {
        let mut game = started(3);
        assert!(game.kill(2, DeathCause::Attack));
        assert!(!game.kill(2, DeathCause::Infection));
        assert_eq!(game.agents().len(), 1);
    }

    #[test]
    fn test_rendezvous_arms_on_second_day() {
        let mut game = started(4);
        to_night(&mut game);
        game.handle_command(1, 1, &Command::ToggleDayNight).unwrap();
        assert_eq!(game.rendezvous().state(), RendezvousState::Waiting);
    }

    #[test]
    fn test_snapshot_hides_carrier_role_from_others() {
        let game = started(4);
        let carrier = game.roles().carrier().unwrap();
        let observer = (1..=4).find(|s| *s != carrier).unwrap();
        let role_seen_by = |viewer: SessionId| match game.snapshot_for(viewer, 0, 0) {
            Packet::Snapshot { participants, .. } => participants
                .into_iter()
                .find(|p| p.id == carrier)
                .and_then(|p| p.role),
            _ => None,
        };
        assert_eq!(role_seen_by(carrier).as_deref(), Some("Carrier"));
        assert_ne!(role_seen_by(observer).as_deref(), Some("Carrier"));
    }

    #[test]
    fn test_slide_keeps_free_axis() {
        let wall_at_x = |p: Vec3| p.x > 1.0;
        let moved = slide(Vec3::flat(0.9, 0.0), Vec3::flat(0.5, 0.5), wall_at_x);
        assert_approx_eq!(moved.x, 0.9);
        assert_approx_eq!(moved.z, 0.5);
    }

    #[test]
    fn test_abandoned_lookup_is_not_requeued() {
        let mut game = GameState::new(GameConfig {
            seed: Some(7),
            movement: crate::config::MovementConfig {
                spawn_delay: 5.0,
                ..GameConfig::default().movement
            },
            ..GameConfig::default()
        })
        .unwrap();
        game.add_participant(1);
        game.update(0.1);
        assert_eq!(game.pending_lookups(), 1);

        // Past the lookup timeout but before the character exists.
        for _ in 0..35 {
            game.update(0.1);
        }
        assert!(game.world().character_of(1).is_none());
        assert_eq!(game.pending_lookups(), 0);
        for _ in 0..10 {
            game.update(0.1);
            assert_eq!(game.pending_lookups(), 0);
        }

        for _ in 0..10 {
            game.update(0.1);
        }
        assert!(game.world().character_of(1).is_some());
        assert_eq!(game.pending_lookups(), 0);
    }

    #[test]
    fn test_rejoining_session_gets_a_fresh_lookup() {
        let mut game = GameState::new(GameConfig {
            seed: Some(7),
            movement: crate::config::MovementConfig {
                spawn_delay: 5.0,
                ..GameConfig::default().movement
            },
            ..GameConfig::default()
        })
        .unwrap();
        game.add_participant(1);
        for _ in 0..35 {
            game.update(0.1);
        }
        assert_eq!(game.pending_lookups(), 0);

        game.remove_participant(1);
        game.add_participant(1);
        game.update(0.1);
        assert_eq!(game.pending_lookups(), 1);
    }
}
