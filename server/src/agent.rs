//! Hostile agents: wander, spot, chase, bite.
//!
//! Every agent runs the same three-state machine once per tick. There are no
//! coroutines; a wander leg, an idle pause and an attack wind-up are all plain
//! fields on the state that count down with the tick delta.
//!
//! An agent never owns its prey. It holds a [`Target`] whose character handle
//! is re-resolved every tick, so a victim that dies, disconnects or is
//! converted simply stops resolving and the agent drops back to searching.
//! Claims are exclusive: while one agent is chasing a participant, no other
//! agent will pick them.

use crate::config::AgentConfig;
use crate::door::DoorSystem;
use crate::events::Outbox;
use crate::geometry::{Aabb, SpatialQuery};
use crate::hideout::HideoutRegistry;
use crate::world::{CharacterHandle, World};
use log::{debug, info};
use rand::Rng;
use shared::{AgentId, AgentMode, AgentView, Event, SessionId, Vec3};
use std::collections::HashMap;

/// Extra clearance added when pushing an agent out of a door panel.
const DISPLACEMENT_SKIN: f32 = 0.05;
const ARRIVAL_DISTANCE: f32 = 0.05;

/// Everything an agent may look at or touch during its tick.
pub struct AgentContext<'a> {
    pub world: &'a mut World,
    pub hideouts: &'a HideoutRegistry,
    pub doors: &'a DoorSystem,
    pub spatial: &'a dyn SpatialQuery,
    pub outbox: &'a mut Outbox,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub session: SessionId,
    pub handle: CharacterHandle,
}

/// Search-state bookkeeping: either walking a leg or pausing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Wander {
    pub destination: Option<Vec3>,
    pub moving: bool,
    pub remaining: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackCycle {
    pub variant: u8,
    pub elapsed: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AgentState {
    Search(Wander),
    Chase,
    Attack(AttackCycle),
}

#[derive(Debug, Clone)]
pub struct HostileAgent {
    pub id: AgentId,
    pub position: Vec3,
    pub state: AgentState,
    pub target: Option<Target>,
    /// Set while the round or phase keeps agents from acting.
    pub idle: bool,
}

impl HostileAgent {
    pub fn mode(&self) -> AgentMode {
        if self.idle {
            return AgentMode::Idle;
        }
        match self.state {
            AgentState::Search(_) => AgentMode::Search,
            AgentState::Chase => AgentMode::Chase,
            AgentState::Attack(_) => AgentMode::Attack,
        }
    }

    fn resume_search(&mut self) {
        self.target = None;
        self.state = AgentState::Search(Wander::default());
    }
}

/// A participant killed by an agent this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kill {
    pub agent: AgentId,
    pub session: SessionId,
    pub position: Vec3,
}

#[derive(Debug)]
pub struct AgentSystem {
    agents: Vec<HostileAgent>,
    next_id: AgentId,
    config: AgentConfig,
}

impl AgentSystem {
    pub fn new(config: &AgentConfig) -> Self {
        Self {
            agents: Vec::new(),
            next_id: 1,
            config: config.clone(),
        }
    }

    pub fn spawn(&mut self, position: Vec3, outbox: &mut Outbox) -> AgentId {
        let id = self.next_id;
        self.next_id += 1;
        self.agents.push(HostileAgent {
            id,
            position,
            state: AgentState::Search(Wander::default()),
            target: None,
            idle: false,
        });
        info!("Hostile agent {} spawned at {:?}", id, position);
        outbox.all(Event::AgentSpawned {
            agent: id,
            position,
        });
        id
    }

    pub fn get(&self, id: AgentId) -> Option<&HostileAgent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut HostileAgent> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostileAgent> {
        self.agents.iter()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn clear(&mut self) {
        self.agents.clear();
    }

    /// Number of agents currently holding `session` as their target.
    pub fn hunters_of(&self, session: SessionId) -> usize {
        self.agents
            .iter()
            .filter(|a| a.target.map(|t| t.session) == Some(session))
            .count()
    }

    /// Drops the agent's target and sends it back to searching.
    pub fn force_search(&mut self, id: AgentId) -> bool {
        match self.get_mut(id) {
            Some(agent) => {
                agent.resume_search();
                true
            }
            None => false,
        }
    }

    /// Every agent chasing `session` gives up on them.
    pub fn release_target(&mut self, session: SessionId) -> usize {
        let mut released = 0;
        for agent in &mut self.agents {
            if agent.target.map(|t| t.session) == Some(session) {
                agent.resume_search();
                released += 1;
            }
        }
        released
    }

    /// Pushes agents out of `volume` and resets them to searching.
    pub fn displace_from(&mut self, volume: &Aabb) -> usize {
        let radius = self.config.body_radius + DISPLACEMENT_SKIN;
        let mut displaced = 0;
        for agent in &mut self.agents {
            if let Some(corrected) = volume.push_out(agent.position, radius) {
                agent.position = corrected;
                agent.resume_search();
                displaced += 1;
            }
        }
        displaced
    }

    /// Advances every agent by one tick. Inactive agents hold still.
    pub fn tick<R: Rng + ?Sized>(
        &mut self,
        dt: f32,
        active: bool,
        ctx: &mut AgentContext<'_>,
        rng: &mut R,
    ) -> Vec<Kill> {
        for agent in &mut self.agents {
            agent.idle = !active;
        }
        if !active {
            return Vec::new();
        }

        let mut claimed: HashMap<SessionId, AgentId> = self
            .agents
            .iter()
            .filter_map(|a| a.target.map(|t| (t.session, a.id)))
            .collect();
        let mut kills = Vec::new();
        for agent in &mut self.agents {
            let kill = match agent.state {
                AgentState::Search(_) => {
                    search(agent, dt, &self.config, ctx, rng, &mut claimed);
                    None
                }
                AgentState::Chase => {
                    chase(agent, dt, &self.config, ctx, rng, &mut claimed);
                    None
                }
                AgentState::Attack(_) => attack(agent, dt, &self.config, ctx, rng, &mut claimed),
            };
            kills.extend(kill);
        }
        kills
    }

    pub fn views(&self) -> Vec<AgentView> {
        self.agents
            .iter()
            .map(|a| AgentView {
                id: a.id,
                position: a.position,
                mode: a.mode(),
            })
            .collect()
    }
}

fn search<R: Rng + ?Sized>(
    agent: &mut HostileAgent,
    dt: f32,
    config: &AgentConfig,
    ctx: &mut AgentContext<'_>,
    rng: &mut R,
    claimed: &mut HashMap<SessionId, AgentId>,
) {
    if let Some(target) = detect(agent, config, ctx, claimed) {
        debug!("Agent {} spotted participant {}", agent.id, target.session);
        claimed.insert(target.session, agent.id);
        agent.target = Some(target);
        agent.state = AgentState::Chase;
        return;
    }

    let AgentState::Search(wander) = &mut agent.state else {
        return;
    };
    wander.remaining -= dt;
    if wander.remaining <= 0.0 {
        if wander.moving {
            wander.moving = false;
            wander.destination = None;
        } else {
            wander.destination = pick_destination(agent.position, config, ctx, rng);
            wander.moving = wander.destination.is_some();
        }
        wander.remaining = rng.gen_range(config.wait_min..=config.wait_max);
    }

    if wander.moving {
        if let Some(destination) = wander.destination {
            let max_step = config.move_speed * dt;
            if !step_toward(&mut agent.position, destination, max_step, config.body_radius, ctx) {
                wander.destination = None;
                wander.moving = false;
            }
        }
    }
}

fn chase<R: Rng + ?Sized>(
    agent: &mut HostileAgent,
    dt: f32,
    config: &AgentConfig,
    ctx: &mut AgentContext<'_>,
    rng: &mut R,
    claimed: &mut HashMap<SessionId, AgentId>,
) {
    let Some(target) = agent.target else {
        agent.resume_search();
        return;
    };
    let Some(target_pos) = track(target, agent.position, config, ctx) else {
        debug!("Agent {} lost participant {}", agent.id, target.session);
        claimed.remove(&target.session);
        agent.resume_search();
        return;
    };

    if agent.position.planar_distance(target_pos) <= config.attack_range {
        agent.state = AgentState::Attack(begin_cycle(agent.id, config, ctx.outbox, rng));
        return;
    }
    let max_step = config.move_speed * dt;
    step_toward(&mut agent.position, target_pos, max_step, config.body_radius, ctx);
}

fn attack<R: Rng + ?Sized>(
    agent: &mut HostileAgent,
    dt: f32,
    config: &AgentConfig,
    ctx: &mut AgentContext<'_>,
    rng: &mut R,
    claimed: &mut HashMap<SessionId, AgentId>,
) -> Option<Kill> {
    let Some(target) = agent.target else {
        agent.resume_search();
        return None;
    };
    let origin = agent.position;
    let in_reach = exposed(target, ctx)
        .filter(|p| origin.planar_distance(*p) <= config.attack_range);
    let Some(target_pos) = in_reach else {
        claimed.remove(&target.session);
        agent.resume_search();
        return None;
    };

    let AgentState::Attack(cycle) = &mut agent.state else {
        return None;
    };
    cycle.elapsed += dt;
    if cycle.elapsed + 1e-4 < config.attack_delay {
        return None;
    }

    let character = ctx.world.character_mut(target.handle)?;
    let lethal = character.health - config.attack_damage <= 0.0;
    if lethal {
        ctx.outbox.all(Event::DeathEffect {
            position: target_pos,
        });
    }
    character.health = (character.health - config.attack_damage).max(0.0);
    let health = character.health;
    ctx.outbox.to(target.session, Event::Damaged { health });
    debug!(
        "Agent {} hit participant {} (health {})",
        agent.id, target.session, health
    );

    if lethal {
        claimed.remove(&target.session);
        agent.resume_search();
        return Some(Kill {
            agent: agent.id,
            session: target.session,
            position: target_pos,
        });
    }
    agent.state = AgentState::Attack(begin_cycle(agent.id, config, ctx.outbox, rng));
    None
}

fn begin_cycle<R: Rng + ?Sized>(
    agent: AgentId,
    config: &AgentConfig,
    outbox: &mut Outbox,
    rng: &mut R,
) -> AttackCycle {
    let variant = rng.gen_range(0..config.attack_variants.max(1));
    outbox.all(Event::AttackCue {
        agent,
        variant,
        duration: config.attack_delay,
    });
    AttackCycle {
        variant,
        elapsed: 0.0,
    }
}

/// Nearest unclaimed participant the agent can see.
fn detect(
    agent: &HostileAgent,
    config: &AgentConfig,
    ctx: &AgentContext<'_>,
    claimed: &HashMap<SessionId, AgentId>,
) -> Option<Target> {
    let mut best: Option<(f32, Target)> = None;
    for participant in ctx.world.participants() {
        if claimed
            .get(&participant.session)
            .is_some_and(|holder| *holder != agent.id)
        {
            continue;
        }
        let Some(handle) = participant.character else {
            continue;
        };
        let target = Target {
            session: participant.session,
            handle,
        };
        let Some(position) = track(target, agent.position, config, ctx) else {
            continue;
        };
        let distance = agent.position.planar_distance(position);
        if best.map_or(true, |(d, _)| distance < d) {
            best = Some((distance, target));
        }
    }
    best.map(|(_, target)| target)
}

/// Position of a target that is alive, out in the open and allowed to move.
/// Hidden or frozen participants are never valid targets, mid-attack included.
fn exposed(target: Target, ctx: &AgentContext<'_>) -> Option<Vec3> {
    let participant = ctx.world.participant(target.session)?;
    if !participant.alive || !participant.may_move || participant.character != Some(target.handle) {
        return None;
    }
    if ctx.hideouts.is_hidden(target.session) {
        return None;
    }
    let character = ctx.world.character(target.handle)?;
    if character.health <= 0.0 {
        return None;
    }
    Some(character.position)
}

/// Resolves the target and checks it is still a fair candidate: exposed,
/// in range and in sight.
fn track(target: Target, origin: Vec3, config: &AgentConfig, ctx: &AgentContext<'_>) -> Option<Vec3> {
    let position = exposed(target, ctx)?;
    if origin.planar_distance(position) > config.detection_radius {
        return None;
    }
    if ctx.spatial.ray_blocked(origin, position) || ctx.doors.blocks_sight(origin, position) {
        return None;
    }
    Some(position)
}

fn pick_destination<R: Rng + ?Sized>(
    origin: Vec3,
    config: &AgentConfig,
    ctx: &AgentContext<'_>,
    rng: &mut R,
) -> Option<Vec3> {
    let angle = rng.gen_range(0.0..std::f32::consts::TAU);
    let distance = config.detection_radius * rng.gen::<f32>().sqrt();
    let candidate = origin + Vec3::flat(angle.cos() * distance, angle.sin() * distance);

    if ctx.spatial.overlaps_obstacle(candidate, config.clearance)
        || ctx.doors.blocks_point(candidate, config.clearance)
        || ctx.spatial.ray_blocked(origin, candidate)
        || ctx.doors.blocks_sight(origin, candidate)
    {
        return None;
    }
    Some(candidate)
}

/// Moves at most `max_step` toward `destination`. Returns false if the way
/// is blocked.
fn step_toward(
    position: &mut Vec3,
    destination: Vec3,
    max_step: f32,
    radius: f32,
    ctx: &AgentContext<'_>,
) -> bool {
    let offset = (destination - *position).with_y(0.0);
    let distance = offset.length();
    if distance < ARRIVAL_DISTANCE {
        return true;
    }
    let next = *position + offset.normalized() * max_step.min(distance);
    let blocked = |p: Vec3| {
        ctx.spatial.overlaps_obstacle(p, radius) || ctx.doors.blocks_movement(p, radius)
    };
    if blocked(next) && !blocked(*position) {
        return false;
    }
    *position = next;
    true
}
