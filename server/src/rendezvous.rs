//! The rendezvous bell.
//!
//! Once per day the bell arms itself a few seconds after dawn. While it is
//! ready, enough living participants gathering in its trigger ring it, which
//! pulls every living participant, hidden or not, to the slots around the
//! bell. Entry and exit are derived from character positions each tick.

use crate::config::{RendezvousConfig, RendezvousLayout};
use crate::events::Outbox;
use crate::geometry::Aabb;
use crate::hideout::HideoutRegistry;
use crate::timer::Countdown;
use crate::world::World;
use log::{debug, info};
use shared::{Event, RendezvousState, RendezvousView, SessionId, Vec3, TELEPORT_SLOTS};
use std::collections::BTreeSet;

const SLOT_DIRECTIONS: [(f32, f32); TELEPORT_SLOTS] = [
    (1.0, 0.0),
    (-1.0, 0.0),
    (0.0, 1.0),
    (0.0, -1.0),
    (1.0, 1.0),
    (1.0, -1.0),
    (-1.0, 1.0),
    (-1.0, -1.0),
];

#[derive(Debug)]
pub struct Rendezvous {
    state: RendezvousState,
    alive_count: u32,
    inside: BTreeSet<SessionId>,
    gathered: BTreeSet<SessionId>,
    trigger: Aabb,
    point: Vec3,
    enabled: bool,
    two_player_mode: bool,
    day: u32,
    countdown: Countdown,
    last_second: Option<u32>,
    config: RendezvousConfig,
}

impl Rendezvous {
    pub fn new(layout: &RendezvousLayout, config: &RendezvousConfig) -> Self {
        Self {
            state: RendezvousState::Disabled,
            alive_count: 0,
            inside: BTreeSet::new(),
            gathered: BTreeSet::new(),
            trigger: layout.trigger,
            point: layout.point,
            enabled: false,
            two_player_mode: false,
            day: 0,
            countdown: Countdown::idle(),
            last_second: None,
            config: config.clone(),
        }
    }

    pub fn state(&self) -> RendezvousState {
        self.state
    }

    pub fn alive_count(&self) -> u32 {
        self.alive_count
    }

    pub fn gathered(&self) -> &BTreeSet<SessionId> {
        &self.gathered
    }

    pub fn view(&self) -> RendezvousView {
        RendezvousView {
            state: self.state,
            alive_count: self.alive_count,
        }
    }

    /// Slot a participant lands on when the bell is rung.
    pub fn slot(&self, index: usize) -> Vec3 {
        let (x, z) = SLOT_DIRECTIONS[index % TELEPORT_SLOTS];
        self.point + Vec3::flat(x, z).normalized() * self.config.slot_distance
    }

    pub fn reset(&mut self, outbox: &mut Outbox) {
        self.enabled = false;
        self.two_player_mode = false;
        self.inside.clear();
        self.gathered.clear();
        self.countdown.stop();
        self.set_state(RendezvousState::Disabled, outbox);
    }

    pub fn on_day_start(&mut self, day: u32, world: &World, outbox: &mut Outbox) {
        self.day = day;
        self.inside.clear();
        self.gathered.clear();
        self.countdown.stop();
        self.last_second = None;
        self.alive_count = world.alive_count();
        self.enabled = true;

        if self.alive_count <= 2 {
            self.two_player_mode = true;
            debug!("Bell stays off today, only {} alive", self.alive_count);
            self.set_state(RendezvousState::Disabled, outbox);
            return;
        }
        self.two_player_mode = false;
        if day < self.config.first_usable_day {
            self.set_state(RendezvousState::Disabled, outbox);
            return;
        }

        for session in world.alive_sessions() {
            if world
                .position_of(session)
                .is_some_and(|p| self.trigger.contains(p))
            {
                self.inside.insert(session);
                self.gathered.insert(session);
            }
        }
        self.countdown.start(self.config.arm_delay);
        self.set_state(RendezvousState::Waiting, outbox);
    }

    pub fn on_night_start(&mut self, outbox: &mut Outbox) {
        self.enabled = false;
        self.countdown.stop();
        self.inside.clear();
        self.gathered.clear();
        self.set_state(RendezvousState::Disabled, outbox);
    }

    pub fn tick(
        &mut self,
        dt: f32,
        world: &mut World,
        hideouts: &mut HideoutRegistry,
        outbox: &mut Outbox,
    ) {
        if !self.enabled {
            return;
        }
        self.alive_count = world.alive_count();

        let now: BTreeSet<SessionId> = world
            .alive_sessions()
            .into_iter()
            .filter(|s| {
                world
                    .position_of(*s)
                    .is_some_and(|p| self.trigger.contains(p))
            })
            .collect();
        let exits: Vec<SessionId> = self.inside.difference(&now).copied().collect();
        for session in exits {
            self.inside.remove(&session);
            self.gathered.remove(&session);
        }
        let entries: Vec<SessionId> = now.difference(&self.inside).copied().collect();
        for session in entries {
            self.inside.insert(session);
            self.handle_entry(session, world, hideouts, outbox);
            if !self.enabled {
                return;
            }
        }

        match self.state {
            RendezvousState::Waiting => {
                if let Some(seconds_left) = self.countdown.whole_seconds_left() {
                    if self.last_second != Some(seconds_left) {
                        self.last_second = Some(seconds_left);
                        outbox.to_many(
                            self.gathered.iter().copied().collect(),
                            Event::RendezvousCountdown { seconds_left },
                        );
                    }
                }
                if self.countdown.advance(dt) {
                    if self.alive_count <= 2 {
                        self.set_state(RendezvousState::Disabled, outbox);
                    } else {
                        self.set_state(RendezvousState::Ready, outbox);
                        outbox.all(Event::Notice {
                            message: "the bell is ready".to_string(),
                        });
                    }
                }
            }
            RendezvousState::Ready if self.alive_count <= 2 => {
                self.set_state(RendezvousState::Disabled, outbox);
            }
            _ => {}
        }
    }

    fn handle_entry(
        &mut self,
        session: SessionId,
        world: &mut World,
        hideouts: &mut HideoutRegistry,
        outbox: &mut Outbox,
    ) {
        if self.state == RendezvousState::Activated {
            return;
        }
        if self.two_player_mode {
            outbox.to(
                session,
                Event::Notice {
                    message: "only two players are left, the bell cannot be rung".to_string(),
                },
            );
            return;
        }
        if self.day < self.config.first_usable_day {
            outbox.to(
                session,
                Event::Notice {
                    message: format!(
                        "the bell can be used from day {}",
                        self.config.first_usable_day
                    ),
                },
            );
            return;
        }
        if !world.is_alive(session) {
            return;
        }

        self.gathered.insert(session);
        match self.state {
            RendezvousState::Waiting => {
                if let Some(seconds_left) = self.countdown.whole_seconds_left() {
                    outbox.to(session, Event::RendezvousCountdown { seconds_left });
                }
            }
            RendezvousState::Ready => {
                self.try_activate(world, hideouts, outbox);
            }
            RendezvousState::Disabled | RendezvousState::Activated => {
                outbox.to(
                    session,
                    Event::Notice {
                        message: "the bell is not ready".to_string(),
                    },
                );
            }
        }
    }

    /// Rings the bell if enough living participants are gathered.
    fn try_activate(
        &mut self,
        world: &mut World,
        hideouts: &mut HideoutRegistry,
        outbox: &mut Outbox,
    ) -> bool {
        let alive = world.alive_count();
        self.alive_count = alive;
        if alive <= 2 {
            self.set_state(RendezvousState::Disabled, outbox);
            return false;
        }
        let required = alive.div_ceil(2);
        let present = self
            .gathered
            .iter()
            .filter(|s| world.is_alive(**s))
            .count() as u32;
        if present < required {
            debug!("Bell quorum {}/{}", present, required);
            return false;
        }

        self.set_state(RendezvousState::Activated, outbox);
        info!("Bell rung with {} of {} alive", present, alive);
        for (index, session) in world.alive_sessions().into_iter().enumerate() {
            hideouts.force_unhide(session, world, outbox);
            let slot = self.slot(index);
            if let Some(character) = world.character_of_mut(session) {
                character.position = slot;
            }
            outbox.all(Event::Teleported {
                session,
                position: slot,
            });
        }
        outbox.all(Event::Notice {
            message: "the bell has been rung".to_string(),
        });

        self.enabled = false;
        self.inside.clear();
        self.gathered.clear();
        self.set_state(RendezvousState::Disabled, outbox);
        true
    }

    fn set_state(&mut self, state: RendezvousState, outbox: &mut Outbox) {
        if self.state == state {
            return;
        }
        self.state = state;
        outbox.all(Event::RendezvousChanged {
            state,
            alive_count: self.alive_count,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use assert_approx_eq::assert_approx_eq;

    struct Fixture {
        bell: Rendezvous,
        world: World,
        hideouts: HideoutRegistry,
        outbox: Outbox,
    }

    impl Fixture {
        fn new(alive: u32) -> Self {
            let config = GameConfig::default();
            let mut world = World::new();
            for session in 1..=alive {
                world.add_participant(session, true);
                world.spawn_character(session, Vec3::flat(-8.0, session as f32));
            }
            Self {
                bell: Rendezvous::new(&config.map.rendezvous, &config.rendezvous),
                world,
                hideouts: HideoutRegistry::new(&config.map.hideouts, config.interact.range),
                outbox: Outbox::new(),
            }
        }

        fn tick(&mut self, dt: f32) {
            self.bell
                .tick(dt, &mut self.world, &mut self.hideouts, &mut self.outbox);
        }

        fn walk_in(&mut self, session: SessionId) {
            self.world.character_of_mut(session).unwrap().position = Vec3::flat(0.5, 0.5);
        }

        fn arm(&mut self, day: u32) {
            self.bell.on_day_start(day, &self.world, &mut self.outbox);
            for _ in 0..60 {
                self.tick(0.1);
            }
        }
    }

    #[test]
    fn test_day_start_waits_then_readies() {
        let mut fx = Fixture::new(5);
        fx.bell.on_day_start(2, &fx.world, &mut fx.outbox);
        assert_eq!(fx.bell.state(), RendezvousState::Waiting);
        for _ in 0..49 {
            fx.tick(0.1);
        }
        assert_eq!(fx.bell.state(), RendezvousState::Waiting);
        fx.tick(0.1);
        assert_eq!(fx.bell.state(), RendezvousState::Ready);
    }

    #[test]
    fn test_two_alive_never_arms() {
        let mut fx = Fixture::new(2);
        fx.arm(3);
        assert_eq!(fx.bell.state(), RendezvousState::Disabled);
        fx.walk_in(1);
        fx.walk_in(2);
        fx.tick(0.1);
        assert_eq!(fx.bell.state(), RendezvousState::Disabled);
        assert!(fx.bell.gathered().is_empty());
    }

    #[test]
    fn test_first_day_is_unusable() {
        let mut fx = Fixture::new(5);
        fx.arm(1);
        assert_eq!(fx.bell.state(), RendezvousState::Disabled);
        fx.outbox.drain();
        fx.walk_in(1);
        fx.tick(0.1);
        let notices: Vec<_> = fx
            .outbox
            .drain()
            .into_iter()
            .filter(|b| b.reaches(1) && matches!(b.event, Event::Notice { .. }))
            .collect();
        assert_eq!(notices.len(), 1);
    }

    #[test]
    fn test_countdown_sent_to_occupants_only() {
        let mut fx = Fixture::new(4);
        fx.walk_in(1);
        fx.bell.on_day_start(2, &fx.world, &mut fx.outbox);
        fx.outbox.drain();
        fx.tick(0.1);
        let countdowns: Vec<_> = fx
            .outbox
            .drain()
            .into_iter()
            .filter(|b| matches!(b.event, Event::RendezvousCountdown { .. }))
            .collect();
        assert_eq!(countdowns.len(), 1);
        assert_eq!(countdowns[0].targets, Some(vec![1]));
    }

    #[test]
    fn test_quorum_teleports_everyone() {
        let mut fx = Fixture::new(5);
        fx.arm(2);
        assert_eq!(fx.bell.state(), RendezvousState::Ready);
        fx.world.character_of_mut(5).unwrap().position = Vec3::flat(-10.0, 10.0);
        fx.hideouts
            .request(0, 5, &mut fx.world, &mut fx.outbox)
            .unwrap();

        fx.walk_in(1);
        fx.walk_in(2);
        fx.tick(0.1);
        assert_eq!(fx.bell.state(), RendezvousState::Ready);

        fx.outbox.drain();
        fx.walk_in(3);
        fx.tick(0.1);
        assert_eq!(fx.bell.state(), RendezvousState::Disabled);
        let states: Vec<RendezvousState> = fx
            .outbox
            .pending()
            .iter()
            .filter_map(|b| match b.event {
                Event::RendezvousChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![RendezvousState::Activated, RendezvousState::Disabled]
        );

        assert!(!fx.hideouts.is_hidden(5));
        for session in 1..=5 {
            let position = fx.world.position_of(session).unwrap();
            assert_approx_eq!(position.planar_distance(Vec3::ZERO), 2.0, 0.001);
        }
    }

    #[test]
    fn test_exit_removes_from_gathered() {
        let mut fx = Fixture::new(5);
        fx.arm(2);
        fx.walk_in(1);
        fx.tick(0.1);
        assert!(fx.bell.gathered().contains(&1));
        fx.world.character_of_mut(1).unwrap().position = Vec3::flat(-8.0, 1.0);
        fx.tick(0.1);
        assert!(!fx.bell.gathered().contains(&1));
    }

    #[test]
    fn test_night_disables() {
        let mut fx = Fixture::new(5);
        fx.arm(2);
        fx.bell.on_night_start(&mut fx.outbox);
        assert_eq!(fx.bell.state(), RendezvousState::Disabled);
        for session in 1..=5 {
            fx.walk_in(session);
        }
        fx.tick(0.1);
        assert_eq!(fx.bell.state(), RendezvousState::Disabled);
    }

    #[test]
    fn test_deaths_before_ready_disable() {
        let mut fx = Fixture::new(3);
        fx.bell.on_day_start(2, &fx.world, &mut fx.outbox);
        assert_eq!(fx.bell.state(), RendezvousState::Waiting);
        fx.world.destroy_character(3);
        for _ in 0..60 {
            fx.tick(0.1);
        }
        assert_eq!(fx.bell.state(), RendezvousState::Disabled);
    }

    #[test]
    fn test_slots_are_distinct() {
        let fx = Fixture::new(1);
        let slots: Vec<Vec3> = (0..TELEPORT_SLOTS).map(|i| fx.bell.slot(i)).collect();
        for (i, a) in slots.iter().enumerate() {
            for b in &slots[i + 1..] {
                assert!(a.planar_distance(*b) > 0.5);
            }
        }
        assert_eq!(fx.bell.slot(0), fx.bell.slot(TELEPORT_SLOTS));
    }
}
