//! Integration tests for the authority and the observer
//!
//! These tests drive whole rounds through the public `GameState` API, feed the
//! results into observers, and exercise the real UDP loop end to end.

use bincode::{deserialize, serialize};
use client::game::ObserverState;
use server::config::GameConfig;
use server::events::Broadcast;
use server::game::GameState;
use server::roles::Capability;
use shared::{
    AgentMode, Command, DeathCause, Event, InfectionOutcome, ObjectId, Packet, Phase,
    RendezvousState, RoundStatus, SessionId, Vec3, PROTOCOL_VERSION,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_test::assert_ok;

const DT: f32 = 0.1;

/// NETWORK PROTOCOL TESTS
mod protocol_tests {
    use super::*;

    /// Commands keep their claimed issuer through the codec
    #[test]
    fn command_packet_keeps_issuer() {
        let packet = Packet::Command {
            issuer: 3,
            command: Command::Interact {
                object: ObjectId::Hideout(1),
            },
        };
        let decoded: Packet = deserialize(&serialize(&packet).unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    /// Garbage never decodes into a packet
    #[test]
    fn malformed_packet_handling() {
        let garbage: Vec<&[u8]> = vec![&[], &[255, 255, 255, 255, 255], &[0x13, 0x37]];
        for data in garbage {
            assert!(deserialize::<Packet>(data).is_err());
        }
    }

    /// Connect, receive a session id and at least one snapshot over real UDP
    #[tokio::test]
    async fn connect_over_udp_and_receive_snapshot() {
        let mut server = server::network::Server::new("127.0.0.1:0", config(11))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let script = async {
            let hello = serialize(&Packet::Connect {
                client_version: PROTOCOL_VERSION,
            })
            .unwrap();
            socket.send_to(&hello, addr).await.unwrap();

            let mut observer = ObserverState::new();
            let mut buffer = [0u8; 8192];
            while observer.session_id.is_none() || observer.clock.is_none() {
                let (len, _) = socket.recv_from(&mut buffer).await.unwrap();
                observer.apply_packet(deserialize(&buffer[..len]).unwrap());
            }
            observer
        };

        let observer = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::select! {
                _ = server.run() => None,
                observer = script => Some(observer),
            }
        })
        .await
        .expect("authority never answered")
        .expect("authority loop stopped");

        assert_eq!(observer.session_id, Some(1));
        assert_eq!(observer.clock.as_ref().map(|c| c.status), Some(RoundStatus::Lobby));
    }

    /// A client speaking another protocol version is turned away
    #[tokio::test]
    async fn version_mismatch_over_udp() {
        let mut server = server::network::Server::new("127.0.0.1:0", config(12))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        let socket = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let script = async {
            let hello = serialize(&Packet::Connect {
                client_version: PROTOCOL_VERSION + 1,
            })
            .unwrap();
            socket.send_to(&hello, addr).await.unwrap();
            let mut buffer = [0u8; 1024];
            let (len, _) = socket.recv_from(&mut buffer).await.unwrap();
            deserialize::<Packet>(&buffer[..len]).unwrap()
        };

        let reply = tokio::time::timeout(Duration::from_secs(5), async {
            tokio::select! {
                _ = server.run() => None,
                reply = script => Some(reply),
            }
        })
        .await
        .unwrap()
        .unwrap();

        assert!(matches!(reply, Packet::Disconnected { .. }));
        assert!(server.game().world().participant(1).is_none());
    }
}

/// ROUND FLOW TESTS
mod round_flow_tests {
    use super::*;

    /// A short round runs to completion on its own timers
    #[test]
    fn round_runs_to_game_over() {
        let mut cfg = config(5);
        cfg.round.day_duration = 2.0;
        cfg.round.night_duration = 1.0;
        cfg.round.max_days = 3;
        let mut game = started_with(cfg, 4);

        let mut broadcasts = Vec::new();
        let mut last_day = game.cycle().day();
        for _ in 0..150 {
            game.update(DT);
            assert!(game.cycle().day() >= last_day);
            last_day = game.cycle().day();
            broadcasts.extend(game.drain_outbox());
        }

        assert_eq!(game.status(), RoundStatus::Over);
        let phases: Vec<Phase> = broadcasts
            .iter()
            .filter_map(|b| match b.event {
                Event::PhaseChanged { phase, .. } => Some(phase),
                _ => None,
            })
            .collect();
        assert_eq!(
            phases,
            vec![Phase::Night, Phase::Day, Phase::Night, Phase::Day, Phase::Night]
        );
        let game_overs = broadcasts
            .iter()
            .filter(|b| matches!(b.event, Event::GameOver { day: 3 }))
            .count();
        assert_eq!(game_overs, 1);
        assert!(game.handle_command(1, 1, &Command::ToggleDayNight).is_err());
    }

    /// Only the host drives the clock, and a rejection is private
    #[test]
    fn toggle_is_host_only() {
        let mut game = started(3);
        assert!(game.handle_command(2, 2, &Command::ToggleDayNight).is_err());
        let denied = game.drain_outbox();
        assert_eq!(denied.len(), 1);
        assert_eq!(denied[0].targets, Some(vec![2]));
        assert_eq!(game.cycle().phase(), Phase::Day);

        assert_ok!(game.handle_command(1, 1, &Command::ToggleDayNight));
        assert_eq!(game.cycle().phase(), Phase::Night);
    }

    /// Whoever joined earliest and is still here becomes host
    #[test]
    fn host_passes_to_next_joiner() {
        let mut game = started(3);
        game.remove_participant(1);
        assert_eq!(game.host(), Some(2));
        assert_ok!(game.handle_command(2, 2, &Command::ToggleDayNight));
    }
}

/// INFECTION SCENARIO TESTS
mod infection_tests {
    use super::*;

    struct Cast {
        carrier: SessionId,
        nurse: SessionId,
        pharmacist: SessionId,
        victim: SessionId,
    }

    /// Five seats, five distinct roles, and the cast standing close together
    fn staged() -> (GameState, Cast) {
        let mut cfg = config(21);
        cfg.roles.catalogue = ["Carrier", "Nurse", "Pharmacist", "Doctor", "Soldier"]
            .iter()
            .map(|r| r.to_string())
            .collect();
        let mut game = started_with(cfg, 5);
        let cast = Cast {
            carrier: holder(&game, Capability::Carrier),
            nurse: holder(&game, Capability::Nurse),
            pharmacist: holder(&game, Capability::Pharmacist),
            victim: holder(&game, Capability::Doctor),
        };
        let soldier = holder(&game, Capability::Soldier);
        place(&mut game, cast.carrier, -12.0, 8.0);
        place(&mut game, cast.victim, -11.0, 8.0);
        place(&mut game, cast.nurse, -10.0, 8.0);
        place(&mut game, cast.pharmacist, -11.0, 9.0);
        place(&mut game, soldier, -12.0, -12.0);
        (game, cast)
    }

    fn holder(game: &GameState, capability: Capability) -> SessionId {
        (1..=5)
            .find(|s| game.roles().capability(*s) == Some(capability))
            .expect("every catalogue role is dealt")
    }

    /// Toggles to day and waits out the morning grace delay
    fn dawn(game: &mut GameState) -> Vec<Broadcast> {
        assert_ok!(game.handle_command(1, 1, &Command::ToggleDayNight));
        let mut broadcasts = game.drain_outbox();
        for _ in 0..55 {
            game.update(DT);
            broadcasts.extend(game.drain_outbox());
        }
        broadcasts
    }

    fn outcome_for(broadcasts: &[Broadcast], session: SessionId) -> Option<InfectionOutcome> {
        broadcasts.iter().find_map(|b| match b.event {
            Event::InfectionResolved { outcome } if b.reaches(session) => Some(outcome),
            _ => None,
        })
    }

    #[test]
    fn protection_before_infection_saves() {
        let (mut game, cast) = staged();
        toggle(&mut game);
        assert_ok!(game.handle_command(cast.nurse, cast.nurse, &Command::Protect { target: cast.victim }));
        assert_ok!(game.handle_command(cast.carrier, cast.carrier, &Command::Infect { target: cast.victim }));

        let broadcasts = dawn(&mut game);
        assert!(game.world().is_alive(cast.victim));
        assert_eq!(
            outcome_for(&broadcasts, cast.victim),
            Some(InfectionOutcome::Protected)
        );
    }

    #[test]
    fn protection_after_infection_is_too_late() {
        let (mut game, cast) = staged();
        toggle(&mut game);
        assert_ok!(game.handle_command(cast.carrier, cast.carrier, &Command::Infect { target: cast.victim }));
        assert_ok!(game.handle_command(cast.nurse, cast.nurse, &Command::Protect { target: cast.victim }));

        let broadcasts = dawn(&mut game);
        assert!(!game.world().is_alive(cast.victim));
        assert!(broadcasts.iter().any(|b| matches!(
            b.event,
            Event::DeathNotice {
                cause: DeathCause::Infection,
                ..
            }
        )));
        assert_eq!(game.agents().len(), 1);
    }

    #[test]
    fn immunity_dose_is_consumed() {
        let (mut game, cast) = staged();
        toggle(&mut game);
        assert_ok!(game.handle_command(
            cast.pharmacist,
            cast.pharmacist,
            &Command::Immunize { target: cast.victim }
        ));
        assert_ok!(game.handle_command(cast.carrier, cast.carrier, &Command::Infect { target: cast.victim }));

        let broadcasts = dawn(&mut game);
        assert_eq!(
            outcome_for(&broadcasts, cast.victim),
            Some(InfectionOutcome::Immunized)
        );
        let state = &game.world().participant(cast.victim).unwrap().infection;
        assert!(!state.immune_from_consumable);
        assert!(!state.is_infected);
    }

    #[test]
    fn gas_mask_saves_once() {
        let (mut game, cast) = staged();
        assert_ok!(game.handle_command(cast.victim, cast.victim, &Command::EquipMask));
        toggle(&mut game);
        assert!(game
            .handle_command(cast.victim, cast.victim, &Command::EquipMask)
            .is_err());
        assert_ok!(game.handle_command(cast.carrier, cast.carrier, &Command::Infect { target: cast.victim }));

        let broadcasts = dawn(&mut game);
        assert_eq!(
            outcome_for(&broadcasts, cast.victim),
            Some(InfectionOutcome::MaskSaved)
        );
        assert!(game.world().participant(cast.victim).unwrap().infection.mask_consumed);
        assert!(game
            .handle_command(cast.victim, cast.victim, &Command::EquipMask)
            .is_err());
    }

    #[test]
    fn one_attempt_per_night() {
        let (mut game, cast) = staged();
        toggle(&mut game);
        assert_ok!(game.handle_command(cast.carrier, cast.carrier, &Command::Infect { target: cast.victim }));
        game.drain_outbox();
        assert!(game
            .handle_command(cast.carrier, cast.carrier, &Command::Infect { target: cast.pharmacist })
            .is_err());

        let feedback = game.drain_outbox();
        assert!(matches!(
            feedback[0].event,
            Event::InfectFeedback { success: false, .. }
        ));
        assert_eq!(feedback[0].targets, Some(vec![cast.carrier]));
    }

    #[test]
    fn resolution_happens_once() {
        let (mut game, cast) = staged();
        toggle(&mut game);
        assert_ok!(game.handle_command(cast.carrier, cast.carrier, &Command::Infect { target: cast.victim }));
        dawn(&mut game);

        let mut later = Vec::new();
        for _ in 0..100 {
            game.update(DT);
            later.extend(game.drain_outbox());
        }
        assert!(!later.iter().any(|b| matches!(
            b.event,
            Event::DeathNotice {
                cause: DeathCause::Infection,
                ..
            } | Event::InfectionResolved { .. }
        )));
    }
}

/// HOSTILE AGENT TESTS
mod agent_tests {
    use super::*;

    /// Participant 2 alone in the west half, everyone else behind the partition
    fn lone_target() -> GameState {
        let mut game = started(3);
        place(&mut game, 1, 10.0, 10.0);
        place(&mut game, 2, -10.0, -10.0);
        place(&mut game, 3, 10.0, -5.0);
        game
    }

    #[test]
    fn kill_raises_a_new_agent() {
        let mut game = lone_target();
        game.spawn_agent(Vec3::flat(-10.0, -8.5));
        game.drain_outbox();

        let mut broadcasts = Vec::new();
        for _ in 0..60 {
            game.update(DT);
            broadcasts.extend(game.drain_outbox());
            if !game.world().is_alive(2) {
                break;
            }
        }

        assert!(!game.world().is_alive(2));
        assert_eq!(game.agents().len(), 2);
        let effect = broadcasts
            .iter()
            .position(|b| matches!(b.event, Event::DeathEffect { .. }))
            .expect("death effect");
        let last_hit = broadcasts
            .iter()
            .position(|b| matches!(b.event, Event::Damaged { health } if health == 0.0))
            .expect("final hit");
        assert!(effect < last_hit);
        assert!(broadcasts.iter().any(|b| b.targets == Some(vec![2])
            && matches!(
                b.event,
                Event::YouDied {
                    cause: DeathCause::Attack
                }
            )));
        assert!(game.world().is_alive(1));
        assert!(game.world().is_alive(3));
    }

    #[test]
    fn one_hunter_per_participant() {
        let mut game = lone_target();
        game.spawn_agent(Vec3::flat(-10.0, -8.0));
        game.spawn_agent(Vec3::flat(-8.0, -10.0));
        game.spawn_agent(Vec3::flat(-12.0, -7.0));

        for _ in 0..40 {
            game.update(DT);
            assert!(game.agents().hunters_of(2) <= 1);
        }
    }

    #[test]
    fn leaving_mid_chase_releases_the_hunter() {
        let mut game = lone_target();
        let agent = game.spawn_agent(Vec3::flat(-10.0, -5.0));
        game.update(DT);
        game.update(DT);
        assert_eq!(game.agents().get(agent).unwrap().mode(), AgentMode::Chase);

        game.remove_participant(2);
        game.update(DT);
        assert_eq!(game.agents().get(agent).unwrap().mode(), AgentMode::Search);
        assert_eq!(game.agents().len(), 1);
    }

    #[test]
    fn hidden_participant_is_never_hunted() {
        let mut game = lone_target();
        place(&mut game, 2, -10.0, 10.5);
        assert_ok!(game.handle_command(2, 2, &Command::Interact {
            object: ObjectId::Hideout(0)
        }));
        let agent = game.spawn_agent(Vec3::flat(-9.0, 12.0));

        for _ in 0..30 {
            game.update(DT);
            assert_ne!(game.agents().get(agent).unwrap().mode(), AgentMode::Chase);
        }
        assert!(game.world().is_alive(2));
    }
}

/// DOOR, HIDEOUT AND RENDEZVOUS ARBITRATION TESTS
mod arbitration_tests {
    use super::*;

    #[test]
    fn simultaneous_door_requests() {
        let mut game = started(3);
        place(&mut game, 1, 3.8, 0.0);
        place(&mut game, 2, 3.8, 0.8);
        let door = Command::Interact {
            object: ObjectId::Door(0),
        };

        assert_ok!(game.handle_command(1, 1, &door));
        assert!(game.handle_command(2, 2, &door).is_err());
        assert!(game.doors().get(0).unwrap().is_open());
        assert!(game.doors().get(0).unwrap().is_busy());
    }

    #[test]
    fn occupied_doorway_keeps_door_open() {
        let mut game = started(3);
        place(&mut game, 1, 3.8, 0.0);
        let door = Command::Interact {
            object: ObjectId::Door(0),
        };
        assert_ok!(game.handle_command(1, 1, &door));
        for _ in 0..12 {
            game.update(DT);
        }
        place(&mut game, 2, 5.5, 0.0);
        game.drain_outbox();

        assert!(game.handle_command(1, 1, &door).is_err());
        assert!(game.doors().get(0).unwrap().is_open());
        let denied = game.drain_outbox();
        assert!(matches!(denied[0].event, Event::Denied { .. }));

        place(&mut game, 2, 8.0, 8.0);
        assert_ok!(game.handle_command(1, 1, &door));
        assert!(!game.doors().get(0).unwrap().is_open());
    }

    #[test]
    fn hideout_holds_one_and_freezes_them() {
        let mut game = started(3);
        place(&mut game, 1, -10.0, 10.5);
        place(&mut game, 2, -10.5, 10.0);
        let hide = Command::Interact {
            object: ObjectId::Hideout(0),
        };

        assert_ok!(game.handle_command(1, 1, &hide));
        assert!(game.handle_command(2, 2, &hide).is_err());
        assert_eq!(game.hideouts().occupant(0), Some(1));

        game.drain_outbox();
        game.update(DT);
        let permissions: Vec<Broadcast> = game
            .drain_outbox()
            .into_iter()
            .filter(|b| matches!(b.event, Event::MovementPermission { .. }))
            .collect();
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].targets, Some(vec![1]));
        assert_eq!(
            permissions[0].event,
            Event::MovementPermission { can_move: false }
        );
    }

    /// Day two, five alive, three step onto the trigger
    #[test]
    fn rendezvous_quorum_gathers_everyone() {
        let mut game = started(5);
        for session in 1..=5u32 {
            place(&mut game, session, -12.0, -12.0 + 2.0 * session as f32);
        }
        toggle(&mut game);
        toggle(&mut game);
        assert_eq!(game.cycle().day(), 2);
        assert_eq!(game.rendezvous().state(), RendezvousState::Waiting);
        for _ in 0..55 {
            game.update(DT);
        }
        assert_eq!(game.rendezvous().state(), RendezvousState::Ready);

        place(&mut game, 5, -10.0, 10.5);
        assert_ok!(game.handle_command(5, 5, &Command::Interact {
            object: ObjectId::Hideout(0)
        }));
        place(&mut game, 1, 0.0, 0.0);
        place(&mut game, 2, 0.5, 0.0);
        game.drain_outbox();
        game.update(DT);
        assert_eq!(game.rendezvous().state(), RendezvousState::Ready);

        place(&mut game, 3, -0.5, 0.0);
        game.update(DT);
        let broadcasts = game.drain_outbox();

        assert!(broadcasts.iter().any(|b| matches!(
            b.event,
            Event::RendezvousChanged {
                state: RendezvousState::Activated,
                ..
            }
        )));
        let teleports = broadcasts
            .iter()
            .filter(|b| matches!(b.event, Event::Teleported { .. }))
            .count();
        assert_eq!(teleports, 5);
        assert!(!game.hideouts().is_hidden(5));
        for session in 1..=5 {
            let position = game.world().position_of(session).unwrap();
            assert!((position.planar_distance(Vec3::ZERO) - 2.0).abs() < 1e-3);
        }
    }

    #[test]
    fn two_survivors_never_ring() {
        let mut game = started(2);
        toggle(&mut game);
        toggle(&mut game);
        place(&mut game, 1, 0.0, 0.0);
        place(&mut game, 2, 0.5, 0.5);

        let mut broadcasts = Vec::new();
        for _ in 0..80 {
            game.update(DT);
            broadcasts.extend(game.drain_outbox());
        }
        assert_eq!(game.rendezvous().state(), RendezvousState::Disabled);
        assert!(!broadcasts.iter().any(|b| matches!(
            b.event,
            Event::RendezvousChanged {
                state: RendezvousState::Activated,
                ..
            } | Event::Teleported { .. }
        )));
        let notices = broadcasts
            .iter()
            .filter(|b| b.targets.is_some() && matches!(b.event, Event::Notice { .. }))
            .count();
        assert_eq!(notices, 2);
    }
}

/// OBSERVER INTEGRATION TESTS
mod observer_tests {
    use super::*;

    /// Delivers pending broadcasts and a fresh snapshot to every observer
    fn deliver(game: &mut GameState, observers: &mut BTreeMap<SessionId, ObserverState>) {
        for broadcast in game.drain_outbox() {
            for (session, observer) in observers.iter_mut() {
                if broadcast.reaches(*session) {
                    observer.apply_packet(Packet::Event(broadcast.event.clone()));
                }
            }
        }
        for (session, observer) in observers.iter_mut() {
            observer.apply_packet(game.snapshot_for(*session, 0, 0));
        }
    }

    fn connected(game: &GameState) -> BTreeMap<SessionId, ObserverState> {
        game.world()
            .sessions()
            .into_iter()
            .map(|session| {
                let mut observer = ObserverState::new();
                observer.apply_packet(Packet::Connected {
                    session_id: session,
                });
                (session, observer)
            })
            .collect()
    }

    #[test]
    fn only_the_carrier_knows() {
        let mut game = lobby(GameConfig::default(), 5);
        let mut observers = connected(&game);
        assert_ok!(game.handle_command(1, 1, &Command::StartGame));
        game.update(DT);
        deliver(&mut game, &mut observers);

        let carrier = game.roles().carrier().unwrap();
        for (session, observer) in &observers {
            assert_eq!(observer.carrier, *session == carrier);
            assert!(observer.own_role.is_some());
            let seen = observer.participants[&carrier].role.as_deref();
            if *session == carrier {
                assert_eq!(seen, Some("Carrier"));
            } else {
                assert_ne!(seen, Some("Carrier"));
            }
        }
    }

    #[test]
    fn night_freezes_observers_except_the_carrier() {
        let mut game = lobby(config(31), 4);
        let mut observers = connected(&game);
        assert_ok!(game.handle_command(1, 1, &Command::StartGame));
        game.update(DT);
        deliver(&mut game, &mut observers);
        assert!(observers.values().all(|o| o.can_move));

        assert_ok!(game.handle_command(1, 1, &Command::ToggleDayNight));
        game.update(DT);
        deliver(&mut game, &mut observers);

        let carrier = game.roles().carrier().unwrap();
        for (session, observer) in &observers {
            assert_eq!(observer.can_move, *session == carrier);
            assert_eq!(observer.clock.as_ref().map(|c| c.phase), Some(Phase::Night));
        }
    }

    #[test]
    fn victim_observer_sees_own_death() {
        let mut game = lobby(config(41), 3);
        let mut observers = connected(&game);
        assert_ok!(game.handle_command(1, 1, &Command::StartGame));
        place(&mut game, 1, 10.0, 10.0);
        place(&mut game, 2, -10.0, -10.0);
        place(&mut game, 3, 10.0, -5.0);
        game.spawn_agent(Vec3::flat(-10.0, -9.0));

        for _ in 0..40 {
            game.update(DT);
            deliver(&mut game, &mut observers);
        }

        let victim = &observers[&2];
        assert!(!victim.alive);
        assert!(!victim.can_move);
        assert_eq!(victim.health, 0.0);
        assert!(!observers[&1].participants[&2].alive);
        assert_eq!(observers[&1].agents.len(), 2);
    }
}

// HELPER FUNCTIONS

fn config(seed: u64) -> GameConfig {
    GameConfig {
        seed: Some(seed),
        ..GameConfig::default()
    }
}

fn lobby(cfg: GameConfig, count: u32) -> GameState {
    let mut game = GameState::new(cfg).unwrap();
    for session in 1..=count {
        game.add_participant(session);
    }
    game.update(0.2);
    game
}

fn started_with(cfg: GameConfig, count: u32) -> GameState {
    let mut game = lobby(cfg, count);
    game.handle_command(1, 1, &Command::StartGame).unwrap();
    game.drain_outbox();
    game
}

fn started(count: u32) -> GameState {
    started_with(config(9), count)
}

fn place(game: &mut GameState, session: SessionId, x: f32, z: f32) {
    game.world_mut()
        .character_of_mut(session)
        .unwrap()
        .position = Vec3::flat(x, z);
}

fn toggle(game: &mut GameState) {
    game.handle_command(1, 1, &Command::ToggleDayNight).unwrap();
    game.drain_outbox();
}
