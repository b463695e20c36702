//! Participants and the character arena.
//!
//! Characters live in a generational arena. Anything that refers to a
//! character it does not own (an agent's chase target, a pending lookup) holds
//! a [`CharacterHandle`]; once the character is destroyed the slot generation
//! moves on and every outstanding handle resolves to `None`.

use crate::infection::InfectionState;
use log::{debug, info};
use shared::{SessionId, Vec3, MAX_HEALTH};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacterHandle {
    index: u32,
    generation: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Character {
    pub owner: SessionId,
    pub position: Vec3,
    pub health: f32,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    character: Option<Character>,
}

#[derive(Debug, Default)]
pub struct CharacterArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
    live: usize,
}

impl CharacterArena {
    pub fn spawn(&mut self, character: Character) -> CharacterHandle {
        self.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.character = Some(character);
            return CharacterHandle {
                index,
                generation: slot.generation,
            };
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            character: Some(character),
        });
        CharacterHandle {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, handle: CharacterHandle) -> Option<&Character> {
        self.slots
            .get(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.character.as_ref())
    }

    pub fn get_mut(&mut self, handle: CharacterHandle) -> Option<&mut Character> {
        self.slots
            .get_mut(handle.index as usize)
            .filter(|slot| slot.generation == handle.generation)
            .and_then(|slot| slot.character.as_mut())
    }

    /// Removes the character and retires the handle.
    pub fn despawn(&mut self, handle: CharacterHandle) -> Option<Character> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        let character = slot.character.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.live -= 1;
        Some(character)
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub session: SessionId,
    pub character: Option<CharacterHandle>,
    /// False for spectators and for anyone who has died this round.
    pub alive: bool,
    pub infection: InfectionState,
    /// Last movement permission pushed to the owner.
    pub may_move: bool,
    pub move_intent: Vec3,
}

impl Participant {
    pub fn new(session: SessionId, alive: bool) -> Self {
        Self {
            session,
            character: None,
            alive,
            infection: InfectionState::default(),
            may_move: true,
            move_intent: Vec3::ZERO,
        }
    }
}

#[derive(Debug, Default)]
pub struct World {
    participants: BTreeMap<SessionId, Participant>,
    characters: CharacterArena,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_participant(&mut self, session: SessionId, alive: bool) {
        info!(
            "Participant {} joined{}",
            session,
            if alive { "" } else { " as a spectator" }
        );
        self.participants
            .insert(session, Participant::new(session, alive));
    }

    /// Drops the participant and destroys their character, if any.
    pub fn remove_participant(&mut self, session: SessionId) -> Option<Participant> {
        let participant = self.participants.remove(&session)?;
        if let Some(handle) = participant.character {
            self.characters.despawn(handle);
        }
        info!("Participant {} left", session);
        Some(participant)
    }

    pub fn participant(&self, session: SessionId) -> Option<&Participant> {
        self.participants.get(&session)
    }

    pub fn participant_mut(&mut self, session: SessionId) -> Option<&mut Participant> {
        self.participants.get_mut(&session)
    }

    pub fn participants(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    pub fn participants_mut(&mut self) -> impl Iterator<Item = &mut Participant> {
        self.participants.values_mut()
    }

    pub fn sessions(&self) -> Vec<SessionId> {
        self.participants.keys().copied().collect()
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn spawn_character(&mut self, session: SessionId, position: Vec3) -> Option<CharacterHandle> {
        let participant = self.participants.get_mut(&session)?;
        if let Some(old) = participant.character.take() {
            self.characters.despawn(old);
        }
        let handle = self.characters.spawn(Character {
            owner: session,
            position,
            health: MAX_HEALTH,
        });
        participant.character = Some(handle);
        debug!("Spawned character for participant {} at {:?}", session, position);
        Some(handle)
    }

    /// Destroys the participant's character. The handle is retired for good.
    pub fn destroy_character(&mut self, session: SessionId) -> Option<Character> {
        let handle = self.participants.get_mut(&session)?.character.take()?;
        self.characters.despawn(handle)
    }

    pub fn handle_of(&self, session: SessionId) -> Option<CharacterHandle> {
        self.participants.get(&session)?.character
    }

    pub fn character(&self, handle: CharacterHandle) -> Option<&Character> {
        self.characters.get(handle)
    }

    pub fn character_mut(&mut self, handle: CharacterHandle) -> Option<&mut Character> {
        self.characters.get_mut(handle)
    }

    pub fn character_of(&self, session: SessionId) -> Option<&Character> {
        self.handle_of(session)
            .and_then(|handle| self.characters.get(handle))
    }

    pub fn character_of_mut(&mut self, session: SessionId) -> Option<&mut Character> {
        let handle = self.handle_of(session)?;
        self.characters.get_mut(handle)
    }

    pub fn position_of(&self, session: SessionId) -> Option<Vec3> {
        self.character_of(session).map(|c| c.position)
    }

    pub fn is_alive(&self, session: SessionId) -> bool {
        self.participants
            .get(&session)
            .map(|p| p.alive && p.character.is_some())
            .unwrap_or(false)
    }

    /// Alive participants that currently have a character.
    pub fn alive_sessions(&self) -> Vec<SessionId> {
        self.participants
            .values()
            .filter(|p| p.alive && p.character.is_some())
            .map(|p| p.session)
            .collect()
    }

    pub fn alive_count(&self) -> u32 {
        self.participants
            .values()
            .filter(|p| p.alive && p.character.is_some())
            .count() as u32
    }

    pub fn character_count(&self) -> usize {
        self.characters.len()
    }
}
