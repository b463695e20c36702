//! Role catalogue and per-round role assignment.
//!
//! Roles are bound to capabilities through a fixed table rather than by name
//! lookup at runtime: every catalogue entry is parsed into a [`Capability`]
//! when the round is configured, and the rest of the simulation only ever
//! matches on the enum.

use crate::config::RoleConfig;
use crate::error::ConfigError;
use log::{info, warn};
use rand::Rng;
use shared::SessionId;
use std::collections::HashMap;

/// Ability bundle granted by a role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Carrier,
    Nurse,
    Pharmacist,
    Doctor,
    Soldier,
    Scientist,
    Villain,
    Engineer,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::Carrier,
        Capability::Nurse,
        Capability::Pharmacist,
        Capability::Doctor,
        Capability::Soldier,
        Capability::Scientist,
        Capability::Villain,
        Capability::Engineer,
    ];

    pub fn role_name(&self) -> &'static str {
        match self {
            Capability::Carrier => "Carrier",
            Capability::Nurse => "Nurse",
            Capability::Pharmacist => "Pharmacist",
            Capability::Doctor => "Doctor",
            Capability::Soldier => "Soldier",
            Capability::Scientist => "Scientist",
            Capability::Villain => "Villain",
            Capability::Engineer => "Engineer",
        }
    }

    /// Case-insensitive lookup in the registry.
    pub fn from_role_name(name: &str) -> Option<Capability> {
        let name = name.trim();
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.role_name().eq_ignore_ascii_case(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoleEntry {
    pub name: String,
    pub capability: Capability,
}

#[derive(Debug, Clone)]
pub struct RoleCatalogue {
    entries: Vec<RoleEntry>,
    mandatory: Vec<Capability>,
}

impl RoleCatalogue {
    pub fn from_config(config: &RoleConfig) -> Result<Self, ConfigError> {
        let entries = config
            .catalogue
            .iter()
            .map(|name| {
                Capability::from_role_name(name)
                    .map(|capability| RoleEntry {
                        name: capability.role_name().to_string(),
                        capability,
                    })
                    .ok_or_else(|| ConfigError::UnknownRole(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let mandatory = config
            .mandatory
            .iter()
            .map(|name| {
                Capability::from_role_name(name).ok_or_else(|| ConfigError::UnknownRole(name.clone()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries, mandatory })
    }

    pub fn entries(&self) -> &[RoleEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub session: SessionId,
    pub role_index: usize,
    pub role_name: String,
    pub capability: Capability,
}

/// Uniform in-place Fisher–Yates shuffle.
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Deals catalogue roles to `participants`.
///
/// Mandatory capabilities are placed first (truncated when there are fewer
/// participants than mandatory roles), the remaining seats are filled from the
/// shuffled optional pool, and only when the catalogue runs dry are ordinary
/// roles handed out a second time. The Carrier is never duplicated.
pub fn assign_roles<R: Rng + ?Sized>(
    catalogue: &RoleCatalogue,
    participants: &[SessionId],
    rng: &mut R,
) -> Vec<Assignment> {
    if participants.is_empty() || catalogue.is_empty() {
        return Vec::new();
    }

    let mut pool: Vec<usize> = (0..catalogue.len()).collect();
    shuffle(&mut pool, rng);

    let mut mandatory: Vec<usize> = Vec::new();
    for capability in &catalogue.mandatory {
        let found = pool.iter().copied().find(|idx| {
            catalogue.entries[*idx].capability == *capability && !mandatory.contains(idx)
        });
        match found {
            Some(idx) => mandatory.push(idx),
            None => warn!(
                "Mandatory role {} has no free catalogue entry",
                capability.role_name()
            ),
        }
    }
    if participants.len() < mandatory.len() {
        warn!(
            "Only {} participants for {} mandatory roles, dropping the rest",
            participants.len(),
            mandatory.len()
        );
        mandatory.truncate(participants.len());
    }

    let mut optional: Vec<usize> = pool
        .into_iter()
        .filter(|idx| !mandatory.contains(idx))
        .collect();
    shuffle(&mut optional, rng);

    let needed = participants.len() - mandatory.len();
    let mut selected = mandatory;
    selected.extend(optional.into_iter().take(needed));

    if selected.len() < participants.len() {
        warn!(
            "Role catalogue has {} roles for {} participants, duplicating ordinary roles",
            catalogue.len(),
            participants.len()
        );
        let ordinary: Vec<usize> = (0..catalogue.len())
            .filter(|idx| catalogue.entries[*idx].capability != Capability::Carrier)
            .collect();
        if ordinary.is_empty() {
            warn!("No ordinary roles to duplicate, some participants stay unassigned");
        } else {
            while selected.len() < participants.len() {
                selected.push(ordinary[rng.gen_range(0..ordinary.len())]);
            }
        }
    }

    shuffle(&mut selected, rng);
    let mut seats = participants.to_vec();
    shuffle(&mut seats, rng);

    seats
        .into_iter()
        .zip(selected)
        .map(|(session, role_index)| {
            let entry = &catalogue.entries[role_index];
            Assignment {
                session,
                role_index,
                role_name: entry.name.clone(),
                capability: entry.capability,
            }
        })
        .collect()
}

/// Role state for the round in progress.
#[derive(Debug, Default)]
pub struct RoleBook {
    assignments: HashMap<SessionId, Assignment>,
    carrier: Option<SessionId>,
    cover_role: Option<String>,
}

/// Picks the Carrier's cover from non-Carrier roles nobody holds this round.
/// When the whole catalogue was dealt, a role held by several participants
/// still hides the Carrier in a crowd. Only after that does any role do.
fn pick_cover<R: Rng + ?Sized>(
    catalogue: &RoleCatalogue,
    assignments: &[Assignment],
    rng: &mut R,
) -> Option<String> {
    let mut dealt: HashMap<&str, usize> = HashMap::new();
    for assignment in assignments {
        *dealt.entry(assignment.role_name.as_str()).or_insert(0) += 1;
    }
    let covers: Vec<&RoleEntry> = catalogue
        .entries()
        .iter()
        .filter(|e| e.capability != Capability::Carrier)
        .collect();
    let held = |entry: &RoleEntry| dealt.get(entry.name.as_str()).copied().unwrap_or(0);

    let unheld: Vec<&RoleEntry> = covers.iter().copied().filter(|e| held(*e) == 0).collect();
    let crowded: Vec<&RoleEntry> = covers.iter().copied().filter(|e| held(*e) >= 2).collect();
    let pool = if !unheld.is_empty() {
        unheld
    } else if !crowded.is_empty() {
        crowded
    } else {
        covers
    };
    if pool.is_empty() {
        return None;
    }
    Some(pool[rng.gen_range(0..pool.len())].name.clone())
}

impl RoleBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fresh deal and picks the name others will see on the Carrier.
    pub fn record<R: Rng + ?Sized>(
        &mut self,
        catalogue: &RoleCatalogue,
        assignments: Vec<Assignment>,
        rng: &mut R,
    ) {
        self.assignments.clear();
        self.carrier = None;

        self.cover_role = pick_cover(catalogue, &assignments, rng);

        for assignment in assignments {
            if assignment.capability == Capability::Carrier {
                self.carrier = Some(assignment.session);
            }
            info!("Participant {} was dealt a role", assignment.session);
            self.assignments.insert(assignment.session, assignment);
        }
    }

    pub fn clear(&mut self) {
        self.assignments.clear();
        self.carrier = None;
        self.cover_role = None;
    }

    pub fn assignment(&self, session: SessionId) -> Option<&Assignment> {
        self.assignments.get(&session)
    }

    pub fn capability(&self, session: SessionId) -> Option<Capability> {
        self.assignments.get(&session).map(|a| a.capability)
    }

    pub fn has(&self, session: SessionId, capability: Capability) -> bool {
        self.capability(session) == Some(capability)
    }

    pub fn is_carrier(&self, session: SessionId) -> bool {
        self.carrier == Some(session)
    }

    pub fn carrier(&self) -> Option<SessionId> {
        self.carrier
    }

    /// Role name as shown to `observer`. The Carrier appears under the cover
    /// name to everyone except themselves.
    pub fn visible_role(&self, session: SessionId, observer: SessionId) -> Option<String> {
        let assignment = self.assignments.get(&session)?;
        if assignment.capability == Capability::Carrier && session != observer {
            return self.cover_role.clone();
        }
        Some(assignment.role_name.clone())
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }
}
