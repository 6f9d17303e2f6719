//! Recent-contact tracking used to spread contagion.
//!
//! Entries are plain handles. They are never dereferenced directly: every read goes
//! through a liveness lookup, so handles of agents that died or despawned after being
//! recorded are skipped.

use std::collections::BTreeSet;

use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::{AgentId, flatten};

/// Set of agents seen nearby while both sides were alive, since the last drain.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContactSet {
    seen: BTreeSet<AgentId>,
}

impl ContactSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a contact. Returns true when the contact is new.
    pub fn insert(&mut self, id: AgentId) -> bool {
        self.seen.insert(id)
    }

    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.seen.contains(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.seen.iter().copied()
    }

    /// Take every recorded contact in handle order, leaving the set empty.
    pub fn drain(&mut self) -> Vec<AgentId> {
        std::mem::take(&mut self.seen).into_iter().collect()
    }
}

/// Pick the drained contacts that can still be infected.
///
/// `alive_position` resolves a handle to the position of a live, `Alive` agent and
/// returns `None` for stale or no-longer-alive handles.
pub fn select_contagion_targets<F>(
    drained: &[AgentId],
    origin: Vec3,
    infection_radius: f32,
    mut alive_position: F,
) -> Vec<AgentId>
where
    F: FnMut(AgentId) -> Option<Vec3>,
{
    let radius_sq = infection_radius * infection_radius;
    drained
        .iter()
        .copied()
        .filter(|&id| {
            alive_position(id)
                .is_some_and(|pos| flatten(pos - origin).length_squared() <= radius_sq)
        })
        .collect()
}
