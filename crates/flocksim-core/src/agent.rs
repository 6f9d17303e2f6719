//! Dense agent storage and per-agent runtime state.

use std::collections::HashSet;

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

use crate::AgentId;
use crate::contacts::ContactSet;
use crate::lifecycle::{AnimationCue, Lifecycle, forward_of};
use crate::params::AgentParams;
use crate::scheduler::AgentTimers;

/// Kinematic scalars for a single agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentData {
    pub position: Vec3,
    pub velocity: Vec3,
    /// Rotation about the up axis; the agent faces `heading * Vec3::Z`.
    pub heading: Quat,
}

impl AgentData {
    /// Agent at rest at `position`, facing `yaw` radians from `+Z`.
    #[must_use]
    pub fn at(position: Vec3, yaw: f32) -> Self {
        Self {
            position,
            velocity: Vec3::ZERO,
            heading: Quat::from_rotation_y(yaw),
        }
    }

    /// Unit forward vector of the current heading.
    #[must_use]
    pub fn forward(&self) -> Vec3 {
        forward_of(self.heading)
    }
}

impl Default for AgentData {
    fn default() -> Self {
        Self::at(Vec3::ZERO, 0.0)
    }
}

/// Collection of per-agent columns for hot-path iteration.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct AgentColumns {
    positions: Vec<Vec3>,
    velocities: Vec<Vec3>,
    headings: Vec<Quat>,
}

impl AgentColumns {
    /// Create empty columns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of active rows in the columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Returns true when the columns hold no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Push a new row onto each column.
    pub fn push(&mut self, agent: AgentData) {
        self.positions.push(agent.position);
        self.velocities.push(agent.velocity);
        self.headings.push(agent.heading);
        self.debug_assert_coherent();
    }

    /// Swap-remove the row at `index` and return its fields.
    pub fn swap_remove(&mut self, index: usize) -> AgentData {
        let removed = AgentData {
            position: self.positions.swap_remove(index),
            velocity: self.velocities.swap_remove(index),
            heading: self.headings.swap_remove(index),
        };
        self.debug_assert_coherent();
        removed
    }

    /// Copy the row at `from` into position `to` without altering length.
    pub fn move_row(&mut self, from: usize, to: usize) {
        debug_assert!(from < self.len(), "move_row from out of bounds");
        debug_assert!(to < self.len(), "move_row to out of bounds");
        if from == to {
            return;
        }
        self.positions[to] = self.positions[from];
        self.velocities[to] = self.velocities[from];
        self.headings[to] = self.headings[from];
    }

    /// Drop every row at or beyond `len`.
    pub fn truncate(&mut self, len: usize) {
        self.positions.truncate(len);
        self.velocities.truncate(len);
        self.headings.truncate(len);
        self.debug_assert_coherent();
    }

    /// Return a copy of the row at `index`.
    #[must_use]
    pub fn snapshot(&self, index: usize) -> AgentData {
        AgentData {
            position: self.positions[index],
            velocity: self.velocities[index],
            heading: self.headings[index],
        }
    }

    #[must_use]
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    #[must_use]
    pub fn positions_mut(&mut self) -> &mut [Vec3] {
        &mut self.positions
    }

    #[must_use]
    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    #[must_use]
    pub fn velocities_mut(&mut self) -> &mut [Vec3] {
        &mut self.velocities
    }

    #[must_use]
    pub fn headings(&self) -> &[Quat] {
        &self.headings
    }

    #[must_use]
    pub fn headings_mut(&mut self) -> &mut [Quat] {
        &mut self.headings
    }

    #[inline]
    fn debug_assert_coherent(&self) {
        debug_assert_eq!(self.positions.len(), self.velocities.len());
        debug_assert_eq!(self.positions.len(), self.headings.len());
    }
}

/// Dense SoA storage with generational handles for agent access.
#[derive(Debug)]
pub struct AgentArena {
    slots: SlotMap<AgentId, usize>,
    handles: Vec<AgentId>,
    columns: AgentColumns,
}

impl Default for AgentArena {
    fn default() -> Self {
        Self::new()
    }
}

impl AgentArena {
    /// Create an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: SlotMap::with_key(),
            handles: Vec::new(),
            columns: AgentColumns::new(),
        }
    }

    /// Number of active agents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Returns true when no agents are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Iterate over active agent handles in dense iteration order.
    pub fn iter_handles(&self) -> impl Iterator<Item = AgentId> + '_ {
        self.handles.iter().copied()
    }

    /// Immutable access to the dense columns; row `i` belongs to the `i`-th handle.
    #[must_use]
    pub fn columns(&self) -> &AgentColumns {
        &self.columns
    }

    /// Mutable access to the dense columns.
    #[must_use]
    pub fn columns_mut(&mut self) -> &mut AgentColumns {
        &mut self.columns
    }

    /// Returns the dense index for `id`, if present.
    #[must_use]
    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    /// Returns true if `id` refers to a live agent.
    #[must_use]
    pub fn contains(&self, id: AgentId) -> bool {
        self.slots.contains_key(id)
    }

    /// Insert a new agent and return its handle.
    pub fn insert(&mut self, agent: AgentData) -> AgentId {
        let index = self.columns.len();
        self.columns.push(agent);
        let id = self.slots.insert(index);
        self.handles.push(id);
        id
    }

    /// Remove `id` returning its data if it was present.
    pub fn remove(&mut self, id: AgentId) -> Option<AgentData> {
        let index = self.slots.remove(id)?;
        let removed = self.columns.swap_remove(index);
        let removed_handle = self.handles.swap_remove(index);
        debug_assert_eq!(removed_handle, id);
        if index < self.handles.len() {
            let moved = self.handles[index];
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = index;
            }
        }
        Some(removed)
    }

    /// Remove all agents whose ids are contained in `doomed`, preserving iteration order.
    pub fn remove_many(&mut self, doomed: &HashSet<AgentId>) -> usize {
        if doomed.is_empty() {
            return 0;
        }
        let mut write = 0;
        for read in 0..self.handles.len() {
            let id = self.handles[read];
            if doomed.contains(&id) {
                self.slots.remove(id);
                continue;
            }
            if write != read {
                self.handles[write] = id;
                self.columns.move_row(read, write);
            }
            if let Some(slot) = self.slots.get_mut(id) {
                *slot = write;
            }
            write += 1;
        }
        let removed = self.handles.len().saturating_sub(write);
        self.handles.truncate(write);
        self.columns.truncate(write);
        removed
    }

    /// Produce a copy of the data for `id`.
    #[must_use]
    pub fn snapshot(&self, id: AgentId) -> Option<AgentData> {
        let index = self.index_of(id)?;
        Some(self.columns.snapshot(index))
    }
}

/// Runtime state that sits alongside the kinematic columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AgentRuntime {
    pub params: AgentParams,
    pub lifecycle: Lifecycle,
    pub timers: AgentTimers,
    pub contacts: ContactSet,
    /// Cue emitted on the most recent tick.
    pub cue: AnimationCue,
    /// Seconds spent `Dead`; drives corpse cleanup.
    pub dead_for: f32,
}

impl AgentRuntime {
    /// Fresh `Alive` runtime with both periodic checks a full interval away.
    #[must_use]
    pub fn new(params: AgentParams) -> Self {
        Self {
            timers: AgentTimers::from_params(&params),
            params,
            lifecycle: Lifecycle::new(),
            contacts: ContactSet::new(),
            cue: AnimationCue::Idle,
            dead_for: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent(seed: u32) -> AgentData {
        let s = seed as f32;
        AgentData {
            position: Vec3::new(s, 0.0, s + 1.0),
            velocity: Vec3::new(s * 0.1, 0.0, -s * 0.1),
            heading: Quat::from_rotation_y(s * 0.5),
        }
    }

    #[test]
    fn insert_allocates_unique_handles() {
        let mut arena = AgentArena::new();
        let a = arena.insert(sample_agent(0));
        let b = arena.insert(sample_agent(1));
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
        assert!(arena.contains(a));
        assert!(arena.contains(b));
    }

    #[test]
    fn remove_keeps_dense_storage_coherent() {
        let mut arena = AgentArena::new();
        let a = arena.insert(sample_agent(0));
        let b = arena.insert(sample_agent(1));
        let c = arena.insert(sample_agent(2));

        let removed = arena.remove(b).expect("agent removed");
        assert_eq!(removed.position, Vec3::new(1.0, 0.0, 2.0));
        assert_eq!(arena.len(), 2);
        assert!(arena.contains(a));
        assert!(arena.contains(c));
        assert!(!arena.contains(b));
        assert!(arena.remove(b).is_none(), "stale handle never resolves");

        let snapshot_c = arena.snapshot(c).expect("snapshot");
        assert_eq!(snapshot_c.position, Vec3::new(2.0, 0.0, 3.0));
        assert_eq!(arena.index_of(c), Some(1));

        let d = arena.insert(sample_agent(3));
        assert_ne!(b, d, "generational handles are not reused");
    }

    #[test]
    fn remove_many_preserves_order() {
        let mut arena = AgentArena::new();
        let ids: Vec<AgentId> = (0..5).map(|i| arena.insert(sample_agent(i))).collect();
        let doomed: HashSet<AgentId> = [ids[1], ids[3]].into_iter().collect();
        assert_eq!(arena.remove_many(&doomed), 2);
        let remaining: Vec<AgentId> = arena.iter_handles().collect();
        assert_eq!(remaining, vec![ids[0], ids[2], ids[4]]);
        assert_eq!(arena.index_of(ids[4]), Some(2));
        assert_eq!(
            arena.snapshot(ids[4]).map(|a| a.position),
            Some(Vec3::new(4.0, 0.0, 5.0))
        );
    }

    #[test]
    fn runtime_starts_alive_and_standing() {
        let params = AgentParams::nominal(&crate::BaseParams::default());
        let runtime = AgentRuntime::new(params);
        assert!(runtime.lifecycle.life().is_alive());
        assert!(!runtime.lifecycle.is_sitting());
        assert!(runtime.contacts.is_empty());
        assert_eq!(runtime.timers.rest_check.until_next(), params.sit_check_interval);
    }
}
