//! Boid steering: personal-space separation, alignment and density-damped cohesion,
//! blended with static obstacle avoidance.
//!
//! Steering reads a [`FlockSnapshot`] frozen at the start of the stage, so every agent
//! observes the same neighbour state regardless of evaluation order.

use flocksim_index::{IndexError, NeighborhoodIndex, UniformGridIndex};
use glam::{Quat, Vec3};
use ordered_float::OrderedFloat;

use crate::agent::{AgentArena, AgentRuntime};
use crate::config::MotionConstants;
use crate::lifecycle::{LifeState, forward_of};
use crate::obstacles::ObstacleQuery;
use crate::params::AgentParams;
use crate::{AgentId, AgentMap, NEAR_ZERO_SQ, clamp01, direction_of, flatten};

/// Fraction of the perception radius inside which obstacle-like neighbours repel.
pub const OBSTACLE_LIKE_RADIUS_FACTOR: f32 = 0.1;

/// How a neighbour participates in another agent's steering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NeighbourClass {
    /// Alive and standing: contributes to alignment, cohesion and ellipse separation.
    Normal,
    /// Sitting, dying or dead: only pushes others away at close range.
    ObstacleLike,
}

/// Frozen view of one agent at the start of the steering stage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotEntry {
    pub id: AgentId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub heading: Quat,
    pub life: LifeState,
    pub class: NeighbourClass,
}

impl SnapshotEntry {
    #[must_use]
    pub const fn is_alive(&self) -> bool {
        self.life.is_alive()
    }
}

/// Double-buffered read side of the flock used during steering.
#[derive(Debug, Clone)]
pub struct FlockSnapshot {
    entries: Vec<SnapshotEntry>,
    index: UniformGridIndex,
    scratch: Vec<(f32, f32)>,
}

impl FlockSnapshot {
    #[must_use]
    pub fn new(cell_size: f32) -> Self {
        Self {
            entries: Vec::new(),
            index: UniformGridIndex::new(cell_size),
            scratch: Vec::new(),
        }
    }

    /// Recapture every agent in arena order and rebuild the neighbourhood index.
    pub fn refresh(
        &mut self,
        arena: &AgentArena,
        runtime: &AgentMap<AgentRuntime>,
    ) -> Result<(), IndexError> {
        let columns = arena.columns();
        self.entries.clear();
        self.entries.reserve(arena.len());
        for (idx, id) in arena.iter_handles().enumerate() {
            let (life, class) = match runtime.get(id) {
                Some(rt) if rt.lifecycle.is_obstacle_like() => {
                    (rt.lifecycle.life(), NeighbourClass::ObstacleLike)
                }
                Some(rt) => (rt.lifecycle.life(), NeighbourClass::Normal),
                None => (LifeState::Dead, NeighbourClass::ObstacleLike),
            };
            self.entries.push(SnapshotEntry {
                id,
                position: columns.positions()[idx],
                velocity: columns.velocities()[idx],
                heading: columns.headings()[idx],
                life,
                class,
            });
        }
        self.scratch.clear();
        self.scratch
            .extend(self.entries.iter().map(|e| (e.position.x, e.position.z)));
        self.index.rebuild(&self.scratch)
    }

    /// Build a snapshot directly from entries; used by tests and external drivers.
    pub fn from_entries(
        entries: Vec<SnapshotEntry>,
        cell_size: f32,
    ) -> Result<Self, IndexError> {
        let mut snapshot = Self::new(cell_size);
        snapshot.entries = entries;
        snapshot.scratch = snapshot
            .entries
            .iter()
            .map(|e| (e.position.x, e.position.z))
            .collect();
        snapshot.index.rebuild(&snapshot.scratch)?;
        Ok(snapshot)
    }

    #[must_use]
    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<&SnapshotEntry> {
        self.entries.get(idx)
    }

    /// Visit every entry within `radius` of entry `idx`, excluding `idx` itself.
    pub fn visit_neighbours(
        &self,
        idx: usize,
        radius: f32,
        visitor: &mut dyn FnMut(&SnapshotEntry, f32),
    ) {
        self.index
            .neighbors_within(idx, radius * radius, &mut |other, dist_sq: OrderedFloat<f32>| {
                visitor(&self.entries[other], dist_sq.into_inner());
            });
    }
}

/// Result of one agent's steering evaluation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SteeringOutput {
    /// Horizontal force, magnitude at most `max_force`.
    pub force: Vec3,
    /// Alive neighbours in range, sitting ones included.
    pub living_neighbours: u32,
    /// Neighbours that fed alignment and cohesion.
    pub normal_neighbours: u32,
    /// Alive neighbours to record as mutual contacts; empty unless the agent is alive.
    pub contacts: Vec<AgentId>,
}

/// Quadratic falloff away from every fence or boundary within `radius`.
///
/// Distances are signed, so an agent that has crossed a boundary is pushed back harder
/// the deeper it is.
fn obstacle_avoidance(position: Vec3, radius: f32, obstacles: &dyn ObstacleQuery) -> Vec3 {
    if radius <= 0.0 {
        return Vec3::ZERO;
    }
    let mut total = Vec3::ZERO;
    obstacles.visit_near(position, radius, &mut |obstacle| {
        if !obstacle.kind().is_avoided() {
            return;
        }
        let Some((away, dist)) = obstacle.clearance(position) else {
            return;
        };
        if dist >= radius {
            return;
        }
        let falloff = (radius - dist) / radius;
        total += away * falloff * falloff;
    });
    total
}

/// Turn a rule vector into a velocity-matching steer toward the cruising speed.
fn steer_toward(desired: Vec3, velocity: Vec3, cruise_speed: f32) -> Vec3 {
    match direction_of(flatten(desired)) {
        Some(dir) => dir * cruise_speed - flatten(velocity),
        None => Vec3::ZERO,
    }
}

/// Cohesion damping: one when alone, fading to zero at the neighbour cap.
#[must_use]
pub fn cohesion_density_scale(neighbours: u32, max_neighbours: u32) -> f32 {
    1.0 - clamp01(neighbours as f32 / max_neighbours.max(1) as f32)
}

/// Compute the bounded steering force for snapshot entry `idx`.
#[must_use]
pub fn compute_steering(
    idx: usize,
    params: &AgentParams,
    snapshot: &FlockSnapshot,
    obstacles: &dyn ObstacleQuery,
    motion: &MotionConstants,
) -> SteeringOutput {
    let Some(me) = snapshot.get(idx) else {
        return SteeringOutput::default();
    };

    let avoidance = obstacle_avoidance(me.position, motion.obstacle_avoidance_radius, obstacles)
        * motion.obstacle_avoidance_weight;

    let forward = flatten(forward_of(me.heading)).normalize_or(Vec3::Z);
    let side = Vec3::Y.cross(forward);
    let tight_radius = params.neighbour_radius * OBSTACLE_LIKE_RADIUS_FACTOR;
    let side_radius = params.sep_side_radius.max(f32::EPSILON);
    let forward_radius = params.sep_forward_radius.max(f32::EPSILON);

    let mut separation = Vec3::ZERO;
    let mut velocity_sum = Vec3::ZERO;
    let mut position_sum = Vec3::ZERO;
    let mut output = SteeringOutput::default();

    snapshot.visit_neighbours(idx, params.neighbour_radius, &mut |other, dist_sq| {
        if other.is_alive() {
            output.living_neighbours += 1;
            if me.is_alive() {
                output.contacts.push(other.id);
            }
        }
        let offset = flatten(other.position - me.position);
        match other.class {
            NeighbourClass::ObstacleLike => {
                if dist_sq >= tight_radius * tight_radius || dist_sq <= NEAR_ZERO_SQ {
                    return;
                }
                let dist = dist_sq.sqrt();
                separation += -offset / dist * (tight_radius / dist.max(f32::EPSILON));
            }
            NeighbourClass::Normal => {
                output.normal_neighbours += 1;
                velocity_sum += flatten(other.velocity);
                position_sum += flatten(other.position);

                let x = offset.dot(side) / side_radius;
                let z = offset.dot(forward) / forward_radius;
                let ellipse = x * x + z * z;
                if ellipse < 1.0
                    && let Some(dir) = direction_of(offset)
                {
                    separation += -dir * (1.0 - ellipse);
                }
            }
        }
    });

    let cruise = motion.flock_speed;
    let mut force = steer_toward(separation, me.velocity, cruise) * params.separation_weight;
    if output.normal_neighbours > 0 {
        let n = output.normal_neighbours as f32;
        let alignment = steer_toward(velocity_sum / n, me.velocity, cruise);
        let centroid = position_sum / n;
        let cohesion = steer_toward(centroid - flatten(me.position), me.velocity, cruise)
            * cohesion_density_scale(
                output.normal_neighbours,
                params.max_neighbours_for_full_cohesion,
            );
        force += alignment * params.alignment_weight + cohesion * params.cohesion_weight;
    }
    force += avoidance;

    output.force = flatten(force).clamp_length_max(params.max_force);
    if !output.force.is_finite() {
        output.force = Vec3::ZERO;
    }
    output
}
