//! Core types for the flocksim workspace: per-agent steering, lifecycle timers and
//! proximity contagion for ambient flocking creatures.

use glam::Vec3;
use slotmap::{SecondaryMap, new_key_type};

pub mod agent;
pub mod config;
pub mod contacts;
pub mod lifecycle;
pub mod obstacles;
pub mod params;
pub mod scheduler;
pub mod steering;
pub mod world;

new_key_type! {
    /// Stable handle for agents backed by a generational slot map.
    ///
    /// A removed handle never resolves again, so it doubles as the validity token
    /// carried by scheduled events.
    pub struct AgentId;
}

/// Convenience alias for associating side data with agents.
pub type AgentMap<T> = SecondaryMap<AgentId, T>;

/// Squared length below which a vector is treated as zero and never normalised.
pub const NEAR_ZERO_SQ: f32 = 1e-8;

/// Seconds of slack when an accumulated timer is compared against its deadline.
///
/// Frame deltas such as `0.1` or `1/60` are not exact in binary; without slack a timer
/// summed from them lands just short of its deadline and fires a tick late.
pub const TIME_SLACK: f64 = 1e-4;

pub use agent::{AgentArena, AgentColumns, AgentData, AgentRuntime};
pub use config::{BaseParams, FlockConfig, MotionConstants, WorldStateError};
pub use contacts::ContactSet;
pub use lifecycle::{AnimationCue, LifeState, Lifecycle, RestPhase, RestTransition};
pub use obstacles::{
    FenceSegment, NoObstacles, Obstacle, ObstacleKind, ObstacleQuery, PenBoundary,
    StaticObstacles,
};
pub use params::{AgentParams, derive_params, vary};
pub use scheduler::{AgentTimers, EventQueue, PeriodicTimer, ScheduledAction, ScheduledEvent};
pub use steering::{FlockSnapshot, NeighbourClass, SnapshotEntry, SteeringOutput, compute_steering};
pub use world::{
    AgentFrame, FrameBatch, FrameSink, NullSink, Tick, TickEvents, TickSummary, WorldState,
};

pub(crate) fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

/// Project a vector onto the ground plane.
#[inline]
#[must_use]
pub fn flatten(v: Vec3) -> Vec3 {
    Vec3::new(v.x, 0.0, v.z)
}

/// Normalise `v` unless it is too short to carry a direction.
#[inline]
#[must_use]
pub fn direction_of(v: Vec3) -> Option<Vec3> {
    let len_sq = v.length_squared();
    if len_sq <= NEAR_ZERO_SQ || !len_sq.is_finite() {
        None
    } else {
        Some(v / len_sq.sqrt())
    }
}
