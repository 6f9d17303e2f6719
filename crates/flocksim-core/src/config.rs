//! World configuration and validation.

use flocksim_index::IndexError;
use rand::{SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when constructing world state.
#[derive(Debug, Error)]
pub enum WorldStateError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
    /// The neighbourhood index rejected its configuration.
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Shared base values from which every agent's parameters are derived at spawn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BaseParams {
    /// Perception radius for neighbour interactions.
    pub neighbour_radius: f32,
    /// Personal-space half-axis across the agent's flank.
    pub sep_side_radius: f32,
    /// Personal-space half-axis along the agent's facing.
    pub sep_forward_radius: f32,
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub cohesion_weight: f32,
    /// Neighbour count at which cohesion has fully faded out.
    pub max_neighbours_for_full_cohesion: f32,
    /// Upper bound on the steering force magnitude.
    pub max_force: f32,
    /// Seconds between rest checks.
    pub sit_check_interval: f32,
    pub sit_probability: f32,
    pub min_sit_time: f32,
    pub max_sit_time: f32,
    /// Seconds between mortality checks.
    pub die_check_interval: f32,
    pub die_probability: f32,
    /// Magnitude of the random wander force.
    pub jitter_strength: f32,
}

impl Default for BaseParams {
    fn default() -> Self {
        Self {
            neighbour_radius: 5.0,
            sep_side_radius: 1.6,
            sep_forward_radius: 2.4,
            separation_weight: 1.5,
            alignment_weight: 1.0,
            cohesion_weight: 0.8,
            max_neighbours_for_full_cohesion: 6.0,
            max_force: 2.0,
            sit_check_interval: 10.0,
            sit_probability: 0.15,
            min_sit_time: 4.0,
            max_sit_time: 10.0,
            die_check_interval: 45.0,
            die_probability: 0.01,
            jitter_strength: 0.3,
        }
    }
}

/// Fixed speeds, durations and radii shared by every agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotionConstants {
    /// Baseline cruising speed.
    pub amble_speed: f32,
    /// Elevated cruising speed used inside a flock.
    pub flock_speed: f32,
    /// Speed at the moment an agent starts dying.
    pub dying_speed: f32,
    /// Seconds from entering `Dying` to becoming `Dead`.
    pub dying_duration: f32,
    /// Seconds of amble-only movement after standing up.
    pub stand_slow_time: f32,
    pub settle_duration: f32,
    pub rise_duration: f32,
    pub obstacle_avoidance_radius: f32,
    pub obstacle_avoidance_weight: f32,
    /// Radius within which a newly dead agent can infect a recent contact.
    pub infection_radius: f32,
    pub contagion_delay_min: f32,
    pub contagion_delay_max: f32,
    /// Maximum heading rotation in radians per second.
    pub heading_turn_rate: f32,
}

impl Default for MotionConstants {
    fn default() -> Self {
        Self {
            amble_speed: 0.6,
            flock_speed: 1.6,
            dying_speed: 0.4,
            dying_duration: 3.0,
            stand_slow_time: 2.0,
            settle_duration: 1.0,
            rise_duration: 1.0,
            obstacle_avoidance_radius: 2.0,
            obstacle_avoidance_weight: 3.0,
            infection_radius: 3.0,
            contagion_delay_min: 0.5,
            contagion_delay_max: 2.0,
            heading_turn_rate: 4.0,
        }
    }
}

/// Static configuration for a flock world.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FlockConfig {
    /// Optional RNG seed for reproducible worlds.
    pub rng_seed: Option<u64>,
    /// Base values for per-agent parameters.
    pub base: BaseParams,
    /// Variance fraction applied to spatial and temporal parameters.
    pub spatial_variance: f32,
    /// Variance fraction applied to the three rule weights.
    pub weight_variance: f32,
    pub motion: MotionConstants,
    /// Edge length of neighbourhood index cells.
    pub index_cell_size: f32,
    /// Seconds a dead agent stays in the world before despawning; 0 keeps corpses forever.
    pub corpse_retention: f32,
    /// Maximum number of recent tick summaries retained in-memory.
    pub history_capacity: usize,
}

impl Default for FlockConfig {
    fn default() -> Self {
        Self {
            rng_seed: None,
            base: BaseParams::default(),
            spatial_variance: 0.25,
            weight_variance: 0.30,
            motion: MotionConstants::default(),
            index_cell_size: 6.0,
            corpse_retention: 0.0,
            history_capacity: 256,
        }
    }
}

fn non_negative(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite() && *v >= 0.0)
}

fn positive(values: &[f32]) -> bool {
    values.iter().all(|v| v.is_finite() && *v > 0.0)
}

impl FlockConfig {
    /// Validates every tunable, rejecting values the simulation cannot use.
    pub fn validate(&self) -> Result<(), WorldStateError> {
        let base = &self.base;
        if !positive(&[
            base.neighbour_radius,
            base.max_neighbours_for_full_cohesion,
            base.sit_check_interval,
            base.die_check_interval,
        ]) {
            return Err(WorldStateError::InvalidConfig(
                "neighbour radius, cohesion cap and check intervals must be positive",
            ));
        }
        if !non_negative(&[
            base.sep_side_radius,
            base.sep_forward_radius,
            base.separation_weight,
            base.alignment_weight,
            base.cohesion_weight,
            base.max_force,
            base.sit_probability,
            base.min_sit_time,
            base.max_sit_time,
            base.die_probability,
            base.jitter_strength,
        ]) {
            return Err(WorldStateError::InvalidConfig(
                "base radii, weights, force, times and probabilities must be non-negative",
            ));
        }
        if base.min_sit_time > base.max_sit_time {
            return Err(WorldStateError::InvalidConfig(
                "min_sit_time cannot exceed max_sit_time",
            ));
        }
        if !non_negative(&[self.spatial_variance, self.weight_variance])
            || self.spatial_variance >= 1.0
            || self.weight_variance >= 1.0
        {
            return Err(WorldStateError::InvalidConfig(
                "variance bands must lie in [0, 1)",
            ));
        }

        let motion = &self.motion;
        if !positive(&[
            motion.amble_speed,
            motion.flock_speed,
            motion.dying_duration,
            motion.heading_turn_rate,
        ]) {
            return Err(WorldStateError::InvalidConfig(
                "speeds, dying duration and turn rate must be positive",
            ));
        }
        if !non_negative(&[
            motion.dying_speed,
            motion.stand_slow_time,
            motion.settle_duration,
            motion.rise_duration,
            motion.obstacle_avoidance_radius,
            motion.obstacle_avoidance_weight,
            motion.infection_radius,
            motion.contagion_delay_min,
            motion.contagion_delay_max,
        ]) {
            return Err(WorldStateError::InvalidConfig(
                "durations, radii, weights and delays must be non-negative",
            ));
        }
        if motion.contagion_delay_min > motion.contagion_delay_max {
            return Err(WorldStateError::InvalidConfig(
                "contagion_delay_min cannot exceed contagion_delay_max",
            ));
        }

        if !positive(&[self.index_cell_size]) {
            return Err(WorldStateError::InvalidConfig(
                "index_cell_size must be positive",
            ));
        }
        if !non_negative(&[self.corpse_retention]) {
            return Err(WorldStateError::InvalidConfig(
                "corpse_retention must be non-negative",
            ));
        }
        if self.history_capacity == 0 {
            return Err(WorldStateError::InvalidConfig(
                "history_capacity must be non-zero",
            ));
        }
        Ok(())
    }

    /// Returns the configured RNG seed, generating one from entropy if absent.
    pub(crate) fn seeded_rng(&self) -> SmallRng {
        match self.rng_seed {
            Some(seed) => SmallRng::seed_from_u64(seed),
            None => {
                let seed: u64 = rand::random();
                SmallRng::seed_from_u64(seed)
            }
        }
    }
}
