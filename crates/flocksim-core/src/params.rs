//! Per-agent parameter derivation.
//!
//! Every agent receives its own immutable [`AgentParams`] at spawn: each base value is
//! scaled by a uniform factor in `[1 - variance, 1 + variance]`, then the construction
//! invariants are applied. Spatial and temporal values share a narrow band, rule weights
//! a wider one, so agents differ in personality while the designed proportions hold.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::clamp01;
use crate::config::BaseParams;

/// Personal-space radii never shrink below this fraction of the perception radius.
pub const PERSONAL_SPACE_FLOOR: f32 = 0.3;
/// Shortest allowed rest/mortality check interval in seconds.
pub const MIN_CHECK_INTERVAL: f32 = 0.05;

/// Immutable tunables owned by a single agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentParams {
    pub neighbour_radius: f32,
    pub sep_side_radius: f32,
    pub sep_forward_radius: f32,
    pub separation_weight: f32,
    pub alignment_weight: f32,
    pub cohesion_weight: f32,
    pub max_neighbours_for_full_cohesion: u32,
    pub max_force: f32,
    pub sit_check_interval: f32,
    pub sit_probability: f32,
    pub min_sit_time: f32,
    pub max_sit_time: f32,
    pub die_check_interval: f32,
    pub die_probability: f32,
    pub jitter_strength: f32,
}

impl AgentParams {
    /// Parameters equal to the base values, with no variance applied.
    #[must_use]
    pub fn nominal(base: &BaseParams) -> Self {
        Self {
            neighbour_radius: base.neighbour_radius,
            sep_side_radius: base.sep_side_radius,
            sep_forward_radius: base.sep_forward_radius,
            separation_weight: base.separation_weight,
            alignment_weight: base.alignment_weight,
            cohesion_weight: base.cohesion_weight,
            max_neighbours_for_full_cohesion: base.max_neighbours_for_full_cohesion.round()
                as u32,
            max_force: base.max_force,
            sit_check_interval: base.sit_check_interval,
            sit_probability: base.sit_probability,
            min_sit_time: base.min_sit_time,
            max_sit_time: base.max_sit_time,
            die_check_interval: base.die_check_interval,
            die_probability: base.die_probability,
            jitter_strength: base.jitter_strength,
        }
    }

    /// Apply the construction invariants: personal-space floors, clamped probabilities,
    /// a cohesion cap of at least one, and ordered non-negative sit times.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.neighbour_radius = finite_or(self.neighbour_radius, 0.0).max(0.0);
        let floor = self.neighbour_radius * PERSONAL_SPACE_FLOOR;
        self.sep_side_radius = finite_or(self.sep_side_radius, floor).max(floor);
        self.sep_forward_radius = finite_or(self.sep_forward_radius, floor).max(floor);

        self.separation_weight = finite_or(self.separation_weight, 0.0).max(0.0);
        self.alignment_weight = finite_or(self.alignment_weight, 0.0).max(0.0);
        self.cohesion_weight = finite_or(self.cohesion_weight, 0.0).max(0.0);
        self.max_neighbours_for_full_cohesion = self.max_neighbours_for_full_cohesion.max(1);
        self.max_force = finite_or(self.max_force, 0.0).max(0.0);

        self.sit_check_interval =
            finite_or(self.sit_check_interval, MIN_CHECK_INTERVAL).max(MIN_CHECK_INTERVAL);
        self.die_check_interval =
            finite_or(self.die_check_interval, MIN_CHECK_INTERVAL).max(MIN_CHECK_INTERVAL);
        self.sit_probability = clamp01(finite_or(self.sit_probability, 0.0));
        self.die_probability = clamp01(finite_or(self.die_probability, 0.0));

        self.min_sit_time = finite_or(self.min_sit_time, 0.0).max(0.0);
        self.max_sit_time = finite_or(self.max_sit_time, 0.0).max(self.min_sit_time);
        self.jitter_strength = finite_or(self.jitter_strength, 0.0).max(0.0);
        self
    }

    /// Returns true when every construction invariant holds.
    #[must_use]
    pub fn satisfies_invariants(&self) -> bool {
        let floor = self.neighbour_radius * PERSONAL_SPACE_FLOOR;
        self.sep_side_radius >= floor
            && self.sep_forward_radius >= floor
            && (0.0..=1.0).contains(&self.sit_probability)
            && (0.0..=1.0).contains(&self.die_probability)
            && self.max_neighbours_for_full_cohesion >= 1
            && self.min_sit_time <= self.max_sit_time
    }
}

fn finite_or(value: f32, fallback: f32) -> f32 {
    if value.is_finite() { value } else { fallback }
}

/// Scale `base` by a uniform factor drawn from `[1 - variance, 1 + variance]`.
pub fn vary<R: Rng + ?Sized>(rng: &mut R, base: f32, variance: f32) -> f32 {
    if variance <= 0.0 {
        return base;
    }
    base * rng.random_range((1.0 - variance)..=(1.0 + variance))
}

/// Derive a fresh agent's parameter set from the shared base values.
pub fn derive_params<R: Rng + ?Sized>(
    rng: &mut R,
    base: &BaseParams,
    spatial_variance: f32,
    weight_variance: f32,
) -> AgentParams {
    let narrow = spatial_variance;
    let wide = weight_variance;
    AgentParams {
        neighbour_radius: vary(rng, base.neighbour_radius, narrow),
        sep_side_radius: vary(rng, base.sep_side_radius, narrow),
        sep_forward_radius: vary(rng, base.sep_forward_radius, narrow),
        separation_weight: vary(rng, base.separation_weight, wide),
        alignment_weight: vary(rng, base.alignment_weight, wide),
        cohesion_weight: vary(rng, base.cohesion_weight, wide),
        max_neighbours_for_full_cohesion: vary(
            rng,
            base.max_neighbours_for_full_cohesion,
            narrow,
        )
        .round()
        .max(1.0) as u32,
        max_force: vary(rng, base.max_force, narrow),
        sit_check_interval: vary(rng, base.sit_check_interval, narrow),
        sit_probability: vary(rng, base.sit_probability, narrow),
        min_sit_time: vary(rng, base.min_sit_time, narrow),
        max_sit_time: vary(rng, base.max_sit_time, narrow),
        die_check_interval: vary(rng, base.die_check_interval, narrow),
        die_probability: vary(rng, base.die_probability, narrow),
        jitter_strength: vary(rng, base.jitter_strength, narrow),
    }
    .sanitized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{SeedableRng, rngs::SmallRng};

    #[test]
    fn zero_variance_reproduces_base() {
        let mut rng = SmallRng::seed_from_u64(1);
        let base = BaseParams::default();
        let params = derive_params(&mut rng, &base, 0.0, 0.0);
        assert_eq!(params, AgentParams::nominal(&base).sanitized());
    }

    #[test]
    fn sanitize_floors_personal_space_and_clamps_probabilities() {
        let params = AgentParams {
            neighbour_radius: 10.0,
            sep_side_radius: 0.5,
            sep_forward_radius: 1.0,
            sit_probability: 1.7,
            die_probability: -0.2,
            max_neighbours_for_full_cohesion: 0,
            min_sit_time: 6.0,
            max_sit_time: 2.0,
            ..AgentParams::nominal(&BaseParams::default())
        }
        .sanitized();
        assert_eq!(params.sep_side_radius, 3.0);
        assert_eq!(params.sep_forward_radius, 3.0);
        assert_eq!(params.sit_probability, 1.0);
        assert_eq!(params.die_probability, 0.0);
        assert_eq!(params.max_neighbours_for_full_cohesion, 1);
        assert_eq!(params.max_sit_time, 6.0);
        assert!(params.satisfies_invariants());
    }

    #[test]
    fn weights_vary_more_than_spatial_values() {
        let mut rng = SmallRng::seed_from_u64(99);
        let base = BaseParams::default();
        for _ in 0..500 {
            let params = derive_params(&mut rng, &base, 0.25, 0.30);
            let radius_ratio = params.neighbour_radius / base.neighbour_radius;
            assert!((0.75..=1.25).contains(&radius_ratio));
            let weight_ratio = params.alignment_weight / base.alignment_weight;
            assert!((0.70..=1.30).contains(&weight_ratio));
        }
    }

    proptest! {
        #[test]
        fn derived_params_hold_invariants_for_any_seed(
            seed in any::<u64>(),
            side in 0.0_f32..4.0,
            forward in 0.0_f32..4.0,
            sit in 0.0_f32..1.0,
            die in 0.0_f32..1.0,
        ) {
            let mut rng = SmallRng::seed_from_u64(seed);
            let base = BaseParams {
                sep_side_radius: side,
                sep_forward_radius: forward,
                sit_probability: sit,
                die_probability: die,
                ..BaseParams::default()
            };
            let params = derive_params(&mut rng, &base, 0.25, 0.30);
            prop_assert!(params.sep_side_radius >= 0.3 * params.neighbour_radius);
            prop_assert!(params.sep_forward_radius >= 0.3 * params.neighbour_radius);
            prop_assert!((0.0..=1.0).contains(&params.sit_probability));
            prop_assert!((0.0..=1.0).contains(&params.die_probability));
            prop_assert!(params.max_neighbours_for_full_cohesion >= 1);
            prop_assert!(params.satisfies_invariants());
        }
    }
}
