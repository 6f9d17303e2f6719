//! Life and activity state machine plus the per-state motion rules.
//!
//! `life` only moves forward: `Alive -> Dying -> Dead`. Resting is a sub-state of
//! `Alive`; any transition out of `Alive` clears it.

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::{TIME_SLACK, direction_of, flatten};

/// Speed below which an agent is considered standing still.
pub const IDLE_SPEED: f32 = 0.05;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum LifeState {
    #[default]
    Alive,
    Dying,
    Dead,
}

impl LifeState {
    #[must_use]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Alive)
    }
}

/// Discrete locomotion/state cue handed to the animation sink.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum AnimationCue {
    #[default]
    Idle,
    Walk,
    Trot,
    SettleToSit,
    RiseToStand,
    Death,
}

/// Stage of the resting sequence; every variant but `Standing` counts as sitting.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub enum RestPhase {
    #[default]
    Standing,
    /// `hold` is the seated duration drawn when the rest began.
    Settling { remaining: f32, hold: f32 },
    Seated { remaining: f32 },
    Rising { remaining: f32 },
}

/// Phase change produced by [`Lifecycle::advance_rest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestTransition {
    None,
    /// Settle cue finished; holding the seated pose.
    Seated,
    /// Hold finished; rise cue requested.
    Rising,
    /// Sequence complete; the agent stands and the slow window is armed.
    Stood,
}

/// Per-agent life/activity state and its timers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Lifecycle {
    life: LifeState,
    rest: RestPhase,
    stand_slow_timer: f32,
    dying_elapsed: f64,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn life(&self) -> LifeState {
        self.life
    }

    #[must_use]
    pub const fn rest(&self) -> RestPhase {
        self.rest
    }

    #[must_use]
    pub fn is_sitting(&self) -> bool {
        self.life.is_alive() && !matches!(self.rest, RestPhase::Standing)
    }

    /// Dead, dying or sitting agents are avoided rather than flocked with.
    #[must_use]
    pub fn is_obstacle_like(&self) -> bool {
        !self.life.is_alive() || self.is_sitting()
    }

    /// Remaining seconds of the post-stand slow window.
    #[must_use]
    pub const fn stand_slow_timer(&self) -> f32 {
        self.stand_slow_timer
    }

    /// Begin the resting sequence, holding the seated pose for `hold` seconds once
    /// settled. Only a standing, alive agent can sit down.
    pub fn begin_resting(&mut self, settle_duration: f32, hold: f32) -> bool {
        if !self.life.is_alive() || self.is_sitting() {
            return false;
        }
        self.rest = RestPhase::Settling {
            remaining: settle_duration.max(0.0),
            hold: hold.max(0.0),
        };
        true
    }

    /// Advance the resting sequence by `dt`.
    pub fn advance_rest(
        &mut self,
        dt: f32,
        rise_duration: f32,
        stand_slow_time: f32,
    ) -> RestTransition {
        if !self.life.is_alive() {
            return RestTransition::None;
        }
        match self.rest {
            RestPhase::Standing => {
                self.stand_slow_timer = (self.stand_slow_timer - dt).max(0.0);
                RestTransition::None
            }
            RestPhase::Settling { remaining, hold } => {
                let remaining = remaining - dt;
                if expired(remaining) {
                    self.rest = RestPhase::Seated { remaining: hold };
                    RestTransition::Seated
                } else {
                    self.rest = RestPhase::Settling { remaining, hold };
                    RestTransition::None
                }
            }
            RestPhase::Seated { remaining } => {
                let remaining = remaining - dt;
                if expired(remaining) {
                    self.rest = RestPhase::Rising {
                        remaining: rise_duration.max(0.0),
                    };
                    RestTransition::Rising
                } else {
                    self.rest = RestPhase::Seated { remaining };
                    RestTransition::None
                }
            }
            RestPhase::Rising { remaining } => {
                let remaining = remaining - dt;
                if expired(remaining) {
                    self.rest = RestPhase::Standing;
                    self.stand_slow_timer = stand_slow_time;
                    RestTransition::Stood
                } else {
                    self.rest = RestPhase::Rising { remaining };
                    RestTransition::None
                }
            }
        }
    }

    /// Transition `Alive -> Dying`, abandoning any rest in progress.
    pub fn begin_dying(&mut self) -> bool {
        if !self.life.is_alive() {
            return false;
        }
        self.life = LifeState::Dying;
        self.rest = RestPhase::Standing;
        self.stand_slow_timer = 0.0;
        self.dying_elapsed = 0.0;
        true
    }

    /// Advance the dying timer, returning the remaining speed fraction and whether the
    /// agent died on this step.
    pub fn advance_dying(&mut self, dt: f32, duration: f32) -> (f32, bool) {
        if self.life != LifeState::Dying {
            return (0.0, false);
        }
        self.dying_elapsed += f64::from(dt);
        if self.dying_elapsed + TIME_SLACK >= f64::from(duration) {
            self.life = LifeState::Dead;
            (0.0, true)
        } else {
            (dying_speed_fraction(self.dying_elapsed as f32, duration), false)
        }
    }

    /// Select the cue for the current state and resulting speed.
    #[must_use]
    pub fn cue(&self, speed: f32, amble_speed: f32) -> AnimationCue {
        match (self.life, self.rest) {
            (LifeState::Dying | LifeState::Dead, _) => AnimationCue::Death,
            (LifeState::Alive, RestPhase::Settling { .. } | RestPhase::Seated { .. }) => {
                AnimationCue::SettleToSit
            }
            (LifeState::Alive, RestPhase::Rising { .. }) => AnimationCue::RiseToStand,
            (LifeState::Alive, RestPhase::Standing) => locomotion_cue(speed, amble_speed),
        }
    }
}

fn expired(remaining: f32) -> bool {
    f64::from(remaining) <= TIME_SLACK
}

/// Linear falloff of the dying speed, reaching zero at `duration`.
#[must_use]
pub fn dying_speed_fraction(elapsed: f32, duration: f32) -> f32 {
    if duration <= 0.0 {
        return 0.0;
    }
    (1.0 - elapsed / duration).clamp(0.0, 1.0)
}

/// Baseline versus elevated locomotion, picked purely from speed.
#[must_use]
pub fn locomotion_cue(speed: f32, amble_speed: f32) -> AnimationCue {
    if speed < IDLE_SPEED {
        AnimationCue::Idle
    } else if speed <= amble_speed + IDLE_SPEED {
        AnimationCue::Walk
    } else {
        AnimationCue::Trot
    }
}

/// Forward axis of a heading; agents face `+Z` at identity.
#[inline]
#[must_use]
pub fn forward_of(heading: Quat) -> Vec3 {
    heading * Vec3::Z
}

/// Heading facing the horizontal direction of `v`, if it has one.
#[must_use]
pub fn heading_toward(v: Vec3) -> Option<Quat> {
    let dir = direction_of(flatten(v))?;
    Some(Quat::from_rotation_y(dir.x.atan2(dir.z)))
}

/// Rotate `heading` toward `target` by at most `max_angle` radians.
#[must_use]
pub fn turn_toward(heading: Quat, target: Quat, max_angle: f32) -> Quat {
    let angle = heading.angle_between(target);
    if angle <= max_angle || angle <= f32::EPSILON {
        target
    } else {
        heading.slerp(target, max_angle / angle).normalize()
    }
}

/// Blend a steering force into the velocity of a moving agent, clamp to the target
/// cruising speed and integrate position on the ground plane.
///
/// Returns the new `(position, velocity, heading)`.
#[must_use]
pub fn integrate_alive(
    position: Vec3,
    velocity: Vec3,
    heading: Quat,
    force: Vec3,
    target_speed: f32,
    turn_rate: f32,
    dt: f32,
) -> (Vec3, Vec3, Quat) {
    let velocity = flatten(velocity + flatten(force) * dt).clamp_length_max(target_speed);
    let position = position + velocity * dt;
    let heading = match heading_toward(velocity) {
        Some(target) => turn_toward(heading, target, turn_rate * dt),
        None => heading,
    };
    (position, velocity, heading)
}

/// Velocity of a dying agent: the entry direction scaled by the decaying speed.
#[must_use]
pub fn dying_velocity(velocity: Vec3, heading: Quat, dying_speed: f32, fraction: f32) -> Vec3 {
    let dir = direction_of(flatten(velocity)).unwrap_or_else(|| flatten(forward_of(heading)));
    dir * dying_speed * fraction
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SETTLE: f32 = 1.0;
    const RISE: f32 = 1.0;
    const SLOW: f32 = 2.0;

    #[test]
    fn resting_sequence_returns_to_standing_and_arms_slow_window() {
        let mut life = Lifecycle::new();
        assert!(life.begin_resting(SETTLE, 3.0));
        assert!(life.is_sitting());
        assert!(!life.begin_resting(SETTLE, 3.0), "already sitting");

        let mut transitions = Vec::new();
        let mut armed = 0;
        for _ in 0..40 {
            let t = life.advance_rest(0.25, RISE, SLOW);
            if t == RestTransition::Stood {
                armed += 1;
                assert_eq!(life.stand_slow_timer(), SLOW);
            }
            if t != RestTransition::None {
                transitions.push(t);
            }
        }
        assert_eq!(
            transitions,
            vec![
                RestTransition::Seated,
                RestTransition::Rising,
                RestTransition::Stood
            ]
        );
        assert_eq!(armed, 1);
        assert!(!life.is_sitting());
        assert_eq!(life.stand_slow_timer(), 0.0, "slow window drains while standing");
    }

    #[test]
    fn dying_clears_rest_and_is_terminal() {
        let mut life = Lifecycle::new();
        life.begin_resting(SETTLE, 1.0);
        assert!(life.begin_dying());
        assert_eq!(life.life(), LifeState::Dying);
        assert!(!life.is_sitting());
        assert!(!life.begin_dying());
        assert!(!life.begin_resting(SETTLE, 1.0));

        let (fraction, died) = life.advance_dying(1.5, 3.0);
        assert!(!died);
        assert!((fraction - 0.5).abs() < 1e-6);
        let (fraction, died) = life.advance_dying(1.5, 3.0);
        assert!(died);
        assert_eq!(fraction, 0.0);
        assert_eq!(life.life(), LifeState::Dead);
        assert_eq!(life.advance_dying(1.0, 3.0), (0.0, false));
        assert_eq!(life.cue(0.0, 0.6), AnimationCue::Death);
    }

    #[test]
    fn dying_completes_on_the_exact_tick_with_inexact_frame_deltas() {
        for (dt, ticks) in [(0.1_f32, 30), (1.0 / 30.0, 90), (1.0 / 60.0, 180)] {
            let mut life = Lifecycle::new();
            assert!(life.begin_dying());
            let died_on = (1..=ticks + 5).find(|_| life.advance_dying(dt, 3.0).1);
            assert_eq!(died_on, Some(ticks), "dt={dt}");
        }
    }

    #[test]
    fn seated_hold_is_fixed_when_the_rest_begins() {
        let mut life = Lifecycle::new();
        assert!(life.begin_resting(0.5, 1.5));
        assert_eq!(
            life.rest(),
            RestPhase::Settling {
                remaining: 0.5,
                hold: 1.5
            }
        );
        let mut seated_ticks = 0;
        for _ in 0..40 {
            if matches!(life.rest(), RestPhase::Seated { .. }) {
                seated_ticks += 1;
            }
            if life.advance_rest(0.1, RISE, SLOW) == RestTransition::Stood {
                break;
            }
        }
        assert_eq!(seated_ticks, 15);
    }

    #[test]
    fn dying_speed_is_monotonic_and_reaches_zero() {
        let mut previous = f32::INFINITY;
        for step in 0..=30 {
            let fraction = dying_speed_fraction(step as f32 * 0.1, 3.0);
            assert!(fraction <= previous);
            previous = fraction;
        }
        assert_eq!(dying_speed_fraction(3.0, 3.0), 0.0);
        assert_eq!(dying_speed_fraction(0.0, 3.0), 1.0);
    }

    #[test]
    fn locomotion_cue_follows_speed() {
        assert_eq!(locomotion_cue(0.0, 0.6), AnimationCue::Idle);
        assert_eq!(locomotion_cue(0.6, 0.6), AnimationCue::Walk);
        assert_eq!(locomotion_cue(1.6, 0.6), AnimationCue::Trot);
        let mut life = Lifecycle::new();
        life.begin_resting(SETTLE, 0.0);
        assert_eq!(life.cue(0.0, 0.6), AnimationCue::SettleToSit);
        life.advance_rest(2.0, RISE, SLOW);
        life.advance_rest(0.1, RISE, SLOW);
        assert_eq!(life.cue(0.0, 0.6), AnimationCue::RiseToStand);
    }

    #[test]
    fn integration_clamps_speed_and_turns_gradually() {
        let heading = Quat::IDENTITY;
        let (position, velocity, turned) = integrate_alive(
            Vec3::ZERO,
            Vec3::new(0.0, 0.0, 0.6),
            heading,
            Vec3::new(50.0, 3.0, 0.0),
            0.6,
            4.0,
            0.1,
        );
        assert!(velocity.length() <= 0.6 + 1e-5);
        assert_eq!(velocity.y, 0.0);
        assert_eq!(position, velocity * 0.1);
        let turned_by = heading.angle_between(turned);
        assert!(turned_by <= 0.4 + 1e-4, "turned {turned_by}");
        assert!(turned_by > 0.0);
    }

    #[test]
    fn heading_faces_velocity() {
        let heading = heading_toward(Vec3::new(1.0, 0.0, 0.0)).expect("heading");
        let forward = forward_of(heading);
        assert!((forward - Vec3::X).length() < 1e-5);
        assert!(heading_toward(Vec3::new(0.0, 2.0, 0.0)).is_none());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Advance(f32),
        Rest,
        Die,
        Dying(f32),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0.0_f32..2.0).prop_map(Op::Advance),
            Just(Op::Rest),
            Just(Op::Die),
            (0.0_f32..2.0).prop_map(Op::Dying),
        ]
    }

    fn rank(state: LifeState) -> u8 {
        match state {
            LifeState::Alive => 0,
            LifeState::Dying => 1,
            LifeState::Dead => 2,
        }
    }

    proptest! {
        #[test]
        fn life_never_moves_backward(ops in proptest::collection::vec(op(), 1..200)) {
            let mut life = Lifecycle::new();
            let mut previous = life.life();
            for op in ops {
                match op {
                    Op::Advance(dt) => {
                        life.advance_rest(dt, RISE, SLOW);
                    }
                    Op::Rest => {
                        life.begin_resting(SETTLE, 2.0);
                    }
                    Op::Die => {
                        life.begin_dying();
                    }
                    Op::Dying(dt) => {
                        life.advance_dying(dt, 3.0);
                    }
                }
                let current = life.life();
                prop_assert!(rank(current) >= rank(previous));
                prop_assert!(rank(current) - rank(previous) <= 1);
                if life.is_sitting() {
                    prop_assert_eq!(current, LifeState::Alive);
                }
                previous = current;
            }
        }
    }
}
