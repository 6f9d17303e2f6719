//! The simulation world: agent ownership, the per-tick pipeline and frame output.

use std::collections::{HashSet, VecDeque};
use std::f32::consts::TAU;
use std::fmt;

use glam::{Quat, Vec3};
use rand::{Rng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::agent::{AgentArena, AgentData, AgentRuntime};
use crate::config::{FlockConfig, WorldStateError};
use crate::contacts::select_contagion_targets;
use crate::lifecycle::{
    AnimationCue, LifeState, RestTransition, dying_velocity, forward_of, integrate_alive,
};
use crate::obstacles::{NoObstacles, ObstacleQuery};
use crate::params::{AgentParams, derive_params};
use crate::scheduler::{EventQueue, ScheduledAction};
use crate::steering::{FlockSnapshot, SteeringOutput, compute_steering};
use crate::{AgentId, AgentMap, flatten};

/// High level simulation clock (ticks processed since boot).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tick(pub u64);

impl Tick {
    /// Returns the next sequential tick.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    #[must_use]
    pub const fn zero() -> Self {
        Self(0)
    }
}

/// Per-agent output handed to transform and animation collaborators.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentFrame {
    pub id: AgentId,
    pub position: Vec3,
    pub velocity: Vec3,
    pub heading: Quat,
    pub cue: AnimationCue,
    pub life: LifeState,
    pub sitting: bool,
}

/// Every agent's frame for one tick.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FrameBatch {
    pub tick: Tick,
    /// Simulation time in seconds.
    pub time: f64,
    pub frames: Vec<AgentFrame>,
}

/// Consumer of per-tick frames, invoked at the end of every step.
pub trait FrameSink: Send {
    /// Whether the world should assemble frames for this sink at all.
    fn wants_frames(&self) -> bool {
        true
    }

    fn on_frames(&mut self, batch: &FrameBatch);
}

/// Sink that discards frames.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn wants_frames(&self) -> bool {
        false
    }

    fn on_frames(&mut self, _batch: &FrameBatch) {}
}

/// Transition counts produced by a single tick.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickEvents {
    pub tick: Tick,
    pub rests_started: usize,
    pub stood_up: usize,
    pub dying_started: usize,
    pub deaths: usize,
    pub contagion_scheduled: usize,
    pub contagion_fired: usize,
    /// Contagion events whose target had despawned or was no longer alive.
    pub contagion_skipped: usize,
    pub despawned: usize,
}

/// Population census recorded after each tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TickSummary {
    pub tick: Tick,
    pub time: f64,
    pub agent_count: usize,
    pub alive: usize,
    pub sitting: usize,
    pub dying: usize,
    pub dead: usize,
    pub pending_events: usize,
}

/// Aggregate world state owning every agent.
pub struct WorldState {
    config: FlockConfig,
    tick: Tick,
    time: f64,
    rng: SmallRng,
    agents: AgentArena,
    runtime: AgentMap<AgentRuntime>,
    snapshot: FlockSnapshot,
    obstacles: Box<dyn ObstacleQuery>,
    events: EventQueue,
    sink: Box<dyn FrameSink>,
    pending: TickEvents,
    history: VecDeque<TickSummary>,
}

impl fmt::Debug for WorldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldState")
            .field("config", &self.config)
            .field("tick", &self.tick)
            .field("time", &self.time)
            .field("agent_count", &self.agents.len())
            .field("pending_events", &self.events.len())
            .finish()
    }
}

impl WorldState {
    /// Instantiate an empty world with no obstacles.
    pub fn new(config: FlockConfig) -> Result<Self, WorldStateError> {
        Self::with_obstacles(config, Box::new(NoObstacles))
    }

    /// Instantiate an empty world that steers around `obstacles`.
    pub fn with_obstacles(
        config: FlockConfig,
        obstacles: Box<dyn ObstacleQuery>,
    ) -> Result<Self, WorldStateError> {
        config.validate()?;
        let rng = config.seeded_rng();
        let mut snapshot = FlockSnapshot::new(config.index_cell_size);
        snapshot.refresh(&AgentArena::new(), &AgentMap::new())?;
        let history_capacity = config.history_capacity;
        Ok(Self {
            config,
            tick: Tick::zero(),
            time: 0.0,
            rng,
            agents: AgentArena::new(),
            runtime: AgentMap::new(),
            snapshot,
            obstacles,
            events: EventQueue::new(),
            sink: Box::new(NullSink),
            pending: TickEvents::default(),
            history: VecDeque::with_capacity(history_capacity),
        })
    }

    /// Spawn an agent with freshly derived parameters, a random heading and amble speed.
    pub fn spawn_agent(&mut self, position: Vec3) -> AgentId {
        let params = derive_params(
            &mut self.rng,
            &self.config.base,
            self.config.spatial_variance,
            self.config.weight_variance,
        );
        let yaw = self.rng.random_range(0.0..TAU);
        self.spawn_with_params(position, yaw, params)
    }

    /// Spawn an agent with explicit parameters; construction invariants are still applied.
    pub fn spawn_with_params(&mut self, position: Vec3, yaw: f32, params: AgentParams) -> AgentId {
        let mut data = AgentData::at(position, yaw);
        data.velocity = flatten(data.forward()) * self.config.motion.amble_speed;
        let id = self.agents.insert(data);
        self.runtime.insert(id, AgentRuntime::new(params.sanitized()));
        id
    }

    /// Remove an agent, cancelling every pending event aimed at it.
    pub fn despawn_agent(&mut self, id: AgentId) -> Option<AgentData> {
        let data = self.agents.remove(id)?;
        self.runtime.remove(id);
        let cancelled = self.events.cancel_target(id);
        if cancelled > 0 {
            debug!(?id, cancelled, "despawn cancelled pending events");
        }
        Some(data)
    }

    /// Start the resting sequence on a standing, alive agent.
    ///
    /// The seated hold is drawn from the agent's sit-time range here, once per rest.
    pub fn begin_resting(&mut self, id: AgentId) -> bool {
        let settle = self.config.motion.settle_duration;
        let Some(runtime) = self.runtime.get_mut(id) else {
            return false;
        };
        if runtime.lifecycle.is_sitting() || !runtime.lifecycle.life().is_alive() {
            return false;
        }
        let hold = self
            .rng
            .random_range(runtime.params.min_sit_time..=runtime.params.max_sit_time);
        if !runtime.lifecycle.begin_resting(settle, hold) {
            return false;
        }
        if let Some(idx) = self.agents.index_of(id) {
            self.agents.columns_mut().velocities_mut()[idx] = Vec3::ZERO;
        }
        self.pending.rests_started += 1;
        debug!(?id, "agent sat down");
        true
    }

    /// Move an alive agent into `Dying`, abandoning any rest in progress.
    pub fn begin_dying(&mut self, id: AgentId) -> bool {
        let Some(runtime) = self.runtime.get_mut(id) else {
            return false;
        };
        if !runtime.lifecycle.begin_dying() {
            return false;
        }
        if let Some(idx) = self.agents.index_of(id) {
            let columns = self.agents.columns_mut();
            let heading = columns.headings()[idx];
            let velocity = &mut columns.velocities_mut()[idx];
            *velocity = dying_velocity(*velocity, heading, self.config.motion.dying_speed, 1.0);
        }
        self.pending.dying_started += 1;
        debug!(?id, time = self.time, "agent began dying");
        true
    }

    fn stage_dying(&mut self, dt: f32) {
        let duration = self.config.motion.dying_duration;
        let dying_speed = self.config.motion.dying_speed;
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        let mut died = Vec::new();
        for (idx, id) in handles.into_iter().enumerate() {
            let Some(runtime) = self.runtime.get_mut(id) else {
                continue;
            };
            match runtime.lifecycle.life() {
                LifeState::Alive => {}
                LifeState::Dead => runtime.dead_for += dt,
                LifeState::Dying => {
                    let (fraction, now_dead) = runtime.lifecycle.advance_dying(dt, duration);
                    let columns = self.agents.columns_mut();
                    if now_dead {
                        columns.velocities_mut()[idx] = Vec3::ZERO;
                        died.push(id);
                    } else {
                        let heading = columns.headings()[idx];
                        let velocity =
                            dying_velocity(columns.velocities()[idx], heading, dying_speed, fraction);
                        columns.velocities_mut()[idx] = velocity;
                        columns.positions_mut()[idx] += velocity * dt;
                    }
                }
            }
        }
        for id in died {
            self.on_death(id);
        }
    }

    /// Drain the dead agent's contacts and schedule contagion on eligible ones.
    fn on_death(&mut self, id: AgentId) {
        self.pending.deaths += 1;
        let Some(origin) = self.agents.snapshot(id).map(|a| a.position) else {
            return;
        };
        let drained = match self.runtime.get_mut(id) {
            Some(runtime) => runtime.contacts.drain(),
            None => return,
        };
        let agents = &self.agents;
        let runtime = &self.runtime;
        let targets = select_contagion_targets(
            &drained,
            origin,
            self.config.motion.infection_radius,
            |other| {
                let rt = runtime.get(other)?;
                if !rt.lifecycle.life().is_alive() {
                    return None;
                }
                agents.snapshot(other).map(|a| a.position)
            },
        );
        let motion = self.config.motion;
        for target in &targets {
            let delay = self
                .rng
                .random_range(motion.contagion_delay_min..=motion.contagion_delay_max);
            self.events
                .schedule(self.time + f64::from(delay), *target, ScheduledAction::BeginDying);
        }
        self.pending.contagion_scheduled += targets.len();
        debug!(
            ?id,
            contacts = drained.len(),
            infected = targets.len(),
            "agent died"
        );
    }

    fn stage_rest(&mut self, dt: f32) {
        let motion = self.config.motion;
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        for (idx, id) in handles.into_iter().enumerate() {
            let Some(runtime) = self.runtime.get_mut(id) else {
                continue;
            };
            let transition =
                runtime.lifecycle.advance_rest(dt, motion.rise_duration, motion.stand_slow_time);
            if transition == RestTransition::Stood {
                let columns = self.agents.columns_mut();
                let forward = flatten(forward_of(columns.headings()[idx]));
                columns.velocities_mut()[idx] = forward * motion.amble_speed;
                self.pending.stood_up += 1;
                debug!(?id, "agent stood up");
            }
        }
    }

    fn stage_timers(&mut self, dt: f32) {
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        for id in handles {
            let Some(runtime) = self.runtime.get_mut(id) else {
                continue;
            };
            let params = runtime.params;
            let rest_firings = runtime.timers.rest_check.advance(dt);
            let mortality_firings = runtime.timers.mortality_check.advance(dt);

            for _ in 0..rest_firings {
                let eligible = self
                    .runtime
                    .get(id)
                    .is_some_and(|rt| rt.lifecycle.life().is_alive() && !rt.lifecycle.is_sitting());
                if eligible && self.rng.random_bool(f64::from(params.sit_probability)) {
                    self.begin_resting(id);
                }
            }
            for _ in 0..mortality_firings {
                let eligible = self
                    .runtime
                    .get(id)
                    .is_some_and(|rt| rt.lifecycle.life().is_alive());
                if eligible && self.rng.random_bool(f64::from(params.die_probability)) {
                    self.begin_dying(id);
                }
            }
        }
    }

    fn stage_events(&mut self) {
        while let Some(event) = self.events.pop_due(self.time) {
            match event.action {
                ScheduledAction::BeginDying => {
                    if self.agents.contains(event.target) && self.begin_dying(event.target) {
                        self.pending.contagion_fired += 1;
                    } else {
                        self.pending.contagion_skipped += 1;
                        debug!(agent = ?event.target, "skipped stale contagion event");
                    }
                }
            }
        }
    }

    fn stage_steering(&mut self) -> Vec<Option<SteeringOutput>> {
        if let Err(err) = self.snapshot.refresh(&self.agents, &self.runtime) {
            warn!(%err, "neighbourhood index rebuild failed; skipping steering");
            return vec![None; self.agents.len()];
        }
        let snapshot = &self.snapshot;
        let runtime = &self.runtime;
        let obstacles = self.obstacles.as_ref();
        let motion = &self.config.motion;
        snapshot
            .entries()
            .par_iter()
            .enumerate()
            .map(|(idx, entry)| {
                let rt = runtime.get(entry.id)?;
                if !rt.lifecycle.life().is_alive() || rt.lifecycle.is_sitting() {
                    return None;
                }
                Some(compute_steering(idx, &rt.params, snapshot, obstacles, motion))
            })
            .collect()
    }

    fn stage_contacts(&mut self, outputs: &[Option<SteeringOutput>]) {
        for (id, output) in self.agents.iter_handles().zip(outputs) {
            let Some(output) = output else {
                continue;
            };
            for &other in &output.contacts {
                if let Some(rt) = self.runtime.get_mut(id) {
                    rt.contacts.insert(other);
                }
                if let Some(rt) = self.runtime.get_mut(other) {
                    rt.contacts.insert(id);
                }
            }
        }
    }

    fn stage_motion(&mut self, dt: f32, outputs: &[Option<SteeringOutput>]) {
        let motion = self.config.motion;
        let handles: Vec<AgentId> = self.agents.iter_handles().collect();
        for (idx, id) in handles.into_iter().enumerate() {
            let Some(runtime) = self.runtime.get_mut(id) else {
                continue;
            };
            let columns = self.agents.columns_mut();
            if let Some(Some(output)) = outputs.get(idx) {
                let params = &runtime.params;
                let angle = self.rng.random_range(0.0..TAU);
                let jitter = Vec3::new(angle.sin(), 0.0, angle.cos()) * params.jitter_strength;
                let force = (output.force + jitter).clamp_length_max(params.max_force);
                let target_speed = if output.living_neighbours >= 2
                    && runtime.lifecycle.stand_slow_timer() <= 0.0
                {
                    motion.flock_speed
                } else {
                    motion.amble_speed
                };
                let (position, velocity, heading) = integrate_alive(
                    columns.positions()[idx],
                    columns.velocities()[idx],
                    columns.headings()[idx],
                    force,
                    target_speed,
                    motion.heading_turn_rate,
                    dt,
                );
                columns.positions_mut()[idx] = position;
                columns.velocities_mut()[idx] = velocity;
                columns.headings_mut()[idx] = heading;
            }
            let speed = columns.velocities()[idx].length();
            runtime.cue = runtime.lifecycle.cue(speed, motion.amble_speed);
        }
    }

    fn stage_corpse_cleanup(&mut self) {
        let retention = self.config.corpse_retention;
        if retention <= 0.0 {
            return;
        }
        let expired: HashSet<AgentId> = self
            .agents
            .iter_handles()
            .filter(|id| {
                self.runtime.get(*id).is_some_and(|rt| {
                    rt.lifecycle.life() == LifeState::Dead && rt.dead_for >= retention
                })
            })
            .collect();
        if expired.is_empty() {
            return;
        }
        for id in &expired {
            self.runtime.remove(*id);
            self.events.cancel_target(*id);
        }
        let removed = self.agents.remove_many(&expired);
        self.pending.despawned += removed;
        debug!(removed, "despawned expired corpses");
    }

    fn stage_publish(&mut self) {
        if self.sink.wants_frames() {
            let batch = self.frames();
            self.sink.on_frames(&batch);
        }
        let summary = self.census();
        trace!(
            tick = summary.tick.0,
            alive = summary.alive,
            sitting = summary.sitting,
            dying = summary.dying,
            dead = summary.dead,
            "tick summary"
        );
        if self.history.len() >= self.config.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(summary);
    }

    /// Execute one simulation tick of `dt` seconds, returning the transitions it produced.
    ///
    /// A non-finite or negative `dt` is treated as zero.
    pub fn step(&mut self, dt: f32) -> TickEvents {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.tick = self.tick.next();
        self.time += f64::from(dt);
        self.pending = TickEvents {
            tick: self.tick,
            ..TickEvents::default()
        };

        self.stage_dying(dt);
        self.stage_rest(dt);
        self.stage_timers(dt);
        self.stage_events();
        let outputs = self.stage_steering();
        self.stage_contacts(&outputs);
        self.stage_motion(dt, &outputs);
        self.stage_corpse_cleanup();
        self.stage_publish();

        std::mem::take(&mut self.pending)
    }

    /// Assemble the current frame of every agent in arena order.
    #[must_use]
    pub fn frames(&self) -> FrameBatch {
        let columns = self.agents.columns();
        let frames = self
            .agents
            .iter_handles()
            .enumerate()
            .filter_map(|(idx, id)| {
                let rt = self.runtime.get(id)?;
                Some(AgentFrame {
                    id,
                    position: columns.positions()[idx],
                    velocity: columns.velocities()[idx],
                    heading: columns.headings()[idx],
                    cue: rt.cue,
                    life: rt.lifecycle.life(),
                    sitting: rt.lifecycle.is_sitting(),
                })
            })
            .collect();
        FrameBatch {
            tick: self.tick,
            time: self.time,
            frames,
        }
    }

    /// Count agents per state at the current instant.
    #[must_use]
    pub fn census(&self) -> TickSummary {
        let mut summary = TickSummary {
            tick: self.tick,
            time: self.time,
            agent_count: self.agents.len(),
            alive: 0,
            sitting: 0,
            dying: 0,
            dead: 0,
            pending_events: self.events.len(),
        };
        for id in self.agents.iter_handles() {
            let Some(rt) = self.runtime.get(id) else {
                continue;
            };
            match rt.lifecycle.life() {
                LifeState::Alive => summary.alive += 1,
                LifeState::Dying => summary.dying += 1,
                LifeState::Dead => summary.dead += 1,
            }
            if rt.lifecycle.is_sitting() {
                summary.sitting += 1;
            }
        }
        summary
    }

    #[must_use]
    pub fn config(&self) -> &FlockConfig {
        &self.config
    }

    #[must_use]
    pub const fn tick(&self) -> Tick {
        self.tick
    }

    /// Simulation time in seconds.
    #[must_use]
    pub const fn time(&self) -> f64 {
        self.time
    }

    /// Replace the frame sink.
    pub fn set_sink(&mut self, sink: Box<dyn FrameSink>) {
        self.sink = sink;
    }

    /// Iterate over retained tick summaries, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TickSummary> {
        self.history.iter()
    }

    #[must_use]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    #[must_use]
    pub fn agent_runtime(&self, id: AgentId) -> Option<&AgentRuntime> {
        self.runtime.get(id)
    }

    #[must_use]
    pub fn agent(&self, id: AgentId) -> Option<AgentData> {
        self.agents.snapshot(id)
    }

    /// Pending one-shot events.
    #[must_use]
    pub fn events(&self) -> &EventQueue {
        &self.events
    }

    /// Borrow the world RNG mutably for deterministic sampling.
    pub fn rng(&mut self) -> &mut SmallRng {
        &mut self.rng
    }
}
