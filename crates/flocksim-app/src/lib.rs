//! Shared plumbing for the headless flocksim driver: logging, config loading, world
//! bootstrap and the run loop.

use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use flocksim_core::{
    AnimationCue, FlockConfig, FrameBatch, FrameSink, PenBoundary, StaticObstacles, TickEvents,
    TickSummary, WorldState,
};
use glam::Vec3;
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::Serialize;
use tracing::{info, warn};

/// Install the global `tracing` subscriber, filtered by `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Load a JSON config file, falling back to defaults when no path is given.
pub fn load_config(path: Option<&Path>) -> Result<FlockConfig> {
    let config = match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            serde_json::from_str::<FlockConfig>(&raw)
                .with_context(|| format!("failed to parse config {}", path.display()))?
        }
        None => FlockConfig::default(),
    };
    config.validate().context("invalid flock configuration")?;
    Ok(config)
}

/// Options controlling a headless run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOptions {
    pub agents: usize,
    pub ticks: u64,
    /// Seconds per tick.
    pub dt: f32,
    /// Overrides the config seed when present.
    pub seed: Option<u64>,
    /// Half extent of the square pen; zero or less disables the pen.
    pub pen_size: f32,
    /// Ticks between progress logs; zero disables them.
    pub report_every: u64,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            agents: 40,
            ticks: 1_800,
            dt: 1.0 / 30.0,
            seed: None,
            pen_size: 20.0,
            report_every: 300,
        }
    }
}

/// Running totals of the cues emitted to the animation sink.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct CueCounts {
    pub idle: u64,
    pub walk: u64,
    pub trot: u64,
    pub settle_to_sit: u64,
    pub rise_to_stand: u64,
    pub death: u64,
}

impl CueCounts {
    pub fn record(&mut self, cue: AnimationCue) {
        let slot = match cue {
            AnimationCue::Idle => &mut self.idle,
            AnimationCue::Walk => &mut self.walk,
            AnimationCue::Trot => &mut self.trot,
            AnimationCue::SettleToSit => &mut self.settle_to_sit,
            AnimationCue::RiseToStand => &mut self.rise_to_stand,
            AnimationCue::Death => &mut self.death,
        };
        *slot += 1;
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.idle + self.walk + self.trot + self.settle_to_sit + self.rise_to_stand + self.death
    }
}

/// Frame sink that tallies cues into a shared counter.
#[derive(Debug, Clone, Default)]
pub struct CueTally {
    counts: Arc<Mutex<CueCounts>>,
}

impl CueTally {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current totals; empty if the counter lock was poisoned.
    #[must_use]
    pub fn counts(&self) -> CueCounts {
        self.counts.lock().map(|c| *c).unwrap_or_default()
    }
}

impl FrameSink for CueTally {
    fn on_frames(&mut self, batch: &FrameBatch) {
        if let Ok(mut counts) = self.counts.lock() {
            for frame in &batch.frames {
                counts.record(frame.cue);
            }
        }
    }
}

/// Transition totals accumulated over a run.
#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq, Eq)]
pub struct EventTotals {
    pub rests_started: usize,
    pub stood_up: usize,
    pub dying_started: usize,
    pub deaths: usize,
    pub contagion_scheduled: usize,
    pub contagion_fired: usize,
    pub contagion_skipped: usize,
    pub despawned: usize,
}

impl EventTotals {
    pub fn absorb(&mut self, events: &TickEvents) {
        self.rests_started += events.rests_started;
        self.stood_up += events.stood_up;
        self.dying_started += events.dying_started;
        self.deaths += events.deaths;
        self.contagion_scheduled += events.contagion_scheduled;
        self.contagion_fired += events.contagion_fired;
        self.contagion_skipped += events.contagion_skipped;
        self.despawned += events.despawned;
    }
}

/// Final report printed by the binary.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunReport {
    pub ticks: u64,
    pub simulated_seconds: f64,
    pub agent_count: usize,
    pub alive: usize,
    pub sitting: usize,
    pub dying: usize,
    pub dead: usize,
    pub events: EventTotals,
    pub cues: CueCounts,
}

impl RunReport {
    fn new(summary: &TickSummary, events: EventTotals, cues: CueCounts) -> Self {
        Self {
            ticks: summary.tick.0,
            simulated_seconds: summary.time,
            agent_count: summary.agent_count,
            alive: summary.alive,
            sitting: summary.sitting,
            dying: summary.dying,
            dead: summary.dead,
            events,
            cues,
        }
    }
}

/// Build a world inside an optional pen and spawn agents on a jittered grid.
pub fn bootstrap_world(mut config: FlockConfig, options: &RunOptions) -> Result<WorldState> {
    if options.seed.is_some() {
        config.rng_seed = options.seed;
    }
    let seed = config.rng_seed.unwrap_or_else(rand::random);
    config.rng_seed = Some(seed);

    let mut world = if options.pen_size > 0.0 {
        let pen = StaticObstacles::new().with(PenBoundary::centred(options.pen_size));
        WorldState::with_obstacles(config, Box::new(pen))
    } else {
        WorldState::new(config)
    }
    .context("failed to construct world")?;

    let mut placement = SmallRng::seed_from_u64(seed ^ 0x5EED_F10C);
    let side = (options.agents as f32).sqrt().ceil().max(1.0);
    let extent = if options.pen_size > 0.0 {
        options.pen_size * 0.6
    } else {
        side
    };
    let spacing = (2.0 * extent / side).max(0.5);
    for i in 0..options.agents {
        let col = (i as f32 % side).floor();
        let row = (i as f32 / side).floor();
        let jitter = Vec3::new(
            placement.random_range(-0.25..=0.25),
            0.0,
            placement.random_range(-0.25..=0.25),
        ) * spacing;
        let position = Vec3::new(
            -extent + (col + 0.5) * spacing,
            0.0,
            -extent + (row + 0.5) * spacing,
        ) + jitter;
        world.spawn_agent(position);
    }
    info!(
        agents = world.agent_count(),
        seed,
        pen = options.pen_size,
        "world bootstrapped"
    );
    Ok(world)
}

/// Step `world` for `options.ticks` ticks, logging progress along the way.
pub fn run_headless(world: &mut WorldState, options: &RunOptions) -> RunReport {
    let tally = CueTally::new();
    world.set_sink(Box::new(tally.clone()));
    let mut totals = EventTotals::default();

    for _ in 0..options.ticks {
        let events = world.step(options.dt);
        totals.absorb(&events);
        if options.report_every > 0 && events.tick.0.is_multiple_of(options.report_every) {
            let census = world.census();
            info!(
                tick = census.tick.0,
                time = census.time,
                alive = census.alive,
                sitting = census.sitting,
                dying = census.dying,
                dead = census.dead,
                pending = census.pending_events,
                "progress"
            );
        }
    }

    let summary = world.census();
    if options.agents > 0 && summary.alive == 0 {
        warn!(tick = summary.tick.0, "flock died out");
    }
    let report = RunReport::new(&summary, totals, tally.counts());
    info!(
        ticks = report.ticks,
        alive = report.alive,
        deaths = report.events.deaths,
        contagion = report.events.contagion_fired,
        "run complete"
    );
    report
}
