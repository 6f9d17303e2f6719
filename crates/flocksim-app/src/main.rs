use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use flocksim_app::{RunOptions, bootstrap_world, init_tracing, load_config, run_headless};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "flocksim",
    version,
    about = "Run a headless flock of ambient creatures and report what happened"
)]
struct Cli {
    /// Number of agents to spawn.
    #[arg(long, env = "FLOCKSIM_AGENTS", default_value_t = 40)]
    agents: usize,

    /// Number of ticks to simulate.
    #[arg(long, env = "FLOCKSIM_TICKS", default_value_t = 1_800)]
    ticks: u64,

    /// Seconds per tick.
    #[arg(long, env = "FLOCKSIM_DT", default_value_t = 1.0 / 30.0)]
    dt: f32,

    /// RNG seed; overrides the config file.
    #[arg(long, env = "FLOCKSIM_SEED")]
    seed: Option<u64>,

    /// JSON config file; missing fields use defaults.
    #[arg(long, env = "FLOCKSIM_CONFIG")]
    config: Option<PathBuf>,

    /// Half extent of the square pen; 0 disables it.
    #[arg(long, env = "FLOCKSIM_PEN_SIZE", default_value_t = 20.0)]
    pen_size: f32,

    /// Ticks between progress logs; 0 disables them.
    #[arg(long, env = "FLOCKSIM_REPORT_EVERY", default_value_t = 300)]
    report_every: u64,
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    if !(cli.dt > 0.0) || !cli.dt.is_finite() {
        bail!("--dt must be a positive number of seconds, got {}", cli.dt);
    }

    let config = load_config(cli.config.as_deref())?;
    let options = RunOptions {
        agents: cli.agents,
        ticks: cli.ticks,
        dt: cli.dt,
        seed: cli.seed,
        pen_size: cli.pen_size,
        report_every: cli.report_every,
    };
    info!(?options, "starting flocksim");

    let mut world = bootstrap_world(config, &options)?;
    let report = run_headless(&mut world, &options);
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
