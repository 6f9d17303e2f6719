use std::io::Write;

use flocksim_app::{RunOptions, bootstrap_world, load_config, run_headless};
use tempfile::NamedTempFile;

fn small_run() -> RunOptions {
    RunOptions {
        agents: 16,
        ticks: 240,
        dt: 1.0 / 30.0,
        seed: Some(42),
        pen_size: 10.0,
        report_every: 60,
    }
}

#[test]
fn partial_config_file_loads_with_defaults() {
    let mut file = NamedTempFile::new().expect("tempfile");
    write!(
        file,
        r#"{{ "rng_seed": 9, "base": {{ "sit_probability": 0.5 }}, "corpse_retention": 4.0 }}"#
    )
    .expect("write config");

    let config = load_config(Some(file.path())).expect("config loads");
    assert_eq!(config.rng_seed, Some(9));
    assert_eq!(config.base.sit_probability, 0.5);
    assert_eq!(config.corpse_retention, 4.0);
    assert_eq!(config.base.neighbour_radius, 5.0);
}

#[test]
fn invalid_config_is_rejected() {
    let mut file = NamedTempFile::new().expect("tempfile");
    write!(file, r#"{{ "history_capacity": 0 }}"#).expect("write config");
    let err = load_config(Some(file.path())).expect_err("zero history rejected");
    assert!(format!("{err:#}").contains("history_capacity"));

    let mut garbage = NamedTempFile::new().expect("tempfile");
    write!(garbage, "not json").expect("write config");
    assert!(load_config(Some(garbage.path())).is_err());
}

#[test]
fn headless_run_reports_every_tick() {
    let options = small_run();
    let config = load_config(None).expect("defaults");
    let mut world = bootstrap_world(config, &options).expect("world");
    assert_eq!(world.agent_count(), options.agents);

    let report = run_headless(&mut world, &options);
    assert_eq!(report.ticks, options.ticks);
    assert!((report.simulated_seconds - 8.0).abs() < 1e-3);
    assert_eq!(report.agent_count, options.agents);
    assert_eq!(
        report.alive + report.dying + report.dead,
        report.agent_count
    );
    assert_eq!(
        report.cues.total(),
        options.ticks * options.agents as u64,
        "one cue per agent per tick"
    );
}

#[test]
fn seeded_runs_are_reproducible() {
    let options = small_run();
    let run = || {
        let config = load_config(None).expect("defaults");
        let mut world = bootstrap_world(config, &options).expect("world");
        run_headless(&mut world, &options)
    };
    assert_eq!(run(), run());
}
