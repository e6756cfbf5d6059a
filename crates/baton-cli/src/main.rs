mod cli;
mod config_gen;
mod executor;
mod signal;

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use clap::Parser;

use baton_core::checkpoint::{self, manifest_name, CheckpointStrategy};
use baton_core::config::BatonConfig;
use baton_core::error::BatonError;
use baton_core::monitor::DiskMonitor;
use baton_core::runner::{Runner, RunnerConfig};
use baton_core::stage::{StageMachine, STAGE_MARKER_FILE};
use baton_storage::BlobStore;

use cli::{Cli, Commands};
use executor::ShellStageExecutor;

fn main() {
    let cli = Cli::parse();

    // `run` is the unattended entry point; default its log level up so the
    // worker log shows stage progress without extra flags.
    let filter = match cli.verbose {
        0 if matches!(cli.command, Commands::Run) => "info",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // `config` needs no config file.
    if let Commands::Config { dest } = &cli.command {
        if let Err(e) = config_gen::run_config_generate(dest.as_deref()) {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
        return;
    }

    let config_path = resolve_config_path(cli.config.as_deref());
    let config = match BatonConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {e}");
            eprintln!("Run `baton config` to generate a starter config file.");
            std::process::exit(1);
        }
    };
    tracing::info!("Using config: {}", config_path.display());

    let store = match config.open_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };
    let secret = resolve_secret(&config);

    let result = match &cli.command {
        Commands::Run => run_build(&config, store.as_ref(), secret),
        Commands::Save => save(&config, store.as_ref(), secret.as_deref()),
        Commands::Restore => restore(&config, store.as_ref(), secret.as_deref()),
        Commands::Status => status(&config, store.as_ref()),
        Commands::Discard => discard(&config, store.as_ref()),
        Commands::Config { .. } => unreachable!("handled above"),
    };

    if let Err(e) = result {
        eprintln!("Error ({}): {e}", cli.command.name());
        std::process::exit(1);
    }
}

fn resolve_config_path(flag: Option<&str>) -> PathBuf {
    if let Some(path) = flag {
        return PathBuf::from(path);
    }
    if let Ok(path) = std::env::var("BATON_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("baton.toml")
}

/// The config names an environment variable; the secret itself only ever
/// lives in the process environment.
fn resolve_secret(config: &BatonConfig) -> Option<String> {
    let var = config.checkpoint.secret_env.as_deref()?;
    match std::env::var(var) {
        Ok(secret) if !secret.is_empty() => Some(secret),
        _ => {
            tracing::warn!(var, "secret variable not set, checkpoints will be unencrypted");
            None
        }
    }
}

fn run_build(
    config: &BatonConfig,
    store: &dyn BlobStore,
    secret: Option<String>,
) -> Result<(), Box<dyn Error>> {
    signal::install_signal_handlers();

    let _monitor = config.monitor.enabled.then(|| {
        DiskMonitor::start(
            config.build.working_dir.clone(),
            Duration::from_secs(config.monitor.interval_secs),
        )
    });

    let runner_config = RunnerConfig {
        working_dir: config.build.working_dir.clone(),
        checkpoint_name: config.checkpoint.name.clone(),
        checkpoint_paths: config.build.checkpoint_paths.clone(),
        strategy: config.checkpoint.strategy,
        secret,
        full_build: config.build.full,
        job_start: Utc::now(),
        max_build_time: config.max_build_time(),
        safety_margin: config.safety_margin(),
        package_dir: config.build.package_dir.clone(),
        checkpoint: config.checkpoint_options(),
    };
    let mut executor =
        ShellStageExecutor::new(config.build.working_dir.clone(), config.stages.clone());

    let report = Runner::new(store, runner_config).run(&mut executor)?;
    // Machine-readable line for the surrounding CI job; exit code stays 0
    // for "resume later".
    if report.finished {
        println!("finished=true");
    } else {
        println!(
            "finished=false stage={} outcome={:?}",
            report.stage, report.outcome
        );
    }
    Ok(())
}

fn save(
    config: &BatonConfig,
    store: &dyn BlobStore,
    secret: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    let rel_paths = effective_paths(config)?;
    let volumes = checkpoint::save(
        config.checkpoint.strategy,
        store,
        &config.build.working_dir,
        &rel_paths,
        &config.checkpoint.name,
        secret,
        &config.checkpoint_options(),
    )?;
    println!("Checkpoint '{}' saved ({volumes} volume(s)).", config.checkpoint.name);
    Ok(())
}

fn restore(
    config: &BatonConfig,
    store: &dyn BlobStore,
    secret: Option<&str>,
) -> Result<(), Box<dyn Error>> {
    checkpoint::load(
        config.checkpoint.strategy,
        store,
        &config.build.working_dir,
        &config.checkpoint.name,
        secret,
    )?;
    println!(
        "Checkpoint '{}' restored into {}.",
        config.checkpoint.name,
        config.build.working_dir.display()
    );
    Ok(())
}

fn status(config: &BatonConfig, store: &dyn BlobStore) -> Result<(), Box<dyn Error>> {
    let name = &config.checkpoint.name;
    let remote = match config.checkpoint.strategy {
        CheckpointStrategy::Chunked => store.exists(&manifest_name(name))?,
        CheckpointStrategy::Whole => store.exists(name)?,
    };
    println!("checkpoint: {}", if remote { "present" } else { "absent" });

    let marker = config.build.working_dir.join(STAGE_MARKER_FILE);
    if marker.exists() {
        let stage = StageMachine::new(&config.build.working_dir, config.build.full).current()?;
        println!("stage:      {stage}");
    } else {
        println!("stage:      (no local marker)");
    }
    Ok(())
}

fn discard(config: &BatonConfig, store: &dyn BlobStore) -> Result<(), Box<dyn Error>> {
    checkpoint::discard(store, &config.checkpoint.name, config.checkpoint.max_volumes);
    println!("Checkpoint '{}' discarded.", config.checkpoint.name);
    Ok(())
}

/// Paths to checkpoint for a manual `save`: the configured list (plus the
/// stage marker when present), or every top-level entry of the working dir.
fn effective_paths(config: &BatonConfig) -> Result<Vec<String>, Box<dyn Error>> {
    if !config.build.checkpoint_paths.is_empty() {
        let mut paths = config.build.checkpoint_paths.clone();
        let marker = STAGE_MARKER_FILE.to_string();
        if !paths.contains(&marker) && config.build.working_dir.join(&marker).exists() {
            paths.push(marker);
        }
        return Ok(paths);
    }
    let mut paths: Vec<String> = std::fs::read_dir(&config.build.working_dir)
        .map_err(|e| {
            BatonError::Config(format!(
                "cannot read working dir {}: {e}",
                config.build.working_dir.display()
            ))
        })?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .collect();
    paths.sort();
    Ok(paths)
}
