//! GRIDSLAM SIM: headless simulation driver for the gridslam particle filter.
//!
//! Builds a random occupancy grid, places an agent in it and drives the agent with a scripted or random command
//! sequence while the particle filter tracks it. Each step's ground truth, estimate and filter health are logged
//! and can be written to CSV.
//!
//! You can run simulations either by:
//!   1. Loading all parameters from a configuration file (TOML/JSON/YAML) with `--config`
//!   2. Specifying parameters via command-line flags on the `run` subcommand

mod common;

use clap::{Args, Parser, Subcommand};
use common::{init_logger, trial_output_path, validate_output_file};
use gridslam::config::SimulationConfig;
use gridslam::particle::ParticleAveragingStrategy;
use gridslam::resample::CumulativeSearch;
use gridslam::sim::{Simulation, SimulationResult};
use log::{error, info};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};

const LONG_ABOUT: &str = "GRIDSLAM SIM: headless simulation driver for the gridslam particle filter.

An agent moves through a square occupancy grid with a solid border and randomly placed obstacles. Every few steps it
measures the distance to the nearest obstacle edge in each of the four grid directions. A particle filter with
per-particle landmark maps estimates the agent's pose from the motion commands and those range measurements.

You can run simulations either by:
  1. Loading all parameters from a configuration file (TOML/JSON/YAML) with --config
  2. Specifying parameters via command-line flags on the `run` subcommand";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Headless simulation driver for the gridslam particle filter.", long_about = LONG_ABOUT)]
struct Cli {
    /// Load simulation parameters from a configuration file (TOML/JSON/YAML).
    /// Flags given to `run` override the file's values.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Run trials in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(
        name = "run",
        about = "Run one or more simulations",
        long_about = "Run one or more simulations. Trial i uses seed + i so trials differ but stay reproducible."
    )]
    Run(RunArgs),
    #[command(
        name = "config",
        about = "Write a configuration file with default values",
        long_about = "Write a configuration file with default values. The format follows the file extension (.toml, .json, .yaml or .yml)."
    )]
    Config(ConfigArgs),
}

#[derive(Args, Clone, Debug, Default)]
struct RunArgs {
    /// Cells per side of the square grid, border included
    #[arg(long)]
    grid_size: Option<usize>,
    /// Random obstacle cells
    #[arg(long)]
    obstacles: Option<usize>,
    /// Number of motion commands
    #[arg(long)]
    steps: Option<usize>,
    /// Measure every N steps (0 disables sensing)
    #[arg(long)]
    measure_every: Option<usize>,
    /// Random seed
    #[arg(long)]
    seed: Option<u64>,
    /// Scripted command string of W/A/S/D keys
    #[arg(long)]
    commands: Option<String>,
    /// Number of particles
    #[arg(long)]
    particles: Option<usize>,
    /// Motion and range uncertainty factor
    #[arg(long)]
    uncertainty: Option<f64>,
    /// Cumulative weight search used by the resampler
    #[arg(long, value_enum)]
    search: Option<CumulativeSearch>,
    /// Pose estimate extraction strategy
    #[arg(long, value_enum)]
    averaging: Option<ParticleAveragingStrategy>,
    /// Initialize particles uniformly over the grid instead of around the agent
    #[arg(long)]
    global: bool,
    /// Number of independent trials
    #[arg(long, default_value_t = 1)]
    trials: usize,
    /// Per-step CSV output file
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Final particle snapshot CSV output file
    #[arg(long)]
    particles_output: Option<PathBuf>,
}

impl RunArgs {
    /// Overlay the flags that were given onto `config`.
    fn apply(&self, config: &mut SimulationConfig) {
        if let Some(v) = self.grid_size {
            config.grid_size = v;
        }
        if let Some(v) = self.obstacles {
            config.num_obstacles = v;
        }
        if let Some(v) = self.steps {
            config.steps = v;
        }
        if let Some(v) = self.measure_every {
            config.measure_every = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = &self.commands {
            config.commands = Some(v.clone());
        }
        if let Some(v) = self.particles {
            config.filter.num_particles = v;
        }
        if let Some(v) = self.uncertainty {
            config.filter.uncertainty = v;
        }
        if let Some(v) = self.search {
            config.filter.search = v;
        }
        if let Some(v) = self.averaging {
            config.filter.averaging = v;
        }
        if self.global {
            config.seed_particles_at_start = false;
        }
    }
}

#[derive(Args, Clone, Debug)]
struct ConfigArgs {
    /// Output configuration file (.toml, .json, .yaml, .yml)
    #[arg(short, long, default_value = "gridslam.toml")]
    output: PathBuf,
}

fn run_trial(config: &SimulationConfig, trial: usize) -> Result<SimulationResult, gridslam::Error> {
    let mut config = config.clone();
    config.seed = config.seed.wrapping_add(trial as u64);
    let mut simulation = Simulation::new(config)?;
    Ok(simulation.run())
}

fn write_outputs(
    result: &SimulationResult,
    args: &RunArgs,
    trial: usize,
) -> Result<(), Box<dyn Error>> {
    if let Some(output) = &args.output {
        let path = trial_output_path(output, trial, args.trials);
        result.to_csv(&path)?;
        info!("Wrote step records to {}", path.display());
    }
    if let Some(output) = &args.particles_output {
        let path = trial_output_path(output, trial, args.trials);
        result.particles_to_csv(&path)?;
        info!("Wrote particle snapshot to {}", path.display());
    }
    Ok(())
}

fn summarize(trial: usize, result: &SimulationResult) {
    info!(
        "Trial {}: {} steps, mean error {:.3}, final error {:.3}",
        trial,
        result.records.len(),
        result.mean_error(),
        result.final_error().unwrap_or(0.0)
    );
}

fn run_simulations(
    config_path: Option<&Path>,
    args: &RunArgs,
    parallel: bool,
) -> Result<(), Box<dyn Error>> {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            SimulationConfig::from_file(path)?
        }
        None => SimulationConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;
    if args.trials == 0 {
        return Err("--trials must be at least 1".into());
    }
    for output in [&args.output, &args.particles_output].into_iter().flatten() {
        validate_output_file(output)?;
    }

    info!(
        "Running {} trial(s) on a {}x{} grid with {} particles{}",
        args.trials,
        config.grid_size,
        config.grid_size,
        config.filter.num_particles,
        if parallel && args.trials > 1 {
            " in parallel"
        } else {
            ""
        }
    );

    let results: Vec<(usize, Result<SimulationResult, gridslam::Error>)> = if parallel {
        (0..args.trials)
            .into_par_iter()
            .map(|trial| (trial, run_trial(&config, trial)))
            .collect()
    } else {
        (0..args.trials)
            .map(|trial| (trial, run_trial(&config, trial)))
            .collect()
    };

    let mut failures = 0usize;
    let mut errors = Vec::new();
    for (trial, result) in results {
        match result {
            Ok(result) => {
                summarize(trial, &result);
                write_outputs(&result, args, trial)?;
                errors.push(result.mean_error());
            }
            Err(e) => {
                failures += 1;
                error!("Trial {} failed: {}", trial, e);
            }
        }
    }
    if !errors.is_empty() && args.trials > 1 {
        info!(
            "Mean error over {} trial(s): {:.3}",
            errors.len(),
            errors.iter().sum::<f64>() / errors.len() as f64
        );
    }
    if failures > 0 {
        return Err(format!("{} trial(s) failed", failures).into());
    }
    Ok(())
}

fn write_default_config(args: &ConfigArgs) -> Result<(), Box<dyn Error>> {
    common::ensure_parent_dir(&args.output)?;
    SimulationConfig::default().to_file(&args.output)?;
    info!("Wrote default configuration to {}", args.output.display());
    println!("\nYou can now run the simulation with:");
    println!("  gridslam-sim --config {} run", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    match cli.command {
        Some(Command::Run(args)) => run_simulations(cli.config.as_deref(), &args, cli.parallel),
        Some(Command::Config(args)) => write_default_config(&args),
        None if cli.config.is_some() => {
            let args = RunArgs {
                trials: 1,
                ..RunArgs::default()
            };
            run_simulations(cli.config.as_deref(), &args, cli.parallel)
        }
        None => {
            eprintln!("Error: No command provided. Use -h or --help for usage information.");
            std::process::exit(1);
        }
    }
}
