//! Configuration options specific to the CLI, as opposed to the simulation engine itself
use std::path::PathBuf;

use clap::{AppSettings, Parser, Subcommand};

use virsim_core::cfg::SimConfig;

/// Configuration options for this command line app's subcommands
#[derive(Parser)]
#[clap(version, about = "Stochastic metapopulation evolution engine for a segmented viral genome")]
pub struct CliConfig {
    /// Subcommand to run
    #[clap(subcommand)]
    pub command: CliCommand,
}

/// Subcommand definitions
#[derive(Subcommand)]
#[clap(setting = AppSettings::DeriveDisplayOrder)]
pub enum CliCommand {
    /// Run simulations
    Simulate(SimulateConfig),
    /// Reproduce results from a previous simulation run
    Reproduce(ReproduceConfig),
}

/// Run the simulation engine
#[derive(Parser)]
#[clap(version, setting = AppSettings::DeriveDisplayOrder)]
pub struct SimulateConfig {
    /// Simulation options
    #[clap(flatten)]
    pub sim_cfg: SimConfig,

    /// Number of worker threads to split replicates across
    ///
    /// Each worker runs an independent share of the configured `rep` replicates with its
    /// own population tensor and RNG stream, seeded by splitting the top-level seed.
    /// Trails the fixed positional arguments so it never shifts their order.
    #[clap(short = 'w', long, default_value = "1")]
    pub workers: u32,

    /// Suppress progress bars
    #[clap(short, long)]
    pub quiet: bool,
}

/// Reproduce the results of a previous run
#[derive(Parser)]
#[clap(version, setting = AppSettings::DeriveDisplayOrder)]
pub struct ReproduceConfig {
    /// Path of a previous run's output file, which carries the configuration needed to
    /// reproduce its results
    pub input_path: PathBuf,

    /// Number of worker threads to split replicates across
    #[clap(short = 'w', long, default_value = "1")]
    pub workers: u32,

    /// Suppress progress bars
    #[clap(short, long)]
    pub quiet: bool,
}
