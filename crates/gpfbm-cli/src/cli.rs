use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

const HELP_TEMPLATE: &str = "\
{before-help}{name} {version}
{author-with-newline}{about-with-newline}
{usage-heading} {usage}

{all-args}{after-help}
";

#[derive(Parser, Debug)]
#[command(
    author = "GP-FBM Contributors",
    version,
    about = "GP-FBM CLI - Infer fractional Brownian motion parameters from particle trajectories with Gaussian-process models.",
    help_template = HELP_TEMPLATE,
)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity level (-v for INFO, -vv for DEBUG, -vvv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all log output except for errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Write logs to a specified file in addition to the console output
    #[arg(long, global = true, value_name = "PATH")]
    pub log_file: Option<PathBuf>,

    /// Set the number of threads for parallel computation.
    /// Defaults to the number of available logical cores.
    #[arg(short = 'j', long, global = true, value_name = "NUM")]
    pub threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fit single-particle and coupled GP-FBM models to trajectory tables.
    Fit(FitArgs),
    /// Generate synthetic FBM trajectories.
    Simulate(SimulateArgs),
}

/// Arguments for the `fit` subcommand.
#[derive(Args, Debug)]
pub struct FitArgs {
    // --- Core Arguments ---
    /// Trajectory tables in CSV format, one file per particle.
    /// Columns: frame, time, pos_x, pos_y, err_x, err_y.
    #[arg(required = true, value_name = "CSV")]
    pub inputs: Vec<PathBuf>,

    /// Path for the JSON report. Printed to stdout when omitted.
    #[arg(short, long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Path to an optional configuration file in TOML format.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    // --- Analysis Selection ---
    /// Also fit the coupled model sharing a substrate motion across all particles.
    #[arg(long)]
    pub coupled: bool,

    /// Sample posterior distributions around each fitted optimum.
    #[arg(long)]
    pub posterior: bool,

    /// Estimate the substrate movement from the coupled fit (implies --coupled).
    #[arg(long)]
    pub substrate: bool,

    /// Seed for the posterior sampler. Drawn from the OS when omitted.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,

    // --- Optimization Overrides ---
    /// Override the simplex convergence threshold.
    #[arg(long, value_name = "FLOAT")]
    pub threshold: Option<f64>,

    /// Override the initial simplex step.
    #[arg(long, value_name = "FLOAT")]
    pub step: Option<f64>,

    /// Override the number of posterior samples.
    #[arg(short = 'n', long, value_name = "INT")]
    pub sample_size: Option<usize>,

    /// Override the minimum number of samples required per trajectory.
    #[arg(long, value_name = "INT")]
    pub min_size: Option<usize>,

    /// Set a specific configuration value, overriding the config file.
    /// Can be used multiple times. Example: -S sampler.sample-size=5000
    #[arg(short = 'S', long = "set", value_name = "KEY=VALUE", num_args(0..))]
    pub set_values: Vec<String>,
}

impl FitArgs {
    pub fn wants_coupled(&self) -> bool {
        self.coupled || self.substrate
    }
}

/// Arguments for the `simulate` subcommand.
#[derive(Args, Debug)]
pub struct SimulateArgs {
    /// Output CSV path. With several particles, `_<index>` is appended to the file stem.
    #[arg(short, long, required = true, value_name = "PATH")]
    pub output: PathBuf,

    /// Diffusion coefficient of every particle.
    #[arg(short = 'D', long = "diffusion", value_name = "FLOAT", default_value_t = 0.1)]
    pub d: f64,

    /// Anomalous exponent of every particle, in (0, 2).
    #[arg(short = 'A', long = "alpha", value_name = "FLOAT", default_value_t = 0.45)]
    pub a: f64,

    /// Number of particles to generate.
    #[arg(short, long, value_name = "INT", default_value_t = 1)]
    pub particles: usize,

    /// Shared substrate motion as `DR AR`. Couples all particles when given.
    #[arg(long, num_args = 2, value_names = ["DR", "AR"])]
    pub substrate: Option<Vec<f64>>,

    /// Number of frames per trajectory.
    #[arg(long, value_name = "INT", default_value_t = 200)]
    pub steps: usize,

    /// Time between frames.
    #[arg(long, value_name = "FLOAT", default_value_t = 0.5)]
    pub time_step: f64,

    /// Localization error (standard deviation per axis).
    #[arg(long, value_name = "FLOAT", default_value_t = 0.05)]
    pub error: f64,

    /// Random seed. Drawn from the OS when omitted.
    #[arg(long, value_name = "INT")]
    pub seed: Option<u64>,
}
