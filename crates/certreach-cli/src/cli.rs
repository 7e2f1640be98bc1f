//! CLI argument definitions: top-level `Cli` struct and `Commands` enum.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use certreach_ir::config::{MinWith, ModelType, ReachAim, ReachMode, SetType, SolverChoice};
use certreach_systems::SystemKind;

pub(crate) const CLI_LONG_ABOUT: &str =
    "Learn and formally verify reachability certificates for continuous-time systems.\n\n\
    A certificate V(t, x) is trained to satisfy the Hamilton-Jacobi reachability PDE, then \
    checked by a delta-complete solver. Solver counterexamples are fed back into training \
    until verification succeeds or a stopping rule fires.\n\n\
    Typical session:\n  \
    1. certreach cegis --system double_integrator --reach-aim avoid\n  \
    2. certreach check --system double_integrator --slice\n\n\
    Use --config to load a JSON run configuration; individual flags override it.";

#[derive(Parser)]
#[command(name = "certreach")]
#[command(
    about = "Learn and verify reachability certificates with counterexample-guided synthesis"
)]
#[command(long_about = CLI_LONG_ABOUT)]
#[command(version)]
pub(crate) struct Cli {
    #[command(subcommand)]
    pub(crate) command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Fit a certificate once and save it unverified
    Train(RunArgs),

    /// Verify the certificate saved for an experiment
    Verify(RunArgs),

    /// Run the full train / verify / refine loop
    Cegis(RunArgs),

    /// Re-check a saved artifact: integrity, dense residual audit, optional slice plot
    Check(CheckArgs),

    /// List the built-in systems
    Systems {
        /// Output format: text | json
        #[arg(long, default_value = "text")]
        format: String,
    },
}

#[derive(Args, Debug, Clone)]
pub(crate) struct RunArgs {
    /// Built-in system to run against
    #[arg(long)]
    pub(crate) system: SystemKind,

    /// JSON run configuration; missing fields take their defaults
    #[arg(long)]
    pub(crate) config: Option<PathBuf>,

    /// Directory holding one sub-directory per experiment
    #[arg(long, default_value = "logs")]
    pub(crate) logging_root: PathBuf,

    /// Experiment name (defaults to the system name)
    #[arg(long)]
    pub(crate) experiment: Option<String>,

    /// Write every verification query as SMT-LIB2 under this directory
    #[arg(long)]
    pub(crate) dump_smt: Option<PathBuf>,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub(crate) format: String,

    #[command(flatten)]
    pub(crate) overrides: ConfigOverrides,
}

/// Per-field overrides applied on top of `--config`.
#[derive(Args, Debug, Clone, Default)]
#[command(next_help_heading = "Run configuration")]
pub(crate) struct ConfigOverrides {
    /// forward | backward
    #[arg(long)]
    pub(crate) reach_mode: Option<ReachMode>,
    /// reach | avoid
    #[arg(long)]
    pub(crate) reach_aim: Option<ReachAim>,
    /// none | target
    #[arg(long)]
    pub(crate) min_with: Option<MinWith>,
    /// set | tube
    #[arg(long)]
    pub(crate) set_type: Option<SetType>,
    /// Residual bound the certificate must meet
    #[arg(long)]
    pub(crate) epsilon: Option<f64>,

    /// Hidden-layer width
    #[arg(long)]
    pub(crate) num_nl: Option<usize>,
    /// Hidden-layer count
    #[arg(long)]
    pub(crate) num_hl: Option<usize>,
    /// tanh | sine
    #[arg(long)]
    pub(crate) model_type: Option<ModelType>,
    #[arg(long)]
    pub(crate) sine_frequency: Option<f64>,
    /// Use a polynomial certificate instead of a network
    #[arg(long)]
    pub(crate) use_polynomial: bool,
    #[arg(long)]
    pub(crate) poly_degree: Option<u32>,
    #[arg(long)]
    pub(crate) time_horizon: Option<f64>,

    #[arg(long)]
    pub(crate) batch_size: Option<usize>,
    #[arg(long)]
    pub(crate) num_epochs: Option<usize>,
    #[arg(long)]
    pub(crate) learning_rate: Option<f64>,
    #[arg(long)]
    pub(crate) grad_clip: Option<f64>,
    #[arg(long)]
    pub(crate) l1_penalty: Option<f64>,
    #[arg(long)]
    pub(crate) lipschitz_weight: Option<f64>,
    #[arg(long)]
    pub(crate) boundary_weight: Option<f64>,
    #[arg(long)]
    pub(crate) pretrain_fraction: Option<f64>,
    #[arg(long)]
    pub(crate) seed: Option<u64>,

    #[arg(long)]
    pub(crate) num_uniform: Option<usize>,
    #[arg(long)]
    pub(crate) num_boundary: Option<usize>,
    #[arg(long)]
    pub(crate) counterexample_fraction: Option<f64>,
    #[arg(long)]
    pub(crate) boundary_fraction: Option<f64>,
    #[arg(long)]
    pub(crate) counterexample_radius: Option<f64>,
    #[arg(long)]
    pub(crate) counterexample_weight: Option<f64>,
    /// Shrink the dataset after the first counterexample
    #[arg(long)]
    pub(crate) prune_after_initial: bool,
    #[arg(long)]
    pub(crate) retained_anchors: Option<usize>,
    #[arg(long)]
    pub(crate) pruned_uniform: Option<usize>,

    #[arg(long)]
    pub(crate) max_iterations: Option<usize>,
    /// Consecutive inconclusive verifications before giving up
    #[arg(long)]
    pub(crate) stall_limit: Option<usize>,
    /// Wall-clock budget for the whole run, in seconds
    #[arg(long)]
    pub(crate) time_budget_secs: Option<u64>,
    /// Start from the artifact already saved for this experiment
    #[arg(long)]
    pub(crate) load_model: bool,

    /// icp | dreal | z3
    #[arg(long)]
    pub(crate) solver: Option<SolverChoice>,
    #[arg(long)]
    pub(crate) solver_timeout_secs: Option<u64>,
    /// Solver precision as a fraction of epsilon
    #[arg(long)]
    pub(crate) delta_ratio: Option<f64>,
    #[arg(long)]
    pub(crate) icp_max_boxes: Option<usize>,
    #[arg(long)]
    pub(crate) time_subdivisions: Option<usize>,
    #[arg(long)]
    pub(crate) state_splits: Option<usize>,
    #[arg(long)]
    pub(crate) verify_workers: Option<usize>,
}

#[derive(Args, Debug, Clone)]
pub(crate) struct CheckArgs {
    #[arg(long)]
    pub(crate) system: SystemKind,

    #[arg(long, default_value = "logs")]
    pub(crate) logging_root: PathBuf,

    /// Experiment name (defaults to the system name)
    #[arg(long)]
    pub(crate) experiment: Option<String>,

    /// Grid points per axis of the dense audit
    #[arg(long, default_value_t = 11)]
    pub(crate) grid: usize,

    /// Random points of the dense audit
    #[arg(long, default_value_t = 10_000)]
    pub(crate) random_points: usize,

    /// Print an ASCII map of V over a 2-D state slice
    #[arg(long)]
    pub(crate) slice: bool,

    /// Time of the slice
    #[arg(long, default_value_t = 0.0)]
    pub(crate) slice_time: f64,

    /// State axes of the slice, zero-based: "0,1"
    #[arg(long, default_value = "0,1")]
    pub(crate) slice_axes: String,

    #[arg(long, default_value_t = 41)]
    pub(crate) resolution: usize,

    /// Also write the slice as CSV
    #[arg(long)]
    pub(crate) csv: Option<PathBuf>,

    /// Output format: text | json
    #[arg(long, default_value = "text")]
    pub(crate) format: String,
}
