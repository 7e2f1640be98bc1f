//! Run configuration: serde form, defaults, and validation.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Direction of the reachability computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachMode {
    Forward,
    Backward,
}

/// Whether the controller tries to reach the target or avoid it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReachAim {
    Reach,
    Avoid,
}

/// Whether the value function is pointwise-minimized against the target
/// signed distance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MinWith {
    None,
    Target,
}

/// Reachable set (`set`) or reachable tube (`tube`, Hamiltonian clamped at 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetType {
    Set,
    Tube,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelType {
    Tanh,
    Sine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverChoice {
    Icp,
    Dreal,
    Z3,
}

macro_rules! display_lowercase {
    ($($ty:ident { $($variant:ident => $text:literal),+ $(,)? })+) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    let s = match self {
                        $($ty::$variant => $text,)+
                    };
                    f.write_str(s)
                }
            }

            impl std::str::FromStr for $ty {
                type Err = String;

                fn from_str(s: &str) -> Result<Self, Self::Err> {
                    match s.to_ascii_lowercase().as_str() {
                        $($text => Ok($ty::$variant),)+
                        other => Err(format!(
                            "unknown {} `{other}`",
                            stringify!($ty)
                        )),
                    }
                }
            }
        )+
    };
}

display_lowercase! {
    ReachMode { Forward => "forward", Backward => "backward" }
    ReachAim { Reach => "reach", Avoid => "avoid" }
    MinWith { None => "none", Target => "target" }
    SetType { Set => "set", Tube => "tube" }
    ModelType { Tanh => "tanh", Sine => "sine" }
    SolverChoice { Icp => "icp", Dreal => "dreal", Z3 => "z3" }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("reach_aim=avoid cannot be combined with min_with=target under reach_mode=forward")]
    IncompatibleModes,
    #[error("epsilon must be positive and finite, got {0}")]
    InvalidEpsilon(f64),
    #[error("`{0}` must be greater than zero")]
    Zero(&'static str),
    #[error("`{name}` must lie in [0, 1], got {value}")]
    InvalidFraction { name: &'static str, value: f64 },
    #[error("counterexample_fraction + boundary_fraction = {0} exceeds 1")]
    FractionsExceedOne(f64),
    #[error("`{name}` must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("the z3 backend only decides polynomial certificates; set use_polynomial")]
    SolverRepresentation,
}

/// Everything a train / verify / cegis run needs besides the dynamics and
/// the output location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub reach_mode: ReachMode,
    pub reach_aim: ReachAim,
    pub min_with: MinWith,
    pub set_type: SetType,
    /// Outer acceptance threshold on the residual.
    pub epsilon: f64,

    // Representation
    pub num_nl: usize,
    pub num_hl: usize,
    pub model_type: ModelType,
    pub sine_frequency: f64,
    pub use_polynomial: bool,
    pub poly_degree: u32,
    pub time_horizon: f64,

    // Training
    pub batch_size: usize,
    pub num_epochs: usize,
    pub learning_rate: f64,
    pub grad_clip: f64,
    pub l1_penalty: f64,
    pub lipschitz_weight: f64,
    pub boundary_weight: f64,
    /// Share of training steps spent on the `t = 0` slice only.
    pub pretrain_fraction: f64,
    pub seed: u64,

    // Dataset
    pub num_uniform: usize,
    pub num_boundary: usize,
    pub counterexample_fraction: f64,
    pub boundary_fraction: f64,
    pub counterexample_radius: f64,
    /// Loss weight of samples drawn around counterexamples, relative to
    /// uniform samples.
    pub counterexample_weight: f64,
    pub prune_after_initial: bool,
    /// Uniform samples kept when the dataset is pruned.
    pub retained_anchors: usize,
    /// Fresh uniform samples drawn after pruning.
    pub pruned_uniform: usize,

    // CEGIS loop
    pub max_iterations: usize,
    pub stall_limit: usize,
    pub time_budget_secs: u64,
    pub load_model: bool,

    // Verification
    pub solver: SolverChoice,
    pub solver_timeout_secs: u64,
    /// ICP precision relative to epsilon.
    pub delta_ratio: f64,
    pub icp_max_boxes: usize,
    pub time_subdivisions: usize,
    pub state_splits: usize,
    /// Worker threads for sub-box queries; 0 means available parallelism.
    pub verify_workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            reach_mode: ReachMode::Backward,
            reach_aim: ReachAim::Reach,
            min_with: MinWith::None,
            set_type: SetType::Set,
            epsilon: 0.25,
            num_nl: 64,
            num_hl: 0,
            model_type: ModelType::Tanh,
            sine_frequency: 1.0,
            use_polynomial: false,
            poly_degree: 2,
            time_horizon: 1.0,
            batch_size: 256,
            num_epochs: 100,
            learning_rate: 2e-3,
            grad_clip: 1.0,
            l1_penalty: 0.0,
            lipschitz_weight: 0.0,
            boundary_weight: 1.0,
            pretrain_fraction: 0.1,
            seed: 0,
            num_uniform: 2000,
            num_boundary: 400,
            counterexample_fraction: 0.2,
            boundary_fraction: 0.2,
            counterexample_radius: 0.05,
            counterexample_weight: 4.0,
            prune_after_initial: false,
            retained_anchors: 200,
            pruned_uniform: 500,
            max_iterations: 10,
            stall_limit: 3,
            time_budget_secs: 0,
            load_model: false,
            solver: SolverChoice::Icp,
            solver_timeout_secs: 60,
            delta_ratio: 1e-3,
            icp_max_boxes: 200_000,
            time_subdivisions: 4,
            state_splits: 1,
            verify_workers: 0,
        }
    }
}

impl RunConfig {
    /// Reject contradictory or degenerate settings. Called once before any
    /// sampling or training happens.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reach_mode == ReachMode::Forward
            && self.reach_aim == ReachAim::Avoid
            && self.min_with == MinWith::Target
        {
            return Err(ConfigError::IncompatibleModes);
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(ConfigError::InvalidEpsilon(self.epsilon));
        }
        let counts = [
            ("batch_size", self.batch_size),
            ("num_epochs", self.num_epochs),
            ("max_iterations", self.max_iterations),
            ("num_uniform", self.num_uniform),
            ("time_subdivisions", self.time_subdivisions),
            ("icp_max_boxes", self.icp_max_boxes),
        ];
        for (name, value) in counts {
            if value == 0 {
                return Err(ConfigError::Zero(name));
            }
        }
        if self.use_polynomial {
            if self.poly_degree == 0 {
                return Err(ConfigError::Zero("poly_degree"));
            }
        } else if self.num_nl == 0 {
            return Err(ConfigError::Zero("num_nl"));
        }
        for (name, value) in [
            ("counterexample_fraction", self.counterexample_fraction),
            ("boundary_fraction", self.boundary_fraction),
            ("pretrain_fraction", self.pretrain_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidFraction { name, value });
            }
        }
        let mixed = self.counterexample_fraction + self.boundary_fraction;
        if mixed > 1.0 {
            return Err(ConfigError::FractionsExceedOne(mixed));
        }
        for (name, value) in [
            ("time_horizon", self.time_horizon),
            ("learning_rate", self.learning_rate),
            ("delta_ratio", self.delta_ratio),
            ("sine_frequency", self.sine_frequency),
            ("counterexample_weight", self.counterexample_weight),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(ConfigError::NonPositive { name, value });
            }
        }
        if self.delta_ratio >= 1.0 {
            return Err(ConfigError::InvalidFraction {
                name: "delta_ratio",
                value: self.delta_ratio,
            });
        }
        if self.solver == SolverChoice::Z3 && !self.use_polynomial {
            return Err(ConfigError::SolverRepresentation);
        }
        Ok(())
    }

    /// Numeric precision handed to delta-complete solvers; always tighter
    /// than epsilon.
    pub fn solver_delta(&self) -> f64 {
        self.delta_ratio * self.epsilon
    }
}
