//! Runtime selection of the decision procedure.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use certreach_ir::config::{RunConfig, SolverChoice};
use certreach_smt::backends::dreal_backend::{DRealError, DRealSolver};
use certreach_smt::backends::icp_backend::{IcpConfig, IcpError, IcpSolver};
#[cfg(feature = "z3")]
use certreach_smt::backends::z3_backend::{Z3Error, Z3Solver};
use certreach_smt::solver::{Model, SatResult, SmtSolver};
use certreach_smt::sorts::SmtSort;
use certreach_smt::terms::SmtTerm;
use thiserror::Error;

/// Creates one fresh solver per query. Shared by the verifier's workers.
pub trait SolverFactory: Sync {
    type Solver: SmtSolver;

    fn name(&self) -> &str;

    /// A solver whose single `check_sat` gives up after `timeout`.
    fn create(&self, timeout: Option<Duration>) -> Self::Solver;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Backend {
    Icp(IcpConfig),
    DReal {
        command: String,
        precision: f64,
    },
    #[cfg(feature = "z3")]
    Z3,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("solver `{0}` is not available in this build; rebuild with `--features {0}`")]
pub struct BackendUnavailable(pub &'static str);

impl Backend {
    /// Backend for `cfg.solver`, with the numeric precision set to
    /// `cfg.solver_delta()`.
    pub fn from_config(cfg: &RunConfig) -> Result<Self, BackendUnavailable> {
        match cfg.solver {
            SolverChoice::Icp => Ok(Backend::Icp(IcpConfig {
                delta: cfg.solver_delta(),
                max_boxes: cfg.icp_max_boxes,
                ..IcpConfig::default()
            })),
            SolverChoice::Dreal => Ok(Backend::DReal {
                command: "dreal".to_string(),
                precision: cfg.solver_delta(),
            }),
            #[cfg(feature = "z3")]
            SolverChoice::Z3 => Ok(Backend::Z3),
            #[cfg(not(feature = "z3"))]
            SolverChoice::Z3 => Err(BackendUnavailable("z3")),
        }
    }
}

impl SolverFactory for Backend {
    type Solver = AnySolver;

    fn name(&self) -> &str {
        match self {
            Backend::Icp(_) => "icp",
            Backend::DReal { .. } => "dreal",
            #[cfg(feature = "z3")]
            Backend::Z3 => "z3",
        }
    }

    fn create(&self, timeout: Option<Duration>) -> AnySolver {
        match self {
            Backend::Icp(config) => AnySolver::Icp(IcpSolver::new(IcpConfig {
                timeout,
                ..config.clone()
            })),
            Backend::DReal { command, precision } => {
                AnySolver::DReal(DRealSolver::with_command(command, *precision, timeout))
            }
            #[cfg(feature = "z3")]
            Backend::Z3 => {
                let secs = timeout.map_or(0, |t| t.as_secs().max(1));
                AnySolver::Z3(Z3Solver::with_timeout_secs(secs))
            }
        }
    }
}

pub enum AnySolver {
    Icp(IcpSolver),
    DReal(DRealSolver),
    #[cfg(feature = "z3")]
    Z3(Z3Solver),
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error(transparent)]
    Icp(#[from] IcpError),
    #[error(transparent)]
    DReal(#[from] DRealError),
    #[cfg(feature = "z3")]
    #[error(transparent)]
    Z3(#[from] Z3Error),
}

macro_rules! delegate {
    ($self:ident, $s:ident => $call:expr) => {
        match $self {
            AnySolver::Icp($s) => $call.map_err(BackendError::from),
            AnySolver::DReal($s) => $call.map_err(BackendError::from),
            #[cfg(feature = "z3")]
            AnySolver::Z3($s) => $call.map_err(BackendError::from),
        }
    };
}

impl SmtSolver for AnySolver {
    type Error = BackendError;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), BackendError> {
        delegate!(self, s => s.declare_var(name, sort))
    }

    fn declare_bounded_var(&mut self, name: &str, lo: f64, hi: f64) -> Result<(), BackendError> {
        delegate!(self, s => s.declare_bounded_var(name, lo, hi))
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), BackendError> {
        delegate!(self, s => s.assert(term))
    }

    fn push(&mut self) -> Result<(), BackendError> {
        delegate!(self, s => s.push())
    }

    fn pop(&mut self) -> Result<(), BackendError> {
        delegate!(self, s => s.pop())
    }

    fn check_sat(&mut self) -> Result<SatResult, BackendError> {
        delegate!(self, s => s.check_sat())
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), BackendError> {
        delegate!(self, s => s.check_sat_with_model(var_names))
    }

    fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        match self {
            AnySolver::Icp(s) => s.set_cancel_flag(flag),
            AnySolver::DReal(s) => s.set_cancel_flag(flag),
            #[cfg(feature = "z3")]
            AnySolver::Z3(s) => s.set_cancel_flag(flag),
        }
    }

    fn reset(&mut self) -> Result<(), BackendError> {
        delegate!(self, s => s.reset())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icp_backend_uses_solver_delta() {
        let cfg = RunConfig {
            epsilon: 0.5,
            delta_ratio: 0.01,
            ..RunConfig::default()
        };
        let backend = Backend::from_config(&cfg).unwrap();
        assert_eq!(backend.name(), "icp");
        match backend {
            Backend::Icp(c) => assert!((c.delta - 0.005).abs() < 1e-15),
            other => panic!("unexpected backend {other:?}"),
        }
    }

    #[cfg(not(feature = "z3"))]
    #[test]
    fn z3_without_feature_is_unavailable() {
        let cfg = RunConfig {
            solver: SolverChoice::Z3,
            use_polynomial: true,
            ..RunConfig::default()
        };
        assert_eq!(Backend::from_config(&cfg), Err(BackendUnavailable("z3")));
    }

    #[test]
    fn icp_solver_decides_simple_query() {
        let backend = Backend::Icp(IcpConfig::default());
        let mut solver = backend.create(Some(Duration::from_secs(5)));
        solver.declare_bounded_var("x", -1.0, 1.0).unwrap();
        let x = SmtTerm::var("x");
        solver.assert(&x.clone().mul(x).gt(SmtTerm::real(2.0))).unwrap();
        assert_eq!(solver.check_sat().unwrap(), SatResult::Unsat);
    }
}
