#![allow(dead_code)]

use std::convert::Infallible;
use std::time::Duration;

use certreach_engine::backend::SolverFactory;
use certreach_engine::run::RunContext;
use certreach_ir::certificate::{Certificate, CertificateShape, PolynomialShape};
use certreach_ir::config::RunConfig;
use certreach_ir::domain::DomainBox;
use certreach_ir::dynamics::Dynamics;
use certreach_ir::scalar::Scalar;
use certreach_smt::solver::{Model, SatResult, SmtSolver};
use certreach_smt::sorts::SmtSort;
use certreach_smt::terms::SmtTerm;

/// `x' = 0` on `[-1, 1]`, target `x <= 0`. `V(t, x) = x` solves it exactly.
pub struct Still;

impl Dynamics for Still {
    fn name(&self) -> &str {
        "still"
    }

    fn state_dim(&self) -> usize {
        1
    }

    fn domain(&self) -> DomainBox {
        DomainBox::cube(1, -1.0, 1.0)
    }

    fn control_bound(&self) -> f64 {
        0.0
    }

    fn drift<S: Scalar>(&self, x: &[S]) -> Vec<S> {
        vec![x[0].constant(0.0)]
    }

    fn control_gain<S: Scalar>(&self, _x: &[S]) -> Vec<Vec<S>> {
        Vec::new()
    }

    fn target_membership<S: Scalar>(&self, x: &[S]) -> S {
        x[0].clone()
    }
}

/// `V(t, x) = c_t t + c_x x`.
pub fn linear(ct: f64, cx: f64) -> Certificate {
    let shape = PolynomialShape {
        input_dim: 2,
        degree: 1,
    };
    Certificate::from_params(CertificateShape::Polynomial(shape), true, vec![0.0, ct, cx])
        .unwrap_or_else(|e| panic!("linear certificate: {e}"))
}

/// Small, fast polynomial configuration for the `Still` system.
pub fn still_config() -> RunConfig {
    RunConfig {
        use_polynomial: true,
        poly_degree: 1,
        epsilon: 0.25,
        num_epochs: 60,
        batch_size: 32,
        learning_rate: 0.05,
        grad_clip: 0.0,
        num_uniform: 200,
        num_boundary: 50,
        time_subdivisions: 2,
        state_splits: 2,
        verify_workers: 2,
        max_iterations: 4,
        ..RunConfig::default()
    }
}

/// Cheap learned-network configuration for 2-state systems.
pub fn tiny_mlp_config() -> RunConfig {
    RunConfig {
        num_nl: 8,
        num_epochs: 1,
        batch_size: 32,
        num_uniform: 100,
        num_boundary: 20,
        time_subdivisions: 1,
        verify_workers: 2,
        ..RunConfig::default()
    }
}

pub fn context(root: &std::path::Path, name: &str) -> RunContext {
    RunContext::new(root, name)
}

/// Solver that gives up on every query, as if each one timed out.
pub struct AlwaysUnknown;

pub struct UnknownSolver;

impl SmtSolver for UnknownSolver {
    type Error = Infallible;

    fn declare_var(&mut self, _name: &str, _sort: &SmtSort) -> Result<(), Infallible> {
        Ok(())
    }

    fn assert(&mut self, _term: &SmtTerm) -> Result<(), Infallible> {
        Ok(())
    }

    fn push(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Infallible> {
        Ok(SatResult::Unknown("timeout".into()))
    }

    fn check_sat_with_model(
        &mut self,
        _var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Infallible> {
        Ok((SatResult::Unknown("timeout".into()), None))
    }

    fn reset(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

impl SolverFactory for AlwaysUnknown {
    type Solver = UnknownSolver;

    fn name(&self) -> &str {
        "always-unknown"
    }

    fn create(&self, _timeout: Option<Duration>) -> UnknownSolver {
        UnknownSolver
    }
}

/// Solver that spends its whole timeout (at most two seconds) on every
/// query and then gives up.
pub struct Sluggish;

pub struct SluggishSolver {
    timeout: Duration,
}

impl SmtSolver for SluggishSolver {
    type Error = Infallible;

    fn declare_var(&mut self, _name: &str, _sort: &SmtSort) -> Result<(), Infallible> {
        Ok(())
    }

    fn assert(&mut self, _term: &SmtTerm) -> Result<(), Infallible> {
        Ok(())
    }

    fn push(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Infallible> {
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Infallible> {
        std::thread::sleep(self.timeout);
        Ok(SatResult::Unknown("timeout".into()))
    }

    fn check_sat_with_model(
        &mut self,
        _var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Infallible> {
        Ok((self.check_sat()?, None))
    }

    fn reset(&mut self) -> Result<(), Infallible> {
        Ok(())
    }
}

impl SolverFactory for Sluggish {
    type Solver = SluggishSolver;

    fn name(&self) -> &str {
        "sluggish"
    }

    fn create(&self, timeout: Option<Duration>) -> SluggishSolver {
        let cap = Duration::from_secs(2);
        SluggishSolver {
            timeout: timeout.map_or(cap, |t| t.min(cap)),
        }
    }
}
