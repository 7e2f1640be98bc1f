//! Fixtures shared by the unit tests.

use std::convert::Infallible;
use std::time::Duration;

use certreach_ir::domain::DomainBox;
use certreach_ir::dynamics::Dynamics;
use certreach_ir::scalar::Scalar;
use certreach_smt::solver::{Model, ModelValue, SatResult, SmtSolver};
use certreach_smt::sorts::SmtSort;
use certreach_smt::terms::SmtTerm;

use crate::backend::SolverFactory;

/// `x' = 0` on `[-1, 1]` with target `x <= 0`; `V(t, x) = x` is exact.
pub(crate) struct Still;

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

/// [`Still`] with a drift that is NaN within `1e-6` of `x = 0.9` and zero
/// elsewhere. Symbolically the drift folds to zero.
pub(crate) struct Pinhole;

impl Dynamics for Pinhole {
    fn name(&self) -> &str {
        "pinhole"
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
        let offset = x[0].clone() - x[0].constant(0.9);
        let hole = (offset.square() - x[0].constant(1e-12)).sqrt();
        vec![hole.scale(0.0)]
    }

    fn control_gain<S: Scalar>(&self, _x: &[S]) -> Vec<Vec<S>> {
        Vec::new()
    }

    fn target_membership<S: Scalar>(&self, x: &[S]) -> S {
        x[0].clone()
    }
}

/// Answers every query the same way, reporting `witness` for each
/// declared variable on sat.
pub(crate) struct Fixed {
    pub answer: SatResult,
    pub witness: f64,
}

impl Fixed {
    pub fn unknown() -> Self {
        Self {
            answer: SatResult::Unknown("timeout".into()),
            witness: 0.0,
        }
    }

    pub fn sat(witness: f64) -> Self {
        Self {
            answer: SatResult::Sat,
            witness,
        }
    }
}

pub(crate) struct FixedSolver {
    answer: SatResult,
    witness: f64,
    declared: Vec<String>,
}

impl SmtSolver for FixedSolver {
    type Error = Infallible;

    fn declare_var(&mut self, name: &str, _sort: &SmtSort) -> Result<(), Infallible> {
        self.declared.push(name.to_string());
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
        Ok(self.answer.clone())
    }

    fn check_sat_with_model(
        &mut self,
        _var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Infallible> {
        let model = (self.answer == SatResult::Sat).then(|| {
            let mut m = Model::default();
            for name in &self.declared {
                m.values.insert(name.clone(), ModelValue::Real(self.witness));
            }
            m
        });
        Ok((self.answer.clone(), model))
    }

    fn reset(&mut self) -> Result<(), Infallible> {
        self.declared.clear();
        Ok(())
    }
}

impl SolverFactory for Fixed {
    type Solver = FixedSolver;

    fn name(&self) -> &str {
        "fixed"
    }

    fn create(&self, _timeout: Option<Duration>) -> FixedSolver {
        FixedSolver {
            answer: self.answer.clone(),
            witness: self.witness,
            declared: Vec::new(),
        }
    }
}
