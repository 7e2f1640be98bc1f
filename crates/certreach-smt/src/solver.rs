use std::collections::HashMap;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Result of a satisfiability check.
#[derive(Debug, Clone, PartialEq)]
pub enum SatResult {
    Sat,
    Unsat,
    /// Undecided. The reason distinguishes timeouts, cancellation, budget
    /// exhaustion and delta-satisfiable boxes that could not be confirmed.
    Unknown(String),
}

/// A model (variable assignments) extracted from a SAT result.
#[derive(Debug, Clone, Default)]
pub struct Model {
    pub values: HashMap<String, ModelValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ModelValue {
    Real(f64),
    Bool(bool),
}

impl Model {
    pub fn get_real(&self, name: &str) -> Option<f64> {
        match self.values.get(name) {
            Some(ModelValue::Real(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn get_bool(&self, name: &str) -> Option<bool> {
        match self.values.get(name) {
            Some(ModelValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// Collect real values for `names` in order, or `None` if any is missing.
    pub fn reals(&self, names: &[String]) -> Option<Vec<f64>> {
        names.iter().map(|n| self.get_real(n)).collect()
    }
}

/// Abstract SMT solver interface.
pub trait SmtSolver {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Declare a new variable.
    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Self::Error>;

    /// Declare a real variable ranging over `[lo, hi]`.
    ///
    /// Backends with native box domains override this; the default asserts
    /// the bounds as ordinary constraints.
    fn declare_bounded_var(&mut self, name: &str, lo: f64, hi: f64) -> Result<(), Self::Error> {
        self.declare_var(name, &SmtSort::Real)?;
        self.assert(&SmtTerm::var(name).within(lo, hi))
    }

    /// Assert a constraint.
    fn assert(&mut self, term: &SmtTerm) -> Result<(), Self::Error>;

    /// Push a new scope.
    fn push(&mut self) -> Result<(), Self::Error>;

    /// Pop a scope.
    fn pop(&mut self) -> Result<(), Self::Error>;

    /// Check satisfiability.
    fn check_sat(&mut self) -> Result<SatResult, Self::Error>;

    /// Check satisfiability and extract a model if SAT.
    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Self::Error>;

    /// Install a flag that aborts a running check with `Unknown("cancelled")`
    /// once set. Backends that cannot be interrupted ignore it.
    fn set_cancel_flag(&mut self, _flag: Arc<AtomicBool>) {}

    /// Reset the solver state.
    fn reset(&mut self) -> Result<(), Self::Error>;
}
