use certreach_smt::solver::Model;
use serde::{Deserialize, Serialize};

/// Which condition a counterexample violates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    InteriorPde,
    BoundaryCondition,
}

impl std::fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationKind::InteriorPde => f.write_str("interior PDE"),
            ViolationKind::BoundaryCondition => f.write_str("boundary condition"),
        }
    }
}

/// A concrete input `[t, x]` where the residual exceeds epsilon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Counterexample {
    pub point: Vec<f64>,
    pub kind: ViolationKind,
    /// Signed residual at `point`: `R` for interior violations, `V - l`
    /// for boundary ones.
    pub margin: f64,
    /// Query clause that produced the witness.
    pub clause: String,
}

impl Counterexample {
    pub fn time(&self) -> f64 {
        self.point[0]
    }

    pub fn state(&self) -> &[f64] {
        &self.point[1..]
    }
}

/// Read the witness input from a solver model, in `names` order.
pub fn extract_point(model: &Model, names: &[String]) -> Option<Vec<f64>> {
    model.reals(names)
}
