//! Verification queries: one existence question per (clause, sub-box).
//!
//! Each query asks whether some input in its region violates one clause of
//! the residual condition by more than epsilon. The certificate holds on
//! the whole domain exactly when every query is unsatisfiable.

use std::fmt;

use certreach_ir::certificate::Certificate;
use certreach_ir::config::MinWith;
use certreach_ir::domain::DomainBox;
use certreach_ir::dynamics::Dynamics;
use certreach_smt::terms::SmtTerm;

use crate::counterexample::ViolationKind;
use crate::residual::{residual_terms, ResidualSettings, ResidualTerms};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Clause {
    /// `R < -eps`.
    DerivativeLow,
    /// `R > eps`.
    DerivativeHigh,
    /// `t = 0` and `V - l > eps`.
    BoundaryHigh,
    /// `t = 0` and `V - l < -eps`.
    BoundaryLow,
    /// `dV/dt + H < -eps` and `V - l < -eps`.
    TargetLow,
    /// `dV/dt + H > eps`.
    TargetPdeHigh,
    /// `V - l > eps`.
    TargetValueHigh,
}

const PLAIN_CLAUSES: [Clause; 4] = [
    Clause::DerivativeLow,
    Clause::DerivativeHigh,
    Clause::BoundaryHigh,
    Clause::BoundaryLow,
];

const TARGET_CLAUSES: [Clause; 4] = [
    Clause::TargetLow,
    Clause::TargetPdeHigh,
    Clause::TargetValueHigh,
    Clause::BoundaryLow,
];

impl Clause {
    /// Clauses whose joint unsatisfiability certifies the residual bound.
    pub fn catalogue(min_with: MinWith) -> &'static [Clause] {
        match min_with {
            MinWith::None => &PLAIN_CLAUSES,
            MinWith::Target => &TARGET_CLAUSES,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Clause::DerivativeLow => "derivative_low",
            Clause::DerivativeHigh => "derivative_high",
            Clause::BoundaryHigh => "boundary_high",
            Clause::BoundaryLow => "boundary_low",
            Clause::TargetLow => "target_low",
            Clause::TargetPdeHigh => "target_pde_high",
            Clause::TargetValueHigh => "target_value_high",
        }
    }

    /// Restricted to the `t = 0` slice.
    pub fn is_initial_slice(self) -> bool {
        matches!(self, Clause::BoundaryHigh | Clause::BoundaryLow)
    }

    pub fn violation_kind(self) -> ViolationKind {
        if self.is_initial_slice() {
            ViolationKind::BoundaryCondition
        } else {
            ViolationKind::InteriorPde
        }
    }

    /// The violation formula over symbolic residual terms.
    pub fn condition(self, terms: &ResidualTerms<SmtTerm>, epsilon: f64) -> SmtTerm {
        let eps = SmtTerm::real(epsilon);
        let neg_eps = SmtTerm::real(-epsilon);
        match self {
            Clause::DerivativeLow => terms.combined.clone().lt(neg_eps),
            Clause::DerivativeHigh => terms.combined.clone().gt(eps),
            Clause::BoundaryHigh | Clause::TargetValueHigh => terms.value_gap().gt(eps),
            Clause::BoundaryLow => terms.value_gap().lt(neg_eps),
            Clause::TargetLow => SmtTerm::and(vec![
                terms.pde.clone().lt(neg_eps.clone()),
                terms.value_gap().lt(neg_eps),
            ]),
            Clause::TargetPdeHigh => terms.pde.clone().gt(eps),
        }
    }

    /// Signed residual this clause bounds, evaluated numerically: `V - l` for
    /// boundary clauses, `R` otherwise.
    pub fn margin(self, terms: &ResidualTerms<f64>) -> f64 {
        if self.is_initial_slice() {
            terms.value - terms.boundary
        } else {
            terms.combined
        }
    }
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A `[t_lo, t_hi] x box` region of the input space.
#[derive(Debug, Clone, PartialEq)]
pub struct Region {
    pub time: (f64, f64),
    pub state: DomainBox,
}

/// Time slices times state partitions.
pub fn partition_regions(
    domain: &DomainBox,
    time_horizon: f64,
    time_subdivisions: usize,
    state_splits: usize,
) -> Vec<Region> {
    let slices = time_subdivisions.max(1);
    let step = time_horizon / slices as f64;
    let boxes = domain.partition(state_splits);
    let mut regions = Vec::with_capacity(slices * boxes.len());
    for k in 0..slices {
        let lo = step * k as f64;
        let hi = if k + 1 == slices {
            time_horizon
        } else {
            step * (k + 1) as f64
        };
        for b in &boxes {
            regions.push(Region {
                time: (lo, hi),
                state: b.clone(),
            });
        }
    }
    regions
}

/// One self-contained solver question.
#[derive(Debug, Clone)]
pub struct Query {
    pub id: usize,
    pub clause: Clause,
    pub region: Region,
    /// Declared variables with their bounds, in witness order.
    pub variables: Vec<(String, f64, f64)>,
    pub formula: SmtTerm,
}

impl Query {
    /// Witness input `[t, x]` from values of [`Query::variables`]. Queries
    /// without a time variable take the start of their time range.
    pub fn input_from(&self, values: &[f64]) -> Vec<f64> {
        if self.has_time_var() {
            values.to_vec()
        } else {
            std::iter::once(self.region.time.0)
                .chain(values.iter().copied())
                .collect()
        }
    }

    pub fn has_time_var(&self) -> bool {
        self.variables.first().is_some_and(|(name, _, _)| *name == time_var())
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|(n, _, _)| n.clone()).collect()
    }
}

pub fn time_var() -> String {
    "t".to_string()
}

pub fn state_var(i: usize) -> String {
    format!("x{}", i + 1)
}

/// Build every query for `cert` over the given regions.
///
/// Interior clauses get one query per region; boundary clauses one per
/// distinct state box, on the `t = 0` slice. A stationary certificate has
/// no time input, so its interior clauses also get one query per state box,
/// covering the whole time range.
pub fn build_queries<D: Dynamics>(
    dynamics: &D,
    cert: &Certificate,
    settings: ResidualSettings,
    epsilon: f64,
    regions: &[Region],
) -> Vec<Query> {
    let n = dynamics.state_dim();
    let params: Vec<SmtTerm> = cert.params.iter().map(|&p| SmtTerm::real(p)).collect();
    let states: Vec<SmtTerm> = (0..n).map(|i| SmtTerm::var(state_var(i))).collect();

    let (interior_input, initial_input) = if cert.time_varying {
        let with_time = |t: SmtTerm| -> Vec<SmtTerm> {
            std::iter::once(t).chain(states.iter().cloned()).collect()
        };
        (with_time(SmtTerm::var(time_var())), with_time(SmtTerm::real(0.0)))
    } else {
        (states.clone(), states.clone())
    };
    let interior = residual_terms(dynamics, cert, &params, &interior_input, settings);
    let initial = residual_terms(dynamics, cert, &params, &initial_input, settings);

    let mut state_boxes: Vec<&DomainBox> = Vec::new();
    for r in regions {
        if !state_boxes.contains(&&r.state) {
            state_boxes.push(&r.state);
        }
    }
    let time_span = regions.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |acc, r| {
        (acc.0.min(r.time.0), acc.1.max(r.time.1))
    });

    let state_bounds = |b: &DomainBox| -> Vec<(String, f64, f64)> {
        (0..n)
            .map(|i| (state_var(i), b.lower[i], b.upper[i]))
            .collect()
    };

    let mut queries = Vec::new();
    for &clause in Clause::catalogue(settings.min_with) {
        if clause.is_initial_slice() {
            let formula = clause.condition(&initial, epsilon);
            for b in &state_boxes {
                queries.push(Query {
                    id: queries.len(),
                    clause,
                    region: Region {
                        time: (0.0, 0.0),
                        state: (*b).clone(),
                    },
                    variables: state_bounds(b),
                    formula: formula.clone(),
                });
            }
        } else if cert.time_varying {
            let formula = clause.condition(&interior, epsilon);
            for r in regions {
                let mut variables = vec![(time_var(), r.time.0, r.time.1)];
                variables.extend(state_bounds(&r.state));
                queries.push(Query {
                    id: queries.len(),
                    clause,
                    region: r.clone(),
                    variables,
                    formula: formula.clone(),
                });
            }
        } else {
            let formula = clause.condition(&interior, epsilon);
            for b in &state_boxes {
                queries.push(Query {
                    id: queries.len(),
                    clause,
                    region: Region {
                        time: time_span,
                        state: (*b).clone(),
                    },
                    variables: state_bounds(b),
                    formula: formula.clone(),
                });
            }
        }
    }
    queries
}
