use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use z3::ast::{Ast, Bool, Int, Real};
use z3::SatResult as Z3SatResult;

use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

#[derive(Debug, Error)]
pub enum Z3Error {
    #[error("Z3 error: {0}")]
    Internal(String),
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Function not supported by the Z3 backend: {0}")]
    Unsupported(&'static str),
}

pub struct Z3Solver {
    solver: z3::Solver,
    real_vars: HashMap<String, Real>,
    bool_vars: HashMap<String, Bool>,
    _params: Option<z3::Params>,
}

/// Exact-enough rational for a finite literal: denominator is a power of ten.
fn decimal_rational(v: f64) -> (i64, i64) {
    let mut den: i64 = 1;
    while den < 1_000_000_000_000_000 {
        let scaled = v * den as f64;
        if scaled.fract() == 0.0 || (scaled * 10.0).abs() >= 9.0e18 {
            break;
        }
        den *= 10;
    }
    ((v * den as f64).round() as i64, den)
}

impl Z3Solver {
    pub fn new() -> Self {
        Self {
            solver: z3::Solver::new(),
            real_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            _params: None,
        }
    }

    pub fn with_timeout_secs(timeout_secs: u64) -> Self {
        if timeout_secs == 0 {
            return Self::new();
        }
        let solver = z3::Solver::new();
        let mut params = z3::Params::new();
        let timeout_ms = timeout_secs.saturating_mul(1000);
        params.set_u32("timeout", timeout_ms as u32);
        solver.set_params(&params);
        Self {
            solver,
            real_vars: HashMap::new(),
            bool_vars: HashMap::new(),
            _params: Some(params),
        }
    }

    fn literal(v: f64) -> Result<Real, Z3Error> {
        if !v.is_finite() {
            return Err(Z3Error::Internal(format!("non-finite literal {v}")));
        }
        let (num, den) = decimal_rational(v);
        let num = Real::from_int(&Int::from_i64(num));
        Ok(if den == 1 {
            num
        } else {
            num / Real::from_int(&Int::from_i64(den))
        })
    }

    fn real(&self, term: &Arc<SmtTerm>, memo: &mut HashMap<usize, Real>) -> Result<Real, Z3Error> {
        let key = Arc::as_ptr(term) as usize;
        if let Some(r) = memo.get(&key) {
            return Ok(r.clone());
        }
        let r = self.translate_real(term, memo)?;
        memo.insert(key, r.clone());
        Ok(r)
    }

    fn translate_real(
        &self,
        term: &SmtTerm,
        memo: &mut HashMap<usize, Real>,
    ) -> Result<Real, Z3Error> {
        match term {
            SmtTerm::Var(name) => self
                .real_vars
                .get(name)
                .cloned()
                .ok_or_else(|| Z3Error::UnknownVariable(name.clone())),
            SmtTerm::RealLit(v) => Self::literal(*v),
            SmtTerm::Add(lhs, rhs) => Ok(self.real(lhs, memo)? + self.real(rhs, memo)?),
            SmtTerm::Sub(lhs, rhs) => Ok(self.real(lhs, memo)? - self.real(rhs, memo)?),
            SmtTerm::Mul(lhs, rhs) => Ok(self.real(lhs, memo)? * self.real(rhs, memo)?),
            SmtTerm::Neg(inner) => Ok(self.real(inner, memo)?.unary_minus()),
            SmtTerm::Pow(base, n) => {
                let b = self.real(base, memo)?;
                let mut acc = Self::literal(1.0)?;
                for _ in 0..*n {
                    acc = acc * b.clone();
                }
                Ok(acc)
            }
            SmtTerm::Abs(inner) => {
                let x = self.real(inner, memo)?;
                let zero = Self::literal(0.0)?;
                Ok(x.ge(&zero).ite(&x, &x.unary_minus()))
            }
            SmtTerm::Max(lhs, rhs) => {
                let (l, r) = (self.real(lhs, memo)?, self.real(rhs, memo)?);
                Ok(l.ge(&r).ite(&l, &r))
            }
            SmtTerm::Min(lhs, rhs) => {
                let (l, r) = (self.real(lhs, memo)?, self.real(rhs, memo)?);
                Ok(l.le(&r).ite(&l, &r))
            }
            SmtTerm::Ite(cond, then, els) => {
                let c = self.translate_bool(cond, memo)?;
                Ok(c.ite(&self.real(then, memo)?, &self.real(els, memo)?))
            }
            SmtTerm::Sqrt(_) => Err(Z3Error::Unsupported("sqrt")),
            SmtTerm::Tanh(_) => Err(Z3Error::Unsupported("tanh")),
            SmtTerm::Sin(_) => Err(Z3Error::Unsupported("sin")),
            SmtTerm::Cos(_) => Err(Z3Error::Unsupported("cos")),
            SmtTerm::Exp(_) => Err(Z3Error::Unsupported("exp")),
            _ => Err(Z3Error::Internal("Expected Real, got Bool".into())),
        }
    }

    fn translate_bool(
        &self,
        term: &SmtTerm,
        memo: &mut HashMap<usize, Real>,
    ) -> Result<Bool, Z3Error> {
        match term {
            SmtTerm::Var(name) => self
                .bool_vars
                .get(name)
                .cloned()
                .ok_or_else(|| Z3Error::UnknownVariable(name.clone())),
            SmtTerm::BoolLit(b) => Ok(Bool::from_bool(*b)),
            SmtTerm::Eq(lhs, rhs) => Ok(self.real(lhs, memo)?._eq(&self.real(rhs, memo)?)),
            SmtTerm::Lt(lhs, rhs) => Ok(self.real(lhs, memo)?.lt(&self.real(rhs, memo)?)),
            SmtTerm::Le(lhs, rhs) => Ok(self.real(lhs, memo)?.le(&self.real(rhs, memo)?)),
            SmtTerm::Gt(lhs, rhs) => Ok(self.real(lhs, memo)?.gt(&self.real(rhs, memo)?)),
            SmtTerm::Ge(lhs, rhs) => Ok(self.real(lhs, memo)?.ge(&self.real(rhs, memo)?)),
            SmtTerm::And(terms) => {
                let bools = terms
                    .iter()
                    .map(|t| self.translate_bool(t, memo))
                    .collect::<Result<Vec<_>, _>>()?;
                let refs: Vec<&Bool> = bools.iter().collect();
                Ok(Bool::and(&refs))
            }
            SmtTerm::Or(terms) => {
                let bools = terms
                    .iter()
                    .map(|t| self.translate_bool(t, memo))
                    .collect::<Result<Vec<_>, _>>()?;
                let refs: Vec<&Bool> = bools.iter().collect();
                Ok(Bool::or(&refs))
            }
            SmtTerm::Not(inner) => Ok(self.translate_bool(inner, memo)?.not()),
            SmtTerm::Implies(lhs, rhs) => {
                let l = self.translate_bool(lhs, memo)?;
                Ok(l.implies(&self.translate_bool(rhs, memo)?))
            }
            SmtTerm::Ite(cond, then, els) => {
                let c = self.translate_bool(cond, memo)?;
                let t = self.translate_bool(then, memo)?;
                Ok(c.ite(&t, &self.translate_bool(els, memo)?))
            }
            _ => Err(Z3Error::Internal("Expected Bool, got Real".into())),
        }
    }
}

impl Default for Z3Solver {
    fn default() -> Self {
        Self::new()
    }
}

impl SmtSolver for Z3Solver {
    type Error = Z3Error;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), Z3Error> {
        match sort {
            SmtSort::Real => {
                self.real_vars
                    .insert(name.to_string(), Real::new_const(name));
            }
            SmtSort::Bool => {
                self.bool_vars
                    .insert(name.to_string(), Bool::new_const(name));
            }
        }
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), Z3Error> {
        let mut memo = HashMap::new();
        let z3_term = self.translate_bool(term, &mut memo)?;
        self.solver.assert(&z3_term);
        Ok(())
    }

    fn push(&mut self) -> Result<(), Z3Error> {
        self.solver.push();
        Ok(())
    }

    fn pop(&mut self) -> Result<(), Z3Error> {
        self.solver.pop(1);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, Z3Error> {
        match self.solver.check() {
            Z3SatResult::Sat => Ok(SatResult::Sat),
            Z3SatResult::Unsat => Ok(SatResult::Unsat),
            Z3SatResult::Unknown => Ok(SatResult::Unknown("Z3 returned unknown".into())),
        }
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), Z3Error> {
        let result = self.check_sat()?;
        if result != SatResult::Sat {
            return Ok((result, None));
        }
        let z3_model = self
            .solver
            .get_model()
            .ok_or_else(|| Z3Error::Internal("SAT but no model available".into()))?;
        let mut values = HashMap::new();
        for &(name, sort) in var_names {
            match sort {
                SmtSort::Real => {
                    let v = self
                        .real_vars
                        .get(name)
                        .ok_or_else(|| Z3Error::UnknownVariable(name.to_string()))?;
                    if let Some((num, den)) = z3_model.eval(v, true).and_then(|val| val.as_real())
                    {
                        values.insert(name.to_string(), ModelValue::Real(num as f64 / den as f64));
                    }
                }
                SmtSort::Bool => {
                    let v = self
                        .bool_vars
                        .get(name)
                        .ok_or_else(|| Z3Error::UnknownVariable(name.to_string()))?;
                    if let Some(b) = z3_model.eval(v, true).and_then(|val| val.as_bool()) {
                        values.insert(name.to_string(), ModelValue::Bool(b));
                    }
                }
            }
        }
        Ok((SatResult::Sat, Some(Model { values })))
    }

    fn reset(&mut self) -> Result<(), Z3Error> {
        self.solver.reset();
        // Z3 may drop per-solver parameters on reset; reapply timeout if configured.
        if let Some(params) = &self._params {
            self.solver.set_params(params);
        }
        self.real_vars.clear();
        self.bool_vars.clear();
        Ok(())
    }
}
