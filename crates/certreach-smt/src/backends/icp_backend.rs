//! Branch-and-prune interval constraint propagation solver.
//!
//! Assertions are compiled into a flat, topologically ordered program of
//! real-valued operations. Each box of the search is first contracted with
//! forward/backward (HC4) propagation over the top-level conjunctive atoms,
//! then classified with three-valued interval evaluation. Boxes that stay
//! undecided are bisected along their widest used axis until either a
//! midpoint satisfies every assertion in floating point (SAT), the box is
//! refuted (pruned), or the undecided enclosures shrink below `delta`.
//!
//! `Unsat` is only reported when every box was refuted by outward-rounded
//! interval arithmetic. Boxes that only reached the delta floor make the
//! answer `Unknown("delta-sat ...")`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use thiserror::Error;
use tracing::debug;

use crate::interval::Interval;
use crate::solver::{Model, ModelValue, SatResult, SmtSolver};
use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

const CONTRACTION_ROUNDS: usize = 4;

#[derive(Debug, Error)]
pub enum IcpError {
    #[error("unknown variable `{0}`")]
    UnknownVariable(String),
    #[error("variable `{0}` declared twice")]
    DuplicateVariable(String),
    #[error("unsupported term for interval solving: {0}")]
    Unsupported(String),
    #[error("pop without matching push")]
    ScopeUnderflow,
}

/// Search limits for [`IcpSolver`].
#[derive(Debug, Clone, PartialEq)]
pub struct IcpConfig {
    /// Undecided enclosures narrower than this end the refinement of a box.
    pub delta: f64,
    /// Maximum number of boxes examined by one `check_sat`.
    pub max_boxes: usize,
    /// Wall-clock limit for one `check_sat`.
    pub timeout: Option<Duration>,
    /// Boxes are never bisected below this width.
    pub min_width: f64,
}

impl Default for IcpConfig {
    fn default() -> Self {
        Self {
            delta: 1e-3,
            max_boxes: 200_000,
            timeout: None,
            min_width: 1e-9,
        }
    }
}

/// Counters from the most recent `check_sat`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IcpStats {
    pub boxes_explored: usize,
    pub boxes_pruned: usize,
    pub delta_boxes: usize,
}

pub struct IcpSolver {
    config: IcpConfig,
    domains: IndexMap<String, Interval>,
    assertions: Vec<SmtTerm>,
    scopes: Vec<(usize, usize)>,
    cancel: Option<Arc<AtomicBool>>,
    witness: Option<Vec<f64>>,
    stats: IcpStats,
}

impl IcpSolver {
    pub fn new(config: IcpConfig) -> Self {
        Self {
            config,
            domains: IndexMap::new(),
            assertions: Vec::new(),
            scopes: Vec::new(),
            cancel: None,
            witness: None,
            stats: IcpStats::default(),
        }
    }

    pub fn config(&self) -> &IcpConfig {
        &self.config
    }

    pub fn stats(&self) -> IcpStats {
        self.stats
    }

    /// The satisfying point found by the last `Sat` answer, in declaration order.
    pub fn witness(&self) -> Option<&[f64]> {
        self.witness.as_deref()
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    fn search(&mut self, program: &Program) -> SatResult {
        let deadline = self.config.timeout.map(|t| Instant::now() + t);
        let mut stack = vec![self.domains.values().copied().collect::<Vec<_>>()];
        let mut vals = Vec::with_capacity(program.ops.len());
        let mut point_vals = Vec::with_capacity(program.ops.len());

        while let Some(mut bx) = stack.pop() {
            if self.cancelled() {
                return SatResult::Unknown("cancelled".into());
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return SatResult::Unknown("timeout".into());
            }
            if self.stats.boxes_explored >= self.config.max_boxes {
                return SatResult::Unknown(format!(
                    "box budget of {} exhausted",
                    self.config.max_boxes
                ));
            }
            self.stats.boxes_explored += 1;

            if !program.contract(&mut bx, &mut vals) {
                self.stats.boxes_pruned += 1;
                continue;
            }
            program.forward(&bx, &mut vals);
            let mut undecided = 0.0f64;
            match program.truth(&program.formula, &vals, &mut undecided) {
                Truth::False => {
                    self.stats.boxes_pruned += 1;
                    continue;
                }
                Truth::True => {
                    self.witness = Some(bx.iter().map(Interval::mid).collect());
                    return SatResult::Sat;
                }
                Truth::Unknown => {}
            }

            let mid: Vec<f64> = bx.iter().map(Interval::mid).collect();
            if program.point_holds(&mid, &mut point_vals) {
                self.witness = Some(mid);
                return SatResult::Sat;
            }

            let axis = program.split_axis(&bx, self.config.min_width);
            match axis {
                Some(k) if undecided > self.config.delta => {
                    let m = bx[k].mid();
                    let mut upper = bx.clone();
                    upper[k].lo = m;
                    bx[k].hi = m;
                    stack.push(upper);
                    stack.push(bx);
                }
                _ => self.stats.delta_boxes += 1,
            }
        }

        if self.stats.delta_boxes > 0 {
            SatResult::Unknown(format!(
                "delta-sat: {} boxes undecided within delta {}",
                self.stats.delta_boxes, self.config.delta
            ))
        } else {
            SatResult::Unsat
        }
    }
}

impl Default for IcpSolver {
    fn default() -> Self {
        Self::new(IcpConfig::default())
    }
}

impl SmtSolver for IcpSolver {
    type Error = IcpError;

    fn declare_var(&mut self, name: &str, sort: &SmtSort) -> Result<(), IcpError> {
        if *sort != SmtSort::Real {
            return Err(IcpError::Unsupported(format!(
                "variable `{name}` of sort {sort}"
            )));
        }
        if self.domains.contains_key(name) {
            return Err(IcpError::DuplicateVariable(name.to_string()));
        }
        self.domains.insert(name.to_string(), Interval::entire());
        Ok(())
    }

    fn declare_bounded_var(&mut self, name: &str, lo: f64, hi: f64) -> Result<(), IcpError> {
        self.declare_var(name, &SmtSort::Real)?;
        self.domains.insert(name.to_string(), Interval::new(lo, hi));
        Ok(())
    }

    fn assert(&mut self, term: &SmtTerm) -> Result<(), IcpError> {
        self.assertions.push(term.clone());
        Ok(())
    }

    fn push(&mut self) -> Result<(), IcpError> {
        self.scopes.push((self.domains.len(), self.assertions.len()));
        Ok(())
    }

    fn pop(&mut self) -> Result<(), IcpError> {
        let (vars, assertions) = self.scopes.pop().ok_or(IcpError::ScopeUnderflow)?;
        self.domains.truncate(vars);
        self.assertions.truncate(assertions);
        Ok(())
    }

    fn check_sat(&mut self) -> Result<SatResult, IcpError> {
        self.witness = None;
        self.stats = IcpStats::default();
        let program = Program::compile(&self.domains, &self.assertions)?;
        let started = Instant::now();
        let result = self.search(&program);
        debug!(
            result = ?result,
            explored = self.stats.boxes_explored,
            pruned = self.stats.boxes_pruned,
            delta_boxes = self.stats.delta_boxes,
            ops = program.ops.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ICP search finished"
        );
        Ok(result)
    }

    fn check_sat_with_model(
        &mut self,
        var_names: &[(&str, &SmtSort)],
    ) -> Result<(SatResult, Option<Model>), IcpError> {
        let result = self.check_sat()?;
        let Some(point) = self.witness.as_ref().filter(|_| result == SatResult::Sat) else {
            return Ok((result, None));
        };
        let mut values = HashMap::new();
        for &(name, _) in var_names {
            let idx = self
                .domains
                .get_index_of(name)
                .ok_or_else(|| IcpError::UnknownVariable(name.to_string()))?;
            values.insert(name.to_string(), ModelValue::Real(point[idx]));
        }
        Ok((result, Some(Model { values })))
    }

    fn set_cancel_flag(&mut self, flag: Arc<AtomicBool>) {
        self.cancel = Some(flag);
    }

    fn reset(&mut self) -> Result<(), IcpError> {
        self.domains.clear();
        self.assertions.clear();
        self.scopes.clear();
        self.witness = None;
        self.stats = IcpStats::default();
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Var(usize),
    Const(f64),
    Add(usize, usize),
    Sub(usize, usize),
    Mul(usize, usize),
    Neg(usize),
    Pow(usize, u32),
    Sqrt(usize),
    Abs(usize),
    Tanh(usize),
    Sin(usize),
    Cos(usize),
    Exp(usize),
    Max(usize, usize),
    Min(usize, usize),
}

/// Comparison of a compiled node against zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rel {
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
}

impl Rel {
    fn feasible(self) -> Interval {
        match self {
            Rel::Lt | Rel::Le => Interval::new(f64::NEG_INFINITY, 0.0),
            Rel::Gt | Rel::Ge => Interval::new(0.0, f64::INFINITY),
            Rel::Eq => Interval::point(0.0),
        }
    }

    fn truth(self, v: &Interval) -> Truth {
        let (t, f) = match self {
            Rel::Lt => (v.hi < 0.0, v.lo >= 0.0),
            Rel::Le => (v.hi <= 0.0, v.lo > 0.0),
            Rel::Gt => (v.lo > 0.0, v.hi <= 0.0),
            Rel::Ge => (v.lo >= 0.0, v.hi < 0.0),
            Rel::Eq => (v.lo == 0.0 && v.hi == 0.0, v.lo > 0.0 || v.hi < 0.0),
        };
        if v.is_empty() || f {
            Truth::False
        } else if t {
            Truth::True
        } else {
            Truth::Unknown
        }
    }

    fn holds(self, v: f64) -> bool {
        match self {
            Rel::Lt => v < 0.0,
            Rel::Le => v <= 0.0,
            Rel::Gt => v > 0.0,
            Rel::Ge => v >= 0.0,
            Rel::Eq => v == 0.0,
        }
    }
}

#[derive(Debug, Clone)]
enum Formula {
    Const(bool),
    Atom(usize, Rel),
    And(Vec<Formula>),
    Or(Vec<Formula>),
    Not(Box<Formula>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Truth {
    True,
    False,
    Unknown,
}

struct Program {
    ops: Vec<Op>,
    formula: Formula,
    /// Atoms that must hold in every model; used for contraction.
    conjuncts: Vec<(usize, Rel)>,
    /// Declared variables referenced by some assertion.
    used: Vec<bool>,
}

impl Program {
    fn compile(
        domains: &IndexMap<String, Interval>,
        assertions: &[SmtTerm],
    ) -> Result<Self, IcpError> {
        let mut compiler = Compiler {
            domains,
            ops: Vec::new(),
            memo: HashMap::new(),
            var_nodes: HashMap::new(),
        };
        let parts = assertions
            .iter()
            .map(|a| compiler.formula(a))
            .collect::<Result<Vec<_>, _>>()?;
        let formula = Formula::And(parts);
        let mut conjuncts = Vec::new();
        collect_conjuncts(&formula, &mut conjuncts);
        let mut used = vec![false; domains.len()];
        for k in compiler.var_nodes.keys() {
            used[*k] = true;
        }
        Ok(Self {
            ops: compiler.ops,
            formula,
            conjuncts,
            used,
        })
    }

    fn forward(&self, bx: &[Interval], vals: &mut Vec<Interval>) {
        vals.clear();
        for op in &self.ops {
            let v = match *op {
                Op::Var(k) => bx[k],
                Op::Const(c) => Interval::point(c),
                Op::Add(a, b) => vals[a].add(&vals[b]),
                Op::Sub(a, b) => vals[a].sub(&vals[b]),
                Op::Mul(a, b) => vals[a].mul(&vals[b]),
                Op::Neg(a) => vals[a].neg(),
                Op::Pow(a, n) => vals[a].powi(n),
                Op::Sqrt(a) => vals[a].sqrt(),
                Op::Abs(a) => vals[a].abs(),
                Op::Tanh(a) => vals[a].tanh(),
                Op::Sin(a) => vals[a].sin(),
                Op::Cos(a) => vals[a].cos(),
                Op::Exp(a) => vals[a].exp(),
                Op::Max(a, b) => vals[a].max(&vals[b]),
                Op::Min(a, b) => vals[a].min(&vals[b]),
            };
            vals.push(v);
        }
    }

    /// Narrow children from parent enclosures in reverse topological order.
    /// Returns `false` once any enclosure becomes empty.
    fn backward(&self, vals: &mut [Interval], bx: &mut [Interval]) -> bool {
        for i in (0..self.ops.len()).rev() {
            let v = vals[i];
            if v.is_empty() {
                return false;
            }
            match self.ops[i] {
                Op::Var(k) => {
                    bx[k] = bx[k].intersect(&v);
                    if bx[k].is_empty() {
                        return false;
                    }
                }
                Op::Const(_) => {}
                Op::Add(a, b) => {
                    let by = v.sub(&vals[b]);
                    narrow(vals, a, by);
                    let by = v.sub(&vals[a]);
                    narrow(vals, b, by);
                }
                Op::Sub(a, b) => {
                    let by = v.add(&vals[b]);
                    narrow(vals, a, by);
                    let by = vals[a].sub(&v);
                    narrow(vals, b, by);
                }
                Op::Mul(a, b) => {
                    let by = v.div(&vals[b]);
                    narrow(vals, a, by);
                    let by = v.div(&vals[a]);
                    narrow(vals, b, by);
                }
                Op::Neg(a) => narrow(vals, a, v.neg()),
                Op::Pow(a, n) => vals[a] = v.nth_root_within(n, &vals[a]),
                Op::Sqrt(a) => {
                    let nonneg = v.intersect(&Interval::new(0.0, f64::INFINITY));
                    narrow(vals, a, nonneg.powi(2));
                }
                Op::Abs(a) => {
                    let mag = v.intersect(&Interval::new(0.0, f64::INFINITY));
                    let pos = vals[a].intersect(&mag);
                    let neg = vals[a].intersect(&mag.neg());
                    vals[a] = pos.hull(&neg);
                }
                Op::Tanh(a) => narrow(vals, a, v.atanh()),
                Op::Exp(a) => narrow(vals, a, v.ln()),
                Op::Sin(_) | Op::Cos(_) | Op::Max(_, _) | Op::Min(_, _) => {}
            }
        }
        true
    }

    fn contract(&self, bx: &mut [Interval], vals: &mut Vec<Interval>) -> bool {
        if self.conjuncts.is_empty() {
            return true;
        }
        for _ in 0..CONTRACTION_ROUNDS {
            let before: f64 = bx.iter().map(Interval::width).sum();
            self.forward(bx, vals);
            for &(node, rel) in &self.conjuncts {
                vals[node] = vals[node].intersect(&rel.feasible());
            }
            if !self.backward(vals, bx) {
                return false;
            }
            let after: f64 = bx.iter().map(Interval::width).sum();
            if !(after < 0.9 * before) {
                break;
            }
        }
        true
    }

    fn truth(&self, f: &Formula, vals: &[Interval], undecided: &mut f64) -> Truth {
        match f {
            Formula::Const(b) => {
                if *b {
                    Truth::True
                } else {
                    Truth::False
                }
            }
            Formula::Atom(node, rel) => {
                let t = rel.truth(&vals[*node]);
                if t == Truth::Unknown {
                    *undecided = undecided.max(vals[*node].width());
                }
                t
            }
            Formula::And(parts) => {
                let mut acc = Truth::True;
                for p in parts {
                    match self.truth(p, vals, undecided) {
                        Truth::False => return Truth::False,
                        Truth::Unknown => acc = Truth::Unknown,
                        Truth::True => {}
                    }
                }
                acc
            }
            Formula::Or(parts) => {
                let mut acc = Truth::False;
                for p in parts {
                    match self.truth(p, vals, undecided) {
                        Truth::True => return Truth::True,
                        Truth::Unknown => acc = Truth::Unknown,
                        Truth::False => {}
                    }
                }
                acc
            }
            Formula::Not(inner) => match self.truth(inner, vals, undecided) {
                Truth::True => Truth::False,
                Truth::False => Truth::True,
                Truth::Unknown => Truth::Unknown,
            },
        }
    }

    fn point_holds(&self, x: &[f64], vals: &mut Vec<f64>) -> bool {
        vals.clear();
        for op in &self.ops {
            let v = match *op {
                Op::Var(k) => x[k],
                Op::Const(c) => c,
                Op::Add(a, b) => vals[a] + vals[b],
                Op::Sub(a, b) => vals[a] - vals[b],
                Op::Mul(a, b) => vals[a] * vals[b],
                Op::Neg(a) => -vals[a],
                Op::Pow(a, n) => vals[a].powi(n as i32),
                Op::Sqrt(a) => vals[a].sqrt(),
                Op::Abs(a) => vals[a].abs(),
                Op::Tanh(a) => vals[a].tanh(),
                Op::Sin(a) => vals[a].sin(),
                Op::Cos(a) => vals[a].cos(),
                Op::Exp(a) => vals[a].exp(),
                Op::Max(a, b) => vals[a].max(vals[b]),
                Op::Min(a, b) => vals[a].min(vals[b]),
            };
            vals.push(v);
        }
        point_truth(&self.formula, vals)
    }

    fn split_axis(&self, bx: &[Interval], min_width: f64) -> Option<usize> {
        bx.iter()
            .enumerate()
            .filter(|(k, iv)| self.used[*k] && iv.width() > min_width)
            .max_by(|(_, a), (_, b)| a.width().total_cmp(&b.width()))
            .map(|(k, _)| k)
    }
}

fn narrow(vals: &mut [Interval], idx: usize, by: Interval) {
    vals[idx] = vals[idx].intersect(&by);
}

fn point_truth(f: &Formula, vals: &[f64]) -> bool {
    match f {
        Formula::Const(b) => *b,
        Formula::Atom(node, rel) => !vals[*node].is_nan() && rel.holds(vals[*node]),
        Formula::And(parts) => parts.iter().all(|p| point_truth(p, vals)),
        Formula::Or(parts) => parts.iter().any(|p| point_truth(p, vals)),
        Formula::Not(inner) => !point_truth(inner, vals),
    }
}

fn collect_conjuncts(f: &Formula, out: &mut Vec<(usize, Rel)>) {
    match f {
        Formula::Atom(node, rel) => out.push((*node, *rel)),
        Formula::And(parts) => parts.iter().for_each(|p| collect_conjuncts(p, out)),
        _ => {}
    }
}

struct Compiler<'a> {
    domains: &'a IndexMap<String, Interval>,
    ops: Vec<Op>,
    /// Shared operands, keyed by allocation address.
    memo: HashMap<usize, usize>,
    var_nodes: HashMap<usize, usize>,
}

impl Compiler<'_> {
    fn emit(&mut self, op: Op) -> usize {
        self.ops.push(op);
        self.ops.len() - 1
    }

    fn shared(&mut self, term: &Arc<SmtTerm>) -> Result<usize, IcpError> {
        let key = Arc::as_ptr(term) as usize;
        if let Some(&node) = self.memo.get(&key) {
            return Ok(node);
        }
        let node = self.real(term)?;
        self.memo.insert(key, node);
        Ok(node)
    }

    fn real(&mut self, term: &SmtTerm) -> Result<usize, IcpError> {
        let op = match term {
            SmtTerm::Var(name) => {
                let k = self
                    .domains
                    .get_index_of(name)
                    .ok_or_else(|| IcpError::UnknownVariable(name.clone()))?;
                if let Some(&node) = self.var_nodes.get(&k) {
                    return Ok(node);
                }
                let node = self.emit(Op::Var(k));
                self.var_nodes.insert(k, node);
                return Ok(node);
            }
            SmtTerm::RealLit(v) => Op::Const(*v),
            SmtTerm::Add(a, b) => Op::Add(self.shared(a)?, self.shared(b)?),
            SmtTerm::Sub(a, b) => Op::Sub(self.shared(a)?, self.shared(b)?),
            SmtTerm::Mul(a, b) => Op::Mul(self.shared(a)?, self.shared(b)?),
            SmtTerm::Neg(a) => Op::Neg(self.shared(a)?),
            SmtTerm::Pow(a, n) => Op::Pow(self.shared(a)?, *n),
            SmtTerm::Sqrt(a) => Op::Sqrt(self.shared(a)?),
            SmtTerm::Abs(a) => Op::Abs(self.shared(a)?),
            SmtTerm::Tanh(a) => Op::Tanh(self.shared(a)?),
            SmtTerm::Sin(a) => Op::Sin(self.shared(a)?),
            SmtTerm::Cos(a) => Op::Cos(self.shared(a)?),
            SmtTerm::Exp(a) => Op::Exp(self.shared(a)?),
            SmtTerm::Max(a, b) => Op::Max(self.shared(a)?, self.shared(b)?),
            SmtTerm::Min(a, b) => Op::Min(self.shared(a)?, self.shared(b)?),
            SmtTerm::Ite(..) => {
                return Err(IcpError::Unsupported("real-valued if-then-else".into()))
            }
            _ => {
                return Err(IcpError::Unsupported(
                    "boolean term in arithmetic position".into(),
                ))
            }
        };
        Ok(self.emit(op))
    }

    fn atom(
        &mut self,
        lhs: &Arc<SmtTerm>,
        rhs: &Arc<SmtTerm>,
        rel: Rel,
    ) -> Result<Formula, IcpError> {
        let node = if rhs.as_real_lit() == Some(0.0) {
            self.shared(lhs)?
        } else {
            let l = self.shared(lhs)?;
            let r = self.shared(rhs)?;
            self.emit(Op::Sub(l, r))
        };
        Ok(Formula::Atom(node, rel))
    }

    fn formula(&mut self, term: &SmtTerm) -> Result<Formula, IcpError> {
        match term {
            SmtTerm::BoolLit(b) => Ok(Formula::Const(*b)),
            SmtTerm::Lt(a, b) => self.atom(a, b, Rel::Lt),
            SmtTerm::Le(a, b) => self.atom(a, b, Rel::Le),
            SmtTerm::Gt(a, b) => self.atom(a, b, Rel::Gt),
            SmtTerm::Ge(a, b) => self.atom(a, b, Rel::Ge),
            SmtTerm::Eq(a, b) => self.atom(a, b, Rel::Eq),
            SmtTerm::And(parts) => Ok(Formula::And(
                parts
                    .iter()
                    .map(|p| self.formula(p))
                    .collect::<Result<_, _>>()?,
            )),
            SmtTerm::Or(parts) => Ok(Formula::Or(
                parts
                    .iter()
                    .map(|p| self.formula(p))
                    .collect::<Result<_, _>>()?,
            )),
            SmtTerm::Not(a) => Ok(Formula::Not(Box::new(self.formula(a)?))),
            SmtTerm::Implies(a, b) => Ok(Formula::Or(vec![
                Formula::Not(Box::new(self.formula(a)?)),
                self.formula(b)?,
            ])),
            SmtTerm::Ite(c, t, e) => {
                let cond = self.formula(c)?;
                Ok(Formula::Or(vec![
                    Formula::And(vec![cond.clone(), self.formula(t)?]),
                    Formula::And(vec![Formula::Not(Box::new(cond)), self.formula(e)?]),
                ]))
            }
            SmtTerm::Var(name) => Err(IcpError::Unsupported(format!(
                "boolean variable `{name}`"
            ))),
            _ => Err(IcpError::Unsupported(
                "arithmetic term used as a formula".into(),
            )),
        }
    }
}
