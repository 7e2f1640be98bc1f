use std::collections::{BTreeSet, HashSet};
use std::ops::{Add, Mul, Neg, Sub};
use std::sync::Arc;

/// Abstract SMT term representation over the reals, solver-agnostic.
///
/// Operands are reference counted so a term built from shared sub-terms
/// (for example every neuron activation feeding both the value and the
/// gradient of a certificate) stays a DAG. Backends that walk the term
/// memoize on the operand pointer.
#[derive(Debug, Clone, PartialEq)]
pub enum SmtTerm {
    /// Variable reference by name.
    Var(String),
    /// Real literal.
    RealLit(f64),
    /// Boolean literal.
    BoolLit(bool),

    // Arithmetic
    Add(Arc<SmtTerm>, Arc<SmtTerm>),
    Sub(Arc<SmtTerm>, Arc<SmtTerm>),
    Mul(Arc<SmtTerm>, Arc<SmtTerm>),
    Neg(Arc<SmtTerm>),
    Pow(Arc<SmtTerm>, u32),

    // Nonlinear functions
    Sqrt(Arc<SmtTerm>),
    Abs(Arc<SmtTerm>),
    Tanh(Arc<SmtTerm>),
    Sin(Arc<SmtTerm>),
    Cos(Arc<SmtTerm>),
    Exp(Arc<SmtTerm>),
    Max(Arc<SmtTerm>, Arc<SmtTerm>),
    Min(Arc<SmtTerm>, Arc<SmtTerm>),

    // Comparison
    Eq(Arc<SmtTerm>, Arc<SmtTerm>),
    Lt(Arc<SmtTerm>, Arc<SmtTerm>),
    Le(Arc<SmtTerm>, Arc<SmtTerm>),
    Gt(Arc<SmtTerm>, Arc<SmtTerm>),
    Ge(Arc<SmtTerm>, Arc<SmtTerm>),

    // Boolean logic
    And(Vec<SmtTerm>),
    Or(Vec<SmtTerm>),
    Not(Arc<SmtTerm>),
    Implies(Arc<SmtTerm>, Arc<SmtTerm>),

    // If-then-else
    Ite(Arc<SmtTerm>, Arc<SmtTerm>, Arc<SmtTerm>),
}

#[allow(clippy::should_implement_trait)]
impl SmtTerm {
    pub fn var(name: impl Into<String>) -> Self {
        SmtTerm::Var(name.into())
    }

    pub fn real(value: f64) -> Self {
        SmtTerm::RealLit(value)
    }

    pub fn bool(b: bool) -> Self {
        SmtTerm::BoolLit(b)
    }

    /// Literal value if this term is a real constant.
    pub fn as_real_lit(&self) -> Option<f64> {
        match self {
            SmtTerm::RealLit(v) => Some(*v),
            _ => None,
        }
    }

    pub fn add(self, other: SmtTerm) -> Self {
        match (self.as_real_lit(), other.as_real_lit()) {
            (Some(a), Some(b)) => SmtTerm::RealLit(a + b),
            (Some(a), None) if a == 0.0 => other,
            (None, Some(b)) if b == 0.0 => self,
            _ => SmtTerm::Add(Arc::new(self), Arc::new(other)),
        }
    }

    pub fn sub(self, other: SmtTerm) -> Self {
        match (self.as_real_lit(), other.as_real_lit()) {
            (Some(a), Some(b)) => SmtTerm::RealLit(a - b),
            (None, Some(b)) if b == 0.0 => self,
            (Some(a), None) if a == 0.0 => other.neg(),
            _ => SmtTerm::Sub(Arc::new(self), Arc::new(other)),
        }
    }

    pub fn mul(self, other: SmtTerm) -> Self {
        match (self.as_real_lit(), other.as_real_lit()) {
            (Some(a), Some(b)) => SmtTerm::RealLit(a * b),
            (Some(a), None) | (None, Some(a)) if a == 0.0 => SmtTerm::RealLit(0.0),
            (Some(a), None) if a == 1.0 => other,
            (None, Some(b)) if b == 1.0 => self,
            (Some(a), None) if a == -1.0 => other.neg(),
            (None, Some(b)) if b == -1.0 => self.neg(),
            _ => SmtTerm::Mul(Arc::new(self), Arc::new(other)),
        }
    }

    pub fn neg(self) -> Self {
        match self {
            SmtTerm::RealLit(v) => SmtTerm::RealLit(-v),
            SmtTerm::Neg(inner) => Arc::try_unwrap(inner).unwrap_or_else(|arc| (*arc).clone()),
            other => SmtTerm::Neg(Arc::new(other)),
        }
    }

    pub fn pow(self, exponent: u32) -> Self {
        match (exponent, self.as_real_lit()) {
            (0, _) => SmtTerm::RealLit(1.0),
            (1, _) => self,
            (n, Some(v)) => SmtTerm::RealLit(v.powi(n as i32)),
            (n, None) => SmtTerm::Pow(Arc::new(self), n),
        }
    }

    pub fn sqrt(self) -> Self {
        self.unary(f64::sqrt, SmtTerm::Sqrt)
    }

    pub fn abs(self) -> Self {
        self.unary(f64::abs, SmtTerm::Abs)
    }

    pub fn tanh(self) -> Self {
        self.unary(f64::tanh, SmtTerm::Tanh)
    }

    pub fn sin(self) -> Self {
        self.unary(f64::sin, SmtTerm::Sin)
    }

    pub fn cos(self) -> Self {
        self.unary(f64::cos, SmtTerm::Cos)
    }

    pub fn exp(self) -> Self {
        self.unary(f64::exp, SmtTerm::Exp)
    }

    pub fn max(self, other: SmtTerm) -> Self {
        match (self.as_real_lit(), other.as_real_lit()) {
            (Some(a), Some(b)) => SmtTerm::RealLit(a.max(b)),
            _ => SmtTerm::Max(Arc::new(self), Arc::new(other)),
        }
    }

    pub fn min(self, other: SmtTerm) -> Self {
        match (self.as_real_lit(), other.as_real_lit()) {
            (Some(a), Some(b)) => SmtTerm::RealLit(a.min(b)),
            _ => SmtTerm::Min(Arc::new(self), Arc::new(other)),
        }
    }

    pub fn eq(self, other: SmtTerm) -> Self {
        SmtTerm::Eq(Arc::new(self), Arc::new(other))
    }

    pub fn lt(self, other: SmtTerm) -> Self {
        SmtTerm::Lt(Arc::new(self), Arc::new(other))
    }

    pub fn le(self, other: SmtTerm) -> Self {
        SmtTerm::Le(Arc::new(self), Arc::new(other))
    }

    pub fn gt(self, other: SmtTerm) -> Self {
        SmtTerm::Gt(Arc::new(self), Arc::new(other))
    }

    pub fn ge(self, other: SmtTerm) -> Self {
        SmtTerm::Ge(Arc::new(self), Arc::new(other))
    }

    pub fn and(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::And(terms)
    }

    pub fn or(terms: Vec<SmtTerm>) -> Self {
        SmtTerm::Or(terms)
    }

    pub fn not(self) -> Self {
        SmtTerm::Not(Arc::new(self))
    }

    pub fn implies(self, other: SmtTerm) -> Self {
        SmtTerm::Implies(Arc::new(self), Arc::new(other))
    }

    pub fn ite(cond: SmtTerm, then: SmtTerm, els: SmtTerm) -> Self {
        SmtTerm::Ite(Arc::new(cond), Arc::new(then), Arc::new(els))
    }

    /// `lo <= self <= hi`.
    pub fn within(self, lo: f64, hi: f64) -> Self {
        SmtTerm::and(vec![
            self.clone().ge(SmtTerm::real(lo)),
            self.le(SmtTerm::real(hi)),
        ])
    }

    /// True when the term mentions a function outside polynomial arithmetic.
    pub fn is_polynomial(&self) -> bool {
        let mut seen = HashSet::new();
        self.visit(&mut seen, &mut |term| {
            !matches!(
                term,
                SmtTerm::Sqrt(_)
                    | SmtTerm::Tanh(_)
                    | SmtTerm::Sin(_)
                    | SmtTerm::Cos(_)
                    | SmtTerm::Exp(_)
            )
        })
    }

    /// Names of all variables mentioned in the term.
    pub fn free_vars(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut seen = HashSet::new();
        self.visit(&mut seen, &mut |term| {
            if let SmtTerm::Var(name) = term {
                out.insert(name.clone());
            }
            true
        });
        out
    }

    /// Direct operands of this node.
    pub fn children(&self) -> Vec<&Arc<SmtTerm>> {
        match self {
            SmtTerm::Var(_)
            | SmtTerm::RealLit(_)
            | SmtTerm::BoolLit(_)
            | SmtTerm::And(_)
            | SmtTerm::Or(_) => Vec::new(),
            SmtTerm::Neg(a)
            | SmtTerm::Pow(a, _)
            | SmtTerm::Sqrt(a)
            | SmtTerm::Abs(a)
            | SmtTerm::Tanh(a)
            | SmtTerm::Sin(a)
            | SmtTerm::Cos(a)
            | SmtTerm::Exp(a)
            | SmtTerm::Not(a) => vec![a],
            SmtTerm::Add(a, b)
            | SmtTerm::Sub(a, b)
            | SmtTerm::Mul(a, b)
            | SmtTerm::Max(a, b)
            | SmtTerm::Min(a, b)
            | SmtTerm::Eq(a, b)
            | SmtTerm::Lt(a, b)
            | SmtTerm::Le(a, b)
            | SmtTerm::Gt(a, b)
            | SmtTerm::Ge(a, b)
            | SmtTerm::Implies(a, b) => vec![a, b],
            SmtTerm::Ite(c, t, e) => vec![c, t, e],
        }
    }

    /// Pre-order walk visiting each shared operand once. Returns `false` as
    /// soon as `f` does.
    fn visit<F>(&self, seen: &mut HashSet<usize>, f: &mut F) -> bool
    where
        F: FnMut(&SmtTerm) -> bool,
    {
        if !f(self) {
            return false;
        }
        if let SmtTerm::And(terms) | SmtTerm::Or(terms) = self {
            return terms.iter().all(|t| t.visit(seen, f));
        }
        for child in self.children() {
            if seen.insert(Arc::as_ptr(child) as usize) && !child.visit(seen, f) {
                return false;
            }
        }
        true
    }

    fn unary(self, fold: fn(f64) -> f64, wrap: fn(Arc<SmtTerm>) -> SmtTerm) -> Self {
        match self.as_real_lit() {
            Some(v) => SmtTerm::RealLit(fold(v)),
            None => wrap(Arc::new(self)),
        }
    }
}

impl Add for SmtTerm {
    type Output = SmtTerm;

    fn add(self, rhs: SmtTerm) -> SmtTerm {
        SmtTerm::add(self, rhs)
    }
}

impl Sub for SmtTerm {
    type Output = SmtTerm;

    fn sub(self, rhs: SmtTerm) -> SmtTerm {
        SmtTerm::sub(self, rhs)
    }
}

impl Mul for SmtTerm {
    type Output = SmtTerm;

    fn mul(self, rhs: SmtTerm) -> SmtTerm {
        SmtTerm::mul(self, rhs)
    }
}

impl Neg for SmtTerm {
    type Output = SmtTerm;

    fn neg(self) -> SmtTerm {
        SmtTerm::neg(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_arithmetic_folds() {
        let t = SmtTerm::real(2.0) * SmtTerm::real(3.0) + SmtTerm::real(1.0);
        assert_eq!(t, SmtTerm::real(7.0));
        assert_eq!(SmtTerm::real(0.5).tanh(), SmtTerm::real(0.5f64.tanh()));
    }

    #[test]
    fn identity_elements_are_dropped() {
        let x = SmtTerm::var("x");
        assert_eq!(x.clone() * SmtTerm::real(1.0), x);
        assert_eq!(x.clone() + SmtTerm::real(0.0), x);
        assert_eq!(x.clone() * SmtTerm::real(0.0), SmtTerm::real(0.0));
        assert_eq!(-(-x.clone()), x);
        assert_eq!(x.clone().pow(1), x);
    }

    #[test]
    fn free_vars_collects_names_once() {
        let x = SmtTerm::var("x");
        let y = SmtTerm::var("y");
        let t = (x.clone() * y.clone() + x.tanh()).gt(SmtTerm::real(0.0));
        let vars: Vec<String> = t.free_vars().into_iter().collect();
        assert_eq!(vars, vec!["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn polynomial_detection_sees_transcendental_leaves() {
        let x = SmtTerm::var("x");
        assert!((x.clone().pow(3) - x.clone()).is_polynomial());
        assert!(!(x.clone() + x.sin()).is_polynomial());
    }
}
