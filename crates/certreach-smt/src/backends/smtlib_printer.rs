use std::collections::{HashMap, HashSet};
use std::fmt::Write as _;
use std::sync::Arc;

use crate::sorts::SmtSort;
use crate::terms::SmtTerm;

/// Print a real literal in SMT-LIB decimal syntax.
pub fn real_to_smtlib(v: f64) -> String {
    let mut digits = format!("{}", v.abs());
    if v.is_finite() && !digits.contains('.') {
        digits.push_str(".0");
    }
    if v.is_sign_negative() && v != 0.0 {
        format!("(- {digits})")
    } else {
        digits
    }
}

/// Print an SmtTerm as SMT-LIB2 (dReal dialect for the nonlinear functions).
///
/// Shared operands are printed in full at every occurrence; use
/// [`ScriptWriter`] for large DAG-shaped terms.
pub fn to_smtlib(term: &SmtTerm) -> String {
    print_with(term, &|child| to_smtlib(child))
}

fn print_with<F>(term: &SmtTerm, child: &F) -> String
where
    F: Fn(&Arc<SmtTerm>) -> String,
{
    let nary = |op: &str, empty: &str, terms: &[SmtTerm]| -> String {
        match terms {
            [] => empty.to_string(),
            [only] => print_with(only, child),
            _ => {
                let inner: Vec<String> = terms.iter().map(|t| print_with(t, child)).collect();
                format!("({op} {})", inner.join(" "))
            }
        }
    };
    match term {
        SmtTerm::Var(name) => name.clone(),
        SmtTerm::RealLit(v) => real_to_smtlib(*v),
        SmtTerm::BoolLit(b) => b.to_string(),
        SmtTerm::Add(lhs, rhs) => format!("(+ {} {})", child(lhs), child(rhs)),
        SmtTerm::Sub(lhs, rhs) => format!("(- {} {})", child(lhs), child(rhs)),
        SmtTerm::Mul(lhs, rhs) => format!("(* {} {})", child(lhs), child(rhs)),
        SmtTerm::Neg(inner) => format!("(- {})", child(inner)),
        SmtTerm::Pow(base, n) => format!("(^ {} {n})", child(base)),
        SmtTerm::Sqrt(inner) => format!("(sqrt {})", child(inner)),
        SmtTerm::Abs(inner) => format!("(abs {})", child(inner)),
        SmtTerm::Tanh(inner) => format!("(tanh {})", child(inner)),
        SmtTerm::Sin(inner) => format!("(sin {})", child(inner)),
        SmtTerm::Cos(inner) => format!("(cos {})", child(inner)),
        SmtTerm::Exp(inner) => format!("(exp {})", child(inner)),
        SmtTerm::Max(lhs, rhs) => format!("(max {} {})", child(lhs), child(rhs)),
        SmtTerm::Min(lhs, rhs) => format!("(min {} {})", child(lhs), child(rhs)),
        SmtTerm::Eq(lhs, rhs) => format!("(= {} {})", child(lhs), child(rhs)),
        SmtTerm::Lt(lhs, rhs) => format!("(< {} {})", child(lhs), child(rhs)),
        SmtTerm::Le(lhs, rhs) => format!("(<= {} {})", child(lhs), child(rhs)),
        SmtTerm::Gt(lhs, rhs) => format!("(> {} {})", child(lhs), child(rhs)),
        SmtTerm::Ge(lhs, rhs) => format!("(>= {} {})", child(lhs), child(rhs)),
        SmtTerm::And(terms) => nary("and", "true", terms),
        SmtTerm::Or(terms) => nary("or", "false", terms),
        SmtTerm::Not(inner) => format!("(not {})", child(inner)),
        SmtTerm::Implies(lhs, rhs) => format!("(=> {} {})", child(lhs), child(rhs)),
        SmtTerm::Ite(cond, then, els) => {
            format!("(ite {} {} {})", child(cond), child(then), child(els))
        }
    }
}

/// Print a sort as SMT-LIB2 format.
pub fn sort_to_smtlib(sort: &SmtSort) -> &'static str {
    match sort {
        SmtSort::Bool => "Bool",
        SmtSort::Real => "Real",
    }
}

fn is_bool_valued(term: &SmtTerm) -> bool {
    matches!(
        term,
        SmtTerm::BoolLit(_)
            | SmtTerm::Eq(..)
            | SmtTerm::Lt(..)
            | SmtTerm::Le(..)
            | SmtTerm::Gt(..)
            | SmtTerm::Ge(..)
            | SmtTerm::And(_)
            | SmtTerm::Or(_)
            | SmtTerm::Not(_)
            | SmtTerm::Implies(..)
    )
}

fn is_leaf(term: &SmtTerm) -> bool {
    matches!(
        term,
        SmtTerm::Var(_) | SmtTerm::RealLit(_) | SmtTerm::BoolLit(_)
    )
}

/// Incrementally builds an SMT-LIB script, hoisting operands that occur more
/// than once into nullary `define-fun`s so DAG-shaped terms print linearly.
pub struct ScriptWriter {
    out: String,
    /// Hoisted operands. The `Arc` keeps the address stable for the lifetime
    /// of the writer.
    names: HashMap<usize, (Arc<SmtTerm>, String)>,
    counter: usize,
}

impl ScriptWriter {
    pub fn new(logic: &str) -> Self {
        Self {
            out: format!("(set-logic {logic})\n"),
            names: HashMap::new(),
            counter: 0,
        }
    }

    pub fn comment(&mut self, text: &str) {
        for line in text.lines() {
            let _ = writeln!(self.out, "; {line}");
        }
    }

    pub fn declare(&mut self, name: &str, sort: &SmtSort) {
        let _ = writeln!(self.out, "(declare-const {name} {})", sort_to_smtlib(sort));
    }

    pub fn declare_bounded(&mut self, name: &str, lo: f64, hi: f64) {
        self.declare(name, &SmtSort::Real);
        let _ = writeln!(
            self.out,
            "(assert (<= {} {name}))\n(assert (<= {name} {}))",
            real_to_smtlib(lo),
            real_to_smtlib(hi)
        );
    }

    pub fn assert(&mut self, term: &SmtTerm) {
        let mut counts = HashMap::new();
        count_refs(term, &mut counts);
        let mut visited = HashSet::new();
        self.hoist(term, &counts, &mut visited);
        let body = self.render(term);
        let _ = writeln!(self.out, "(assert {body})");
    }

    pub fn raw(&mut self, line: &str) {
        self.out.push_str(line);
        self.out.push('\n');
    }

    /// Finish the script with `(check-sat)` and `(exit)`.
    pub fn finish(mut self) -> String {
        self.out.push_str("(check-sat)\n(exit)\n");
        self.out
    }

    /// Script text accumulated so far.
    pub fn as_str(&self) -> &str {
        &self.out
    }

    fn render(&self, term: &SmtTerm) -> String {
        print_with(term, &|child| self.lookup(child))
    }

    fn lookup(&self, term: &Arc<SmtTerm>) -> String {
        match self.names.get(&(Arc::as_ptr(term) as usize)) {
            Some((_, name)) => name.clone(),
            None => self.render(term),
        }
    }

    fn hoist(
        &mut self,
        term: &SmtTerm,
        counts: &HashMap<usize, usize>,
        visited: &mut HashSet<usize>,
    ) {
        if let SmtTerm::And(parts) | SmtTerm::Or(parts) = term {
            for p in parts {
                self.hoist(p, counts, visited);
            }
            return;
        }
        for child in term.children() {
            let key = Arc::as_ptr(child) as usize;
            if self.names.contains_key(&key) || !visited.insert(key) {
                continue;
            }
            self.hoist(child, counts, visited);
            if counts.get(&key).copied().unwrap_or(0) > 1 && !is_leaf(child) {
                let name = format!("_s{}", self.counter);
                self.counter += 1;
                let sort = if is_bool_valued(child) { "Bool" } else { "Real" };
                let body = self.render(child);
                let _ = writeln!(self.out, "(define-fun {name} () {sort} {body})");
                self.names.insert(key, (Arc::clone(child), name));
            }
        }
    }
}

fn count_refs(term: &SmtTerm, counts: &mut HashMap<usize, usize>) {
    if let SmtTerm::And(parts) | SmtTerm::Or(parts) = term {
        for p in parts {
            count_refs(p, counts);
        }
        return;
    }
    for child in term.children() {
        let seen = counts.entry(Arc::as_ptr(child) as usize).or_insert(0);
        *seen += 1;
        if *seen == 1 {
            count_refs(child, counts);
        }
    }
}
