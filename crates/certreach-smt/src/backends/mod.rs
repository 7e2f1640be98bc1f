//! Decision-procedure backends implementing [`crate::solver::SmtSolver`].

pub mod dreal_backend;
pub mod icp_backend;
pub mod smtlib_printer;
#[cfg(feature = "z3")]
pub mod z3_backend;
