#![doc = include_str!("../README.md")]

//! certreach engine.
//!
//! This crate holds everything between a system definition and a persisted
//! certificate: residual evaluation, the reverse-mode tape and optimizer,
//! the trainer, the dataset manager, query construction and parallel
//! verification, the CEGIS loop, run-mode entry points, and read-only
//! diagnostics (soundness audit, slice rendering).

pub mod backend;
pub mod cegis;
pub mod counterexample;
pub mod dataset;
pub mod optimizer;
pub mod query;
pub mod residual;
pub mod result;
pub mod run;
pub mod soundness;
pub mod tape;
pub mod timeout;
pub mod trainer;
pub mod verifier;
pub mod visualization;

#[cfg(test)]
mod testing;
