#![doc = include_str!("../README.md")]

//! certreach problem representation.
//!
//! This crate defines the scalar algebra that lets one generic expression be
//! evaluated numerically, differentiated, or printed as a solver term, plus
//! the dynamics contract, certificate representations, and run
//! configuration consumed by the CEGIS engine.

pub mod certificate;
pub mod config;
pub mod domain;
pub mod dynamics;
#[cfg(any(test, feature = "proptest"))]
pub mod proptest_generators;
pub mod scalar;
