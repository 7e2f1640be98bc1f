#![doc = include_str!("../README.md")]

//! Real-arithmetic SMT encoding and solver integration for certificate
//! verification.
//!
//! This crate provides the term language the verifier builds its queries in,
//! an interval-arithmetic kernel, and pluggable decision procedures: an
//! in-process δ-complete interval solver, a dReal subprocess backend, and an
//! optional Z3 backend for the polynomial fragment.

pub mod backends;
pub mod interval;
pub mod solver;
pub mod sorts;
pub mod terms;
