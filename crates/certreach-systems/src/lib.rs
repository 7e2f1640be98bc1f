#![doc = include_str!("../README.md")]

//! certreach concrete dynamics.

pub mod dubins;
pub mod integrators;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use dubins::DubinsCar;
pub use integrators::{DoubleIntegrator, TripleIntegrator};

/// Registry of the systems shipped with certreach.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemKind {
    DoubleIntegrator,
    TripleIntegrator,
    DubinsCar,
}

impl SystemKind {
    pub const ALL: [SystemKind; 3] = [
        SystemKind::DoubleIntegrator,
        SystemKind::TripleIntegrator,
        SystemKind::DubinsCar,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SystemKind::DoubleIntegrator => "double_integrator",
            SystemKind::TripleIntegrator => "triple_integrator",
            SystemKind::DubinsCar => "dubins_car",
        }
    }
}

impl fmt::Display for SystemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown system `{0}` (expected one of: double_integrator, triple_integrator, dubins_car)")]
pub struct UnknownSystem(pub String);

impl FromStr for SystemKind {
    type Err = UnknownSystem;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        SystemKind::ALL
            .into_iter()
            .find(|kind| kind.name() == normalized)
            .ok_or_else(|| UnknownSystem(s.to_string()))
    }
}

/// Bind the default system for a [`SystemKind`] and evaluate `$body` with
/// it. The body is instantiated once per concrete type.
#[macro_export]
macro_rules! with_system {
    ($kind:expr, |$sys:ident| $body:expr) => {
        match $kind {
            $crate::SystemKind::DoubleIntegrator => {
                let $sys = $crate::DoubleIntegrator::default();
                $body
            }
            $crate::SystemKind::TripleIntegrator => {
                let $sys = $crate::TripleIntegrator::default();
                $body
            }
            $crate::SystemKind::DubinsCar => {
                let $sys = $crate::DubinsCar::default();
                $body
            }
        }
    };
}
