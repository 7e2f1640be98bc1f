use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::counterexample::Counterexample;

/// Outcome of one verification phase.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum VerificationStatus {
    /// Every query was refuted.
    Verified,
    /// A numerically confirmed violation.
    Counterexample(Counterexample),
    /// At least one query stayed undecided and none produced a confirmed
    /// counterexample.
    Timeout { reason: String },
}

impl VerificationStatus {
    pub fn is_verified(&self) -> bool {
        matches!(self, VerificationStatus::Verified)
    }
}

/// Per-phase counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryStats {
    pub issued: usize,
    pub refuted: usize,
    pub inconclusive: usize,
    /// Solver witnesses that failed numeric re-evaluation against epsilon.
    pub unconfirmed: usize,
    pub cancelled: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationResult {
    pub status: VerificationStatus,
    pub epsilon: f64,
    pub stats: QueryStats,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl fmt::Display for VerificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.status {
            VerificationStatus::Verified => write!(
                f,
                "VERIFIED: |residual| <= {} on the whole domain ({} queries refuted)",
                self.epsilon, self.stats.refuted
            ),
            VerificationStatus::Counterexample(cex) => write!(
                f,
                "COUNTEREXAMPLE ({}, clause {}): residual {:.6} at {:?}",
                cex.kind, cex.clause, cex.margin, cex.point
            ),
            VerificationStatus::Timeout { reason } => write!(
                f,
                "INCONCLUSIVE: {reason} ({} of {} queries undecided)",
                self.stats.inconclusive, self.stats.issued
            ),
        }
    }
}
