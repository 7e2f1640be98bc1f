//! Deadline helpers shared by the verifier and the CEGIS loop.

use std::time::{Duration, Instant};

pub fn deadline_exceeded(deadline: Option<Instant>) -> bool {
    match deadline {
        Some(deadline) => Instant::now() >= deadline,
        None => false,
    }
}

/// `0` means no limit.
pub fn timeout_duration(timeout_secs: u64) -> Option<Duration> {
    if timeout_secs == 0 {
        None
    } else {
        Some(Duration::from_secs(timeout_secs))
    }
}

pub fn deadline_from_timeout_secs(timeout_secs: u64) -> Option<Instant> {
    timeout_duration(timeout_secs).and_then(|t| Instant::now().checked_add(t))
}

/// The tighter of a per-call timeout and the time left until `deadline`.
pub fn effective_timeout(
    per_call: Option<Duration>,
    deadline: Option<Instant>,
) -> Option<Duration> {
    let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
    match (per_call, remaining) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

pub fn timeout_unknown_reason(context: &str) -> String {
    format!("{context} timed out before completion.")
}
