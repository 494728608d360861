//! Metrics increment contract
//!
//! The binding only ever writes counters. Keys are a digit-stripped path plus
//! an outcome suffix, e.g. `/ct/terms/CTTerm_/approvals--Approve`.

use crate::classify::ErrorCategory;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Sink for `(key, count)` increments
pub trait MetricsSink: Send + Sync {
    fn increment(&self, key: &str, count: u64);
}

/// Outcome suffix appended to a counted key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Get,
    Post,
    Patch,
    Delete,
    Approve,
    ApproveError,
    AlreadyExists,
    NotFound,
    NoObjective,
    Error,
    PatchError,
    /// `{label}Approve`, used when approving sub-resources
    LabeledApprove(String),
    /// `{label}ApproveError`
    LabeledApproveError(String),
}

impl Outcome {
    /// Map a classified failure to its suffix. `Generic` falls back to `generic`.
    pub fn from_failure(category: ErrorCategory, generic: Outcome) -> Self {
        match category {
            ErrorCategory::AlreadyExists => Self::AlreadyExists,
            ErrorCategory::NotFound => Self::NotFound,
            ErrorCategory::NoObjective => Self::NoObjective,
            ErrorCategory::Generic => generic,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Get => write!(f, "GET"),
            Self::Post => write!(f, "POST"),
            Self::Patch => write!(f, "Patch"),
            Self::Delete => write!(f, "DELETE"),
            Self::Approve => write!(f, "Approve"),
            Self::ApproveError => write!(f, "ApproveError"),
            Self::AlreadyExists => write!(f, "AlreadyExists"),
            Self::NotFound => write!(f, "NotFound"),
            Self::NoObjective => write!(f, "NoObjective"),
            Self::Error => write!(f, "ERROR"),
            Self::PatchError => write!(f, "Patch-ERROR"),
            Self::LabeledApprove(label) => write!(f, "{}Approve", label),
            Self::LabeledApproveError(label) => write!(f, "{}ApproveError", label),
        }
    }
}

/// Path with every ASCII digit removed, so per-uid paths share one counter
pub fn normalize_path(path: &str) -> String {
    path.chars().filter(|c| !c.is_ascii_digit()).collect()
}

/// A write-only counter key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CountedKey(String);

impl CountedKey {
    pub fn new(path: &str, outcome: &Outcome) -> Self {
        Self(format!("{}--{}", normalize_path(path), outcome))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CountedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Convenience over a sink: build the key and increment it
pub(crate) fn record(sink: &dyn MetricsSink, path: &str, outcome: Outcome, count: u64) {
    let key = CountedKey::new(path, &outcome);
    sink.increment(key.as_str(), count);
}

/// In-memory counters, used when the host supplies no sink
#[derive(Debug, Default)]
pub struct Metrics {
    counters: Mutex<BTreeMap<String, u64>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current value of one counter
    pub fn get(&self, key: &str) -> u64 {
        self.lock_counters().get(key).copied().unwrap_or(0)
    }

    /// Copy of every counter, sorted by key
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.lock_counters().clone()
    }

    /// Counter map, recovered if a panicking holder poisoned the lock
    fn lock_counters(&self) -> MutexGuard<'_, BTreeMap<String, u64>> {
        self.counters.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Emit all counters at info level
    pub fn log_summary(&self) {
        for (key, count) in self.snapshot() {
            info!("{}: {}", key, count);
        }
    }
}

impl MetricsSink for Metrics {
    fn increment(&self, key: &str, count: u64) {
        *self.lock_counters().entry(key.to_string()).or_insert(0) += count;
    }
}
