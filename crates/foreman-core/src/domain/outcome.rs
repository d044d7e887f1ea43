//! Outcome model: what a run reported, and what the core decided.
//!
//! Expected conditions (not in progress, budget exhausted, ...) are values here,
//! never errors.

use serde::{Deserialize, Serialize};

use super::state::TaskStatus;

/// Raw metrics attached to a watchdog signal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceMetrics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rss_mb: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_pct: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_mb: Option<f64>,
}

impl ResourceMetrics {
    pub fn rss(rss_mb: f64) -> Self {
        Self {
            rss_mb: Some(rss_mb),
            ..Self::default()
        }
    }
}

/// A resource observation of a running task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceSample {
    pub rss_mb: f64,
    pub cpu_pct: f64,
}

/// A threshold breach found by `WatchdogEngine::evaluate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub reason: String,
    pub metrics: ResourceMetrics,
}

/// How a run ended, as reported by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Completed,
    /// Work finished but produced no pull request.
    CompletedNoPr,
    /// The task itself failed (charged to the failure budget).
    Failed { reason: String },
    /// The executor's downstream dependency was unreachable (charged to the breaker).
    DependencyUnavailable { reason: String },
    /// The run was killed for exceeding a resource ceiling.
    ResourceViolation {
        reason: String,
        #[serde(default)]
        metrics: ResourceMetrics,
    },
}

/// Why a requeue request did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RequeueSkip {
    NotInProgress { actual: TaskStatus },
    NotFound,
}

/// Result of `WatchdogEngine::requeue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequeueOutcome {
    Requeued { retry_count: u32 },
    Quarantined { retry_count: u32, total_failures: u32 },
    Skipped(RequeueSkip),
}

impl RequeueOutcome {
    pub fn requeued(&self) -> bool {
        matches!(self, RequeueOutcome::Requeued { .. })
    }

    pub fn quarantined(&self) -> bool {
        matches!(self, RequeueOutcome::Quarantined { .. })
    }

    pub fn retry_count(&self) -> Option<u32> {
        match self {
            RequeueOutcome::Requeued { retry_count }
            | RequeueOutcome::Quarantined { retry_count, .. } => Some(*retry_count),
            RequeueOutcome::Skipped(_) => None,
        }
    }

    /// `"not_in_progress"` / `"not_found"` for skipped requests.
    pub fn skip_reason(&self) -> Option<&'static str> {
        match self {
            RequeueOutcome::Skipped(RequeueSkip::NotInProgress { .. }) => Some("not_in_progress"),
            RequeueOutcome::Skipped(RequeueSkip::NotFound) => Some("not_found"),
            _ => None,
        }
    }
}

/// Result of `WatchdogEngine::fail` (ordinary failure ladder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum FailureOutcome {
    Requeued { failure_count: u32 },
    Failed { failure_count: u32 },
    Skipped(RequeueSkip),
}
