//! Task payload: fault-tolerance bookkeeping and routing hints.
//!
//! The payload is split into explicit parts instead of one loose JSON bag:
//! - `WatchdogState`: kill/failure counters and quarantine diagnostics
//! - `RoutingHint`: tagged union consumed by skill resolution
//! - `skill_override`: explicit per-task skill, highest precedence
//! - `current_run_id`: identifies the in-flight execution attempt

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::RunId;
use super::outcome::ResourceMetrics;

/// Cumulative failure budget of a task.
///
/// Invariant: `failure_count >= retry_count`. A watchdog kill increments both
/// counters; an ordinary failure increments only `failure_count`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WatchdogState {
    /// Kills attributed to the watchdog.
    #[serde(rename = "watchdog_retry_count", default)]
    pub retry_count: u32,

    /// Watchdog kills plus ordinary failures.
    #[serde(default)]
    pub failure_count: u32,

    /// Present only when the task is quarantined.
    #[serde(
        rename = "quarantine_info",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub quarantine: Option<QuarantineInfo>,
}

impl WatchdogState {
    /// Count one watchdog kill. Returns `(retry_count, failure_count)` after the kill.
    pub fn record_kill(&mut self) -> (u32, u32) {
        self.retry_count = self.retry_count.saturating_add(1);
        self.failure_count = self.failure_count.saturating_add(1).max(self.retry_count);
        (self.retry_count, self.failure_count)
    }

    /// Count one ordinary (non-watchdog) failure. Returns the new `failure_count`.
    pub fn record_failure(&mut self) -> u32 {
        self.failure_count = self.failure_count.saturating_add(1);
        self.failure_count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuarantineReason {
    /// Repeatedly killed for exceeding resource ceilings (or heartbeat timeouts).
    ResourceHog,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineDetails {
    pub watchdog_retries: u32,
    pub total_failures: u32,
}

/// Diagnostic record kept on a quarantined task for manual triage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantineInfo {
    pub reason: QuarantineReason,
    pub details: QuarantineDetails,

    /// The watchdog reason string of the final kill (e.g. "RSS exceeded").
    pub last_signal: String,

    #[serde(default)]
    pub metrics: ResourceMetrics,

    pub quarantined_at: DateTime<Utc>,
}

/// Stage of a decomposition (planning) task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionStage {
    /// First-time decomposition of a goal.
    Initial,
    /// Continue a decomposition that already produced some work.
    Continue,
}

/// Routing hints carried in the payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RoutingHint {
    Decomposition { stage: DecompositionStage },
    NextAction { action: String },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    #[serde(flatten)]
    pub watchdog: WatchdogState,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing: Option<RoutingHint>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill_override: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_run_id: Option<RunId>,

    /// Skill resolved at dispatch time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skill: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl TaskPayload {
    pub fn decomposition(stage: DecompositionStage) -> Self {
        Self {
            routing: Some(RoutingHint::Decomposition { stage }),
            ..Self::default()
        }
    }

    pub fn is_decomposition(&self) -> bool {
        matches!(self.routing, Some(RoutingHint::Decomposition { .. }))
    }
}
