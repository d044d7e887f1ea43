//! Events - ドメインイベント
//!
//! EventSink に流す観測用イベント。失敗しても呼び出し元には影響しません。

use serde::{Deserialize, Serialize};

use super::ids::{RunId, TaskId};
use super::task::HostId;

/// Why a breaker opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenReason {
    FailureThresholdReached,
    HalfOpenProbeFailed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    BreakerOpened {
        key: String,
        reason: OpenReason,
        failures: u32,
    },
    BreakerHalfOpened {
        key: String,
    },
    BreakerClosed {
        key: String,
    },
    TaskDispatched {
        task_id: TaskId,
        run_id: RunId,
        host: HostId,
        skill: Option<String>,
    },
    TaskRequeued {
        task_id: TaskId,
        reason: String,
        retry_count: u32,
        failure_count: u32,
    },
    TaskQuarantined {
        task_id: TaskId,
        watchdog_retries: u32,
        total_failures: u32,
    },
    TaskFailed {
        task_id: TaskId,
        reason: String,
        failure_count: u32,
    },
    TaskCompleted {
        task_id: TaskId,
        with_pr: bool,
    },
}

impl DomainEvent {
    /// Short name, used as the log message.
    pub fn name(&self) -> &'static str {
        match self {
            DomainEvent::BreakerOpened { .. } => "breaker_opened",
            DomainEvent::BreakerHalfOpened { .. } => "breaker_half_opened",
            DomainEvent::BreakerClosed { .. } => "breaker_closed",
            DomainEvent::TaskDispatched { .. } => "task_dispatched",
            DomainEvent::TaskRequeued { .. } => "task_requeued",
            DomainEvent::TaskQuarantined { .. } => "task_quarantined",
            DomainEvent::TaskFailed { .. } => "task_failed",
            DomainEvent::TaskCompleted { .. } => "task_completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opened_event_is_tagged_with_reason() {
        let e = DomainEvent::BreakerOpened {
            key: "svc".into(),
            reason: OpenReason::FailureThresholdReached,
            failures: 3,
        };
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["event"], "breaker_opened");
        assert_eq!(v["reason"], "failure_threshold_reached");
        assert_eq!(e.name(), "breaker_opened");
    }
}
