//! Task status state machine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task status.
///
/// State transitions:
/// - Queued -> InProgress -> Completed | CompletedNoPr | Failed
/// - InProgress -> Queued (requeue, the only backwards edge)
/// - InProgress -> Quarantined (watchdog budget exhausted)
/// - Queued -> Failed (rejected at dispatch, e.g. unknown task type)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    InProgress,
    Completed,
    CompletedNoPr,
    Failed,
    Quarantined,
}

impl TaskStatus {
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Queued,
        TaskStatus::InProgress,
        TaskStatus::Completed,
        TaskStatus::CompletedNoPr,
        TaskStatus::Failed,
        TaskStatus::Quarantined,
    ];

    /// Is this a terminal state (no further transitions by this core)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::CompletedNoPr
                | TaskStatus::Failed
                | TaskStatus::Quarantined
        )
    }

    /// Queued or in progress.
    pub fn is_active(self) -> bool {
        matches!(self, TaskStatus::Queued | TaskStatus::InProgress)
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Queued, InProgress) | (Queued, Failed) => true,
            (InProgress, Queued) => true,
            (InProgress, Completed | CompletedNoPr | Failed | Quarantined) => true,
            // same-status writes (heartbeat, payload bookkeeping)
            (a, b) if a == b => !a.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::CompletedNoPr => "completed_no_pr",
            TaskStatus::Failed => "failed",
            TaskStatus::Quarantined => "quarantined",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
