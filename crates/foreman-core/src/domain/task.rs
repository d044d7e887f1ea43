//! Task record: the unit of dispatchable work.
//!
//! Design:
//! - The TaskStore holds the single source of truth for every task.
//! - Transitions are written with compare-and-set on `(status, version)`.
//! - Mutating helpers here only change the in-memory copy; the caller persists it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{GoalId, RunId, TaskId};
use super::payload::TaskPayload;
use super::state::TaskStatus;
use super::task_type::TaskType;

/// Name of an execution host (slot pool), e.g. `"us"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(String);

impl HostId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for HostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    pub task_type: TaskType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal_id: Option<GoalId>,

    /// Host assignment, set at dispatch time from the router.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<HostId>,

    #[serde(default)]
    pub payload: TaskPayload,

    /// Row version for optimistic concurrency; bumped by the store on every write.
    #[serde(default)]
    pub version: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Last liveness signal from the running attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_at: Option<DateTime<Utc>>,
}

impl Task {
    pub fn new(id: TaskId, task_type: TaskType, now: DateTime<Utc>) -> Self {
        Self {
            id,
            status: TaskStatus::Queued,
            task_type,
            goal_id: None,
            location: None,
            payload: TaskPayload::default(),
            version: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            heartbeat_at: None,
        }
    }

    pub fn with_goal(mut self, goal_id: GoalId) -> Self {
        self.goal_id = Some(goal_id);
        self
    }

    pub fn with_payload(mut self, payload: TaskPayload) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_decomposition(&self) -> bool {
        self.payload.is_decomposition()
    }

    /// Claim for execution (Queued -> InProgress).
    pub fn start_run(&mut self, host: HostId, run_id: RunId, now: DateTime<Utc>) {
        self.status = TaskStatus::InProgress;
        self.location = Some(host);
        self.payload.current_run_id = Some(run_id);
        self.started_at = Some(now);
        self.heartbeat_at = Some(now);
        self.updated_at = now;
    }

    /// Return to the queue (InProgress -> Queued). Counters are untouched.
    pub fn release(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Queued;
        self.payload.current_run_id = None;
        self.started_at = None;
        self.heartbeat_at = None;
        self.updated_at = now;
    }

    pub fn finish(&mut self, status: TaskStatus, now: DateTime<Utc>) {
        self.status = status;
        self.payload.current_run_id = None;
        self.updated_at = now;
    }

    /// Last time this run showed signs of life.
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.heartbeat_at.or(self.started_at)
    }

    pub fn is_current_run(&self, run_id: &RunId) -> bool {
        self.payload.current_run_id.as_ref() == Some(run_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn task() -> Task {
        Task::new(TaskId::from_ulid(Ulid::new()), TaskType::new("dev"), Utc::now())
    }

    #[test]
    fn new_task_starts_queued() {
        let t = task();
        assert_eq!(t.status, TaskStatus::Queued);
        assert_eq!(t.payload.watchdog.failure_count, 0);
        assert!(t.location.is_none());
    }

    #[test]
    fn start_and_release_run() {
        let mut t = task();
        let run = RunId::from_ulid(Ulid::new());
        let now = Utc::now();

        t.start_run(HostId::new("us"), run, now);
        assert_eq!(t.status, TaskStatus::InProgress);
        assert!(t.is_current_run(&run));
        assert_eq!(t.last_seen(), Some(now));

        t.release(now);
        assert_eq!(t.status, TaskStatus::Queued);
        assert!(!t.is_current_run(&run));
        assert_eq!(t.location, Some(HostId::new("us")));
    }
}
