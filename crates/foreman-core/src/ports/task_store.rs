//! TaskStore port - タスクの正本（source of truth）
//!
//! # 設計原則
//! - 状態遷移は全て compare-and-set（status + version）で書く
//! - 同じ task への競合する遷移は片方だけが成功する（負けた側は実際の status を見る）
//! - store が落ちたら `StoreError::Unavailable` を返し、その tick の処理だけを諦める

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{GoalId, HostId, StoreError, Task, TaskId, TaskStatus, TaskType};

/// Filter for `list` / `count`. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct TaskQuery {
    pub statuses: Vec<TaskStatus>,
    pub task_type: Option<TaskType>,
    pub goal_id: Option<GoalId>,
    pub location: Option<HostId>,
    pub decomposition_only: bool,
    pub updated_after: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TaskQuery {
    pub fn with_status(statuses: &[TaskStatus]) -> Self {
        Self {
            statuses: statuses.to_vec(),
            ..Self::default()
        }
    }

    pub fn of_type(mut self, task_type: TaskType) -> Self {
        self.task_type = Some(task_type);
        self
    }

    pub fn goal(mut self, goal_id: GoalId) -> Self {
        self.goal_id = Some(goal_id);
        self
    }

    pub fn at(mut self, host: HostId) -> Self {
        self.location = Some(host);
        self
    }

    pub fn decompositions(mut self) -> Self {
        self.decomposition_only = true;
        self
    }

    pub fn updated_since(mut self, at: DateTime<Utc>) -> Self {
        self.updated_after = Some(at);
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Reference predicate; adapters that filter in memory use it directly.
    pub fn matches(&self, task: &Task) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
            return false;
        }
        if let Some(t) = &self.task_type
            && &task.task_type != t
        {
            return false;
        }
        if let Some(g) = &self.goal_id
            && task.goal_id.as_ref() != Some(g)
        {
            return false;
        }
        if let Some(h) = &self.location
            && task.location.as_ref() != Some(h)
        {
            return false;
        }
        if self.decomposition_only && !task.is_decomposition() {
            return false;
        }
        if let Some(after) = self.updated_after
            && task.updated_at < after
        {
            return false;
        }
        true
    }
}

/// Result of a conditional write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasOutcome {
    /// Written; carries the new row version.
    Applied { version: u64 },
    /// The row left the expected status.
    StatusMismatch { actual: TaskStatus },
    /// Same status, but someone else wrote in between. Re-read and retry.
    VersionMismatch { actual: u64 },
    NotFound,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert(&self, task: Task) -> Result<(), StoreError>;

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// Matching tasks, oldest `created_at` first.
    async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>, StoreError>;

    async fn count(&self, query: &TaskQuery) -> Result<usize, StoreError>;

    /// Replace the row iff it is still at `expected_status` and `expected_version`.
    ///
    /// "set ... where id = I and status = X and version = V". The store bumps
    /// `version` on success.
    async fn compare_and_set(
        &self,
        expected_status: TaskStatus,
        expected_version: u64,
        replacement: Task,
    ) -> Result<CasOutcome, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{DecompositionStage, TaskPayload};
    use chrono::Duration;
    use ulid::Ulid;

    #[test]
    fn query_matches_on_all_set_fields() {
        let now = Utc::now();
        let goal = GoalId::from_ulid(Ulid::new());
        let task = Task::new(TaskId::from_ulid(Ulid::new()), TaskType::new("dev"), now)
            .with_goal(goal)
            .with_payload(TaskPayload::decomposition(DecompositionStage::Initial));

        let q = TaskQuery::with_status(&[TaskStatus::Queued])
            .goal(goal)
            .decompositions();
        assert!(q.matches(&task));

        let other_goal = TaskQuery::default().goal(GoalId::from_ulid(Ulid::new()));
        assert!(!other_goal.matches(&task));

        let recent = TaskQuery::default().updated_since(now + Duration::seconds(1));
        assert!(!recent.matches(&task));

        assert!(TaskQuery::default().of_type(TaskType::new("DEV")).matches(&task));
        assert!(!TaskQuery::default().of_type(TaskType::new("qa")).matches(&task));
    }
}
