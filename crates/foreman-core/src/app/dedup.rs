//! DecompositionGuard - 同じ goal への重複した decomposition を防ぐ
//!
//! - goal ごと: queued / in_progress、または 24h 以内に completed / failed になったものがあれば重複
//! - 全体: queued / in_progress の decomposition が WIP 上限以上なら作らない
//!
//! どちらも読み取りだけ。insert 直前に評価するので小さな競合窓は残りますが、
//! 重複は無駄なだけで壊れはしないので許容します。

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::config::DedupConfig;
use crate::domain::{
    DecompositionStage, ForemanError, GoalId, StoreError, Task, TaskPayload, TaskStatus, TaskType,
};
use crate::ports::{Clock, IdGenerator, TaskQuery, TaskStore};

/// Whether a new decomposition task may be created for a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Admission {
    Allowed,
    /// The goal already has a live or recently finished decomposition.
    Duplicate,
    /// Too many decompositions are in flight system-wide.
    WipLimitReached,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CreateOutcome {
    Created(Task),
    Blocked(Admission),
}

pub struct DecompositionGuard {
    store: Arc<dyn TaskStore>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    config: DedupConfig,
}

impl DecompositionGuard {
    pub fn new(
        store: Arc<dyn TaskStore>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        config: DedupConfig,
    ) -> Self {
        Self {
            store,
            ids,
            clock,
            config,
        }
    }

    pub async fn has_existing(&self, goal_id: GoalId) -> Result<bool, StoreError> {
        let live = TaskQuery::with_status(&[TaskStatus::Queued, TaskStatus::InProgress])
            .goal(goal_id)
            .decompositions()
            .limit(1);
        if self.store.count(&live).await? > 0 {
            return Ok(true);
        }

        let since = self.clock.now() - self.config.window();
        let recent = TaskQuery::with_status(&[TaskStatus::Completed, TaskStatus::Failed])
            .goal(goal_id)
            .decompositions()
            .updated_since(since)
            .limit(1);
        Ok(self.store.count(&recent).await? > 0)
    }

    /// True while system-wide in-flight decompositions are below the WIP limit.
    pub async fn can_create(&self) -> Result<bool, StoreError> {
        let in_flight = TaskQuery::with_status(&[TaskStatus::Queued, TaskStatus::InProgress])
            .decompositions();
        Ok(self.store.count(&in_flight).await? < self.config.wip_limit)
    }

    /// The WIP limit wins over the per-goal check.
    pub async fn admit(&self, goal_id: GoalId) -> Result<Admission, StoreError> {
        if !self.can_create().await? {
            return Ok(Admission::WipLimitReached);
        }
        if self.has_existing(goal_id).await? {
            return Ok(Admission::Duplicate);
        }
        Ok(Admission::Allowed)
    }

    /// Insert a queued decomposition task for `goal_id` if admitted.
    pub async fn create(
        &self,
        goal_id: GoalId,
        task_type: TaskType,
        stage: DecompositionStage,
    ) -> Result<CreateOutcome, ForemanError> {
        let admission = self.admit(goal_id).await?;
        if admission != Admission::Allowed {
            info!(goal_id = %goal_id, ?admission, "decomposition blocked");
            return Ok(CreateOutcome::Blocked(admission));
        }

        let task = Task::new(self.ids.generate_task_id(), task_type, self.clock.now())
            .with_goal(goal_id)
            .with_payload(TaskPayload::decomposition(stage));
        self.store.insert(task.clone()).await?;
        info!(goal_id = %goal_id, task_id = %task.id, ?stage, "decomposition created");
        Ok(CreateOutcome::Created(task))
    }
}
