//! Status - 運用向けのスナップショット
//!
//! status ごとの件数（全体と task_type 別）、host ごとの容量、breaker の状態を
//! まとめて返します。
//! quarantined の task は件数に残り続けます（自動復帰しない）。

use serde::Serialize;

use super::breaker::{BreakerSnapshot, CircuitBreaker};
use super::capacity::{CapacityAllocator, CapacityBudget};
use crate::domain::{StoreError, TaskStatus, TaskType};
use crate::ports::{TaskQuery, TaskStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatusCounts {
    pub queued: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub completed_no_pr: usize,
    pub failed: usize,
    pub quarantined: usize,
}

impl StatusCounts {
    fn slot(&mut self, status: TaskStatus) -> &mut usize {
        match status {
            TaskStatus::Queued => &mut self.queued,
            TaskStatus::InProgress => &mut self.in_progress,
            TaskStatus::Completed => &mut self.completed,
            TaskStatus::CompletedNoPr => &mut self.completed_no_pr,
            TaskStatus::Failed => &mut self.failed,
            TaskStatus::Quarantined => &mut self.quarantined,
        }
    }

    pub fn total(&self) -> usize {
        self.queued
            + self.in_progress
            + self.completed
            + self.completed_no_pr
            + self.failed
            + self.quarantined
    }
}

pub async fn status_counts(store: &dyn TaskStore) -> Result<StatusCounts, StoreError> {
    counts_where(store, None).await
}

pub async fn status_counts_of_type(
    store: &dyn TaskStore,
    task_type: &TaskType,
) -> Result<StatusCounts, StoreError> {
    counts_where(store, Some(task_type)).await
}

async fn counts_where(
    store: &dyn TaskStore,
    task_type: Option<&TaskType>,
) -> Result<StatusCounts, StoreError> {
    let mut counts = StatusCounts::default();
    for status in TaskStatus::ALL {
        let mut query = TaskQuery::with_status(&[status]);
        if let Some(t) = task_type {
            query = query.of_type(t.clone());
        }
        *counts.slot(status) = store.count(&query).await?;
    }
    Ok(counts)
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub tasks: StatusCounts,

    /// Routed types that have at least one task.
    pub by_type: Vec<(TaskType, StatusCounts)>,

    pub capacity: Vec<CapacityBudget>,
    pub breakers: Vec<(String, BreakerSnapshot)>,
}

pub async fn collect_status(
    store: &dyn TaskStore,
    task_types: &[TaskType],
    capacity: &CapacityAllocator,
    breaker: &CircuitBreaker,
) -> Result<StatusReport, StoreError> {
    let mut by_type = Vec::new();
    for t in task_types {
        let counts = status_counts_of_type(store, t).await?;
        if counts.total() > 0 {
            by_type.push((t.clone(), counts));
        }
    }
    Ok(StatusReport {
        tasks: status_counts(store).await?,
        by_type,
        capacity: capacity.budgets().await?,
        breakers: breaker.snapshot(),
    })
}
