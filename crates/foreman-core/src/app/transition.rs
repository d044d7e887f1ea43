//! Optimistic read-modify-write of a single task.
//!
//! Every status change in the core goes through `transition`: read the row,
//! apply a closure to a copy, write it back with compare-and-set on
//! `(status, version)`. A version conflict (same status, someone else wrote)
//! is retried; a status conflict is final and reported to the caller.

use tracing::debug;

use crate::domain::{ForemanError, RequeueSkip, Task, TaskId, TaskStatus};
use crate::ports::{CasOutcome, TaskStore};

/// Result of a guarded transition.
#[derive(Debug)]
pub enum Transition<R> {
    /// Written; `task` is the stored row (with its new version).
    Applied { task: Task, value: R },
    /// The task was not in `expected` status, or does not exist.
    Skipped(RequeueSkip),
    /// The closure declined to change the row (e.g. stale run id).
    Declined,
}

impl<R> Transition<R> {
    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied { .. })
    }
}

/// Apply `mutate` to task `id` iff it is at `expected` status.
///
/// `mutate` may run more than once (once per attempt) and must be a pure
/// function of the row it is handed. Returning `None` leaves the row untouched.
pub async fn transition<R, F>(
    store: &dyn TaskStore,
    id: TaskId,
    expected: TaskStatus,
    max_retries: u32,
    mut mutate: F,
) -> Result<Transition<R>, ForemanError>
where
    F: FnMut(&mut Task) -> Option<R> + Send,
    R: Send,
{
    let attempts = max_retries.saturating_add(1);
    for attempt in 1..=attempts {
        let Some(current) = store.get(id).await? else {
            return Ok(Transition::Skipped(RequeueSkip::NotFound));
        };
        if current.status != expected {
            return Ok(Transition::Skipped(RequeueSkip::NotInProgress {
                actual: current.status,
            }));
        }

        let mut next = current.clone();
        let Some(value) = mutate(&mut next) else {
            return Ok(Transition::Declined);
        };
        if !current.status.can_transition_to(next.status) {
            return Err(ForemanError::IllegalTransition {
                task_id: id,
                from: current.status,
                to: next.status,
            });
        }

        match store
            .compare_and_set(expected, current.version, next.clone())
            .await?
        {
            CasOutcome::Applied { version } => {
                next.version = version;
                return Ok(Transition::Applied { task: next, value });
            }
            CasOutcome::StatusMismatch { actual } => {
                return Ok(Transition::Skipped(RequeueSkip::NotInProgress { actual }));
            }
            CasOutcome::NotFound => return Ok(Transition::Skipped(RequeueSkip::NotFound)),
            CasOutcome::VersionMismatch { actual } => {
                debug!(task_id = %id, attempt, expected = current.version, actual, "cas conflict, retrying");
            }
        }
    }
    Err(ForemanError::Contention {
        task_id: id,
        attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use crate::impls::InMemoryTaskStore;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use ulid::Ulid;

    fn in_progress() -> Task {
        let mut t = Task::new(TaskId::from_ulid(Ulid::new()), TaskType::new("dev"), Utc::now());
        t.status = TaskStatus::InProgress;
        t
    }

    #[tokio::test]
    async fn applies_and_bumps_version() {
        let store = InMemoryTaskStore::new();
        let t = in_progress();
        store.insert(t.clone()).await.unwrap();

        let r = transition(&store, t.id, TaskStatus::InProgress, 3, |task| {
            task.status = TaskStatus::Completed;
            Some(())
        })
        .await
        .unwrap();

        let Transition::Applied { task, .. } = r else {
            panic!("expected applied");
        };
        assert_eq!(task.version, 1);
        assert_eq!(store.get(t.id).await.unwrap().unwrap().status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn wrong_status_is_skipped_with_actual() {
        let store = InMemoryTaskStore::new();
        let mut t = in_progress();
        t.status = TaskStatus::Completed;
        store.insert(t.clone()).await.unwrap();

        let r = transition(&store, t.id, TaskStatus::InProgress, 3, |_| Some(()))
            .await
            .unwrap();
        assert!(matches!(
            r,
            Transition::Skipped(RequeueSkip::NotInProgress {
                actual: TaskStatus::Completed
            })
        ));
    }

    #[tokio::test]
    async fn illegal_target_is_an_error() {
        let store = InMemoryTaskStore::new();
        let t = Task::new(TaskId::from_ulid(Ulid::new()), TaskType::new("dev"), Utc::now());
        store.insert(t.clone()).await.unwrap();

        let err = transition(&store, t.id, TaskStatus::Queued, 3, |task| {
            task.status = TaskStatus::Completed;
            Some(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ForemanError::IllegalTransition {
                from: TaskStatus::Queued,
                to: TaskStatus::Completed,
                ..
            }
        ));
        assert_eq!(store.get(t.id).await.unwrap().unwrap().status, TaskStatus::Queued);
    }

    /// Store whose first `n` CAS calls report a version conflict.
    struct Flaky {
        inner: InMemoryTaskStore,
        conflicts: AtomicU32,
    }

    #[async_trait]
    impl TaskStore for Flaky {
        async fn insert(&self, task: Task) -> Result<(), crate::domain::StoreError> {
            self.inner.insert(task).await
        }
        async fn get(&self, id: TaskId) -> Result<Option<Task>, crate::domain::StoreError> {
            self.inner.get(id).await
        }
        async fn list(
            &self,
            q: &crate::ports::TaskQuery,
        ) -> Result<Vec<Task>, crate::domain::StoreError> {
            self.inner.list(q).await
        }
        async fn count(&self, q: &crate::ports::TaskQuery) -> Result<usize, crate::domain::StoreError> {
            self.inner.count(q).await
        }
        async fn compare_and_set(
            &self,
            s: TaskStatus,
            v: u64,
            t: Task,
        ) -> Result<CasOutcome, crate::domain::StoreError> {
            if self
                .conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Ok(CasOutcome::VersionMismatch { actual: v + 1 });
            }
            self.inner.compare_and_set(s, v, t).await
        }
    }

    #[tokio::test]
    async fn version_conflicts_are_retried_then_give_up() {
        let t = in_progress();
        let store = Flaky {
            inner: InMemoryTaskStore::new(),
            conflicts: AtomicU32::new(2),
        };
        store.insert(t.clone()).await.unwrap();

        let r = transition(&store, t.id, TaskStatus::InProgress, 2, |_| Some(()))
            .await
            .unwrap();
        assert!(r.is_applied());

        store.conflicts.store(10, Ordering::SeqCst);
        let err = transition(&store, t.id, TaskStatus::InProgress, 2, |_| Some(()))
            .await
            .unwrap_err();
        assert!(matches!(err, ForemanError::Contention { attempts: 3, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn declined_leaves_row_untouched() {
        let store = InMemoryTaskStore::new();
        let t = in_progress();
        store.insert(t.clone()).await.unwrap();

        let r: Transition<()> = transition(&store, t.id, TaskStatus::InProgress, 3, |_| None)
            .await
            .unwrap();
        assert!(matches!(r, Transition::Declined));
        assert_eq!(store.get(t.id).await.unwrap().unwrap().version, 0);
    }
}
