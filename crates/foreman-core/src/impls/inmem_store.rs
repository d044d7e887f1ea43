//! InMemoryTaskStore - 開発・テスト用の正本
//!
//! - HashMap<TaskId, Task> を 1 本の tokio Mutex で守る（行ロックの代わり）
//! - compare_and_set はロック内で status と version を比較してから書く
//! - `set_available(false)` で store 障害を再現できる

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{StoreError, Task, TaskId, TaskStatus};
use crate::ports::{CasOutcome, TaskQuery, TaskStore};

pub struct InMemoryTaskStore {
    tasks: Mutex<HashMap<TaskId, Task>>,
    available: AtomicBool,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: every call returns `StoreError::Unavailable`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Overwrite a row without any check (test setup only).
    pub async fn put(&self, task: Task) {
        self.tasks.lock().await.insert(task.id, task);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("in-memory store marked unavailable".into()))
        }
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: Task) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock().await;
        if tasks.contains_key(&task.id) {
            return Err(StoreError::Duplicate(task.id.to_string()));
        }
        tasks.insert(task.id, task);
        Ok(())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        self.check_available()?;
        Ok(self.tasks.lock().await.get(&id).cloned())
    }

    async fn list(&self, query: &TaskQuery) -> Result<Vec<Task>, StoreError> {
        self.check_available()?;
        let tasks = self.tasks.lock().await;
        let mut rows: Vec<Task> = tasks.values().filter(|t| query.matches(t)).cloned().collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn count(&self, query: &TaskQuery) -> Result<usize, StoreError> {
        self.check_available()?;
        let tasks = self.tasks.lock().await;
        Ok(tasks.values().filter(|t| query.matches(t)).count())
    }

    async fn compare_and_set(
        &self,
        expected_status: TaskStatus,
        expected_version: u64,
        mut replacement: Task,
    ) -> Result<CasOutcome, StoreError> {
        self.check_available()?;
        let mut tasks = self.tasks.lock().await;
        let Some(current) = tasks.get_mut(&replacement.id) else {
            return Ok(CasOutcome::NotFound);
        };
        if current.status != expected_status {
            return Ok(CasOutcome::StatusMismatch {
                actual: current.status,
            });
        }
        if current.version != expected_version {
            return Ok(CasOutcome::VersionMismatch {
                actual: current.version,
            });
        }
        replacement.version = expected_version + 1;
        let version = replacement.version;
        *current = replacement;
        Ok(CasOutcome::Applied { version })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskType;
    use chrono::{Duration, Utc};
    use std::sync::Arc;
    use ulid::Ulid;

    fn task_at(offset_secs: i64) -> Task {
        Task::new(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new("dev"),
            Utc::now() + Duration::seconds(offset_secs),
        )
    }

    #[tokio::test]
    async fn insert_rejects_duplicates() {
        let store = InMemoryTaskStore::new();
        let t = task_at(0);
        store.insert(t.clone()).await.unwrap();
        let err = store.insert(t).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(_)));
    }

    #[tokio::test]
    async fn list_is_oldest_first_and_limited() {
        let store = InMemoryTaskStore::new();
        let newer = task_at(10);
        let older = task_at(0);
        store.insert(newer.clone()).await.unwrap();
        store.insert(older.clone()).await.unwrap();

        let rows = store.list(&TaskQuery::default()).await.unwrap();
        assert_eq!(rows[0].id, older.id);
        assert_eq!(rows[1].id, newer.id);

        let rows = store.list(&TaskQuery::default().limit(1)).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn cas_applies_once_and_bumps_version() {
        let store = InMemoryTaskStore::new();
        let t = task_at(0);
        store.insert(t.clone()).await.unwrap();

        let mut claimed = t.clone();
        claimed.status = TaskStatus::InProgress;
        let out = store
            .compare_and_set(TaskStatus::Queued, 0, claimed.clone())
            .await
            .unwrap();
        assert_eq!(out, CasOutcome::Applied { version: 1 });

        // second writer still believes the row is queued
        let out = store
            .compare_and_set(TaskStatus::Queued, 0, claimed)
            .await
            .unwrap();
        assert_eq!(
            out,
            CasOutcome::StatusMismatch {
                actual: TaskStatus::InProgress
            }
        );
    }

    #[tokio::test]
    async fn cas_detects_stale_version() {
        let store = InMemoryTaskStore::new();
        let mut t = task_at(0);
        t.status = TaskStatus::InProgress;
        store.insert(t.clone()).await.unwrap();

        store
            .compare_and_set(TaskStatus::InProgress, 0, t.clone())
            .await
            .unwrap();
        let out = store
            .compare_and_set(TaskStatus::InProgress, 0, t)
            .await
            .unwrap();
        assert_eq!(out, CasOutcome::VersionMismatch { actual: 1 });
    }

    #[tokio::test]
    async fn concurrent_claims_have_one_winner() {
        let store = Arc::new(InMemoryTaskStore::new());
        let t = task_at(0);
        store.insert(t.clone()).await.unwrap();

        let mut joins = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let mut claimed = t.clone();
            claimed.status = TaskStatus::InProgress;
            joins.push(tokio::spawn(async move {
                store
                    .compare_and_set(TaskStatus::Queued, 0, claimed)
                    .await
                    .unwrap()
            }));
        }

        let mut applied = 0;
        for j in joins {
            if matches!(j.await.unwrap(), CasOutcome::Applied { .. }) {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
    }

    #[tokio::test]
    async fn unavailable_store_errors() {
        let store = InMemoryTaskStore::new();
        store.set_available(false);
        let err = store.count(&TaskQuery::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }
}
