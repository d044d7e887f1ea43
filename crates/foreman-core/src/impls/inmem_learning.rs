//! InMemoryLearningStore - content hash で重複を弾く learning 記録

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::StoreError;
use crate::ports::{LearningEntry, LearningStore};

#[derive(Default)]
struct LearningState {
    entries: Vec<LearningEntry>,
    hashes: HashSet<String>,
}

pub struct InMemoryLearningStore {
    state: Mutex<LearningState>,
    failing: AtomicBool,
}

impl InMemoryLearningStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LearningState::default()),
            failing: AtomicBool::new(false),
        }
    }

    /// Make every `record` call fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn entries(&self) -> Vec<LearningEntry> {
        self.state.lock().await.entries.clone()
    }
}

impl Default for InMemoryLearningStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LearningStore for InMemoryLearningStore {
    async fn record(&self, entry: LearningEntry) -> Result<bool, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("learning store offline".into()));
        }
        let mut state = self.state.lock().await;
        if !state.hashes.insert(entry.content_hash.clone()) {
            return Ok(false);
        }
        state.entries.push(entry);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::TaskId;
    use chrono::Utc;
    use ulid::Ulid;

    fn entry(content: &str) -> LearningEntry {
        LearningEntry::new(
            TaskId::from_ulid(Ulid::new()),
            "failure_pattern",
            "Watchdog kill",
            content,
            serde_json::json!({}),
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn duplicate_content_is_skipped() {
        let store = InMemoryLearningStore::new();
        assert!(store.record(entry("RSS exceeded")).await.unwrap());
        assert!(!store.record(entry("RSS exceeded")).await.unwrap());
        assert!(store.record(entry("CPU exceeded")).await.unwrap());
        assert_eq!(store.entries().await.len(), 2);
    }

    #[tokio::test]
    async fn failing_store_reports_unavailable() {
        let store = InMemoryLearningStore::new();
        store.set_failing(true);
        assert!(store.record(entry("x")).await.is_err());
    }
}
