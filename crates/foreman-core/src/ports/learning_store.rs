//! LearningStore port - 失敗パターンの記録先
//!
//! watchdog の kill ごとに best-effort で 1 件書きます。失敗しても
//! requeue/quarantine の結果には影響しません。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{StoreError, TaskId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEntry {
    pub title: String,
    pub content: String,
    pub category: String,
    pub task_id: TaskId,
    pub metadata: serde_json::Value,

    /// sha256(title + content), used to skip duplicates.
    pub content_hash: String,

    pub created_at: DateTime<Utc>,
}

impl LearningEntry {
    pub fn new(
        task_id: TaskId,
        category: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        let title = title.into();
        let content = content.into();
        let content_hash = content_hash(&title, &content);
        Self {
            title,
            content,
            category: category.into(),
            task_id,
            metadata,
            content_hash,
            created_at,
        }
    }
}

pub fn content_hash(title: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(title.as_bytes());
    hasher.update(b"\n");
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

#[async_trait]
pub trait LearningStore: Send + Sync {
    /// Returns `false` when an entry with the same content hash already exists.
    async fn record(&self, entry: LearningEntry) -> Result<bool, StoreError>;
}
