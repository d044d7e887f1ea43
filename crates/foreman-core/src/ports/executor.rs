//! Executor port - 実際の作業を起動する外部コラボレータ
//!
//! プロセス起動の詳細はこの core の外。ここでは「start」と「kill」だけを知っています。
//! 完了は `Dispatcher::report` で非同期に返ってきます。

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::domain::{HostId, RunId, Task};

/// What the executor needs to start one run.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub run_id: RunId,
    pub host: HostId,
    pub skill: Option<String>,
    pub task: Task,
}

/// ExecutorError は executor 呼び出しの失敗
///
/// どの variant でも start 失敗は host の breaker に 1 回の失敗として数えます。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Error)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum ExecutorError {
    /// The executor is up but declined the run (e.g. rejected skill, host full).
    #[error("run refused: {0}")]
    Refused(String),

    /// The executor or its host could not be reached.
    #[error("executor unavailable: {0}")]
    Unavailable(String),

    /// `kill` for a run the executor does not know (already exited).
    #[error("run {0} not found")]
    NotFound(RunId),
}

#[async_trait]
pub trait Executor: Send + Sync {
    /// Hand off a claimed task. An error means the run did not start.
    async fn start(&self, request: RunRequest) -> Result<(), ExecutorError>;

    /// Force-stop a run (watchdog kill). Best-effort.
    async fn kill(&self, run_id: RunId) -> Result<(), ExecutorError>;
}
