//! Errors - エラー型と分類
//!
//! 想定内の状況（not_in_progress, 容量不足, breaker open, dedup）はエラーにせず
//! 結果値で返します。ここにあるのは「本当に想定外」のものだけです。

use thiserror::Error;

use super::ids::TaskId;
use super::state::TaskStatus;

/// ErrorKind は実行エラーの分類
///
/// - Transient: 一時的なエラー（次の tick でリトライ）
/// - Permanent: 恒久的なエラー（リトライ無意味）
/// - Infrastructure: インフラエラー（store の障害）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
    Infrastructure,
}

/// Port-level error returned by store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),
}

#[derive(Debug, Error)]
pub enum ForemanError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task {task_id} changed concurrently {attempts} times; giving up for this tick")]
    Contention { task_id: TaskId, attempts: u32 },

    #[error("illegal transition {from} -> {to} for task {task_id}")]
    IllegalTransition {
        task_id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ForemanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ForemanError::Store(StoreError::Unavailable(_)) => ErrorKind::Infrastructure,
            ForemanError::Store(_) => ErrorKind::Permanent,
            ForemanError::Contention { .. } => ErrorKind::Transient,
            ForemanError::IllegalTransition { .. } => ErrorKind::Permanent,
            ForemanError::Config(_) => ErrorKind::Permanent,
        }
    }

    /// Worth trying again on the next tick.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient | ErrorKind::Infrastructure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_outage_is_infrastructure_and_retryable() {
        let err: ForemanError = StoreError::Unavailable("connection refused".into()).into();
        assert_eq!(err.kind(), ErrorKind::Infrastructure);
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection refused"));
    }

    #[test]
    fn config_error_is_permanent() {
        let err = ForemanError::Config("no hosts".into());
        assert!(!err.is_retryable());
    }
}
