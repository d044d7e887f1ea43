//! WatchdogEngine - kill → requeue → quarantine のはしご
//!
//! # 失敗予算
//! - watchdog kill: `retry_count` と `failure_count` の両方を +1
//! - 通常の失敗: `failure_count` だけ +1
//! - `retry_count` が quarantine_threshold に達したら quarantined（自動復帰なし）
//! - `failure_count` が max_failures に達したら failed
//!
//! # 並行性
//! カウンタの更新は全て `transition`（CAS + リトライ）経由。同じ task への
//! 2 つの kill が両方「1 回目」になることはありません。負けた側は task が
//! もう in_progress でないことを見て `Skipped(NotInProgress)` を返します。
//!
//! learning の記録は best-effort。失敗しても結果は変わりません。

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::transition::{transition, Transition};
use crate::config::WatchdogConfig;
use crate::domain::{
    DomainEvent, ErrorKind, FailureOutcome, ForemanError, QuarantineDetails, QuarantineInfo,
    QuarantineReason, RequeueOutcome, RequeueSkip, ResourceMetrics, ResourceSample, RunId, Task,
    TaskId, TaskStatus, Violation,
};
use crate::ports::{Clock, EventSink, LearningEntry, LearningStore, TaskQuery, TaskStore};

/// Reason recorded when a run stops sending heartbeats.
pub const HEARTBEAT_TIMEOUT: &str = "heartbeat_timeout";

/// Learning category for watchdog kills.
pub const FAILURE_PATTERN: &str = "failure_pattern";

/// One run taken down by `reap_stale`.
///
/// `run_id` は kill 時点で task が持っていた run。executor 側のプロセスはまだ
/// 生きているかもしれないので、呼び出し側が `Executor::kill` で止めます。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reaped {
    pub task_id: TaskId,
    pub run_id: Option<RunId>,
    pub outcome: RequeueOutcome,
}

pub struct WatchdogEngine {
    store: Arc<dyn TaskStore>,
    learning: Arc<dyn LearningStore>,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: WatchdogConfig,
}

impl WatchdogEngine {
    pub fn new(
        store: Arc<dyn TaskStore>,
        learning: Arc<dyn LearningStore>,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: WatchdogConfig,
    ) -> Self {
        Self {
            store,
            learning,
            events,
            clock,
            config,
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Check a resource sample against the configured ceilings. Memory is checked first.
    pub fn evaluate(&self, sample: ResourceSample) -> Option<Violation> {
        let thresholds = &self.config.thresholds;
        if let Some(limit) = thresholds.rss_mb
            && sample.rss_mb > limit
        {
            return Some(Violation {
                reason: format!("RSS exceeded: {:.0} MB > {:.0} MB", sample.rss_mb, limit),
                metrics: ResourceMetrics {
                    rss_mb: Some(sample.rss_mb),
                    cpu_pct: Some(sample.cpu_pct),
                    threshold_mb: Some(limit),
                },
            });
        }
        if let Some(limit) = thresholds.cpu_pct
            && sample.cpu_pct > limit
        {
            return Some(Violation {
                reason: format!("CPU exceeded: {:.1}% > {:.1}%", sample.cpu_pct, limit),
                metrics: ResourceMetrics {
                    rss_mb: Some(sample.rss_mb),
                    cpu_pct: Some(sample.cpu_pct),
                    threshold_mb: thresholds.rss_mb,
                },
            });
        }
        None
    }

    /// Count a watchdog kill and either requeue or quarantine the task.
    ///
    /// Only an `in_progress` task is touched; anything else is reported back as
    /// `Skipped` with the actual status.
    pub async fn requeue(
        &self,
        task_id: TaskId,
        reason: &str,
        metrics: ResourceMetrics,
    ) -> Result<RequeueOutcome, ForemanError> {
        let outcome = self.kill(task_id, reason, metrics, |_| true).await?;
        Ok(outcome.unwrap_or(RequeueOutcome::Skipped(RequeueSkip::NotFound)))
    }

    /// `requeue` for one specific run. Signals about an older run of the task are
    /// dropped (`Ok(None)`).
    pub async fn requeue_run(
        &self,
        task_id: TaskId,
        run_id: RunId,
        reason: &str,
        metrics: ResourceMetrics,
    ) -> Result<Option<RequeueOutcome>, ForemanError> {
        self.kill(task_id, reason, metrics, move |t| t.is_current_run(&run_id))
            .await
    }

    /// Shared kill path. `still_applies` is re-checked on every CAS attempt;
    /// `Ok(None)` means it no longer held.
    async fn kill<P>(
        &self,
        task_id: TaskId,
        reason: &str,
        metrics: ResourceMetrics,
        still_applies: P,
    ) -> Result<Option<RequeueOutcome>, ForemanError>
    where
        P: Fn(&Task) -> bool + Send + Sync,
    {
        let now = self.clock.now();
        let threshold = self.config.quarantine_threshold;

        let result = transition(
            self.store.as_ref(),
            task_id,
            TaskStatus::InProgress,
            self.config.max_cas_retries,
            |task| {
                if !still_applies(task) {
                    return None;
                }
                let (retries, failures) = task.payload.watchdog.record_kill();
                task.payload.last_error = Some(reason.to_string());
                if retries < threshold {
                    task.release(now);
                    return Some(RequeueOutcome::Requeued {
                        retry_count: retries,
                    });
                }
                task.payload.watchdog.quarantine = Some(QuarantineInfo {
                    reason: QuarantineReason::ResourceHog,
                    details: QuarantineDetails {
                        watchdog_retries: retries,
                        total_failures: failures,
                    },
                    last_signal: reason.to_string(),
                    metrics,
                    quarantined_at: now,
                });
                task.finish(TaskStatus::Quarantined, now);
                Some(RequeueOutcome::Quarantined {
                    retry_count: retries,
                    total_failures: failures,
                })
            },
        )
        .await?;

        let (task, outcome) = match result {
            Transition::Applied { task, value } => (task, value),
            Transition::Skipped(skip) => {
                info!(task_id = %task_id, reason, skip = ?skip, "watchdog signal ignored");
                return Ok(Some(RequeueOutcome::Skipped(skip)));
            }
            Transition::Declined => return Ok(None),
        };

        let failures = task.payload.watchdog.failure_count;
        match &outcome {
            RequeueOutcome::Requeued { retry_count } => {
                warn!(task_id = %task_id, reason, retry_count, failure_count = failures, "task killed and requeued");
                self.events.emit(DomainEvent::TaskRequeued {
                    task_id,
                    reason: reason.to_string(),
                    retry_count: *retry_count,
                    failure_count: failures,
                });
            }
            RequeueOutcome::Quarantined {
                retry_count,
                total_failures,
            } => {
                self.events.emit(DomainEvent::TaskQuarantined {
                    task_id,
                    watchdog_retries: *retry_count,
                    total_failures: *total_failures,
                });
            }
            RequeueOutcome::Skipped(_) => {}
        }

        self.capture_learning(&task, reason, &metrics, &outcome).await;
        Ok(Some(outcome))
    }

    /// Record the kill as a failure pattern. Errors are logged, never returned.
    async fn capture_learning(
        &self,
        task: &Task,
        reason: &str,
        metrics: &ResourceMetrics,
        outcome: &RequeueOutcome,
    ) {
        let verdict = if outcome.quarantined() {
            "quarantined"
        } else {
            "requeued"
        };
        let w = &task.payload.watchdog;
        let title = format!("Watchdog kill: {} task {}", task.task_type, task.id);
        let content = format!(
            "Task {} ({}) was killed by the watchdog: {}. Kill #{} ({} failures in total); task {}.",
            task.id, task.task_type, reason, w.retry_count, w.failure_count, verdict
        );
        let metadata = json!({
            "task_id": task.id.to_string(),
            "task_type": task.task_type.as_str(),
            "reason": reason,
            "watchdog_retry_count": w.retry_count,
            "failure_count": w.failure_count,
            "outcome": verdict,
            "metrics": metrics,
        });
        let entry = LearningEntry::new(
            task.id,
            FAILURE_PATTERN,
            title,
            content,
            metadata,
            self.clock.now(),
        );

        match self.learning.record(entry).await {
            Ok(true) => debug!(task_id = %task.id, "failure pattern recorded"),
            Ok(false) => debug!(task_id = %task.id, "failure pattern already recorded"),
            Err(e) => warn!(task_id = %task.id, error = %e, "failed to record failure pattern"),
        }
    }

    /// Refresh the heartbeat of a running attempt. Returns false for stale runs
    /// or tasks that are no longer in progress.
    pub async fn heartbeat(&self, task_id: TaskId, run_id: RunId) -> Result<bool, ForemanError> {
        let now = self.clock.now();
        let result = transition(
            self.store.as_ref(),
            task_id,
            TaskStatus::InProgress,
            self.config.max_cas_retries,
            |task| {
                if !task.is_current_run(&run_id) {
                    return None;
                }
                task.heartbeat_at = Some(now);
                task.updated_at = now;
                Some(())
            },
        )
        .await?;
        if !result.is_applied() {
            debug!(task_id = %task_id, run_id = %run_id, "heartbeat ignored");
        }
        Ok(result.is_applied())
    }

    /// Kill every in-progress task whose last heartbeat is older than the timeout.
    ///
    /// Only the task record is updated here. The returned runs may still be
    /// executing; stopping them is the caller's job.
    ///
    /// A store outage aborts the sweep; contention on a single task is logged and
    /// left for the next tick.
    pub async fn reap_stale(&self) -> Result<Vec<Reaped>, ForemanError> {
        let now = self.clock.now();
        let cutoff = now - self.config.heartbeat_timeout();
        let is_stale = move |t: &Task| t.last_seen().unwrap_or(t.updated_at) < cutoff;

        let running = self
            .store
            .list(&TaskQuery::with_status(&[TaskStatus::InProgress]))
            .await?;

        let mut reaped = Vec::new();
        for task in running.iter().filter(|t| is_stale(t)) {
            let run_id = task.payload.current_run_id;
            // a fresh run started on the same task since the listing is not ours to kill
            let same_run = move |t: &Task| is_stale(t) && t.payload.current_run_id == run_id;
            match self
                .kill(task.id, HEARTBEAT_TIMEOUT, ResourceMetrics::default(), same_run)
                .await
            {
                Ok(Some(outcome)) => reaped.push(Reaped {
                    task_id: task.id,
                    run_id,
                    outcome,
                }),
                Ok(None) => debug!(task_id = %task.id, "heartbeat arrived before reaping"),
                Err(e) if e.kind() == ErrorKind::Infrastructure => return Err(e),
                Err(e) => warn!(task_id = %task.id, error = %e, "failed to reap stale task"),
            }
        }
        Ok(reaped)
    }

    /// Count an ordinary failure: requeue while under `max_failures`, else mark failed.
    pub async fn fail(&self, task_id: TaskId, reason: &str) -> Result<FailureOutcome, ForemanError> {
        let outcome = self.fail_if(task_id, reason, |_| true).await?;
        Ok(outcome.unwrap_or(FailureOutcome::Skipped(RequeueSkip::NotFound)))
    }

    /// `fail` for one specific run; reports about an older run are dropped.
    pub async fn fail_run(
        &self,
        task_id: TaskId,
        run_id: RunId,
        reason: &str,
    ) -> Result<Option<FailureOutcome>, ForemanError> {
        self.fail_if(task_id, reason, move |t| t.is_current_run(&run_id))
            .await
    }

    async fn fail_if<P>(
        &self,
        task_id: TaskId,
        reason: &str,
        still_applies: P,
    ) -> Result<Option<FailureOutcome>, ForemanError>
    where
        P: Fn(&Task) -> bool + Send + Sync,
    {
        let now = self.clock.now();
        let max_failures = self.config.max_failures;

        let result = transition(
            self.store.as_ref(),
            task_id,
            TaskStatus::InProgress,
            self.config.max_cas_retries,
            |task| {
                if !still_applies(task) {
                    return None;
                }
                let failures = task.payload.watchdog.record_failure();
                task.payload.last_error = Some(reason.to_string());
                if failures < max_failures {
                    task.release(now);
                    Some(FailureOutcome::Requeued {
                        failure_count: failures,
                    })
                } else {
                    task.finish(TaskStatus::Failed, now);
                    Some(FailureOutcome::Failed {
                        failure_count: failures,
                    })
                }
            },
        )
        .await?;

        let (task, outcome) = match result {
            Transition::Applied { task, value } => (task, value),
            Transition::Skipped(skip) => return Ok(Some(FailureOutcome::Skipped(skip))),
            Transition::Declined => return Ok(None),
        };

        match &outcome {
            FailureOutcome::Requeued { failure_count } => {
                info!(task_id = %task_id, reason, failure_count, "task failed, requeued");
                self.events.emit(DomainEvent::TaskRequeued {
                    task_id,
                    reason: reason.to_string(),
                    retry_count: task.payload.watchdog.retry_count,
                    failure_count: *failure_count,
                });
            }
            FailureOutcome::Failed { failure_count } => {
                warn!(task_id = %task_id, reason, failure_count, "failure budget exhausted");
                self.events.emit(DomainEvent::TaskFailed {
                    task_id,
                    reason: reason.to_string(),
                    failure_count: *failure_count,
                });
            }
            FailureOutcome::Skipped(_) => {}
        }
        Ok(Some(outcome))
    }
}
