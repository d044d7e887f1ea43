//! Dispatcher - 1 tick 分の合成ルート
//!
//! # tick の流れ
//! 1. heartbeat の途絶えた run を回収（watchdog kill と同じ扱い）し、executor 側の
//!    run も止める（止めないと再 dispatch した run と二重に走る）
//! 2. queued を古い順に見ていく
//!    - 未知の task_type → failed（`invalid_task_type`、リトライしない）
//!    - host の breaker が OPEN → skip
//!    - HALF_OPEN は probe 1 本だけ。その run の結果が返るまで同じ host には出さない
//!    - autonomous 枠がない → skip
//!    - CAS で queued → in_progress を取ってから executor に渡す
//! 3. executor の起動失敗は breaker の失敗として数え、claim を queued に戻す
//!    （失敗予算は消費しない）
//!
//! 完了は `report`、リソース違反は `enforce` から入ってきます。

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::breaker::{CircuitBreaker, Permit};
use super::capacity::CapacityAllocator;
use super::router::TaskRouter;
use super::transition::{transition, Transition};
use super::watchdog::{Reaped, WatchdogEngine};
use crate::domain::{
    DomainEvent, ErrorKind, ExecutionOutcome, FailureOutcome, ForemanError, HostId,
    RequeueOutcome, RequeueSkip, ResourceSample, RunId, Task, TaskId, TaskStatus,
};
use crate::ports::{
    Clock, EventSink, Executor, ExecutorError, IdGenerator, RunRequest, TaskQuery, TaskStore,
};

/// `last_error` of a task whose type no route knows.
pub const INVALID_TASK_TYPE: &str = "invalid_task_type";

/// Why a queued task was not started this tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DispatchSkip {
    /// Unknown task type; the task was moved to `failed`.
    InvalidTaskType,
    BreakerOpen { key: String },
    /// The half-open breaker's single probe run has not reported back yet.
    ProbeInFlight { key: String },
    AtCapacity { host: HostId },
    /// Another writer changed the task between listing and claiming.
    Conflict,
    /// The executor refused the run; the claim was reverted.
    StartFailed { error: ExecutorError },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dispatched {
    pub task_id: TaskId,
    pub run_id: RunId,
    pub host: HostId,
    pub skill: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub reaped: Vec<Reaped>,
    pub dispatched: Vec<Dispatched>,
    pub skipped: Vec<(TaskId, DispatchSkip)>,

    /// Tasks whose handling failed with a non-fatal error; retried next tick.
    pub errors: usize,
}

impl TickReport {
    pub fn is_idle(&self) -> bool {
        self.reaped.is_empty() && self.dispatched.is_empty()
    }
}

/// What `report` did with an execution outcome.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum ReportOutcome {
    Finished { status: TaskStatus },
    Failure { outcome: FailureOutcome },
    /// Dependency problem: returned to the queue without charging the task.
    Released,
    Watchdog { outcome: RequeueOutcome },
    /// The run is no longer the task's current attempt.
    Stale,
}

enum Step {
    Started(Dispatched),
    Skipped(DispatchSkip),
}

/// Everything the dispatcher talks to.
pub struct DispatchContext {
    pub store: Arc<dyn TaskStore>,
    pub router: Arc<TaskRouter>,
    pub breaker: Arc<CircuitBreaker>,
    pub capacity: Arc<CapacityAllocator>,
    pub watchdog: Arc<WatchdogEngine>,
    pub executor: Arc<dyn Executor>,
    pub events: Arc<dyn EventSink>,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
}

pub struct Dispatcher {
    ctx: DispatchContext,
    max_cas_retries: u32,

    /// HALF_OPEN の probe として出した run → breaker key
    probe_runs: Mutex<HashMap<RunId, String>>,
}

impl Dispatcher {
    pub fn new(ctx: DispatchContext) -> Self {
        let max_cas_retries = ctx.watchdog.config().max_cas_retries;
        Self {
            ctx,
            max_cas_retries,
            probe_runs: Mutex::new(HashMap::new()),
        }
    }

    /// One scheduler pass. Store outages abort the tick; anything else is
    /// counted in `errors` and retried on the next tick.
    pub async fn tick(&self) -> Result<TickReport, ForemanError> {
        let reaped = self.ctx.watchdog.reap_stale().await?;
        for r in &reaped {
            self.stop_reaped(r).await;
        }
        let mut report = TickReport {
            reaped,
            ..TickReport::default()
        };

        let queued = self
            .ctx
            .store
            .list(&TaskQuery::with_status(&[TaskStatus::Queued]))
            .await?;

        for task in queued {
            let task_id = task.id;
            match self.dispatch_one(task).await {
                Ok(Step::Started(d)) => report.dispatched.push(d),
                Ok(Step::Skipped(skip)) => {
                    debug!(task_id = %task_id, ?skip, "task not dispatched");
                    report.skipped.push((task_id, skip));
                }
                Err(e) if e.kind() == ErrorKind::Infrastructure => return Err(e),
                Err(e) => {
                    warn!(task_id = %task_id, error = %e, "dispatch failed, retrying next tick");
                    report.errors += 1;
                }
            }
        }

        if !report.is_idle() {
            info!(
                reaped = report.reaped.len(),
                dispatched = report.dispatched.len(),
                skipped = report.skipped.len(),
                errors = report.errors,
                "tick finished"
            );
        }
        Ok(report)
    }

    async fn dispatch_one(&self, task: Task) -> Result<Step, ForemanError> {
        let ctx = &self.ctx;
        let Some(host) = ctx.router.location_for(task.task_type.as_str()) else {
            return self.reject_invalid(task.id).await;
        };

        let key = host.as_str().to_string();
        let probing = match ctx.breaker.try_acquire(&key) {
            Permit::Granted => false,
            Permit::Probe => true,
            Permit::Denied {
                probe_in_flight: false,
            } => return Ok(Step::Skipped(DispatchSkip::BreakerOpen { key })),
            Permit::Denied {
                probe_in_flight: true,
            } => return Ok(Step::Skipped(DispatchSkip::ProbeInFlight { key })),
        };

        let step = self.claim_and_start(task, host, &key, probing).await;
        if probing && !matches!(step, Ok(Step::Started(_))) {
            // never ran: the next task may carry the probe
            ctx.breaker.release_probe(&key);
        }
        step
    }

    async fn claim_and_start(
        &self,
        task: Task,
        host: HostId,
        key: &str,
        probing: bool,
    ) -> Result<Step, ForemanError> {
        let ctx = &self.ctx;
        let budget = ctx.capacity.budget(&host).await?;
        if !budget.can_dispatch_autonomous() {
            return Ok(Step::Skipped(DispatchSkip::AtCapacity { host }));
        }

        let skill = ctx
            .router
            .resolve_skill(&task.task_type, &task.payload)
            .map(|r| r.skill);
        let run_id = ctx.ids.generate_run_id();
        let now = ctx.clock.now();

        let claimed = transition(
            ctx.store.as_ref(),
            task.id,
            TaskStatus::Queued,
            self.max_cas_retries,
            |t| {
                t.start_run(host.clone(), run_id, now);
                t.payload.skill = skill.clone();
                Some(())
            },
        )
        .await?;
        let Transition::Applied { task: claimed, .. } = claimed else {
            return Ok(Step::Skipped(DispatchSkip::Conflict));
        };
        if probing {
            self.probe_runs
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .insert(run_id, key.to_string());
        }

        let request = RunRequest {
            run_id,
            host: host.clone(),
            skill: skill.clone(),
            task: claimed,
        };
        if let Err(err) = ctx.executor.start(request).await {
            warn!(task_id = %task.id, host = %host, error = %err, "executor refused run");
            self.take_probe(&run_id);
            ctx.breaker.record_failure(key);
            self.release(task.id, run_id, &err.to_string()).await?;
            return Ok(Step::Skipped(DispatchSkip::StartFailed { error: err }));
        }

        info!(task_id = %task.id, run_id = %run_id, host = %host, skill = ?skill, "task dispatched");
        ctx.events.emit(DomainEvent::TaskDispatched {
            task_id: task.id,
            run_id,
            host: host.clone(),
            skill: skill.clone(),
        });
        Ok(Step::Started(Dispatched {
            task_id: task.id,
            run_id,
            host,
            skill,
        }))
    }

    fn take_probe(&self, run_id: &RunId) -> Option<String> {
        self.probe_runs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(run_id)
    }

    /// The run is over. If it was a HALF_OPEN probe whose verdict did not reach
    /// the breaker, let the next task try.
    fn end_probe(&self, run_id: &RunId) {
        if let Some(key) = self.take_probe(run_id) {
            debug!(run_id = %run_id, key = %key, "probe run ended");
            self.ctx.breaker.release_probe(&key);
        }
    }

    /// The task record of a reaped run is already requeued or quarantined; the
    /// process may still be running. Stop it before this tick dispatches again.
    async fn stop_reaped(&self, reaped: &Reaped) {
        let Some(run_id) = reaped.run_id else {
            return;
        };
        if let RequeueOutcome::Skipped(_) = reaped.outcome {
            return;
        }
        if let Err(e) = self.ctx.executor.kill(run_id).await {
            warn!(task_id = %reaped.task_id, run_id = %run_id, error = %e, "kill of stale run failed");
        }
        self.end_probe(&run_id);
    }

    /// Unknown task types are terminal; they are never retried.
    async fn reject_invalid(&self, task_id: TaskId) -> Result<Step, ForemanError> {
        let now = self.ctx.clock.now();
        let result = transition(
            self.ctx.store.as_ref(),
            task_id,
            TaskStatus::Queued,
            self.max_cas_retries,
            |t| {
                t.payload.last_error = Some(INVALID_TASK_TYPE.to_string());
                t.finish(TaskStatus::Failed, now);
                Some(t.payload.watchdog.failure_count)
            },
        )
        .await?;

        match result {
            Transition::Applied { task, value } => {
                error!(task_id = %task_id, task_type = %task.task_type, "unknown task type");
                self.ctx.events.emit(DomainEvent::TaskFailed {
                    task_id,
                    reason: INVALID_TASK_TYPE.to_string(),
                    failure_count: value,
                });
                Ok(Step::Skipped(DispatchSkip::InvalidTaskType))
            }
            _ => Ok(Step::Skipped(DispatchSkip::Conflict)),
        }
    }

    /// Put a claimed run back in the queue without touching the failure budget.
    async fn release(&self, task_id: TaskId, run_id: RunId, reason: &str) -> Result<bool, ForemanError> {
        let now = self.ctx.clock.now();
        let result = transition(
            self.ctx.store.as_ref(),
            task_id,
            TaskStatus::InProgress,
            self.max_cas_retries,
            |t| {
                if !t.is_current_run(&run_id) {
                    return None;
                }
                t.payload.last_error = Some(reason.to_string());
                t.release(now);
                Some(())
            },
        )
        .await?;
        Ok(result.is_applied())
    }

    /// Route an executor report for `run_id` of `task_id`.
    pub async fn report(
        &self,
        task_id: TaskId,
        run_id: RunId,
        outcome: ExecutionOutcome,
    ) -> Result<ReportOutcome, ForemanError> {
        let ctx = &self.ctx;
        let result = match outcome {
            ExecutionOutcome::Completed => self.finish(task_id, run_id, TaskStatus::Completed).await?,
            ExecutionOutcome::CompletedNoPr => {
                self.finish(task_id, run_id, TaskStatus::CompletedNoPr).await?
            }
            ExecutionOutcome::Failed { reason } => {
                match ctx.watchdog.fail_run(task_id, run_id, &reason).await? {
                    Some(FailureOutcome::Skipped(_)) | None => ReportOutcome::Stale,
                    Some(outcome) => ReportOutcome::Failure { outcome },
                }
            }
            ExecutionOutcome::DependencyUnavailable { reason } => {
                let host = ctx.store.get(task_id).await?.and_then(|t| t.location);
                if self.release(task_id, run_id, &reason).await? {
                    if let Some(host) = host {
                        ctx.breaker.record_failure(host.as_str());
                    }
                    ReportOutcome::Released
                } else {
                    ReportOutcome::Stale
                }
            }
            ExecutionOutcome::ResourceViolation { reason, metrics } => {
                match ctx.watchdog.requeue_run(task_id, run_id, &reason, metrics).await? {
                    Some(RequeueOutcome::Skipped(_)) | None => ReportOutcome::Stale,
                    Some(outcome) => ReportOutcome::Watchdog { outcome },
                }
            }
        };

        if result == ReportOutcome::Stale {
            debug!(task_id = %task_id, run_id = %run_id, "report for a stale run ignored");
        }
        self.end_probe(&run_id);
        Ok(result)
    }

    async fn finish(
        &self,
        task_id: TaskId,
        run_id: RunId,
        status: TaskStatus,
    ) -> Result<ReportOutcome, ForemanError> {
        let now = self.ctx.clock.now();
        let result = transition(
            self.ctx.store.as_ref(),
            task_id,
            TaskStatus::InProgress,
            self.max_cas_retries,
            |t| {
                if !t.is_current_run(&run_id) {
                    return None;
                }
                t.finish(status, now);
                Some(())
            },
        )
        .await?;

        let Transition::Applied { task, .. } = result else {
            return Ok(ReportOutcome::Stale);
        };
        if let Some(host) = &task.location {
            self.ctx.breaker.record_success(host.as_str());
        }
        info!(task_id = %task_id, %status, "task finished");
        self.ctx.events.emit(DomainEvent::TaskCompleted {
            task_id,
            with_pr: status == TaskStatus::Completed,
        });
        Ok(ReportOutcome::Finished { status })
    }

    /// Check a resource sample of a running task; on a violation kill the run and
    /// send it down the requeue/quarantine ladder. `Ok(None)` when within limits.
    pub async fn enforce(
        &self,
        task_id: TaskId,
        sample: ResourceSample,
    ) -> Result<Option<RequeueOutcome>, ForemanError> {
        let ctx = &self.ctx;
        let Some(violation) = ctx.watchdog.evaluate(sample) else {
            return Ok(None);
        };

        let Some(task) = ctx.store.get(task_id).await? else {
            return Ok(Some(RequeueOutcome::Skipped(RequeueSkip::NotFound)));
        };
        let Some(run_id) = task.payload.current_run_id else {
            return Ok(Some(RequeueOutcome::Skipped(RequeueSkip::NotInProgress {
                actual: task.status,
            })));
        };

        warn!(task_id = %task_id, run_id = %run_id, reason = %violation.reason, "resource ceiling exceeded");
        if let Err(e) = ctx.executor.kill(run_id).await {
            warn!(task_id = %task_id, run_id = %run_id, error = %e, "kill failed");
        }

        let outcome = ctx
            .watchdog
            .requeue_run(task_id, run_id, &violation.reason, violation.metrics)
            .await?;
        self.end_probe(&run_id);
        Ok(Some(outcome.unwrap_or(RequeueOutcome::Skipped(
            RequeueSkip::NotInProgress {
                actual: task.status,
            },
        ))))
    }
}
