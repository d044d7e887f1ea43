//! Simulated executor: pretends to run each task and reports a scripted outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use foreman_core::app::Dispatcher;
use foreman_core::domain::{
    DecompositionStage, ExecutionOutcome, GoalId, ResourceMetrics, RoutingHint, RunId, Task,
    TaskPayload, TaskType,
};
use foreman_core::ports::{Clock, Executor, ExecutorError, IdGenerator, RunRequest, TaskStore};
use foreman_core::{Foreman, ForemanError};

/// Outcomes by task type; unlisted types complete.
fn scripted_outcome(task_type: &TaskType) -> ExecutionOutcome {
    match task_type.as_str() {
        "qa" => ExecutionOutcome::ResourceViolation {
            reason: "RSS exceeded".into(),
            metrics: ResourceMetrics {
                rss_mb: Some(3100.0),
                cpu_pct: Some(40.0),
                threshold_mb: Some(2000.0),
            },
        },
        "research" => ExecutionOutcome::Failed {
            reason: "no sources found".into(),
        },
        "data" => ExecutionOutcome::DependencyUnavailable {
            reason: "warehouse unreachable".into(),
        },
        "review" => ExecutionOutcome::CompletedNoPr,
        _ => ExecutionOutcome::Completed,
    }
}

/// Hands every started run to a background task through a channel.
pub struct SimulatedExecutor {
    tx: mpsc::UnboundedSender<RunRequest>,
}

impl SimulatedExecutor {
    pub fn channel() -> (Arc<Self>, mpsc::UnboundedReceiver<RunRequest>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { tx }), rx)
    }
}

#[async_trait]
impl Executor for SimulatedExecutor {
    async fn start(&self, request: RunRequest) -> Result<(), ExecutorError> {
        info!(
            task_id = %request.task.id,
            run_id = %request.run_id,
            host = %request.host,
            skill = request.skill.as_deref().unwrap_or("-"),
            "simulated run started"
        );
        self.tx
            .send(request)
            .map_err(|_| ExecutorError::Unavailable("simulated executor is shut down".into()))
    }

    async fn kill(&self, run_id: RunId) -> Result<(), ExecutorError> {
        warn!(run_id = %run_id, "simulated run killed");
        Ok(())
    }
}

/// Drain started runs, wait `run_time`, and report their scripted outcome.
pub fn spawn_runner(
    dispatcher: Arc<Dispatcher>,
    mut rx: mpsc::UnboundedReceiver<RunRequest>,
    run_time: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(request) = rx.recv().await {
            let dispatcher = Arc::clone(&dispatcher);
            tokio::spawn(async move {
                tokio::time::sleep(run_time).await;
                let outcome = scripted_outcome(&request.task.task_type);
                match dispatcher
                    .report(request.task.id, request.run_id, outcome)
                    .await
                {
                    Ok(result) => info!(task_id = %request.task.id, ?result, "simulated run reported"),
                    Err(e) => warn!(task_id = %request.task.id, error = %e, "report failed"),
                }
            });
        }
    })
}

/// Insert a small mix of tasks that exercises every path of the core.
pub async fn seed_demo_tasks(
    foreman: &Foreman,
    clock: &dyn Clock,
) -> Result<usize, ForemanError> {
    let ids = foreman.ids.as_ref();
    let mut seeded = 0;

    for task_type in ["dev", "review", "qa", "research", "talk", "data", "astrology"] {
        insert(foreman.store.as_ref(), ids, clock, task_type, TaskPayload::default()).await?;
        seeded += 1;
    }

    let next_action = TaskPayload {
        routing: Some(RoutingHint::NextAction {
            action: "verify".into(),
        }),
        ..TaskPayload::default()
    };
    insert(foreman.store.as_ref(), ids, clock, "dev", next_action).await?;
    seeded += 1;

    // the second decomposition for the same goal is refused by the guard
    let goal: GoalId = ids.generate_goal_id();
    for stage in [DecompositionStage::Initial, DecompositionStage::Continue] {
        let outcome = foreman
            .dedup
            .create(goal, TaskType::new("dev"), stage)
            .await?;
        info!(goal_id = %goal, ?stage, ?outcome, "decomposition request");
        if matches!(outcome, foreman_core::app::CreateOutcome::Created(_)) {
            seeded += 1;
        }
    }
    Ok(seeded)
}

async fn insert(
    store: &dyn TaskStore,
    ids: &dyn IdGenerator,
    clock: &dyn Clock,
    task_type: &str,
    payload: TaskPayload,
) -> Result<(), ForemanError> {
    let task = Task::new(ids.generate_task_id(), TaskType::new(task_type), clock.now())
        .with_payload(payload);
    store.insert(task).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_outcomes_cover_every_report_path() {
        assert!(matches!(
            scripted_outcome(&TaskType::new("qa")),
            ExecutionOutcome::ResourceViolation { .. }
        ));
        assert!(matches!(
            scripted_outcome(&TaskType::new("data")),
            ExecutionOutcome::DependencyUnavailable { .. }
        ));
        assert_eq!(scripted_outcome(&TaskType::new("dev")), ExecutionOutcome::Completed);
    }
}
