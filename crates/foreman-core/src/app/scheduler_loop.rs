//! SchedulerLoop - 一定間隔で `Dispatcher::tick` を回す
//!
//! - tick の間隔は `tick_interval_ms`。遅れた tick はまとめず次から数え直す
//! - 失敗した tick はログに残して `failed_ticks` に数えるだけ。loop は止めない
//! - 停止は watch channel 経由。実行中の tick は最後まで走らせる

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::dispatcher::Dispatcher;

/// Totals over the lifetime of one loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub ticks: u64,
    pub failed_ticks: u64,
    pub dispatched: u64,
    pub reaped: u64,
}

/// Scheduler loop handle.
/// - `request_shutdown()` で次の tick の前に止まる（実行中の tick は最後まで走る）
/// - `join()` で終了を待ち、統計を受け取る
pub struct SchedulerLoop {
    shutdown_tx: watch::Sender<bool>,
    join: JoinHandle<LoopStats>,
}

impl SchedulerLoop {
    /// Run `dispatcher.tick()` every `interval`, at most `max_ticks` times when given.
    pub fn spawn(dispatcher: Arc<Dispatcher>, interval: Duration, max_ticks: Option<u64>) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let join = tokio::spawn(async move {
            run(dispatcher, interval, max_ticks, &mut shutdown_rx).await
        });
        Self { shutdown_tx, join }
    }

    pub fn request_shutdown(&self) {
        // receiver may already be gone if the loop hit max_ticks
        let _ = self.shutdown_tx.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to stop on its own (tick limit) without asking it to.
    pub async fn join(self) -> LoopStats {
        self.join.await.unwrap_or_else(|e| {
            error!(error = %e, "scheduler loop panicked");
            LoopStats::default()
        })
    }

    pub async fn shutdown_and_join(self) -> LoopStats {
        self.request_shutdown();
        self.join().await
    }
}

async fn run(
    dispatcher: Arc<Dispatcher>,
    interval: Duration,
    max_ticks: Option<u64>,
    shutdown_rx: &mut watch::Receiver<bool>,
) -> LoopStats {
    let mut stats = LoopStats::default();
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if max_ticks.is_some_and(|max| stats.ticks >= max) {
            break;
        }

        tokio::select! {
            changed = shutdown_rx.changed() => {
                // sender dropped counts as shutdown
                if changed.is_err() {
                    break;
                }
                continue;
            }
            _ = timer.tick() => {}
        }

        stats.ticks += 1;
        match dispatcher.tick().await {
            Ok(report) => {
                stats.dispatched += report.dispatched.len() as u64;
                stats.reaped += report.reaped.len() as u64;
                debug!(tick = stats.ticks, ?report, "tick");
            }
            Err(e) => {
                stats.failed_ticks += 1;
                error!(tick = stats.ticks, error = %e, retryable = e.is_retryable(), "tick failed");
            }
        }
    }

    info!(ticks = stats.ticks, failed = stats.failed_ticks, "scheduler loop stopped");
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ForemanBuilder;
    use crate::config::ForemanConfig;
    use crate::domain::{RunId, Task, TaskType};
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{Executor, ExecutorError, RunRequest, TaskStore};
    use async_trait::async_trait;
    use chrono::Utc;

    struct NoopExecutor;

    #[async_trait]
    impl Executor for NoopExecutor {
        async fn start(&self, _request: RunRequest) -> Result<(), ExecutorError> {
            Ok(())
        }

        async fn kill(&self, _run_id: RunId) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    fn config() -> ForemanConfig {
        ForemanConfig {
            tick_interval_ms: 5,
            ..ForemanConfig::default()
        }
    }

    #[tokio::test]
    async fn stops_after_max_ticks() {
        let store = Arc::new(InMemoryTaskStore::new());
        let foreman = ForemanBuilder::new(config())
            .store(store.clone())
            .executor(Arc::new(NoopExecutor))
            .build()
            .unwrap();
        let task = Task::new(foreman.ids.generate_task_id(), TaskType::new("dev"), Utc::now());
        store.insert(task).await.unwrap();

        let stats = foreman.scheduler(Some(3)).join().await;
        assert_eq!(stats.ticks, 3);
        assert_eq!(stats.dispatched, 1);
        assert_eq!(stats.failed_ticks, 0);
    }

    #[tokio::test]
    async fn failing_ticks_are_counted_and_the_loop_keeps_going() {
        let store = Arc::new(InMemoryTaskStore::new());
        store.set_available(false);
        let foreman = ForemanBuilder::new(config())
            .store(store)
            .executor(Arc::new(NoopExecutor))
            .build()
            .unwrap();

        let stats = foreman.scheduler(Some(2)).join().await;
        assert_eq!(stats.ticks, 2);
        assert_eq!(stats.failed_ticks, 2);
    }

    #[tokio::test]
    async fn shutdown_stops_an_unbounded_loop() {
        let foreman = ForemanBuilder::new(config())
            .executor(Arc::new(NoopExecutor))
            .build()
            .unwrap();

        let scheduler = foreman.scheduler(None);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = scheduler.shutdown_and_join().await;
        assert!(stats.ticks >= 1);
    }
}
