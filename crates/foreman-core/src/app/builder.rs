//! ForemanBuilder - コンポーネントの構築とワイヤリング
//!
//! # Fail-fast 設計
//! - `build()` 時に config を検証
//! - ルーティング先の host が全て `[[hosts]]` に定義されているかチェック
//! - executor は必須（それ以外の port には開発用のデフォルトがある）
//!
//! # 使用例
//! ```ignore
//! let foreman = ForemanBuilder::new(config)
//!     .executor(Arc::new(MyExecutor))
//!     .store(Arc::new(PgTaskStore::connect(..).await?))
//!     .build()?;
//! let scheduler = foreman.scheduler(None);
//! ```

use std::sync::Arc;

use super::breaker::CircuitBreaker;
use super::capacity::CapacityAllocator;
use super::dedup::DecompositionGuard;
use super::dispatcher::{DispatchContext, Dispatcher};
use super::router::TaskRouter;
use super::scheduler_loop::SchedulerLoop;
use super::status::{collect_status, StatusReport};
use super::watchdog::WatchdogEngine;
use crate::config::ForemanConfig;
use crate::domain::{ForemanError, HostId, StoreError};
use crate::impls::{InMemoryLearningStore, InMemoryTaskStore, StaticSessionCounter, TracingEventSink};
use crate::ports::{
    Clock, EventSink, Executor, IdGenerator, LearningStore, SessionCounter, SystemClock,
    TaskStore, UlidGenerator,
};

/// BuildError は構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    InvalidConfig(#[from] ForemanError),

    #[error("Routes target hosts with no [[hosts]] profile: {0:?}")]
    UnknownHosts(Vec<HostId>),

    #[error("No executor configured. Call .executor(..) before build().")]
    MissingExecutor,
}

pub struct ForemanBuilder {
    config: ForemanConfig,
    store: Option<Arc<dyn TaskStore>>,
    learning: Option<Arc<dyn LearningStore>>,
    events: Option<Arc<dyn EventSink>>,
    executor: Option<Arc<dyn Executor>>,
    sessions: Option<Arc<dyn SessionCounter>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl ForemanBuilder {
    pub fn new(config: ForemanConfig) -> Self {
        Self {
            config,
            store: None,
            learning: None,
            events: None,
            executor: None,
            sessions: None,
            clock: None,
            ids: None,
        }
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn learning(mut self, learning: Arc<dyn LearningStore>) -> Self {
        self.learning = Some(learning);
        self
    }

    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = Some(executor);
        self
    }

    pub fn sessions(mut self, sessions: Arc<dyn SessionCounter>) -> Self {
        self.sessions = Some(sessions);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<Foreman, BuildError> {
        self.config.validate()?;

        let router = Arc::new(TaskRouter::from_config(&self.config.routes));
        let missing: Vec<HostId> = router
            .hosts()
            .into_iter()
            .filter(|h| self.config.host(h).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(BuildError::UnknownHosts(missing));
        }

        let executor = self.executor.ok_or(BuildError::MissingExecutor)?;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let learning = self
            .learning
            .unwrap_or_else(|| Arc::new(InMemoryLearningStore::new()));
        let events = self.events.unwrap_or_else(|| Arc::new(TracingEventSink));
        let sessions = self
            .sessions
            .unwrap_or_else(|| Arc::new(StaticSessionCounter::new()));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));

        let config = self.config;
        let breaker = Arc::new(CircuitBreaker::new(
            config.breaker.clone(),
            Arc::clone(&clock),
            Arc::clone(&events),
        ));
        let capacity = Arc::new(CapacityAllocator::new(
            config.hosts.clone(),
            config.capacity.clone(),
            Arc::clone(&store),
            sessions,
        ));
        let watchdog = Arc::new(WatchdogEngine::new(
            Arc::clone(&store),
            learning,
            Arc::clone(&events),
            Arc::clone(&clock),
            config.watchdog.clone(),
        ));
        let dedup = Arc::new(DecompositionGuard::new(
            Arc::clone(&store),
            Arc::clone(&ids),
            Arc::clone(&clock),
            config.dedup.clone(),
        ));
        let dispatcher = Arc::new(Dispatcher::new(DispatchContext {
            store: Arc::clone(&store),
            router: Arc::clone(&router),
            breaker: Arc::clone(&breaker),
            capacity: Arc::clone(&capacity),
            watchdog: Arc::clone(&watchdog),
            executor,
            events,
            clock,
            ids: Arc::clone(&ids),
        }));

        Ok(Foreman {
            config,
            store,
            ids,
            router,
            breaker,
            capacity,
            watchdog,
            dedup,
            dispatcher,
        })
    }
}

/// All components, wired.
pub struct Foreman {
    pub config: ForemanConfig,
    pub store: Arc<dyn TaskStore>,
    pub ids: Arc<dyn IdGenerator>,
    pub router: Arc<TaskRouter>,
    pub breaker: Arc<CircuitBreaker>,
    pub capacity: Arc<CapacityAllocator>,
    pub watchdog: Arc<WatchdogEngine>,
    pub dedup: Arc<DecompositionGuard>,
    pub dispatcher: Arc<Dispatcher>,
}

impl Foreman {
    /// Start the tick loop at the configured interval.
    pub fn scheduler(&self, max_ticks: Option<u64>) -> SchedulerLoop {
        SchedulerLoop::spawn(
            Arc::clone(&self.dispatcher),
            self.config.tick_interval(),
            max_ticks,
        )
    }

    pub async fn status(&self) -> Result<StatusReport, StoreError> {
        collect_status(
            self.store.as_ref(),
            &self.router.task_types(),
            &self.capacity,
            &self.breaker,
        )
        .await
    }
}
