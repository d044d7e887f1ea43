//! App - アプリケーション層
//!
//! ports を組み合わせて dispatch と障害処理のロジックを実装します。
//!
//! # 主要コンポーネント
//! - **TaskRouter**: task_type → host / skill
//! - **CircuitBreaker**: 依存先ごとの fail-fast
//! - **WatchdogEngine**: kill → requeue → quarantine
//! - **CapacityAllocator**: host ごとの同時実行枠
//! - **DecompositionGuard**: decomposition の重複防止
//! - **Dispatcher**: 上の 5 つを 1 tick にまとめる合成ルート
//! - **SchedulerLoop**: 一定間隔で tick を回す
//! - **ForemanBuilder**: ワイヤリングと起動時検証

pub mod breaker;
pub mod builder;
pub mod capacity;
pub mod dedup;
pub mod dispatcher;
pub mod router;
pub mod scheduler_loop;
pub mod status;
pub mod transition;
pub mod watchdog;

// 主要な型を再エクスポート
pub use self::breaker::{BreakerSnapshot, BreakerState, CircuitBreaker, Permit};
pub use self::builder::{BuildError, Foreman, ForemanBuilder};
pub use self::capacity::{CapacityAllocator, CapacityBudget};
pub use self::dedup::{Admission, CreateOutcome, DecompositionGuard};
pub use self::dispatcher::{
    DispatchContext, DispatchSkip, Dispatched, Dispatcher, ReportOutcome, TickReport,
};
pub use self::router::{ResolvedSkill, SkillRule, TaskRouter};
pub use self::scheduler_loop::{LoopStats, SchedulerLoop};
pub use self::status::{StatusCounts, StatusReport};
pub use self::watchdog::{Reaped, WatchdogEngine};
