//! Ports - 抽象化レイヤー
//!
//! 外部コラボレータ（task store, learning store, executor, ...）へのインターフェース。
//!
//! # 設計原則
//! - TaskStore が唯一の共有可変リソース（source of truth）
//! - それ以外の port は best-effort か、読み取り専用

pub mod clock;
pub mod event_sink;
pub mod executor;
pub mod id_generator;
pub mod learning_store;
pub mod sessions;
pub mod task_store;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::event_sink::EventSink;
pub use self::executor::{Executor, ExecutorError, RunRequest};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::learning_store::{LearningEntry, LearningStore};
pub use self::sessions::SessionCounter;
pub use self::task_store::{CasOutcome, TaskQuery, TaskStore};
