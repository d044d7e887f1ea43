//! Impls - ports の開発用・テスト用実装
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 正本（CAS 付き）
//! - **InMemoryLearningStore**: content hash で重複排除
//! - **TracingEventSink / RecordingEventSink**
//! - **StaticSessionCounter**
//!
//! 本番用の store 実装はこのクレートの外に置く想定です。

pub mod event_sinks;
pub mod inmem_learning;
pub mod inmem_store;
pub mod static_sessions;

pub use self::event_sinks::{RecordingEventSink, TracingEventSink};
pub use self::inmem_learning::InMemoryLearningStore;
pub use self::inmem_store::InMemoryTaskStore;
pub use self::static_sessions::StaticSessionCounter;
