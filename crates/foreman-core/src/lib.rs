//! foreman-core
//!
//! Dispatch and fault-tolerance core for an autonomous task orchestrator.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, payload, state, outcome, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, LearningStore, Executor, EventSink, Clock, ...）
//! - **app**: router, circuit breaker, watchdog, capacity, dedup guard, dispatcher, scheduler loop
//! - **impls**: 開発・テスト用の in-memory 実装
//! - **config**: TOML から読める設定（全項目にデフォルトあり）
//!
//! # 方針
//! - TaskStore が唯一の source of truth。状態遷移は全て CAS
//! - 想定内の状況（not_in_progress, breaker open, 容量不足, 重複）はエラーではなく結果値
//! - store に届かない時だけエラーにして、その tick を諦める

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use crate::app::{Foreman, ForemanBuilder};
pub use crate::config::ForemanConfig;
pub use crate::domain::{ForemanError, StoreError};
