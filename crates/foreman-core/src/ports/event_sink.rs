//! EventSink port - イベント記録の抽象化
//!
//! `emit` は同期・infallible。sink 側の失敗は sink の中で握りつぶします。

use crate::domain::DomainEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: DomainEvent);
}
