//! EventSink implementations.

use std::sync::Mutex;

use tracing::{info, warn};

use crate::domain::DomainEvent;
use crate::ports::EventSink;

/// Logs every event as a structured `tracing` record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: DomainEvent) {
        let payload = serde_json::to_string(&event).unwrap_or_default();
        match &event {
            DomainEvent::BreakerOpened { key, reason, failures } => {
                warn!(key = %key, ?reason, failures, "breaker opened");
            }
            DomainEvent::TaskQuarantined {
                task_id,
                watchdog_retries,
                total_failures,
            } => {
                warn!(task_id = %task_id, watchdog_retries, total_failures, "task quarantined");
            }
            _ => info!(event = event.name(), %payload, "domain event"),
        }
    }
}

/// Keeps events in memory (tests, CLI summaries).
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(DomainEvent::name).collect()
    }
}

impl EventSink for RecordingEventSink {
    fn emit(&self, event: DomainEvent) {
        self.events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingEventSink::new();
        sink.emit(DomainEvent::BreakerHalfOpened { key: "a".into() });
        sink.emit(DomainEvent::BreakerClosed { key: "a".into() });
        assert_eq!(sink.names(), vec!["breaker_half_opened", "breaker_closed"]);
    }
}
