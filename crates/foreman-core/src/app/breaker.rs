//! CircuitBreaker - 依存先ごとの CLOSED / OPEN / HALF_OPEN ガード
//!
//! - key ごとの状態は 1 本の Mutex で守る（同じ key への read-modify-write は直列化）
//! - OPEN → HALF_OPEN はタイマーではなく読み取り時に `(now, opened_at)` から計算
//! - HALF_OPEN で通すのは 1 本だけ。`try_acquire` が probe を払い出し、結果
//!   （`record_success` / `record_failure`）か `release_probe` が返るまで次は出さない
//! - breaker 自体は決して失敗しない。`is_allowed` は呼び出し側が見るための助言

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::config::BreakerConfig;
use crate::domain::{DomainEvent, OpenReason};
use crate::ports::{Clock, EventSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

/// State of one key, as returned by `get_state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerSnapshot {
    pub state: BreakerState,

    /// Consecutive failures; reset on success and on entering CLOSED.
    pub failures: u32,

    pub opened_at: Option<DateTime<Utc>>,

    /// A HALF_OPEN trial request is out and has not reported back.
    pub probe_in_flight: bool,
}

impl Default for BreakerSnapshot {
    fn default() -> Self {
        Self {
            state: BreakerState::Closed,
            failures: 0,
            opened_at: None,
            probe_in_flight: false,
        }
    }
}

/// Permit は `try_acquire` の答え
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permit {
    /// CLOSED.
    Granted,
    /// HALF_OPEN: the caller carries the single trial request and must report
    /// its result, or hand it back with `release_probe`.
    Probe,
    /// OPEN, or HALF_OPEN while another trial request is out.
    Denied { probe_in_flight: bool },
}

/// State after applying the time-based OPEN -> HALF_OPEN rule.
pub fn effective_state(
    state: BreakerState,
    opened_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    open_duration: Duration,
) -> BreakerState {
    match (state, opened_at) {
        (BreakerState::Open, Some(at)) if now - at >= open_duration => BreakerState::HalfOpen,
        // OPEN without a timestamp cannot expire on its own; treat it as just opened
        (s, _) => s,
    }
}

/// CircuitBreaker は key（依存先の名前）ごとの状態を持つ
pub struct CircuitBreaker {
    entries: Mutex<HashMap<String, BreakerSnapshot>>,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    events: Arc<dyn EventSink>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, clock: Arc<dyn Clock>, events: Arc<dyn EventSink>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
            clock,
            events,
        }
    }

    /// Run `f` on the (lazily created, lazily expired) entry for `key` under the lock.
    /// Events are emitted after the lock is released.
    fn with_entry<R>(
        &self,
        key: &str,
        f: impl FnOnce(&mut BreakerSnapshot, DateTime<Utc>, &mut Vec<DomainEvent>) -> R,
    ) -> R {
        let now = self.clock.now();
        let mut events = Vec::new();
        let result = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            let entry = entries.entry(key.to_string()).or_default();

            let next = effective_state(entry.state, entry.opened_at, now, self.config.open_duration());
            if next != entry.state {
                entry.state = next;
                entry.probe_in_flight = false;
                events.push(DomainEvent::BreakerHalfOpened {
                    key: key.to_string(),
                });
            }
            f(entry, now, &mut events)
        };
        for event in events {
            self.events.emit(event);
        }
        result
    }

    pub fn get_state(&self, key: &str) -> BreakerSnapshot {
        self.with_entry(key, |entry, _, _| entry.clone())
    }

    /// False only while OPEN.
    pub fn is_allowed(&self, key: &str) -> bool {
        self.get_state(key).state != BreakerState::Open
    }

    /// Ask to send one request to `key`. In HALF_OPEN only the first caller gets
    /// `Probe`; later callers are denied until the probe is resolved.
    pub fn try_acquire(&self, key: &str) -> Permit {
        self.with_entry(key, |entry, _, _| match entry.state {
            BreakerState::Closed => Permit::Granted,
            BreakerState::Open => Permit::Denied {
                probe_in_flight: false,
            },
            BreakerState::HalfOpen if entry.probe_in_flight => Permit::Denied {
                probe_in_flight: true,
            },
            BreakerState::HalfOpen => {
                entry.probe_in_flight = true;
                Permit::Probe
            }
        })
    }

    /// Hand back a probe that ended without saying anything about the dependency
    /// (never started, or the task itself failed). State is unchanged.
    pub fn release_probe(&self, key: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(key) {
            entry.probe_in_flight = false;
        }
    }

    /// A success closes the breaker from any state.
    pub fn record_success(&self, key: &str) {
        self.with_entry(key, |entry, _, events| {
            let was = entry.state;
            *entry = BreakerSnapshot::default();
            if was != BreakerState::Closed {
                debug!(key, from = ?was, "breaker closed");
                events.push(DomainEvent::BreakerClosed {
                    key: key.to_string(),
                });
            }
        });
    }

    pub fn record_failure(&self, key: &str) {
        let threshold = self.config.failure_threshold;
        self.with_entry(key, |entry, now, events| {
            entry.failures = entry.failures.saturating_add(1);
            entry.probe_in_flight = false;
            let reason = match entry.state {
                BreakerState::HalfOpen => Some(OpenReason::HalfOpenProbeFailed),
                BreakerState::Closed if entry.failures >= threshold => {
                    Some(OpenReason::FailureThresholdReached)
                }
                _ => None,
            };
            if let Some(reason) = reason {
                entry.state = BreakerState::Open;
                entry.opened_at = Some(now);
                events.push(DomainEvent::BreakerOpened {
                    key: key.to_string(),
                    reason,
                    failures: entry.failures,
                });
            }
        });
    }

    /// Forget a key; the next reference starts CLOSED.
    pub fn reset(&self, key: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
    }

    /// All known keys with their current state, sorted by key.
    pub fn snapshot(&self) -> Vec<(String, BreakerSnapshot)> {
        let keys: Vec<String> = {
            let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.keys().cloned().collect()
        };
        let mut rows: Vec<(String, BreakerSnapshot)> = keys
            .into_iter()
            .map(|k| {
                let s = self.get_state(&k);
                (k, s)
            })
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impls::RecordingEventSink;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    fn setup() -> (CircuitBreaker, Arc<FixedClock>, Arc<RecordingEventSink>) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        let sink = Arc::new(RecordingEventSink::new());
        let breaker = CircuitBreaker::new(BreakerConfig::default(), clock.clone(), sink.clone());
        (breaker, clock, sink)
    }

    fn open_duration() -> Duration {
        BreakerConfig::default().open_duration()
    }

    #[test]
    fn fresh_key_is_closed_and_allowed() {
        let (breaker, _, _) = setup();
        assert_eq!(breaker.get_state("svc"), BreakerSnapshot::default());
        assert!(breaker.is_allowed("svc"));
    }

    #[test]
    fn opens_at_threshold() {
        let (breaker, _, sink) = setup();
        breaker.record_failure("svc");
        breaker.record_failure("svc");
        assert_eq!(breaker.get_state("svc").state, BreakerState::Closed);
        assert!(breaker.is_allowed("svc"));

        breaker.record_failure("svc");
        let s = breaker.get_state("svc");
        assert_eq!(s.state, BreakerState::Open);
        assert!(s.opened_at.is_some());
        assert!(!breaker.is_allowed("svc"));

        assert!(sink.events().contains(&DomainEvent::BreakerOpened {
            key: "svc".into(),
            reason: OpenReason::FailureThresholdReached,
            failures: 3,
        }));
    }

    #[test]
    fn success_resets_consecutive_failures() {
        let (breaker, _, sink) = setup();
        breaker.record_failure("svc");
        breaker.record_failure("svc");
        breaker.record_success("svc");
        breaker.record_failure("svc");
        breaker.record_failure("svc");
        assert_eq!(breaker.get_state("svc").state, BreakerState::Closed);
        assert_eq!(breaker.get_state("svc").failures, 2);
        assert!(sink.events().is_empty());
    }

    #[test]
    fn stays_open_until_duration_elapses() {
        let (breaker, clock, _) = setup();
        for _ in 0..3 {
            breaker.record_failure("svc");
        }
        clock.advance(open_duration() - Duration::milliseconds(1));
        assert_eq!(breaker.get_state("svc").state, BreakerState::Open);
        assert!(!breaker.is_allowed("svc"));

        // more failures while open do not move opened_at
        let opened_at = breaker.get_state("svc").opened_at;
        breaker.record_failure("svc");
        assert_eq!(breaker.get_state("svc").opened_at, opened_at);
    }

    #[test]
    fn scenario_a_open_half_open_closed() {
        let (breaker, clock, sink) = setup();
        for _ in 0..3 {
            breaker.record_failure("svc");
        }
        assert_eq!(breaker.get_state("svc").state, BreakerState::Open);

        clock.advance(open_duration() + Duration::milliseconds(1));
        assert_eq!(breaker.get_state("svc").state, BreakerState::HalfOpen);
        assert!(breaker.is_allowed("svc"));

        breaker.record_success("svc");
        let s = breaker.get_state("svc");
        assert_eq!(s.state, BreakerState::Closed);
        assert_eq!(s.failures, 0);
        assert_eq!(s.opened_at, None);

        assert_eq!(
            sink.names(),
            vec!["breaker_opened", "breaker_half_opened", "breaker_closed"]
        );
    }

    #[test]
    fn failed_probe_reopens() {
        let (breaker, clock, sink) = setup();
        for _ in 0..3 {
            breaker.record_failure("svc");
        }
        clock.advance(open_duration());
        assert!(breaker.is_allowed("svc"));

        breaker.record_failure("svc");
        let s = breaker.get_state("svc");
        assert_eq!(s.state, BreakerState::Open);
        assert_eq!(s.opened_at, Some(clock.now()));
        assert!(!breaker.is_allowed("svc"));

        assert!(matches!(
            sink.events().last(),
            Some(DomainEvent::BreakerOpened {
                reason: OpenReason::HalfOpenProbeFailed,
                ..
            })
        ));
    }

    #[test]
    fn keys_are_independent() {
        let (breaker, _, _) = setup();
        for _ in 0..3 {
            breaker.record_failure("a");
        }
        assert!(!breaker.is_allowed("a"));
        assert!(breaker.is_allowed("b"));
    }

    #[test]
    fn reset_forgets_state() {
        let (breaker, _, _) = setup();
        for _ in 0..3 {
            breaker.record_failure("svc");
        }
        breaker.reset("svc");
        assert_eq!(breaker.get_state("svc"), BreakerSnapshot::default());
    }

    #[test]
    fn half_open_hands_out_a_single_probe() {
        let (breaker, clock, _) = setup();
        assert_eq!(breaker.try_acquire("svc"), Permit::Granted);
        for _ in 0..3 {
            breaker.record_failure("svc");
        }
        assert_eq!(
            breaker.try_acquire("svc"),
            Permit::Denied {
                probe_in_flight: false
            }
        );

        clock.advance(open_duration());
        assert_eq!(breaker.try_acquire("svc"), Permit::Probe);
        clock.advance(Duration::minutes(5));
        assert_eq!(
            breaker.try_acquire("svc"),
            Permit::Denied {
                probe_in_flight: true
            }
        );
        assert!(breaker.get_state("svc").probe_in_flight);

        // handed back without a verdict: the next caller probes
        breaker.release_probe("svc");
        assert_eq!(breaker.get_state("svc").state, BreakerState::HalfOpen);
        assert_eq!(breaker.try_acquire("svc"), Permit::Probe);

        breaker.record_success("svc");
        assert_eq!(breaker.try_acquire("svc"), Permit::Granted);
    }

    #[test]
    fn failed_probe_clears_the_flag_and_waits_again() {
        let (breaker, clock, _) = setup();
        for _ in 0..3 {
            breaker.record_failure("svc");
        }
        clock.advance(open_duration());
        assert_eq!(breaker.try_acquire("svc"), Permit::Probe);
        breaker.record_failure("svc");

        let s = breaker.get_state("svc");
        assert_eq!(s.state, BreakerState::Open);
        assert!(!s.probe_in_flight);

        clock.advance(open_duration());
        assert_eq!(breaker.try_acquire("svc"), Permit::Probe);
    }

    #[test]
    fn release_probe_of_unknown_key_creates_nothing() {
        let (breaker, _, _) = setup();
        breaker.release_probe("ghost");
        assert!(breaker.snapshot().is_empty());
    }

    #[test]
    fn effective_state_is_pure() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let d = Duration::minutes(30);
        assert_eq!(
            effective_state(BreakerState::Open, Some(t0), t0 + d, d),
            BreakerState::HalfOpen
        );
        assert_eq!(
            effective_state(BreakerState::Open, Some(t0), t0, d),
            BreakerState::Open
        );
        assert_eq!(
            effective_state(BreakerState::Closed, None, t0 + d, d),
            BreakerState::Closed
        );
    }

    #[test]
    fn concurrent_failures_open_exactly_once() {
        let (breaker, _, sink) = setup();
        let breaker = Arc::new(breaker);
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let b = Arc::clone(&breaker);
                std::thread::spawn(move || b.record_failure("svc"))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let opened = sink
            .names()
            .into_iter()
            .filter(|n| *n == "breaker_opened")
            .count();
        assert_eq!(opened, 1);
        assert_eq!(breaker.get_state("svc").failures, 16);
    }
}
