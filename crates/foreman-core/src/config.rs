//! Configuration.
//!
//! Every section has `#[serde(default)]`, so a partial TOML file (or none at all)
//! yields the documented defaults.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::domain::{ForemanError, HostId};

/// Environment variable holding the operator's seat override.
pub const MAX_SEATS_ENV: &str = "FOREMAN_MAX_SEATS";

/// Upper bound for every configured duration. Keeps timestamp arithmetic in range.
pub const MAX_DURATION_SECS: i64 = 365 * 24 * 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForemanConfig {
    pub tick_interval_ms: u64,
    pub breaker: BreakerConfig,
    pub watchdog: WatchdogConfig,
    pub capacity: CapacityConfig,
    pub dedup: DedupConfig,
    pub hosts: Vec<HostProfile>,

    /// Replaces the built-in routing table when non-empty.
    pub routes: Vec<RouteConfig>,
}

impl Default for ForemanConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 5_000,
            breaker: BreakerConfig::default(),
            watchdog: WatchdogConfig::default(),
            capacity: CapacityConfig::default(),
            dedup: DedupConfig::default(),
            hosts: vec![
                HostProfile {
                    name: HostId::new("us"),
                    cpu_cores: 8.0,
                    total_mem_mb: 16_384,
                },
                HostProfile {
                    name: HostId::new("hk"),
                    cpu_cores: 4.0,
                    total_mem_mb: 8_192,
                },
            ],
            routes: Vec::new(),
        }
    }
}

impl ForemanConfig {
    pub fn tick_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.tick_interval_ms.max(1))
    }

    pub fn host(&self, name: &HostId) -> Option<&HostProfile> {
        self.hosts.iter().find(|h| &h.name == name)
    }

    /// Apply the raw value of `FOREMAN_MAX_SEATS`. Non-positive or unparsable
    /// values are ignored.
    pub fn apply_max_seats_override(&mut self, raw: Option<&str>) {
        let Some(raw) = raw else {
            return;
        };
        match raw.trim().parse::<i64>() {
            Ok(n) if n > 0 => {
                self.capacity.max_seats_override = Some(u32::try_from(n).unwrap_or(u32::MAX));
            }
            _ => {
                tracing::warn!(value = raw, env = MAX_SEATS_ENV, "ignoring invalid seat override");
            }
        }
    }

    pub fn validate(&self) -> Result<(), ForemanError> {
        if self.breaker.failure_threshold == 0 {
            return Err(ForemanError::Config(
                "breaker.failure_threshold must be positive".into(),
            ));
        }
        if self.watchdog.quarantine_threshold == 0 {
            return Err(ForemanError::Config(
                "watchdog.quarantine_threshold must be positive".into(),
            ));
        }
        check_duration("breaker.open_duration_ms", self.breaker.open_duration_ms, MAX_DURATION_SECS * 1000)?;
        check_duration(
            "watchdog.heartbeat_timeout_secs",
            self.watchdog.heartbeat_timeout_secs,
            MAX_DURATION_SECS,
        )?;
        check_duration("dedup.window_hours", self.dedup.window_hours, MAX_DURATION_SECS / 3600)?;
        check_threshold("watchdog.thresholds.rss_mb", self.watchdog.thresholds.rss_mb)?;
        check_threshold("watchdog.thresholds.cpu_pct", self.watchdog.thresholds.cpu_pct)?;
        if self.capacity.mem_per_task_mb == 0 || self.capacity.cpu_per_task <= 0.0 {
            return Err(ForemanError::Config(
                "capacity per-task costs must be positive".into(),
            ));
        }
        if !(self.capacity.usable_ratio > 0.0 && self.capacity.usable_ratio <= 1.0) {
            return Err(ForemanError::Config(
                "capacity.usable_ratio must be in (0, 1]".into(),
            ));
        }
        if self.hosts.is_empty() {
            return Err(ForemanError::Config("at least one [[hosts]] entry is required".into()));
        }
        for route in &self.routes {
            if self.host(&route.location).is_none() {
                return Err(ForemanError::Config(format!(
                    "route '{}' targets host '{}' which is not defined in [[hosts]]",
                    route.task_type, route.location
                )));
            }
        }
        Ok(())
    }
}

fn check_duration(field: &str, value: i64, max: i64) -> Result<(), ForemanError> {
    if value <= 0 || value > max {
        return Err(ForemanError::Config(format!(
            "{field} must be in 1..={max}, got {value}"
        )));
    }
    Ok(())
}

fn check_threshold(field: &str, value: Option<f64>) -> Result<(), ForemanError> {
    match value {
        Some(v) if !(v.is_finite() && v > 0.0) => Err(ForemanError::Config(format!(
            "{field} must be a positive number, got {v}"
        ))),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub failure_threshold: u32,
    pub open_duration_ms: i64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_duration_ms: 30 * 60 * 1000,
        }
    }
}

impl BreakerConfig {
    pub fn open_duration(&self) -> Duration {
        Duration::milliseconds(self.open_duration_ms.clamp(0, MAX_DURATION_SECS * 1000))
    }
}

/// Resource ceilings a running task must stay under. Unset means unchecked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceThresholds {
    pub rss_mb: Option<f64>,
    pub cpu_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    /// Watchdog kills before a task is quarantined.
    pub quarantine_threshold: u32,

    /// Ordinary failures before a task is marked failed.
    pub max_failures: u32,

    pub heartbeat_timeout_secs: i64,

    /// Optimistic-concurrency retries per operation.
    pub max_cas_retries: u32,

    pub thresholds: ResourceThresholds,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            quarantine_threshold: 2,
            max_failures: 3,
            heartbeat_timeout_secs: 600,
            max_cas_retries: 5,
            thresholds: ResourceThresholds::default(),
        }
    }
}

impl WatchdogConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::seconds(self.heartbeat_timeout_secs.clamp(0, MAX_DURATION_SECS))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    pub mem_per_task_mb: u64,
    pub cpu_per_task: f64,

    /// Share of host memory/CPU usable by tasks.
    pub usable_ratio: f64,

    pub min_ceiling: u32,

    /// Seats held back for interactive (human-triggered) sessions.
    ///
    /// A host whose ceiling is not above this value never gets an autonomous
    /// seat. That is allowed (an operator may drain a host with a low
    /// `max_seats_override`) but logged at startup and shown by `check-config`.
    pub interactive_reserve: u32,

    /// Operator override; clamps the ceiling downward only.
    pub max_seats_override: Option<u32>,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            mem_per_task_mb: 500,
            cpu_per_task: 0.5,
            usable_ratio: 0.8,
            min_ceiling: 2,
            interactive_reserve: 2,
            max_seats_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub window_hours: i64,
    pub wip_limit: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window_hours: 24,
            wip_limit: 3,
        }
    }
}

impl DedupConfig {
    pub fn window(&self) -> Duration {
        Duration::hours(self.window_hours.clamp(0, MAX_DURATION_SECS / 3600))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostProfile {
    pub name: HostId,
    pub cpu_cores: f64,
    pub total_mem_mb: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    pub task_type: String,
    pub location: HostId,
    #[serde(default)]
    pub skill: Option<String>,
}
