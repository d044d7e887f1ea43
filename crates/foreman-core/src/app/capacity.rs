//! CapacityAllocator - host ごとの同時実行枠
//!
//! - ceiling は host の CPU / メモリから毎 tick 計算（キャッシュしない）
//! - operator の override は下方向にだけ効く
//! - 対話セッション用の予約枠を autonomous dispatch から守る
//! - ceiling が予約枠以下の host には autonomous の席が永遠に回らない。起動時に warn する

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::config::{CapacityConfig, HostProfile};
use crate::domain::{HostId, StoreError, TaskStatus};
use crate::ports::{SessionCounter, TaskQuery, TaskStore};

/// Seats a host can run before any override, from its hardware profile.
pub fn auto_ceiling(profile: &HostProfile, cfg: &CapacityConfig) -> u32 {
    let by_mem = cfg.usable_ratio * profile.total_mem_mb as f64 / cfg.mem_per_task_mb as f64;
    let by_cpu = cfg.usable_ratio * profile.cpu_cores / cfg.cpu_per_task;
    let seats = by_mem.min(by_cpu).floor();
    let seats = if seats.is_finite() && seats > 0.0 {
        seats.min(u32::MAX as f64) as u32
    } else {
        0
    };
    seats.max(cfg.min_ceiling)
}

/// Apply the operator override. Only a positive value below `auto` changes anything.
pub fn clamp_ceiling(auto: u32, override_seats: Option<u32>) -> u32 {
    match override_seats {
        Some(n) if n > 0 => n.min(auto),
        _ => auto,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapacityBudget {
    pub host: HostId,
    pub ceiling: u32,
    pub auto_ceiling: u32,

    /// Tasks currently `in_progress` at this host.
    pub used: u32,

    /// `ceiling - used`, never negative.
    pub available: u32,

    /// Seats held back for interactive sessions.
    pub reserved: u32,

    /// Interactive sessions running right now.
    pub interactive: u32,

    /// What autonomous dispatch may still start after the reservation.
    pub autonomous_available: u32,
}

impl CapacityBudget {
    pub fn can_dispatch_autonomous(&self) -> bool {
        self.autonomous_available > 0
    }
}

pub struct CapacityAllocator {
    hosts: Vec<HostProfile>,
    config: CapacityConfig,
    store: Arc<dyn TaskStore>,
    sessions: Arc<dyn SessionCounter>,
}

impl CapacityAllocator {
    pub fn new(
        hosts: Vec<HostProfile>,
        config: CapacityConfig,
        store: Arc<dyn TaskStore>,
        sessions: Arc<dyn SessionCounter>,
    ) -> Self {
        let allocator = Self {
            hosts,
            config,
            store,
            sessions,
        };
        for host in allocator.starved_hosts() {
            warn!(
                host = %host,
                ceiling = allocator.ceiling(&host),
                interactive_reserve = allocator.config.interactive_reserve,
                "host ceiling does not exceed the interactive reserve; no autonomous dispatch will run there"
            );
        }
        allocator
    }

    /// Configured hosts whose ceiling leaves nothing after the interactive reserve.
    pub fn starved_hosts(&self) -> Vec<HostId> {
        self.hosts
            .iter()
            .filter(|h| self.ceiling(&h.name) <= self.config.interactive_reserve)
            .map(|h| h.name.clone())
            .collect()
    }

    pub fn profile(&self, host: &HostId) -> Option<&HostProfile> {
        self.hosts.iter().find(|h| &h.name == host)
    }

    /// Ceiling for a host without touching the store. Unknown hosts get the minimum.
    pub fn ceiling(&self, host: &HostId) -> u32 {
        let auto = self
            .profile(host)
            .map(|p| auto_ceiling(p, &self.config))
            .unwrap_or(self.config.min_ceiling);
        clamp_ceiling(auto, self.config.max_seats_override)
    }

    pub async fn budget(&self, host: &HostId) -> Result<CapacityBudget, StoreError> {
        let auto = self
            .profile(host)
            .map(|p| auto_ceiling(p, &self.config))
            .unwrap_or(self.config.min_ceiling);
        let ceiling = clamp_ceiling(auto, self.config.max_seats_override);

        let in_progress = TaskQuery::with_status(&[TaskStatus::InProgress]).at(host.clone());
        let used = u32::try_from(self.store.count(&in_progress).await?).unwrap_or(u32::MAX);
        let interactive = self.sessions.interactive_sessions(host).await?;

        let reserved = self.config.interactive_reserve;
        let held_back = reserved.max(interactive);

        Ok(CapacityBudget {
            host: host.clone(),
            ceiling,
            auto_ceiling: auto,
            used,
            available: ceiling.saturating_sub(used),
            reserved,
            interactive,
            autonomous_available: ceiling.saturating_sub(used.saturating_add(held_back)),
        })
    }

    /// Budgets of every configured host, in configuration order.
    pub async fn budgets(&self) -> Result<Vec<CapacityBudget>, StoreError> {
        let mut out = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            out.push(self.budget(&host.name).await?);
        }
        Ok(out)
    }
}
