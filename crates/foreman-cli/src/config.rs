use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use foreman_core::config::{ForemanConfig, MAX_SEATS_ENV};

/// Load, apply the environment override, and validate.
pub fn load_config(path: Option<&Path>) -> Result<ForemanConfig> {
    let mut config = match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("reading config: {}", path.display()))?;
            toml::from_str(&content)
                .with_context(|| format!("parsing config: {}", path.display()))?
        }
        None => {
            info!("no config file given, using defaults");
            ForemanConfig::default()
        }
    };

    config.apply_max_seats_override(std::env::var(MAX_SEATS_ENV).ok().as_deref());
    config.validate().context("validating config")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: ForemanConfig = toml::from_str(
            r#"
            tick_interval_ms = 250

            [breaker]
            failure_threshold = 5

            [watchdog.thresholds]
            rss_mb = 2000.0

            [[hosts]]
            name = "local"
            cpu_cores = 4.0
            total_mem_mb = 8192

            [[routes]]
            task_type = "dev"
            location = "local"
            "#,
        )
        .unwrap();

        assert_eq!(config.tick_interval_ms, 250);
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.breaker.open_duration_ms, 30 * 60 * 1000);
        assert_eq!(config.watchdog.thresholds.rss_mb, Some(2000.0));
        assert_eq!(config.watchdog.thresholds.cpu_pct, None);
        assert_eq!(config.dedup.wip_limit, 3);
        assert_eq!(config.hosts.len(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn route_to_unknown_host_fails_validation() {
        let config: ForemanConfig = toml::from_str(
            r#"
            [[hosts]]
            name = "local"
            cpu_cores = 4.0
            total_mem_mb = 8192

            [[routes]]
            task_type = "dev"
            location = "elsewhere"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn negative_heartbeat_timeout_fails_validation() {
        let config: ForemanConfig = toml::from_str(
            r#"
            [watchdog]
            heartbeat_timeout_secs = -60
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("heartbeat_timeout_secs"));
    }
}
