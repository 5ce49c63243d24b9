// ABOUTME: Process-wide tuning read from the `settings` block.
// ABOUTME: Durations use humantime syntax; every field has a default.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::deploy::{
    DEFAULT_CANCEL_POLL_ATTEMPTS, DEFAULT_CANCEL_POLL_INTERVAL, DEFAULT_START_PROBE_WINDOW,
    EngineSettings,
};
use crate::metrics;
use crate::ssh::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_IDLE_TTL, PoolSettings};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    #[serde(with = "humantime_serde")]
    pub command_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub pool_idle_ttl: Duration,
    pub cancel_poll_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub cancel_poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub start_probe_window: Duration,
    #[serde(with = "humantime_serde")]
    pub metrics_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub metrics_retention: Duration,
    pub metrics_capacity: usize,
    #[serde(with = "humantime_serde")]
    pub health_check_interval: Duration,
    pub known_hosts: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            pool_idle_ttl: DEFAULT_IDLE_TTL,
            cancel_poll_attempts: DEFAULT_CANCEL_POLL_ATTEMPTS,
            cancel_poll_interval: DEFAULT_CANCEL_POLL_INTERVAL,
            start_probe_window: DEFAULT_START_PROBE_WINDOW,
            metrics_interval: metrics::DEFAULT_INTERVAL,
            metrics_retention: metrics::DEFAULT_RETENTION,
            metrics_capacity: metrics::DEFAULT_CAPACITY,
            health_check_interval: Duration::from_secs(60),
            known_hosts: None,
        }
    }
}

impl Settings {
    pub fn pool(&self) -> PoolSettings {
        PoolSettings {
            idle_ttl: self.pool_idle_ttl,
            command_timeout: self.command_timeout,
        }
    }

    pub fn engine(&self) -> EngineSettings {
        EngineSettings {
            cancel_poll_attempts: self.cancel_poll_attempts,
            cancel_poll_interval: self.cancel_poll_interval,
            start_probe_window: self.start_probe_window,
        }
    }
}
