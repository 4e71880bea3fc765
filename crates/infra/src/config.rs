//! Scheduler configuration.

use std::time::Duration;

use thiserror::Error;

use crate::jobs::BackoffPolicy;

/// Configuration error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            key,
            reason: reason.into(),
        }
    }
}

pub const ENV_WORKERS: &str = "SLUICE_WORKERS";
pub const ENV_INTERVAL_MS: &str = "SLUICE_INTERVAL_MS";
pub const ENV_VISIBILITY_TIMEOUT_MS: &str = "SLUICE_VISIBILITY_TIMEOUT_MS";
pub const ENV_BACKOFF_INITIAL_MS: &str = "SLUICE_BACKOFF_INITIAL_MS";
pub const ENV_BACKOFF_MAX_MS: &str = "SLUICE_BACKOFF_MAX_MS";

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Name for logging
    pub name: String,
    /// Number of workers; also the hand-off queue capacity
    pub worker_count: usize,
    /// Idle wait when there is no capacity or no work
    pub interval: Duration,
    /// Lease length given to every dispatched job
    pub visibility_timeout: Duration,
    /// Backoff for retried store calls
    pub backoff: BackoffPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            name: "scheduler".to_string(),
            worker_count: 4,
            interval: Duration::from_secs(1),
            visibility_timeout: Duration::from_secs(30),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_visibility_timeout(mut self, visibility_timeout: Duration) -> Self {
        self.visibility_timeout = visibility_timeout;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(ConfigError::invalid("worker_count", "must be at least 1"));
        }
        if self.interval.is_zero() {
            return Err(ConfigError::invalid("interval", "must be positive"));
        }
        if self.visibility_timeout.is_zero() {
            return Err(ConfigError::invalid("visibility_timeout", "must be positive"));
        }
        if self.backoff.initial_delay.is_zero() {
            return Err(ConfigError::invalid("backoff.initial_delay", "must be positive"));
        }
        if self.backoff.initial_delay > self.backoff.max_delay {
            return Err(ConfigError::invalid(
                "backoff.max_delay",
                "must not be shorter than backoff.initial_delay",
            ));
        }
        Ok(())
    }

    /// Defaults overridden by `SLUICE_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(n) = parse_u64(&lookup, ENV_WORKERS)? {
            config.worker_count = usize::try_from(n)
                .map_err(|_| ConfigError::invalid(ENV_WORKERS, "out of range"))?;
        }
        if let Some(ms) = parse_u64(&lookup, ENV_INTERVAL_MS)? {
            config.interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_VISIBILITY_TIMEOUT_MS)? {
            config.visibility_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_BACKOFF_INITIAL_MS)? {
            config.backoff.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_u64(&lookup, ENV_BACKOFF_MAX_MS)? {
            config.backoff.max_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_u64<F>(lookup: &F, key: &'static str) -> Result<Option<u64>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| ConfigError::invalid(key, format!("{raw:?}: {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.visibility_timeout, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_defaults() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            (ENV_WORKERS, "8"),
            (ENV_INTERVAL_MS, "250"),
            (ENV_VISIBILITY_TIMEOUT_MS, "60000"),
            (ENV_BACKOFF_INITIAL_MS, "100"),
            (ENV_BACKOFF_MAX_MS, "5000"),
        ]))
        .unwrap();

        assert_eq!(config.worker_count, 8);
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.visibility_timeout, Duration::from_secs(60));
        assert_eq!(
            config.backoff,
            BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(5))
        );
    }

    #[test]
    fn blank_values_fall_back_to_defaults() {
        let config = SchedulerConfig::from_lookup(lookup(&[(ENV_WORKERS, "  ")])).unwrap();
        assert_eq!(config.worker_count, 4);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = SchedulerConfig::from_lookup(lookup(&[(ENV_INTERVAL_MS, "soon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { key: ENV_INTERVAL_MS, .. }
        ));
    }

    #[test]
    fn zero_workers_is_rejected() {
        let err = SchedulerConfig::default()
            .with_worker_count(0)
            .validate()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "worker_count", .. }));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let config = SchedulerConfig::default().with_backoff(BackoffPolicy::new(
            Duration::from_secs(10),
            Duration::from_secs(1),
        ));
        assert!(config.validate().is_err());
    }
}
