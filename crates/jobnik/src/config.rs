use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// What the monitor does with a run whose Job reports a terminal failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Leave the failed run in the cluster for postmortem.
    #[serde(rename = "retain")]
    #[default]
    Retain,
    /// Treat a failed run like a succeeded one: wait out the grace period, then delete.
    #[serde(rename = "delete")]
    Delete,
}

impl FromStr for FailurePolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "retain" => Ok(FailurePolicy::Retain),
            "delete" => Ok(FailurePolicy::Delete),
            other => Err(crate::Error::Config(format!(
                "MONITOR_ON_FAILURE must be 'retain' or 'delete', got '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub monitor: MonitorConfig,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
    /// Upper bound on how long shutdown waits for monitors to stop.
    pub shutdown_drain: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    pub grace_period: Duration,
    #[serde(default)]
    pub on_failure: FailurePolicy,
    /// How many finished monitors stay visible in the registry.
    pub retain_finished: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            grace_period: Duration::from_secs(30),
            on_failure: FailurePolicy::Retain,
            retain_finished: 100,
        }
    }
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        let defaults = Config::default();

        let config = Config {
            server: ServerConfig {
                addr: std::env::var("SERVER_ADDR")
                    .unwrap_or_else(|_| defaults.server.addr.clone()),
                shutdown_drain: env_parse::<u64>("SHUTDOWN_DRAIN_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.server.shutdown_drain),
            },
            monitor: MonitorConfig {
                poll_interval: env_parse::<u64>("MONITOR_POLL_INTERVAL_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.monitor.poll_interval),
                grace_period: env_parse::<u64>("MONITOR_GRACE_PERIOD_SECS")?
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.monitor.grace_period),
                on_failure: env_parse::<FailurePolicy>("MONITOR_ON_FAILURE")?
                    .unwrap_or(defaults.monitor.on_failure),
                retain_finished: env_parse::<usize>("MONITOR_RETAIN_FINISHED")?
                    .unwrap_or(defaults.monitor.retain_finished),
            },
            retry: RetryPolicy {
                max_attempts: env_parse::<u32>("CREATE_RETRY_ATTEMPTS")?
                    .unwrap_or(defaults.retry.max_attempts),
                initial_delay: env_parse::<u64>("CREATE_RETRY_INITIAL_DELAY_MS")?
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_delay),
                factor: env_parse::<f64>("CREATE_RETRY_FACTOR")?
                    .unwrap_or(defaults.retry.factor),
                jitter: env_parse::<f64>("CREATE_RETRY_JITTER")?
                    .unwrap_or(defaults.retry.jitter),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.monitor.poll_interval.is_zero() {
            return Err(crate::Error::Config(
                "MONITOR_POLL_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(crate::Error::Config(
                "CREATE_RETRY_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        if self.retry.factor < 1.0 {
            return Err(crate::Error::Config(
                "CREATE_RETRY_FACTOR must be >= 1.0".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(crate::Error::Config(
                "CREATE_RETRY_JITTER must be between 0.0 and 1.0".to_string(),
            ));
        }
        Ok(())
    }
}

fn env_parse<T>(key: &str) -> crate::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| crate::Error::Config(format!("invalid value for {}: {}", key, e))),
        _ => Ok(None),
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8080".to_string(),
                shutdown_drain: Duration::from_secs(10),
            },
            monitor: MonitorConfig::default(),
            retry: RetryPolicy::default(),
        }
    }
}
