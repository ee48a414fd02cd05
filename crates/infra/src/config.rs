//! Process configuration read from the environment.

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_KEY_PREFIX: &str = "switchyard";
pub const DEFAULT_BATCH_WORKERS: usize = 4;
pub const DEFAULT_HANDLER_WORKERS: usize = 32;
pub const DEFAULT_IDLE_BACKOFF: Duration = Duration::from_millis(250);
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

/// Runtime configuration shared by every component of a process.
#[derive(Debug, Clone)]
pub struct Config {
    /// Shared store location. `None` selects the in-memory stores.
    pub redis_url: Option<String>,
    /// Namespace for every shared-store key.
    pub key_prefix: String,
    /// Identity of this process, used for per-instance cron locks.
    pub instance_id: String,
    pub batch_workers: usize,
    pub handler_workers: usize,
    /// How long a foreman sleeps after finding its queue empty.
    pub idle_backoff: Duration,
    /// Upper bound on a single shared-store round trip.
    pub io_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            redis_url: None,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            instance_id: uuid::Uuid::new_v4().simple().to_string(),
            batch_workers: DEFAULT_BATCH_WORKERS,
            handler_workers: DEFAULT_HANDLER_WORKERS,
            idle_backoff: DEFAULT_IDLE_BACKOFF,
            io_timeout: DEFAULT_IO_TIMEOUT,
        }
    }
}

impl Config {
    /// Load from process environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `REDIS_URL` | unset (in-memory) |
    /// | `SWITCHYARD_KEY_PREFIX` | `switchyard` |
    /// | `SWITCHYARD_INSTANCE_ID` | random |
    /// | `SWITCHYARD_BATCH_WORKERS` | 4 |
    /// | `SWITCHYARD_HANDLER_WORKERS` | 32 |
    /// | `SWITCHYARD_IDLE_BACKOFF_MS` | 250 |
    /// | `SWITCHYARD_IO_TIMEOUT_MS` | 5000 |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Load using an arbitrary variable lookup. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |var: &str| lookup(var).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        Ok(Self {
            redis_url: get("REDIS_URL"),
            key_prefix: get("SWITCHYARD_KEY_PREFIX").unwrap_or(defaults.key_prefix),
            instance_id: get("SWITCHYARD_INSTANCE_ID").unwrap_or(defaults.instance_id),
            batch_workers: parse_workers("SWITCHYARD_BATCH_WORKERS", get("SWITCHYARD_BATCH_WORKERS"))?
                .unwrap_or(defaults.batch_workers),
            handler_workers: parse_workers(
                "SWITCHYARD_HANDLER_WORKERS",
                get("SWITCHYARD_HANDLER_WORKERS"),
            )?
            .unwrap_or(defaults.handler_workers),
            idle_backoff: parse_millis("SWITCHYARD_IDLE_BACKOFF_MS", get("SWITCHYARD_IDLE_BACKOFF_MS"))?
                .unwrap_or(defaults.idle_backoff),
            io_timeout: parse_millis("SWITCHYARD_IO_TIMEOUT_MS", get("SWITCHYARD_IO_TIMEOUT_MS"))?
                .unwrap_or(defaults.io_timeout),
        })
    }
}

fn parse_workers(var: &'static str, value: Option<String>) -> Result<Option<usize>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<usize>() {
        Ok(0) => Err(ConfigError::Invalid {
            var,
            value,
            reason: "must be at least 1".to_string(),
        }),
        Ok(n) => Ok(Some(n)),
        Err(e) => Err(ConfigError::Invalid {
            var,
            value,
            reason: e.to_string(),
        }),
    }
}

fn parse_millis(var: &'static str, value: Option<String>) -> Result<Option<Duration>, ConfigError> {
    let Some(value) = value else {
        return Ok(None);
    };
    match value.trim().parse::<u64>() {
        Ok(ms) => Ok(Some(Duration::from_millis(ms))),
        Err(e) => Err(ConfigError::Invalid {
            var,
            value,
            reason: e.to_string(),
        }),
    }
}
