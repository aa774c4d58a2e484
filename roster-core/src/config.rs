//! Configuration types

use crate::error::{ConfigError, RosterError, RosterResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Default key root.
pub const DEFAULT_ROOT: &str = "/roster/";

/// List-watch settings shared by every cacher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListWatchConfig {
    /// Deadline for a single full list call.
    pub timeout: Duration,
}

impl Default for ListWatchConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl fmt::Display for ListWatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{timeout: {:?}}}", self.timeout)
    }
}

/// Retry configuration for cacher list/watch loops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// `None` retries forever.
    pub max_retries: Option<u32>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: None,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff before retry number `attempt` (0-based), capped at `max_backoff`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.max(1.0).powi(attempt.min(64) as i32);
        let millis = self.initial_backoff.as_millis() as f64 * f64::from(factor);
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// True once `attempts` retries have been spent.
    pub fn exhausted(&self, attempts: u32) -> bool {
        self.max_retries.is_some_and(|max| attempts >= max)
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterConfig {
    /// Every valid key starts with this prefix.
    pub root: String,
    /// Interval of the dirty-marking watchdog. Zero disables it.
    pub cache_ttl: Duration,
    pub list_watch: ListWatchConfig,
    pub retry: RetryConfig,
}

impl Default for RosterConfig {
    fn default() -> Self {
        Self {
            root: DEFAULT_ROOT.to_string(),
            cache_ttl: Duration::ZERO,
            list_watch: ListWatchConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl RosterConfig {
    /// Load configuration from `ROSTER_*` environment variables, falling
    /// back to defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let retry_defaults = RetryConfig::default();

        Self {
            root: std::env::var("ROSTER_ROOT").unwrap_or(defaults.root),
            cache_ttl: env_parse("ROSTER_CACHE_TTL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.cache_ttl),
            list_watch: ListWatchConfig {
                timeout: env_parse("ROSTER_LIST_WATCH_TIMEOUT_SECS")
                    .map(Duration::from_secs)
                    .unwrap_or(defaults.list_watch.timeout),
            },
            retry: RetryConfig {
                max_retries: env_parse("ROSTER_WATCH_MAX_RETRIES").or(retry_defaults.max_retries),
                initial_backoff: env_parse("ROSTER_WATCH_INITIAL_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.initial_backoff),
                max_backoff: env_parse("ROSTER_WATCH_MAX_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(retry_defaults.max_backoff),
                backoff_multiplier: retry_defaults.backoff_multiplier,
            },
        }
    }

    pub fn with_root(mut self, root: impl Into<String>) -> Self {
        self.root = root.into();
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_list_timeout(mut self, timeout: Duration) -> Self {
        self.list_watch.timeout = timeout;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Validate the configuration.
    /// Returns Ok(()) if valid, Err(RosterError::Config) if invalid.
    pub fn validate(&self) -> RosterResult<()> {
        if self.root.is_empty() {
            return Err(RosterError::Config(ConfigError::MissingRequired {
                field: "root".to_string(),
            }));
        }

        if !self.root.starts_with('/') {
            return Err(RosterError::Config(ConfigError::InvalidValue {
                field: "root".to_string(),
                value: self.root.clone(),
                reason: "root must start with '/'".to_string(),
            }));
        }

        if self.list_watch.timeout.is_zero() {
            return Err(RosterError::Config(ConfigError::InvalidValue {
                field: "list_watch.timeout".to_string(),
                value: format!("{:?}", self.list_watch.timeout),
                reason: "timeout must be positive".to_string(),
            }));
        }

        if self.retry.initial_backoff.is_zero() {
            return Err(RosterError::Config(ConfigError::InvalidValue {
                field: "retry.initial_backoff".to_string(),
                value: format!("{:?}", self.retry.initial_backoff),
                reason: "initial_backoff must be positive".to_string(),
            }));
        }

        if self.retry.max_backoff < self.retry.initial_backoff {
            return Err(RosterError::Config(ConfigError::InvalidValue {
                field: "retry.max_backoff".to_string(),
                value: format!("{:?}", self.retry.max_backoff),
                reason: "max_backoff must not be below initial_backoff".to_string(),
            }));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(RosterError::Config(ConfigError::InvalidValue {
                field: "retry.backoff_multiplier".to_string(),
                value: self.retry.backoff_multiplier.to_string(),
                reason: "backoff_multiplier must be at least 1.0".to_string(),
            }));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}
