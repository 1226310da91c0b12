//! Ingest configuration from `HIDWATCH_*` environment variables.

#![forbid(unsafe_code)]

use std::time::Duration;

use hidwatch_core::BufferError;

pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_QUEUE_CAP: usize = 2048;
pub const DEFAULT_NOTIFY_TIMEOUT_MS: u64 = 5000;
/// Largest accepted ingest queue; tokio channels refuse anything near `usize::MAX`.
pub const MAX_QUEUE_CAP: usize = 1 << 20;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var}: expected a positive integer, got {value:?}")]
    Invalid { var: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{var} = {value} exceeds the limit of {max}")]
    TooLarge { var: &'static str, value: usize, max: usize },
    #[error(transparent)]
    Buffer(#[from] BufferError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestConfig {
    /// Capacity of the log record buffer.
    pub log_cap: usize,
    /// Capacity of the job event buffer.
    pub event_cap: usize,
    /// Capacity of the ingest command channel.
    pub queue_cap: usize,
    pub notify_timeout: Duration,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            log_cap: DEFAULT_MAX_ENTRIES,
            event_cap: DEFAULT_MAX_ENTRIES,
            queue_cap: DEFAULT_QUEUE_CAP,
            notify_timeout: Duration::from_millis(DEFAULT_NOTIFY_TIMEOUT_MS),
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Build from an arbitrary key lookup; unset keys fall back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let num = |var: &'static str| -> Result<Option<u64>, ConfigError> {
            match lookup(var) {
                None => Ok(None),
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|_| ConfigError::Invalid { var, value: raw }),
            }
        };
        let max_entries = num("HIDWATCH_MAX_ENTRIES")?.map(|v| v as usize).unwrap_or(DEFAULT_MAX_ENTRIES);
        let cfg = Self {
            log_cap: num("HIDWATCH_LOG_CAP")?.map(|v| v as usize).unwrap_or(max_entries),
            event_cap: num("HIDWATCH_EVENT_CAP")?.map(|v| v as usize).unwrap_or(max_entries),
            queue_cap: num("HIDWATCH_QUEUE_CAP")?.map(|v| v as usize).unwrap_or(DEFAULT_QUEUE_CAP),
            notify_timeout: Duration::from_millis(num("HIDWATCH_NOTIFY_TIMEOUT_MS")?.unwrap_or(DEFAULT_NOTIFY_TIMEOUT_MS)),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Set both buffer capacities.
    pub fn with_max_entries(mut self, n: usize) -> Self {
        self.log_cap = n;
        self.event_cap = n;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_cap == 0 {
            return Err(ConfigError::Zero("log_cap"));
        }
        if self.event_cap == 0 {
            return Err(ConfigError::Zero("event_cap"));
        }
        if self.queue_cap == 0 {
            return Err(ConfigError::Zero("queue_cap"));
        }
        if self.queue_cap > MAX_QUEUE_CAP {
            return Err(ConfigError::TooLarge { var: "queue_cap", value: self.queue_cap, max: MAX_QUEUE_CAP });
        }
        Ok(())
    }
}
