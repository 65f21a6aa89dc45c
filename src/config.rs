//! Service configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::evaluator::DEFAULT_QUERY_TIMEOUT;

/// Configuration of the external metrics scheduler
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Maximum number of evaluations running at once
    pub pool_size: usize,
    /// Tag category marking triggers handled here
    pub tag_category: String,
    /// Tag name marking triggers handled here; also the system ID of
    /// the external conditions evaluated here
    pub tag_name: String,
    /// Bound on a single metrics query
    #[serde(with = "duration_serde")]
    pub query_timeout: Duration,
    /// Change notifications queued before further ones are coalesced
    pub notification_buffer: usize,
    /// Alert ingestion endpoint; data is only logged when unset
    pub alerts_url: Option<String>,
    /// Base URL of a SQL time-series endpoint; in-process gauges when unset
    pub metrics_url: Option<String>,
    /// Gauge table queried at `metrics_url`
    pub metrics_table: String,
    /// JSON file of trigger definitions to load at startup
    pub definitions_path: Option<PathBuf>,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            pool_size: 20,
            tag_category: "HawkularMetrics".to_string(),
            tag_name: "MetricsCondition".to_string(),
            query_timeout: DEFAULT_QUERY_TIMEOUT,
            notification_buffer: 64,
            alerts_url: None,
            metrics_url: None,
            metrics_table: "gauges".to_string(),
            definitions_path: None,
        }
    }
}

impl SentinelConfig {
    /// Create config from environment variables
    ///
    /// - `SENTINEL_POOL_SIZE`
    /// - `SENTINEL_TAG_CATEGORY`, `SENTINEL_TAG_NAME`
    /// - `SENTINEL_QUERY_TIMEOUT_SECS`
    /// - `SENTINEL_NOTIFICATION_BUFFER`
    /// - `SENTINEL_ALERTS_URL`
    /// - `SENTINEL_METRICS_URL`, `SENTINEL_METRICS_TABLE`
    /// - `SENTINEL_DEFINITIONS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = lookup("SENTINEL_POOL_SIZE") {
            config.pool_size = parse_var("SENTINEL_POOL_SIZE", &v)?;
        }
        if let Some(v) = lookup("SENTINEL_TAG_CATEGORY") {
            config.tag_category = v;
        }
        if let Some(v) = lookup("SENTINEL_TAG_NAME") {
            config.tag_name = v;
        }
        if let Some(v) = lookup("SENTINEL_QUERY_TIMEOUT_SECS") {
            config.query_timeout =
                Duration::from_secs(parse_var("SENTINEL_QUERY_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = lookup("SENTINEL_NOTIFICATION_BUFFER") {
            config.notification_buffer = parse_var("SENTINEL_NOTIFICATION_BUFFER", &v)?;
        }
        config.alerts_url = lookup("SENTINEL_ALERTS_URL").filter(|s| !s.trim().is_empty());
        config.metrics_url = lookup("SENTINEL_METRICS_URL").filter(|s| !s.trim().is_empty());
        if let Some(v) = lookup("SENTINEL_METRICS_TABLE") {
            config.metrics_table = v;
        }
        config.definitions_path = lookup("SENTINEL_DEFINITIONS")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        config.validate()?;
        Ok(config)
    }

    /// Load config from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(ConfigError::Invalid("pool_size must be greater than zero".into()));
        }
        if self.notification_buffer == 0 {
            return Err(ConfigError::Invalid(
                "notification_buffer must be greater than zero".into(),
            ));
        }
        if self.query_timeout.is_zero() {
            return Err(ConfigError::Invalid("query_timeout must be greater than zero".into()));
        }
        if self.tag_category.trim().is_empty() || self.tag_name.trim().is_empty() {
            return Err(ConfigError::Invalid("tag category and name are required".into()));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidVar {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidVar { key: String, value: String },

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Durations as whole seconds or as `{secs, nanos}`
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    #[derive(Serialize, Deserialize)]
    #[serde(untagged)]
    enum DurationRepr {
        Secs(u64),
        Parts {
            secs: u64,
            #[serde(default)]
            nanos: u32,
        },
    }

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            DurationRepr::Secs(duration.as_secs()).serialize(serializer)
        } else {
            DurationRepr::Parts {
                secs: duration.as_secs(),
                nanos: duration.subsec_nanos(),
            }
            .serialize(serializer)
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match DurationRepr::deserialize(deserializer)? {
            DurationRepr::Secs(secs) => Duration::from_secs(secs),
            DurationRepr::Parts { secs, nanos } => Duration::new(secs, nanos),
        })
    }
}
