//! Configuration management

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{IngestError, IngestResult};
use crate::scheduler::DebounceMode;

// ============================================================================
// Database Configuration Constants
// ============================================================================

/// Default database URL for local development.
pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/arcterx";

/// Default maximum database connections in the pool.
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 10;

/// Default minimum database connections in the pool.
pub const DEFAULT_DATABASE_MIN_CONNECTIONS: u32 = 2;

/// Default database connection timeout in seconds.
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

/// Default database idle timeout in seconds (10 minutes).
pub const DEFAULT_DATABASE_IDLE_TIMEOUT_SECS: u64 = 600;

// ============================================================================
// Monitor Configuration Constants
// ============================================================================

/// Default wait after the last change before a file is read.
pub const DEFAULT_SETTLE_DELAY_SECS: u64 = 10;

/// Default seconds between directory walks.
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Default capacity of the change event channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub database: DatabaseConfig,
    pub monitor: MonitorConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Change monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub settle_delay_secs: u64,
    #[serde(with = "debounce_serde")]
    pub debounce: DebounceMode,
    pub poll_interval_secs: u64,
    pub channel_capacity: usize,
}

impl MonitorConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_delay_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

mod debounce_serde {
    use super::DebounceMode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mode: &DebounceMode, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&mode.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DebounceMode, D::Error> {
        let s = String::deserialize(d)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl IngestConfig {
    /// Load configuration from environment and defaults
    pub fn load() -> IngestResult<Self> {
        dotenvy::dotenv().ok();

        let debounce = match std::env::var("INGEST_DEBOUNCE") {
            Ok(s) => s.parse()?,
            Err(_) => DebounceMode::default(),
        };

        let config = IngestConfig {
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
                max_connections: env_or(
                    "DATABASE_MAX_CONNECTIONS",
                    DEFAULT_DATABASE_MAX_CONNECTIONS,
                ),
                min_connections: env_or(
                    "DATABASE_MIN_CONNECTIONS",
                    DEFAULT_DATABASE_MIN_CONNECTIONS,
                ),
                connect_timeout_secs: env_or(
                    "DATABASE_CONNECT_TIMEOUT",
                    DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                ),
                idle_timeout_secs: env_or(
                    "DATABASE_IDLE_TIMEOUT",
                    DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
                ),
            },
            monitor: MonitorConfig {
                settle_delay_secs: env_or("INGEST_SETTLE_DELAY_SECS", DEFAULT_SETTLE_DELAY_SECS),
                debounce,
                poll_interval_secs: env_or(
                    "INGEST_POLL_INTERVAL_SECS",
                    DEFAULT_POLL_INTERVAL_SECS,
                ),
                channel_capacity: env_or("INGEST_CHANNEL_CAPACITY", DEFAULT_CHANNEL_CAPACITY),
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> IngestResult<()> {
        if self.database.url.is_empty() {
            return Err(IngestError::Config("Database URL cannot be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(IngestError::Config(
                "Database max_connections must be greater than 0".into(),
            ));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(IngestError::Config(format!(
                "Database min_connections ({}) cannot be greater than max_connections ({})",
                self.database.min_connections, self.database.max_connections
            )));
        }

        if self.monitor.poll_interval_secs == 0 {
            return Err(IngestError::Config(
                "Poll interval must be greater than 0".into(),
            ));
        }

        if self.monitor.channel_capacity == 0 {
            return Err(IngestError::Config(
                "Channel capacity must be greater than 0".into(),
            ));
        }

        if self.monitor.settle_delay_secs == 0 {
            tracing::warn!("Settle delay is 0 - files will be read while still being written");
        }

        Ok(())
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: DEFAULT_DATABASE_URL.to_string(),
                max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
                min_connections: DEFAULT_DATABASE_MIN_CONNECTIONS,
                connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
                idle_timeout_secs: DEFAULT_DATABASE_IDLE_TIMEOUT_SECS,
            },
            monitor: MonitorConfig {
                settle_delay_secs: DEFAULT_SETTLE_DELAY_SECS,
                debounce: DebounceMode::default(),
                poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
                channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            },
        }
    }
}
