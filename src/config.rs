//! Runtime configuration for Retainless
//!
//! Values are layered: built-in defaults, then an optional TOML file, then
//! `RETAINLESS_*` environment variables (`__` separates nested keys, e.g.
//! `RETAINLESS_SECRETS__VERSIONS__V1`).

use crate::error::{RetainlessError, Result};
use chrono::{DateTime, Duration, FixedOffset, Offset, TimeZone, Utc};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Config file picked up from the working directory when none is given
pub const DEFAULT_CONFIG_FILE: &str = "retainless.toml";

/// Secret ring configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretsConfig {
    /// Version label used to hash new periods
    #[serde(default)]
    pub current: Option<String>,

    /// Secret values by version label
    #[serde(default)]
    pub versions: HashMap<String, String>,
}

/// Top-level configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetainlessConfig {
    /// Application whose periods are processed
    pub application_id: String,

    /// SQLite database path (defaults to the platform data dir)
    pub database_path: Option<PathBuf>,

    /// Access log file or directory for the W3C backend
    pub log_path: Option<PathBuf>,

    /// Longest sub-window per log query
    pub log_max_duration_secs: u64,

    /// Nominal length of one period
    pub period_length_hours: u64,

    /// Days a period's salt is kept before it can be purged
    pub period_expiration_days: u64,

    /// How many retained periods are tried when linking
    pub link_depth: usize,

    /// Log queries in flight at once
    pub query_concurrency: usize,

    /// Delay between query status polls
    pub poll_interval_ms: u64,

    /// Matched-record count at which a query is considered truncated
    pub max_records_per_query: u64,

    /// Rows per persistence batch
    pub write_batch_size: usize,

    /// Persistence batches in flight at once
    pub write_concurrency: usize,

    /// Offset used for default period ends and report buckets
    pub utc_offset_minutes: i32,

    /// Optional webhook receiving run notifications
    pub webhook_url: Option<String>,

    pub secrets: SecretsConfig,
}

impl Default for RetainlessConfig {
    fn default() -> Self {
        Self {
            application_id: "retainless-app".to_string(),
            database_path: None,
            log_path: None,
            log_max_duration_secs: 2 * 60 * 60,
            period_length_hours: 24,
            period_expiration_days: 30,
            link_depth: 1,
            query_concurrency: 5,
            poll_interval_ms: 500,
            max_records_per_query: 9000,
            write_batch_size: 100,
            write_concurrency: 4,
            utc_offset_minutes: 0,
            webhook_url: None,
            secrets: SecretsConfig::default(),
        }
    }
}

impl RetainlessConfig {
    /// Load configuration from an explicit file, `retainless.toml`, and the environment
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                debug!("Loading config file: {}", path.display());
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false));
            }
        }

        let config = builder
            .add_source(
                Environment::with_prefix("RETAINLESS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let loaded: RetainlessConfig = config.try_deserialize()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Reject values that would make a run meaningless
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| {
            Err(RetainlessError::Config(config::ConfigError::Message(
                msg.to_string(),
            )))
        };

        if self.application_id.is_empty() {
            return invalid("application_id cannot be empty");
        }
        if self.period_length_hours == 0 {
            return invalid("period_length_hours must be positive");
        }
        if self.log_max_duration_secs == 0 {
            return invalid("log_max_duration_secs must be positive");
        }
        if self.query_concurrency == 0 || self.write_concurrency == 0 {
            return invalid("concurrency limits must be positive");
        }
        if self.write_batch_size == 0 {
            return invalid("write_batch_size must be positive");
        }
        if self.utc_offset().is_none() {
            return invalid("utc_offset_minutes is out of range");
        }
        Ok(())
    }

    pub fn period_length(&self) -> Duration {
        Duration::hours(self.period_length_hours as i64)
    }

    pub fn period_expiration(&self) -> Duration {
        Duration::days(self.period_expiration_days as i64)
    }

    pub fn log_max_duration(&self) -> Duration {
        Duration::seconds(self.log_max_duration_secs as i64)
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.poll_interval_ms)
    }

    pub fn utc_offset(&self) -> Option<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60)
    }

    /// Database path from config or the platform data directory
    pub fn database_path(&self) -> PathBuf {
        self.database_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("retainless")
                .join("retainless.db")
        })
    }

    /// Start of the current day in the configured offset, as UTC
    pub fn default_period_end(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let offset = self.utc_offset().unwrap_or_else(|| Utc.fix());
        let local_day = now.with_timezone(&offset).date_naive();
        local_day
            .and_hms_opt(0, 0, 0)
            .and_then(|midnight| offset.from_local_datetime(&midnight).single())
            .map(|start| start.with_timezone(&Utc))
            .unwrap_or(now)
    }
}
