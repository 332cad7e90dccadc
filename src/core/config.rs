//! Configuration management for the search index engine
//!
//! This module handles all configuration settings, with defaults matching
//! the constants the engine's design calls for.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Record store connection settings
    pub record_store: RecordStoreConfig,

    /// Search store connection settings
    pub search_store: SearchStoreConfig,

    /// Sync driver tuning
    pub sync: SyncConfig,

    /// Index planner and scheduling tuning
    pub scheduling: SchedulingConfig,

    /// Metrics and monitoring
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Record store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordStoreConfig {
    /// Connection URI for the record store
    pub uri: String,

    /// Database name within the record store
    pub database: String,

    /// Page size used when streaming records for diffing/reads
    pub find_page_size: usize,
}

/// Search store connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchStoreConfig {
    /// Base URL of the search store's bulk-ingest endpoint
    pub url: String,

    /// Request timeout for bulk and search requests
    pub request_timeout: Duration,

    /// Prefix applied to every index name this engine manages
    pub index_prefix: String,
}

/// Sync driver tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Number of documents per bulk chunk sent to the search store
    pub chunk_size: usize,

    /// Number of concurrent worker tasks draining the bulk-op queue
    pub worker_count: usize,

    /// Queue capacity, expressed as a multiple of `chunk_size`
    pub buffer_multiplier: usize,

    /// Maximum number of retries for a failed bulk chunk
    pub max_retries: u32,
}

/// Index planner and scheduling tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulingConfig {
    /// Maximum number of documents stored in a single archive index before
    /// the planner rotates to a new one
    pub max_docs_per_archive: u64,

    /// Default maximum keyword length used when no parsing options override it
    pub default_keyword_length: u32,

    /// Default float format string used when rendering numbers for indexing
    pub default_float_format: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable the Prometheus metrics registry
    pub enable_prometheus: bool,

    /// Bind address for the metrics/admin HTTP surface
    pub bind_addr: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            record_store: RecordStoreConfig::default(),
            search_store: SearchStoreConfig::default(),
            sync: SyncConfig::default(),
            scheduling: SchedulingConfig::default(),
            metrics: MetricsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for RecordStoreConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://localhost:27017".to_string(),
            database: "stratum".to_string(),
            find_page_size: 100,
        }
    }
}

impl Default for SearchStoreConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            request_timeout: Duration::from_secs(30),
            index_prefix: "stratum".to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            chunk_size: 100,
            worker_count: 2,
            buffer_multiplier: 3,
            max_retries: 3,
        }
    }
}

impl Default for SchedulingConfig {
    fn default() -> Self {
        Self {
            max_docs_per_archive: 2_000_000,
            default_keyword_length: 2_147_483_647,
            default_float_format: "{0:.15g}".to_string(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
            bind_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file, then environment variables, then validate.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::from_file("stratum-index.toml").unwrap_or_default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("failed to read config file: {}", e)))?;

        toml::from_str(&contents)
            .map_err(|e| Error::config(format!("failed to parse config file: {}", e)))
    }

    /// Apply environment variable overrides, `SG_*` prefixed
    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        if let Ok(uri) = env::var("SG_RECORD_STORE_URI") {
            self.record_store.uri = uri;
        }
        if let Ok(db) = env::var("SG_RECORD_STORE_DATABASE") {
            self.record_store.database = db;
        }
        if let Ok(url) = env::var("SG_SEARCH_STORE_URL") {
            self.search_store.url = url;
        }
        if let Ok(prefix) = env::var("SG_SEARCH_STORE_INDEX_PREFIX") {
            self.search_store.index_prefix = prefix;
        }
        if let Ok(chunk_size) = env::var("SG_SYNC_CHUNK_SIZE") {
            self.sync.chunk_size = chunk_size
                .parse()
                .map_err(|e| Error::config(format!("invalid chunk size: {}", e)))?;
        }
        if let Ok(workers) = env::var("SG_SYNC_WORKER_COUNT") {
            self.sync.worker_count = workers
                .parse()
                .map_err(|e| Error::config(format!("invalid worker count: {}", e)))?;
        }
        if let Ok(level) = env::var("SG_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = env::var("SG_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if self.sync.chunk_size == 0 {
            return Err(Error::config("sync chunk size must be greater than zero"));
        }

        if self.sync.worker_count == 0 {
            return Err(Error::config("sync worker count must be greater than zero"));
        }

        if self.scheduling.max_docs_per_archive == 0 {
            return Err(Error::config("max docs per archive must be greater than zero"));
        }

        if self.scheduling.default_keyword_length > 2_147_483_647 {
            return Err(Error::config("keyword length exceeds i32::MAX"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("invalid log level")),
        }

        Ok(())
    }

    /// Queue capacity derived from `chunk_size * buffer_multiplier`
    pub fn queue_capacity(&self) -> usize {
        self.sync.chunk_size * self.sync.buffer_multiplier
    }

    /// Optimal worker count, falling back to the number of CPU cores when zero
    pub fn optimal_worker_threads(&self) -> usize {
        if self.sync.worker_count == 0 {
            num_cpus::get().max(1)
        } else {
            self.sync.worker_count
        }
    }
}
