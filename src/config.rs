use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Site directory; indexes live under `<site_dir>/index/<type>`
    #[serde(default = "default_site_dir")]
    pub site_dir: PathBuf,

    /// Background indexing configuration
    #[serde(default)]
    pub indexing: IndexingConfig,

    /// Cluster fan-out configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from file and environment
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/default.toml".to_string());

        config::Config::builder()
            // Start with default values
            .add_source(config::File::from_str(
                include_str!("../config/default.toml"),
                config::FileFormat::Toml,
            ))
            // Override with config file if it exists
            .add_source(config::File::with_name(&config_path).required(false))
            // Override with environment variables (prefix: TEXT_INDEX_)
            .add_source(
                config::Environment::with_prefix("TEXT_INDEX")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Configuration rooted at the given site directory, all other values default
    pub fn with_site_dir(site_dir: impl Into<PathBuf>) -> Self {
        Self {
            site_dir: site_dir.into(),
            ..Default::default()
        }
    }

    /// Directory holding every entity-type index
    pub fn index_root(&self) -> PathBuf {
        self.site_dir.join("index")
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.indexing.worker_pool_size == 0 {
            return Err(AppError::Configuration(
                "indexing.worker_pool_size must be greater than 0".to_string(),
            ));
        }
        if self.indexing.batch_size == 0 {
            return Err(AppError::Configuration(
                "indexing.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.indexing.writer_heap_size < MIN_WRITER_HEAP_SIZE {
            return Err(AppError::Configuration(format!(
                "indexing.writer_heap_size must be at least {} bytes",
                MIN_WRITER_HEAP_SIZE
            )));
        }
        if self.cluster.fanout_timeout_ms == 0 {
            return Err(AppError::Configuration(
                "cluster.fanout_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            site_dir: default_site_dir(),
            indexing: IndexingConfig::default(),
            cluster: ClusterConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

/// Smallest heap tantivy accepts for a single-threaded writer
pub const MIN_WRITER_HEAP_SIZE: usize = 15_000_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Number of concurrent batch workers shared by all entity types
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,

    /// Priority of indexing work; lower values are served first
    #[serde(default = "default_indexing_priority")]
    pub priority: u32,

    /// Entities fetched per catch-up scan batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Index writer heap size in bytes
    #[serde(default = "default_writer_heap_size")]
    pub writer_heap_size: usize,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: default_worker_pool_size(),
            priority: default_indexing_priority(),
            batch_size: default_batch_size(),
            writer_heap_size: default_writer_heap_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Per-node timeout for broadcast tasks (milliseconds)
    #[serde(default = "default_fanout_timeout")]
    pub fanout_timeout_ms: u64,
}

impl ClusterConfig {
    pub fn fanout_timeout(&self) -> Duration {
        Duration::from_millis(self.fanout_timeout_ms)
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            fanout_timeout_ms: default_fanout_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing filter directive
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

// Default value functions
fn default_site_dir() -> PathBuf {
    PathBuf::from("./site")
}

fn default_worker_pool_size() -> usize {
    4
}

fn default_indexing_priority() -> u32 {
    20
}

fn default_batch_size() -> usize {
    5000
}

fn default_writer_heap_size() -> usize {
    50_000_000 // 50MB
}

fn default_fanout_timeout() -> u64 {
    30_000
}

fn default_log_filter() -> String {
    "project_text_index=info".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();
        assert_eq!(config.indexing.batch_size, 5000);
        assert_eq!(config.indexing.priority, 20);
        assert_eq!(config.indexing.worker_pool_size, 4);
        assert_eq!(config.cluster.fanout_timeout(), Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_index_root() {
        let config = Config::with_site_dir("/var/site");
        assert_eq!(config.index_root(), PathBuf::from("/var/site/index"));
    }

    #[test]
    fn test_validate_rejects_zero_batch() {
        let mut config = Config::default();
        config.indexing.batch_size = 0;
        assert!(matches!(config.validate(), Err(AppError::Configuration(_))));
    }

    #[test]
    fn test_validate_rejects_small_heap() {
        let mut config = Config::default();
        config.indexing.writer_heap_size = 1_000;
        assert!(config.validate().is_err());
    }
}
