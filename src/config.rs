//! Migration configuration
//!
//! A migration is described by one YAML file naming the mode, the engine
//! settings and the two stores:
//!
//! ```yaml
//! mode: resumable
//! settings:
//!   fetch_size: 500
//!   failure_log_dir: ./failures
//! source:
//!   type: search_index
//!   url: http://localhost:9200
//!   index: products
//! destination:
//!   type: collection
//!   path: ./migrated.duckdb
//!   collection: products
//! ```

use crate::engine::EngineConfig;
use crate::error::{Error, Result};
use crate::http::RateLimiterConfig;
use crate::retry::RetryPolicy;
use crate::store::SearchAuth;
use crate::types::{Backend, TransferMode, DEFAULT_MARKER_FIELD};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Lowercase search index names, as the cluster accepts them
static INDEX_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9._+\-]*$").expect("Invalid index name regex")
});

/// Collection names and the marker field
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_.\-]*$").expect("Invalid identifier regex")
});

// ============================================================================
// Top-Level Config
// ============================================================================

/// Complete migration configuration loaded from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// What `run` executes
    #[serde(default)]
    pub mode: TransferMode,

    /// Engine settings
    #[serde(default)]
    pub settings: Settings,

    /// Store records are read from
    pub source: StoreConfig,

    /// Store records are copied into
    pub destination: StoreConfig,
}

impl MigrationConfig {
    /// Load and validate a config file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            Error::config(format!(
                "Failed to read config file '{}': {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate YAML
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Check values serde cannot
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        self.source.validate("source")?;
        self.destination.validate("destination")?;

        if self.source == self.destination {
            return Err(Error::config("source and destination are the same store"));
        }
        Ok(())
    }

    /// Settings for the transfer engine
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            fetch_size: self.settings.fetch_size,
            scroll_page_size: self.settings.scroll_page_size,
            keep_alive: self.settings.keep_alive.clone(),
            marker_field: self.settings.marker_field.clone(),
            retry: self.settings.retry.clone(),
            max_idle_batches: self.settings.max_idle_batches,
        }
    }
}

// ============================================================================
// Settings
// ============================================================================

/// Engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Records fetched per resumable batch
    pub fetch_size: usize,

    /// Records per page of a full-transfer scan
    pub scroll_page_size: usize,

    /// How long the server keeps scan state between pages (e.g. "2m")
    pub keep_alive: String,

    /// Field holding the migration marker
    pub marker_field: String,

    /// Directory for per-record failure files; failures are only logged
    /// through tracing when unset
    pub failure_log_dir: Option<PathBuf>,

    /// Retry policy for query-class failures
    pub retry: RetryPolicy,

    /// Consecutive iterations without progress before giving up
    pub max_idle_batches: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            fetch_size: 500,
            scroll_page_size: 500,
            keep_alive: "2m".to_string(),
            marker_field: DEFAULT_MARKER_FIELD.to_string(),
            failure_log_dir: None,
            retry: RetryPolicy::default(),
            max_idle_batches: 3,
        }
    }
}

impl Settings {
    fn validate(&self) -> Result<()> {
        if self.fetch_size == 0 {
            return Err(Error::invalid_value("settings.fetch_size", "must be at least 1"));
        }
        if self.scroll_page_size == 0 {
            return Err(Error::invalid_value(
                "settings.scroll_page_size",
                "must be at least 1",
            ));
        }
        if self.max_idle_batches == 0 {
            return Err(Error::invalid_value(
                "settings.max_idle_batches",
                "must be at least 1",
            ));
        }
        if !IDENTIFIER.is_match(&self.marker_field) {
            return Err(Error::invalid_value(
                "settings.marker_field",
                format!("'{}' is not a valid field name", self.marker_field),
            ));
        }
        if self.keep_alive.is_empty() {
            return Err(Error::missing_field("settings.keep_alive"));
        }
        Ok(())
    }
}

// ============================================================================
// Stores
// ============================================================================

/// One side of a migration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Elasticsearch-compatible search index
    SearchIndex(SearchIndexConfig),
    /// Document collection in DuckDB
    Collection(CollectionConfig),
}

impl StoreConfig {
    /// Backend this store is
    pub fn backend(&self) -> Backend {
        match self {
            Self::SearchIndex(_) => Backend::SearchIndex,
            Self::Collection(_) => Backend::Collection,
        }
    }

    /// Index or collection name
    pub fn name(&self) -> &str {
        match self {
            Self::SearchIndex(def) => &def.index,
            Self::Collection(def) => &def.collection,
        }
    }

    fn validate(&self, side: &str) -> Result<()> {
        match self {
            Self::SearchIndex(def) => {
                url::Url::parse(&def.url).map_err(|e| {
                    Error::invalid_value(format!("{side}.url"), format!("'{}': {e}", def.url))
                })?;
                if !INDEX_NAME.is_match(&def.index) {
                    return Err(Error::invalid_value(
                        format!("{side}.index"),
                        format!("'{}' is not a valid index name", def.index),
                    ));
                }
            }
            Self::Collection(def) => {
                if !IDENTIFIER.is_match(&def.collection) {
                    return Err(Error::invalid_value(
                        format!("{side}.collection"),
                        format!("'{}' is not a valid collection name", def.collection),
                    ));
                }
                if def.max_document_bytes == 0 {
                    return Err(Error::invalid_value(
                        format!("{side}.max_document_bytes"),
                        "must be at least 1",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Search index connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchIndexConfig {
    /// Cluster base URL
    pub url: String,

    /// Default index
    pub index: String,

    /// Credentials
    #[serde(default)]
    pub auth: Option<SearchAuth>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Transport-level retries inside the HTTP client
    #[serde(default)]
    pub retry: RetryPolicy,

    /// Client-side rate limit
    #[serde(default)]
    pub rate_limit: Option<RateLimiterConfig>,
}

fn default_timeout_secs() -> u64 {
    30
}

/// Collection connection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Database file; in-memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Default collection
    pub collection: String,

    /// Largest document body accepted
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

fn default_max_document_bytes() -> usize {
    crate::store::DEFAULT_MAX_DOCUMENT_BYTES
}
