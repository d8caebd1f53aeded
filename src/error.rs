//! Error types for docshift
//!
//! This module defines the error hierarchy for the whole crate.
//! All public APIs return `Result<T, Error>` where Error is defined here.
//!
//! Store and adapter failures are never collapsed into "zero remaining" or
//! "empty batch". They surface as one of the variants below so the caller can
//! tell a finished migration from a broken one.

use thiserror::Error;

/// The main error type for docshift
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // Configuration Errors
    // ============================================================================
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Missing required config field: {field}")]
    MissingConfigField { field: String },

    #[error("Invalid config value for '{field}': {message}")]
    InvalidConfigValue { field: String, message: String },

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonParse(#[from] serde_json::Error),

    // ============================================================================
    // Store Errors
    // ============================================================================
    #[error("Cannot reach store '{store}': {message}")]
    Connectivity { store: String, message: String },

    #[error("Query against '{store}' failed: {message}")]
    Query {
        store: String,
        message: String,
        retryable: bool,
    },

    #[error("Bulk write to '{store}' failed: {message}")]
    Write { store: String, message: String },

    #[error("Tagging source records failed: {message}")]
    Tagging { message: String },

    #[error("No progress after {iterations} iterations with {remaining} records remaining")]
    Stalled { remaining: u64, iterations: u32 },

    // ============================================================================
    // HTTP Errors
    // ============================================================================
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    // ============================================================================
    // I/O Errors
    // ============================================================================
    #[error("Failure log error: {message}")]
    FailureLog { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // ============================================================================
    // Generic Errors
    // ============================================================================
    #[error("{0}")]
    Other(String),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl Error {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingConfigField {
            field: field.into(),
        }
    }

    /// Create an invalid config value error
    pub fn invalid_value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfigValue {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a connectivity error
    pub fn connectivity(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connectivity {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Create a query error that is worth retrying (timeouts, overloaded store)
    pub fn transient_query(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            store: store.into(),
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a query error that will fail the same way again (malformed filter)
    pub fn query(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            store: store.into(),
            message: message.into(),
            retryable: false,
        }
    }

    /// Create a batch-level write error
    pub fn write(store: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Write {
            store: store.into(),
            message: message.into(),
        }
    }

    /// Create a tagging error
    pub fn tagging(message: impl Into<String>) -> Self {
        Self::Tagging {
            message: message.into(),
        }
    }

    /// Create an HTTP status error
    pub fn http_status(status: u16, body: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            body: body.into(),
        }
    }

    /// Create a failure log error
    pub fn failure_log(message: impl Into<String>) -> Self {
        Self::FailureLog {
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Query { retryable, .. } => *retryable,
            Error::Http(_) | Error::RateLimited { .. } | Error::Timeout { .. } => true,
            Error::HttpStatus { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }

    /// Check if this error means a store could not be reached at all
    pub fn is_connectivity(&self) -> bool {
        matches!(self, Error::Connectivity { .. })
    }
}

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

/// Result type alias for docshift
pub type Result<T> = std::result::Result<T, Error>;

/// Extension trait for adding context to errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, message: impl Into<String>) -> Result<T>;

    /// Add context with a closure (lazy evaluation)
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, message: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", message.into(), inner))
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| {
            let inner = e.into();
            Error::Other(format!("{}: {}", f(), inner))
        })
    }
}
