//! Engine types
//!
//! Configuration, progress and reports for the transfer engine.

use crate::retry::RetryPolicy;
use crate::types::{Marker, DEFAULT_MARKER_FIELD};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Configuration for a transfer engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Records fetched per resumable batch
    pub fetch_size: usize,
    /// Records per page of a full-transfer scan
    pub scroll_page_size: usize,
    /// Scan keep-alive passed to the source store
    pub keep_alive: String,
    /// Field carrying the migration marker
    pub marker_field: String,
    /// Retry policy for query-class failures
    pub retry: RetryPolicy,
    /// Consecutive iterations without progress before giving up
    pub max_idle_batches: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fetch_size: 500,
            scroll_page_size: 500,
            keep_alive: "2m".to_string(),
            marker_field: DEFAULT_MARKER_FIELD.to_string(),
            retry: RetryPolicy::default(),
            max_idle_batches: 3,
        }
    }
}

impl EngineConfig {
    /// Create a new engine config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the resumable batch size
    #[must_use]
    pub fn with_fetch_size(mut self, size: usize) -> Self {
        self.fetch_size = size;
        self
    }

    /// Set the scan page size
    #[must_use]
    pub fn with_scroll_page_size(mut self, size: usize) -> Self {
        self.scroll_page_size = size;
        self
    }

    /// Set the retry policy
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the stall threshold
    #[must_use]
    pub fn with_max_idle_batches(mut self, max: u32) -> Self {
        self.max_idle_batches = max;
        self
    }
}

/// Where a resumable migration stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    /// Highest marker known to be issued
    pub resume_point: Marker,
    /// Source records not yet migrated
    pub remaining: u64,
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "resume point {}, {} records remaining",
            self.resume_point, self.remaining
        )
    }
}

/// How a resumable run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Nothing was left to migrate when the run started
    AlreadyComplete,
    /// The run migrated the remaining records
    Complete,
    /// Every record left was refused by the destination during this run
    Partial,
}

/// Result of a resumable run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// How the run ended
    pub status: RunStatus,
    /// Progress after the last iteration
    pub progress: Progress,
    /// Counters for this run
    pub stats: TransferStats,
}

/// Result of a full transfer
#[derive(Debug, Clone, Serialize)]
pub struct TransferReport {
    /// Non-empty scan pages copied
    pub pages: usize,
    /// Destination collections written to
    pub collections: BTreeSet<String>,
    /// Counters for this run
    pub stats: TransferStats,
}

/// Statistics from a run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    /// Batches or pages processed
    pub batches: usize,
    /// Records read from the source
    pub records_read: usize,
    /// Copies newly inserted at the destination
    pub records_written: usize,
    /// Copies found already present at the destination
    pub duplicates: usize,
    /// Source records stamped with a marker
    pub records_tagged: usize,
    /// Records the destination refused
    pub write_failures: usize,
    /// Committed records whose stamp did not land
    pub tagging_failures: usize,
    /// Query retries spent
    pub retries: u32,
    /// Duration in milliseconds
    pub duration_ms: u64,
}

impl TransferStats {
    /// Create new stats
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a batch of `records` read
    pub fn add_batch(&mut self, records: usize) {
        self.batches += 1;
        self.records_read += records;
    }

    /// Add spent retries
    pub fn add_retries(&mut self, retries: u32) {
        self.retries += retries;
    }

    /// Set duration
    pub fn set_duration(&mut self, ms: u64) {
        self.duration_ms = ms;
    }
}
