//! Progress and failure sinks
//!
//! The engine reports progress after every resumable iteration and hands
//! every record it could not copy to a [`FailureSink`], together with a
//! sequence number it owns.

use super::types::Progress;
use crate::error::{Error, Result, ResultExt};
use crate::types::{JsonObject, RecordId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::info;

// ============================================================================
// Progress
// ============================================================================

/// Receives progress after each iteration
pub trait ProgressSink: Send {
    /// Observe the latest progress
    fn observe(&mut self, progress: Progress);
}

/// Logs progress at info level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn observe(&mut self, progress: Progress) {
        info!("Migrated up to marker {}, {} records remaining", progress.resume_point, progress.remaining);
    }
}

impl ProgressSink for Vec<Progress> {
    fn observe(&mut self, progress: Progress) {
        self.push(progress);
    }
}

// ============================================================================
// Failures
// ============================================================================

/// A record that could not be copied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureEntry {
    /// Failure class, e.g. `DocumentTooLarge`
    pub kind: String,
    /// Store-provided reason
    pub reason: String,
    /// Source identity
    pub record_id: RecordId,
    /// Full source payload
    pub payload: JsonObject,
    /// When the failure was recorded
    pub recorded_at: DateTime<Utc>,
}

impl FailureEntry {
    /// Create an entry stamped with the current time
    pub fn new(
        kind: impl Into<String>,
        reason: impl Into<String>,
        record_id: RecordId,
        payload: JsonObject,
    ) -> Self {
        Self {
            kind: kind.into(),
            reason: reason.into(),
            record_id,
            payload,
            recorded_at: Utc::now(),
        }
    }
}

/// Destination for per-record failures
#[async_trait]
pub trait FailureSink: Send + Sync {
    /// Persist one failure under `sequence`
    async fn record(&self, sequence: u64, entry: &FailureEntry) -> Result<()>;
}

/// Writes each failure to `errs-<sequence>.json` in a directory
#[derive(Debug, Clone)]
pub struct FileFailureSink {
    dir: PathBuf,
}

impl FileFailureSink {
    /// Create a sink writing into `dir`, created on first use
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory failures are written to
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the failure with `sequence`
    pub fn path_for(&self, sequence: u64) -> PathBuf {
        self.dir.join(format!("errs-{sequence}.json"))
    }
}

#[async_trait]
impl FailureSink for FileFailureSink {
    async fn record(&self, sequence: u64, entry: &FailureEntry) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::failure_log(format!("Failed to create '{}': {e}", self.dir.display()))
        })?;

        let path = self.path_for(sequence);
        let content = serde_json::to_vec_pretty(entry)
            .with_context(|| format!("Failed to encode failure {sequence}"))?;
        tokio::fs::write(&path, content).await.map_err(|e| {
            Error::failure_log(format!("Failed to write '{}': {e}", path.display()))
        })
    }
}

/// Keeps failures in memory; clones share the same entries
#[derive(Debug, Clone, Default)]
pub struct MemoryFailureSink {
    entries: Arc<Mutex<Vec<(u64, FailureEntry)>>>,
}

impl MemoryFailureSink {
    /// Create an empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded failures in arrival order
    pub fn entries(&self) -> Vec<(u64, FailureEntry)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded failures
    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl FailureSink for MemoryFailureSink {
    async fn record(&self, sequence: u64, entry: &FailureEntry) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((sequence, entry.clone()));
        Ok(())
    }
}
