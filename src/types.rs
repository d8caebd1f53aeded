//! Common types used throughout docshift
//!
//! This module contains the record model shared by the stores, the adapters
//! and the transfer engine.

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Type Aliases
// ============================================================================

/// JSON value type (re-exported from serde_json)
pub type JsonValue = serde_json::Value;

/// JSON object type
pub type JsonObject = serde_json::Map<String, JsonValue>;

/// Progress tag assigned to each migrated record
pub type Marker = u64;

/// Up to `fetch_size` unmarked records fetched in one read call
pub type Batch = Vec<Record>;

/// Default name of the field carrying the marker
pub const DEFAULT_MARKER_FIELD: &str = "migration_marker";

// ============================================================================
// Records
// ============================================================================

/// Opaque identity of a document inside its store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(String);

impl RecordId {
    /// Create a record id
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identity derived from a marker value
    pub fn from_marker(marker: Marker) -> Self {
        Self(marker.to_string())
    }

    /// Borrow the raw identity
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RecordId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// One document read from a store
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    /// Source identity
    pub id: RecordId,
    /// Record type discriminator (index type or collection name)
    pub kind: String,
    /// Physical index or collection the record was read from
    pub origin: Option<String>,
    /// Document content
    pub payload: JsonObject,
}

impl Record {
    /// Create a record
    pub fn new(id: impl Into<RecordId>, kind: impl Into<String>, payload: JsonObject) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            origin: None,
            payload,
        }
    }

    /// Set the physical origin
    #[must_use]
    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    /// Marker carried in `field`, if any
    pub fn marker(&self, field: &str) -> Option<Marker> {
        self.payload.get(field).and_then(JsonValue::as_u64)
    }

    /// Whether the record already carries a marker
    pub fn is_marked(&self, field: &str) -> bool {
        self.payload.contains_key(field)
    }
}

/// Destination-shaped copy of a record
#[derive(Debug, Clone, PartialEq)]
pub struct NewDocument {
    /// Destination identity
    pub id: RecordId,
    /// Record type discriminator
    pub kind: String,
    /// Document body
    pub body: JsonObject,
}

impl NewDocument {
    /// Copy a record as-is, keeping its source identity
    pub fn verbatim(record: &Record) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind.clone(),
            body: record.payload.clone(),
        }
    }

    /// Serialized size of the body in bytes
    pub fn size_bytes(&self) -> crate::error::Result<usize> {
        Ok(serde_json::to_vec(&self.body)?.len())
    }
}

/// Bulk-update item stamping a marker onto a source record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Source identity
    pub id: RecordId,
    /// Physical index or collection of the source record
    pub origin: Option<String>,
    /// Marker to stamp
    pub marker: Marker,
}

// ============================================================================
// Bulk results
// ============================================================================

/// Why a single record was rejected by a bulk operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteFailureKind {
    /// A document with the same identity already exists
    DuplicateKey,
    /// The document exceeds the store's size limit
    TooLarge,
    /// Any other per-record rejection
    Rejected,
}

impl fmt::Display for WriteFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DuplicateKey => "DuplicateKey",
            Self::TooLarge => "DocumentTooLarge",
            Self::Rejected => "Rejected",
        };
        f.write_str(name)
    }
}

/// A per-record failure inside an unordered bulk operation
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    /// Position of the record in the submitted list
    pub index: usize,
    /// Identity of the rejected record
    pub id: RecordId,
    /// Failure classification
    pub kind: WriteFailureKind,
    /// Store-provided reason
    pub reason: String,
}

/// Result of a bulk insert or bulk update
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkOutcome {
    /// Records applied
    pub succeeded: usize,
    /// Records rejected
    pub failures: Vec<RecordFailure>,
}

impl BulkOutcome {
    /// Whether every record was applied
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Failure for the record at `index`, if any
    pub fn failure_at(&self, index: usize) -> Option<&RecordFailure> {
        self.failures.iter().find(|f| f.index == index)
    }
}

// ============================================================================
// Backoff Type
// ============================================================================

/// Type of backoff for retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// Constant delay between retries
    Constant,
    /// Linear increase in delay
    Linear,
    /// Exponential increase in delay
    #[default]
    Exponential,
}

// ============================================================================
// Backend / Mode
// ============================================================================

/// Which kind of store an adapter fronts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// Schema-less search index queried by filter
    SearchIndex,
    /// Document collection
    Collection,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SearchIndex => f.write_str("search_index"),
            Self::Collection => f.write_str("collection"),
        }
    }
}

/// How a migration run copies data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Checkpointed loop driven by markers
    #[default]
    Resumable,
    /// One-shot, marker-free streaming copy
    Transfer,
}
