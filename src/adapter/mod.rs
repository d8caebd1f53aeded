//! Backend adapters
//!
//! An [`Adapter`] fronts one [`DocumentStore`] and answers the questions the
//! transfer engine asks of either side of a migration:
//!
//! - `read_unmarked_batch` - source records not yet migrated
//! - `destination_copy` - how a record is shaped when written here
//! - `highest_issued_marker` / `remaining_count` - progress, recomputed
//!   every iteration
//!
//! [`write_and_mark`] ties two adapters together: assign markers, bulk insert
//! into the destination, then stamp the committed records at the source. The
//! two steps are not atomic; a record written but not stamped is read again
//! later and copied a second time.

use crate::error::{Error, Result};
use crate::store::{max_marker, DocumentStore, Filter, Query};
use crate::types::{
    Backend, Batch, JsonObject, JsonValue, Marker, NewDocument, Record, RecordFailure, RecordId, Tag,
    WriteFailureKind,
};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// One side of a migration
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Kind of store behind this adapter
    fn backend(&self) -> Backend;

    /// Underlying store connection
    fn store(&self) -> &Arc<dyn DocumentStore>;

    /// Field carrying the migration marker
    fn marker_field(&self) -> &str;

    /// Up to `size` records whose marker field is absent
    async fn read_unmarked_batch(&self, size: usize) -> Result<Batch> {
        let query = Query::new(Filter::Missing(self.marker_field().to_string()), size);
        self.store().find(&query).await
    }

    /// Shape `record` for writing into this store under `marker`
    fn destination_copy(&self, record: &Record, marker: Marker) -> NewDocument;

    /// Highest marker already issued by a migration from this source
    async fn highest_issued_marker(&self, destination: &dyn Adapter) -> Result<Marker>;

    /// Number of source records not yet migrated
    async fn remaining_count(&self, destination: &dyn Adapter) -> Result<u64>;
}

fn marked_body(record: &Record, field: &str, marker: Marker) -> JsonObject {
    let mut body = record.payload.clone();
    body.insert(field.to_string(), JsonValue::from(marker));
    body
}

// ============================================================================
// Search Index
// ============================================================================

/// Adapter for a search index
///
/// As a destination, copies are keyed by their marker. As a source, progress
/// is measured against the destination: the index itself never stores a
/// counter.
pub struct SearchIndexAdapter {
    store: Arc<dyn DocumentStore>,
    marker_field: String,
}

impl SearchIndexAdapter {
    /// Create an adapter over `store`
    pub fn new(store: Arc<dyn DocumentStore>, marker_field: impl Into<String>) -> Self {
        Self {
            store,
            marker_field: marker_field.into(),
        }
    }
}

#[async_trait]
impl Adapter for SearchIndexAdapter {
    fn backend(&self) -> Backend {
        Backend::SearchIndex
    }

    fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn marker_field(&self) -> &str {
        &self.marker_field
    }

    fn destination_copy(&self, record: &Record, marker: Marker) -> NewDocument {
        NewDocument {
            id: RecordId::from_marker(marker),
            kind: record.kind.clone(),
            body: marked_body(record, &self.marker_field, marker),
        }
    }

    async fn highest_issued_marker(&self, destination: &dyn Adapter) -> Result<Marker> {
        max_marker(destination.store().as_ref(), destination.marker_field()).await
    }

    async fn remaining_count(&self, destination: &dyn Adapter) -> Result<u64> {
        let total = self.store.count(&Filter::All).await?;
        let copied = destination.store().count(&Filter::All).await?;
        Ok(total.saturating_sub(copied))
    }
}

// ============================================================================
// Collection
// ============================================================================

/// Adapter for a document collection
///
/// As a destination, copies keep their source identity. As a source, the
/// collection owns the markers, so progress is read from its own documents.
pub struct CollectionAdapter {
    store: Arc<dyn DocumentStore>,
    marker_field: String,
}

impl CollectionAdapter {
    /// Create an adapter over `store`
    pub fn new(store: Arc<dyn DocumentStore>, marker_field: impl Into<String>) -> Self {
        Self {
            store,
            marker_field: marker_field.into(),
        }
    }
}

#[async_trait]
impl Adapter for CollectionAdapter {
    fn backend(&self) -> Backend {
        Backend::Collection
    }

    fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    fn marker_field(&self) -> &str {
        &self.marker_field
    }

    fn destination_copy(&self, record: &Record, marker: Marker) -> NewDocument {
        NewDocument {
            id: record.id.clone(),
            kind: record.kind.clone(),
            body: marked_body(record, &self.marker_field, marker),
        }
    }

    async fn highest_issued_marker(&self, _destination: &dyn Adapter) -> Result<Marker> {
        max_marker(self.store.as_ref(), &self.marker_field).await
    }

    async fn remaining_count(&self, _destination: &dyn Adapter) -> Result<u64> {
        self.store
            .count(&Filter::Missing(self.marker_field.clone()))
            .await
    }
}

/// Build the adapter matching a store's backend
pub fn for_backend(
    backend: Backend,
    store: Arc<dyn DocumentStore>,
    marker_field: &str,
) -> Box<dyn Adapter> {
    match backend {
        Backend::SearchIndex => Box::new(SearchIndexAdapter::new(store, marker_field)),
        Backend::Collection => Box::new(CollectionAdapter::new(store, marker_field)),
    }
}

// ============================================================================
// Write and mark
// ============================================================================

/// A record the destination refused
#[derive(Debug, Clone)]
pub struct FailedWrite {
    /// The source record, payload included
    pub record: Record,
    /// Marker it was assigned
    pub marker: Marker,
    /// Why the destination refused it
    pub failure: RecordFailure,
}

/// What happened to one batch
#[derive(Debug, Default)]
pub struct WriteReport {
    /// Copies newly inserted
    pub written: usize,
    /// Copies that already existed at the destination
    pub duplicates: usize,
    /// Source records stamped with their marker
    pub tagged: usize,
    /// Ids of the stamped source records
    pub stamped: Vec<RecordId>,
    /// Highest marker handed out, committed or not
    pub highest_assigned: Marker,
    /// Records not written
    pub write_failures: Vec<FailedWrite>,
    /// Committed records whose stamp did not land
    pub untagged: Vec<RecordId>,
    /// Set when stamping failed for some or all committed records
    pub tagging_error: Option<Error>,
}

impl WriteReport {
    /// Records present at the destination after this batch
    pub fn committed(&self) -> usize {
        self.written + self.duplicates
    }

    /// Whether the batch moved the migration forward
    pub fn made_progress(&self) -> bool {
        self.tagged > 0
    }
}

/// Copy `batch` into the destination and stamp the committed records at the
/// source, assigning markers from `resume_point + 1` in batch order
pub async fn write_and_mark(
    source: &dyn Adapter,
    destination: &dyn Adapter,
    batch: Batch,
    resume_point: Marker,
) -> Result<WriteReport> {
    let mut report = WriteReport {
        highest_assigned: resume_point,
        ..WriteReport::default()
    };
    if batch.is_empty() {
        return Ok(report);
    }

    let assigned: Vec<(Record, Marker)> = batch.into_iter().zip(resume_point + 1..).collect();
    report.highest_assigned = resume_point + assigned.len() as Marker;

    let docs = assigned
        .iter()
        .map(|(record, marker)| destination.destination_copy(record, *marker))
        .collect();
    let outcome = destination.store().insert_many(None, docs, false).await?;

    let mut tags = Vec::with_capacity(assigned.len());
    for (index, (record, marker)) in assigned.into_iter().enumerate() {
        match outcome.failure_at(index) {
            None => report.written += 1,
            Some(failure) if failure.kind == WriteFailureKind::DuplicateKey => {
                debug!("'{}' already exists at the destination", record.id);
                report.duplicates += 1;
            }
            Some(failure) => {
                report.write_failures.push(FailedWrite {
                    failure: failure.clone(),
                    record,
                    marker,
                });
                continue;
            }
        }
        tags.push(Tag {
            id: record.id,
            origin: record.origin,
            marker,
        });
    }

    if tags.is_empty() {
        return Ok(report);
    }

    match source
        .store()
        .set_markers(source.marker_field(), &tags, false)
        .await
    {
        Ok(outcome) => {
            report.tagged = outcome.succeeded;
            report.stamped = tags
                .iter()
                .filter(|t| !outcome.failures.iter().any(|f| f.id == t.id))
                .map(|t| t.id.clone())
                .collect();
            if !outcome.is_clean() {
                report.tagging_error = Some(Error::tagging(format!(
                    "{} of {} records not stamped, first: {}",
                    outcome.failures.len(),
                    tags.len(),
                    outcome.failures[0].reason
                )));
                report.untagged = outcome.failures.into_iter().map(|f| f.id).collect();
            }
        }
        Err(e) if e.is_connectivity() => return Err(e),
        Err(e) => {
            warn!("Stamping {} source records failed: {e}", tags.len());
            report.untagged = tags.into_iter().map(|t| t.id).collect();
            report.tagging_error = Some(Error::tagging(e.to_string()));
        }
    }

    Ok(report)
}
