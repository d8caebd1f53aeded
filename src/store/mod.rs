//! Document store connections
//!
//! The adapters only talk to a store through the [`DocumentStore`] contract:
//! a query-by-filter read (including paginated server-side scans), a bulk
//! insert, a bulk update by identity, and a count.
//!
//! # Stores
//!
//! - [`SearchIndexStore`] - Elasticsearch-compatible REST API
//! - [`CollectionStore`] - document collection table in DuckDB
//! - [`MemoryStore`] - in-process store with fault injection

mod collection;
mod memory;
mod search_index;

pub use collection::{CollectionStore, DEFAULT_MAX_DOCUMENT_BYTES};
pub use memory::{Fault, MemoryStore, Operation};
pub use search_index::{SearchAuth, SearchIndexStore};

use crate::config::StoreConfig;
use crate::error::Result;
use crate::types::{BulkOutcome, Marker, NewDocument, Record, Tag};
use async_trait::async_trait;
use std::sync::Arc;

/// Store-neutral document filter
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// Every document
    All,
    /// Documents where the field does not exist
    Missing(String),
    /// Documents where the field exists
    Present(String),
}

impl Filter {
    /// Field the filter tests, if any
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Missing(field) | Self::Present(field) => Some(field),
        }
    }
}

/// A bounded query-by-filter read
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Which documents to match
    pub filter: Filter,
    /// Sort descending on this numeric field
    pub sort_desc: Option<String>,
    /// Maximum number of documents to return
    pub limit: usize,
}

impl Query {
    /// Create a query returning up to `limit` documents
    pub fn new(filter: Filter, limit: usize) -> Self {
        Self {
            filter,
            sort_desc: None,
            limit,
        }
    }

    /// Sort descending on a field
    #[must_use]
    pub fn sort_desc(mut self, field: impl Into<String>) -> Self {
        self.sort_desc = Some(field.into());
        self
    }
}

/// Handle to server-side scan state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanCursor(pub String);

/// One page of a scan
#[derive(Debug, Clone)]
pub struct ScanPage {
    /// Cursor to continue and finally release the scan
    pub cursor: ScanCursor,
    /// Records on this page; empty once the scan is exhausted
    pub records: Vec<Record>,
}

/// Connection contract every store implements
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name used in logs and errors
    fn name(&self) -> &str;

    /// Query-by-filter read
    async fn find(&self, query: &Query) -> Result<Vec<Record>>;

    /// Open a server-side scan over the default collection
    async fn open_scan(&self, page_size: usize, keep_alive: &str) -> Result<ScanPage>;

    /// Fetch the next page of a scan
    async fn next_scan_page(&self, cursor: &ScanCursor, keep_alive: &str) -> Result<ScanPage>;

    /// Release server-side scan state
    async fn close_scan(&self, cursor: &ScanCursor) -> Result<()>;

    /// Bulk insert into `target` (a sibling collection/index), or the default
    /// collection when `None`. With `ordered == false` a rejected record does
    /// not stop the rest.
    async fn insert_many(
        &self,
        target: Option<&str>,
        docs: Vec<NewDocument>,
        ordered: bool,
    ) -> Result<BulkOutcome>;

    /// Bulk update by identity, setting `field` to each tag's marker
    async fn set_markers(&self, field: &str, tags: &[Tag], ordered: bool) -> Result<BulkOutcome>;

    /// Count documents matching the filter in the default collection
    async fn count(&self, filter: &Filter) -> Result<u64>;
}

/// Highest marker stored in `field`, or `0` when no document carries one
pub async fn max_marker(store: &dyn DocumentStore, field: &str) -> Result<Marker> {
    let query = Query::new(Filter::Present(field.to_string()), 1).sort_desc(field);
    let top = store.find(&query).await?;
    Ok(top.first().and_then(|record| record.marker(field)).unwrap_or(0))
}

/// Open a store from its configuration
pub fn connect(config: &StoreConfig, marker_field: &str) -> Result<Arc<dyn DocumentStore>> {
    match config {
        StoreConfig::SearchIndex(def) => Ok(Arc::new(SearchIndexStore::from_config(def)?)),
        StoreConfig::Collection(def) => {
            Ok(Arc::new(CollectionStore::from_config(def, marker_field)?))
        }
    }
}
