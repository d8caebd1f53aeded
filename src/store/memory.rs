//! In-process document store
//!
//! Holds named collections in memory with the same per-record semantics as
//! the real stores (duplicate identities, size limit, unordered bulk writes).
//! Faults can be queued per operation to exercise failure handling.

use super::{DocumentStore, Filter, Query, ScanCursor, ScanPage};
use crate::error::{Error, Result};
use crate::types::{
    BulkOutcome, JsonObject, JsonValue, NewDocument, Record, RecordFailure, RecordId, Tag,
    WriteFailureKind,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Store operations that can be counted and faulted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Find,
    OpenScan,
    NextScan,
    CloseScan,
    Insert,
    SetMarkers,
    Count,
}

/// Failure to raise on the next call of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Store unreachable
    Connectivity,
    /// Query failure worth retrying
    TransientQuery,
    /// Query failure that will recur
    Query,
    /// Batch-level write failure
    Write,
}

impl Fault {
    fn into_error(self, store: &str, op: Operation) -> Error {
        let message = format!("injected fault on {op:?}");
        match self {
            Self::Connectivity => Error::connectivity(store, message),
            Self::TransientQuery => Error::transient_query(store, message),
            Self::Query => Error::query(store, message),
            Self::Write => Error::write(store, message),
        }
    }
}

#[derive(Debug, Clone)]
struct StoredDoc {
    id: RecordId,
    kind: String,
    body: JsonObject,
}

#[derive(Debug, Default)]
struct Inner {
    collections: BTreeMap<String, Vec<StoredDoc>>,
    /// Open scans: cursor -> (offset, page size)
    scans: HashMap<String, (usize, usize)>,
    next_scan: u64,
    faults: HashMap<Operation, VecDeque<Fault>>,
    calls: HashMap<Operation, usize>,
}

/// In-memory document store
#[derive(Debug)]
pub struct MemoryStore {
    name: String,
    max_document_bytes: Option<usize>,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    /// Create an empty store whose default collection is `name`
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_document_bytes: None,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Reject documents whose serialized body exceeds `bytes`
    #[must_use]
    pub fn with_max_document_bytes(mut self, bytes: usize) -> Self {
        self.max_document_bytes = Some(bytes);
        self
    }

    /// Add records to the default collection, bypassing faults and counters
    pub fn seed(&self, records: impl IntoIterator<Item = Record>) {
        let mut inner = self.lock();
        let docs = inner.collections.entry(self.name.clone()).or_default();
        docs.extend(records.into_iter().map(|r| StoredDoc {
            id: r.id,
            kind: r.kind,
            body: r.payload,
        }));
    }

    /// Snapshot of a collection in insertion order
    pub fn documents(&self, collection: &str) -> Vec<Record> {
        let inner = self.lock();
        inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().map(|d| to_record(d, collection)).collect())
            .unwrap_or_default()
    }

    /// Snapshot of the default collection
    pub fn records(&self) -> Vec<Record> {
        self.documents(&self.name)
    }

    /// Names of all collections holding documents
    pub fn collections(&self) -> Vec<String> {
        self.lock().collections.keys().cloned().collect()
    }

    /// Queue a fault for the next call of `op`
    pub fn inject(&self, op: Operation, fault: Fault) {
        self.lock().faults.entry(op).or_default().push_back(fault);
    }

    /// Number of times `op` was called
    pub fn calls(&self, op: Operation) -> usize {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Number of scans opened and not yet released
    pub fn open_scans(&self) -> usize {
        self.lock().scans.len()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(&self, op: Operation) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        *inner.calls.entry(op).or_default() += 1;
        if let Some(fault) = inner.faults.get_mut(&op).and_then(VecDeque::pop_front) {
            return Err(fault.into_error(&self.name, op));
        }
        Ok(inner)
    }

    fn page(&self, inner: &mut Inner, cursor: &str) -> Vec<Record> {
        let (offset, page_size) = inner.scans.get(cursor).copied().unwrap_or((0, 0));
        let records: Vec<Record> = inner
            .collections
            .get(&self.name)
            .map(|docs| {
                docs.iter()
                    .skip(offset)
                    .take(page_size)
                    .map(|d| to_record(d, &self.name))
                    .collect()
            })
            .unwrap_or_default();
        inner
            .scans
            .insert(cursor.to_string(), (offset + records.len(), page_size));
        records
    }
}

fn to_record(doc: &StoredDoc, collection: &str) -> Record {
    Record::new(doc.id.clone(), doc.kind.clone(), doc.body.clone()).with_origin(collection)
}

fn matches(filter: &Filter, body: &JsonObject) -> bool {
    match filter {
        Filter::All => true,
        Filter::Missing(field) => !body.contains_key(field),
        Filter::Present(field) => body.contains_key(field),
    }
}

fn sort_key(body: &JsonObject, field: &str) -> Option<u64> {
    body.get(field).and_then(JsonValue::as_u64)
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    async fn find(&self, query: &Query) -> Result<Vec<Record>> {
        let inner = self.enter(Operation::Find)?;
        let mut hits: Vec<&StoredDoc> = inner
            .collections
            .get(&self.name)
            .map(|docs| docs.iter().filter(|d| matches(&query.filter, &d.body)).collect())
            .unwrap_or_default();

        if let Some(field) = &query.sort_desc {
            hits.sort_by(|a, b| sort_key(&b.body, field).cmp(&sort_key(&a.body, field)));
        }

        Ok(hits
            .into_iter()
            .take(query.limit)
            .map(|d| to_record(d, &self.name))
            .collect())
    }

    async fn open_scan(&self, page_size: usize, _keep_alive: &str) -> Result<ScanPage> {
        let mut inner = self.enter(Operation::OpenScan)?;
        inner.next_scan += 1;
        let cursor = format!("scan-{}", inner.next_scan);
        inner.scans.insert(cursor.clone(), (0, page_size));
        let records = self.page(&mut inner, &cursor);
        Ok(ScanPage {
            cursor: ScanCursor(cursor),
            records,
        })
    }

    async fn next_scan_page(&self, cursor: &ScanCursor, _keep_alive: &str) -> Result<ScanPage> {
        let mut inner = self.enter(Operation::NextScan)?;
        if !inner.scans.contains_key(&cursor.0) {
            return Err(Error::query(&self.name, format!("unknown scan '{}'", cursor.0)));
        }
        let records = self.page(&mut inner, &cursor.0);
        Ok(ScanPage {
            cursor: cursor.clone(),
            records,
        })
    }

    async fn close_scan(&self, cursor: &ScanCursor) -> Result<()> {
        let mut inner = self.enter(Operation::CloseScan)?;
        match inner.scans.remove(&cursor.0) {
            Some(_) => Ok(()),
            None => Err(Error::query(&self.name, format!("unknown scan '{}'", cursor.0))),
        }
    }

    async fn insert_many(
        &self,
        target: Option<&str>,
        docs: Vec<NewDocument>,
        ordered: bool,
    ) -> Result<BulkOutcome> {
        let mut inner = self.enter(Operation::Insert)?;
        let collection = inner
            .collections
            .entry(target.unwrap_or(&self.name).to_string())
            .or_default();

        let mut outcome = BulkOutcome::default();
        for (index, doc) in docs.into_iter().enumerate() {
            let too_large = match self.max_document_bytes {
                Some(max) => doc.size_bytes()? > max,
                None => false,
            };
            let failure = if too_large {
                Some((WriteFailureKind::TooLarge, "document exceeds size limit".to_string()))
            } else if collection.iter().any(|d| d.id == doc.id) {
                Some((WriteFailureKind::DuplicateKey, format!("duplicate id '{}'", doc.id)))
            } else {
                None
            };

            match failure {
                Some((kind, reason)) => {
                    outcome.failures.push(RecordFailure {
                        index,
                        id: doc.id,
                        kind,
                        reason,
                    });
                    if ordered {
                        break;
                    }
                }
                None => {
                    collection.push(StoredDoc {
                        id: doc.id,
                        kind: doc.kind,
                        body: doc.body,
                    });
                    outcome.succeeded += 1;
                }
            }
        }
        Ok(outcome)
    }

    async fn set_markers(&self, field: &str, tags: &[Tag], ordered: bool) -> Result<BulkOutcome> {
        let mut inner = self.enter(Operation::SetMarkers)?;
        let mut outcome = BulkOutcome::default();

        for (index, tag) in tags.iter().enumerate() {
            let collection = tag.origin.as_deref().unwrap_or(&self.name);
            let doc = inner
                .collections
                .get_mut(collection)
                .and_then(|docs| docs.iter_mut().find(|d| d.id == tag.id));

            match doc {
                Some(doc) => {
                    doc.body.insert(field.to_string(), JsonValue::from(tag.marker));
                    outcome.succeeded += 1;
                }
                None => {
                    outcome.failures.push(RecordFailure {
                        index,
                        id: tag.id.clone(),
                        kind: WriteFailureKind::Rejected,
                        reason: "document not found".to_string(),
                    });
                    if ordered {
                        break;
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let inner = self.enter(Operation::Count)?;
        Ok(inner
            .collections
            .get(&self.name)
            .map_or(0, |docs| docs.iter().filter(|d| matches(filter, &d.body)).count()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(id: &str, body: JsonValue) -> Record {
        Record::new(id, "product", body.as_object().cloned().unwrap())
    }

    fn doc(id: &str, body: JsonValue) -> NewDocument {
        NewDocument::verbatim(&record(id, body))
    }

    #[tokio::test]
    async fn test_find_filters_and_sorts() {
        let store = MemoryStore::new("products");
        store.seed([
            record("a", json!({"m": 2})),
            record("b", json!({})),
            record("c", json!({"m": 9})),
        ]);

        let unmarked = store
            .find(&Query::new(Filter::Missing("m".into()), 10))
            .await
            .unwrap();
        assert_eq!(unmarked.len(), 1);
        assert_eq!(unmarked[0].id.as_str(), "b");
        assert_eq!(unmarked[0].origin.as_deref(), Some("products"));

        let top = store
            .find(&Query::new(Filter::Present("m".into()), 1).sort_desc("m"))
            .await
            .unwrap();
        assert_eq!(top[0].id.as_str(), "c");
    }

    #[tokio::test]
    async fn test_unordered_insert_isolates_failures() {
        let store = MemoryStore::new("products").with_max_document_bytes(16);
        store.seed([record("dup", json!({}))]);

        let outcome = store
            .insert_many(
                None,
                vec![
                    doc("a", json!({"n": 1})),
                    doc("big", json!({"text": "far too long for the limit"})),
                    doc("dup", json!({})),
                    doc("b", json!({"n": 2})),
                ],
                false,
            )
            .await
            .unwrap();

        assert_eq!(outcome.succeeded, 2);
        assert_eq!(outcome.failures.len(), 2);
        assert_eq!(outcome.failure_at(1).unwrap().kind, WriteFailureKind::TooLarge);
        assert_eq!(outcome.failure_at(2).unwrap().kind, WriteFailureKind::DuplicateKey);
        assert_eq!(store.records().len(), 3);
    }

    #[tokio::test]
    async fn test_ordered_insert_stops_at_first_failure() {
        let store = MemoryStore::new("products");
        store.seed([record("dup", json!({}))]);

        let outcome = store
            .insert_many(None, vec![doc("dup", json!({})), doc("a", json!({}))], true)
            .await
            .unwrap();

        assert_eq!(outcome.succeeded, 0);
        assert_eq!(store.records().len(), 1);
    }

    #[tokio::test]
    async fn test_insert_into_sibling_collection() {
        let store = MemoryStore::new("products");
        store
            .insert_many(Some("orders"), vec![doc("o1", json!({}))], false)
            .await
            .unwrap();

        assert_eq!(store.documents("orders").len(), 1);
        assert!(store.records().is_empty());
        assert_eq!(store.collections(), vec!["orders".to_string()]);
    }

    #[tokio::test]
    async fn test_set_markers_and_count() {
        let store = MemoryStore::new("products");
        store.seed([record("a", json!({})), record("b", json!({}))]);

        let tags = [
            Tag {
                id: RecordId::new("a"),
                origin: None,
                marker: 1,
            },
            Tag {
                id: RecordId::new("ghost"),
                origin: None,
                marker: 2,
            },
        ];
        let outcome = store.set_markers("m", &tags, false).await.unwrap();

        assert_eq!(outcome.succeeded, 1);
        assert_eq!(outcome.failures[0].id.as_str(), "ghost");
        assert_eq!(store.count(&Filter::Missing("m".into())).await.unwrap(), 1);
        assert_eq!(store.count(&Filter::All).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_scan_pages_and_release() {
        let store = MemoryStore::new("products");
        store.seed((0..5).map(|i| record(&i.to_string(), json!({}))));

        let first = store.open_scan(2, "1m").await.unwrap();
        assert_eq!(first.records.len(), 2);
        let second = store.next_scan_page(&first.cursor, "1m").await.unwrap();
        let third = store.next_scan_page(&first.cursor, "1m").await.unwrap();
        let last = store.next_scan_page(&first.cursor, "1m").await.unwrap();
        assert_eq!(
            (second.records.len(), third.records.len(), last.records.len()),
            (2, 1, 0)
        );

        assert_eq!(store.open_scans(), 1);
        store.close_scan(&first.cursor).await.unwrap();
        assert_eq!(store.open_scans(), 0);
        assert!(store.close_scan(&first.cursor).await.is_err());
    }

    #[tokio::test]
    async fn test_injected_faults_are_consumed_in_order() {
        let store = MemoryStore::new("products");
        store.inject(Operation::Count, Fault::Connectivity);
        store.inject(Operation::Count, Fault::TransientQuery);

        assert!(store.count(&Filter::All).await.unwrap_err().is_connectivity());
        assert!(store.count(&Filter::All).await.unwrap_err().is_retryable());
        assert_eq!(store.count(&Filter::All).await.unwrap(), 0);
        assert_eq!(store.calls(Operation::Count), 3);
    }
}
