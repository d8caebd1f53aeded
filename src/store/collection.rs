//! Collection store on DuckDB
//!
//! Documents live in a single `documents` table, one row per document,
//! keyed by `(collection, id)`. The marker field is mirrored into its own
//! column so "field does not exist" becomes `marker IS NULL`.

use super::{DocumentStore, Filter, Query, ScanCursor, ScanPage};
use crate::config::CollectionConfig;
use crate::error::{Error, Result};
use crate::types::{
    BulkOutcome, JsonObject, JsonValue, NewDocument, Record, RecordFailure, Tag, WriteFailureKind,
};
use async_trait::async_trait;
use duckdb::{params, Connection};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::debug;

const SCHEMA: &str = "
CREATE SEQUENCE IF NOT EXISTS document_seq;
CREATE TABLE IF NOT EXISTS documents (
    seq BIGINT DEFAULT nextval('document_seq'),
    collection VARCHAR NOT NULL,
    id VARCHAR NOT NULL,
    kind VARCHAR NOT NULL,
    body VARCHAR NOT NULL,
    marker BIGINT
);
";

/// Size limit applied when none is configured (16 MiB)
pub const DEFAULT_MAX_DOCUMENT_BYTES: usize = 16 * 1024 * 1024;

/// Document collection stored in DuckDB
pub struct CollectionStore {
    conn: Mutex<Connection>,
    collection: String,
    marker_field: String,
    max_document_bytes: usize,
    /// Open scans: cursor -> (last seen seq, page size)
    scans: Mutex<HashMap<String, (i64, usize)>>,
    next_scan: AtomicU64,
}

impl CollectionStore {
    /// Open (or create) a database file
    pub fn open(
        path: impl AsRef<Path>,
        collection: impl Into<String>,
        marker_field: impl Into<String>,
    ) -> Result<Self> {
        let collection = collection.into();
        let conn = Connection::open(path.as_ref()).map_err(|e| {
            Error::connectivity(&collection, format!("Failed to open DuckDB database: {e}"))
        })?;
        Self::with_connection(conn, collection, marker_field.into())
    }

    /// Create a store in a private in-memory database
    pub fn open_in_memory(
        collection: impl Into<String>,
        marker_field: impl Into<String>,
    ) -> Result<Self> {
        let collection = collection.into();
        let conn = Connection::open_in_memory().map_err(|e| {
            Error::connectivity(&collection, format!("Failed to create DuckDB connection: {e}"))
        })?;
        Self::with_connection(conn, collection, marker_field.into())
    }

    /// Build the store from its configuration
    pub fn from_config(def: &CollectionConfig, marker_field: &str) -> Result<Self> {
        let store = match &def.path {
            Some(path) => Self::open(path, &def.collection, marker_field)?,
            None => Self::open_in_memory(&def.collection, marker_field)?,
        };
        Ok(store.with_max_document_bytes(def.max_document_bytes))
    }

    fn with_connection(conn: Connection, collection: String, marker_field: String) -> Result<Self> {
        conn.execute_batch(SCHEMA).map_err(|e| {
            Error::connectivity(&collection, format!("Failed to create documents table: {e}"))
        })?;

        Ok(Self {
            conn: Mutex::new(conn),
            collection,
            marker_field,
            max_document_bytes: DEFAULT_MAX_DOCUMENT_BYTES,
            scans: Mutex::new(HashMap::new()),
            next_scan: AtomicU64::new(1),
        })
    }

    /// Reject documents whose serialized body exceeds `bytes`
    #[must_use]
    pub fn with_max_document_bytes(mut self, bytes: usize) -> Self {
        self.max_document_bytes = bytes;
        self
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn db_error(&self, e: duckdb::Error) -> Error {
        Error::query(&self.collection, e.to_string())
    }

    fn filter_clause(&self, filter: &Filter) -> Result<&'static str> {
        match filter {
            Filter::All => Ok(""),
            Filter::Missing(field) if *field == self.marker_field => Ok(" AND marker IS NULL"),
            Filter::Present(field) if *field == self.marker_field => Ok(" AND marker IS NOT NULL"),
            other => Err(Error::query(
                &self.collection,
                format!("unsupported filter field {:?}", other.field()),
            )),
        }
    }

    fn select(&self, sql: &str, params: &[&dyn duckdb::ToSql]) -> Result<Vec<(i64, Record)>> {
        let conn = self.conn();
        let mut stmt = conn.prepare(sql).map_err(|e| self.db_error(e))?;
        let rows = stmt
            .query_map(params, |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })
            .map_err(|e| self.db_error(e))?;

        let mut records = Vec::new();
        for row in rows {
            let (seq, id, kind, body, marker) = row.map_err(|e| self.db_error(e))?;
            let mut payload: JsonObject = serde_json::from_str(&body)?;
            if let Some(marker) = marker {
                payload
                    .entry(self.marker_field.clone())
                    .or_insert_with(|| JsonValue::from(marker));
            }
            records.push((seq, Record::new(id, kind, payload).with_origin(&self.collection)));
        }
        Ok(records)
    }

    fn scan_page(&self, cursor: &str) -> Result<Vec<Record>> {
        let (after, page_size) = self
            .scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(cursor)
            .copied()
            .ok_or_else(|| Error::query(&self.collection, format!("unknown scan '{cursor}'")))?;

        let rows = self.select(
            "SELECT seq, id, kind, body, marker FROM documents \
             WHERE collection = ? AND seq > ? ORDER BY seq LIMIT ?",
            params![self.collection, after, page_size as i64],
        )?;

        if let Some((last, _)) = rows.last() {
            self.scans
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(cursor.to_string(), (*last, page_size));
        }
        Ok(rows.into_iter().map(|(_, record)| record).collect())
    }

    fn exists(&self, conn: &Connection, collection: &str, id: &str) -> Result<bool> {
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM documents WHERE collection = ? AND id = ?",
                params![collection, id],
                |row| row.get(0),
            )
            .map_err(|e| self.db_error(e))?;
        Ok(count > 0)
    }
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("collection", &self.collection)
            .field("marker_field", &self.marker_field)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl DocumentStore for CollectionStore {
    fn name(&self) -> &str {
        &self.collection
    }

    async fn find(&self, query: &Query) -> Result<Vec<Record>> {
        let clause = self.filter_clause(&query.filter)?;
        let order = match &query.sort_desc {
            None => "seq",
            Some(field) if *field == self.marker_field => "marker DESC NULLS LAST, seq",
            Some(field) => {
                return Err(Error::query(
                    &self.collection,
                    format!("cannot sort on field '{field}'"),
                ))
            }
        };

        let sql = format!(
            "SELECT seq, id, kind, body, marker FROM documents \
             WHERE collection = ?{clause} ORDER BY {order} LIMIT ?"
        );
        let rows = self.select(&sql, params![self.collection, query.limit as i64])?;
        Ok(rows.into_iter().map(|(_, record)| record).collect())
    }

    async fn open_scan(&self, page_size: usize, _keep_alive: &str) -> Result<ScanPage> {
        let id = self.next_scan.fetch_add(1, Ordering::Relaxed);
        let cursor = format!("{}-scan-{id}", self.collection);
        self.scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(cursor.clone(), (i64::MIN, page_size));
        let records = self.scan_page(&cursor)?;
        Ok(ScanPage {
            cursor: ScanCursor(cursor),
            records,
        })
    }

    async fn next_scan_page(&self, cursor: &ScanCursor, _keep_alive: &str) -> Result<ScanPage> {
        let records = self.scan_page(&cursor.0)?;
        Ok(ScanPage {
            cursor: cursor.clone(),
            records,
        })
    }

    async fn close_scan(&self, cursor: &ScanCursor) -> Result<()> {
        self.scans
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&cursor.0)
            .map(|_| ())
            .ok_or_else(|| Error::query(&self.collection, format!("unknown scan '{}'", cursor.0)))
    }

    async fn insert_many(
        &self,
        target: Option<&str>,
        docs: Vec<NewDocument>,
        ordered: bool,
    ) -> Result<BulkOutcome> {
        let collection = target.unwrap_or(&self.collection);
        let conn = self.conn();
        let mut outcome = BulkOutcome::default();

        for (index, doc) in docs.into_iter().enumerate() {
            let body = serde_json::to_string(&doc.body)?;
            let failure = if body.len() > self.max_document_bytes {
                Some((
                    WriteFailureKind::TooLarge,
                    format!("{} bytes exceeds limit of {}", body.len(), self.max_document_bytes),
                ))
            } else if self.exists(&conn, collection, doc.id.as_str())? {
                Some((WriteFailureKind::DuplicateKey, format!("duplicate id '{}'", doc.id)))
            } else {
                let marker = doc
                    .body
                    .get(&self.marker_field)
                    .and_then(JsonValue::as_u64)
                    .and_then(|m| i64::try_from(m).ok());
                conn.execute(
                    "INSERT INTO documents (collection, id, kind, body, marker) VALUES (?, ?, ?, ?, ?)",
                    params![collection, doc.id.as_str(), doc.kind, body, marker],
                )
                .err()
                .map(|e| (WriteFailureKind::Rejected, e.to_string()))
            };

            match failure {
                None => outcome.succeeded += 1,
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
            }
        }

        debug!(
            "Inserted {} documents into '{collection}' ({} rejected)",
            outcome.succeeded,
            outcome.failures.len()
        );
        Ok(outcome)
    }

    async fn set_markers(&self, field: &str, tags: &[Tag], ordered: bool) -> Result<BulkOutcome> {
        if field != self.marker_field {
            return Err(Error::query(
                &self.collection,
                format!("cannot set field '{field}'"),
            ));
        }

        let conn = self.conn();
        let mut outcome = BulkOutcome::default();
        for (index, tag) in tags.iter().enumerate() {
            let collection = tag.origin.as_deref().unwrap_or(&self.collection);
            let marker = i64::try_from(tag.marker)
                .map_err(|_| Error::query(&self.collection, format!("marker {} out of range", tag.marker)))?;
            let updated = conn
                .execute(
                    "UPDATE documents SET marker = ? WHERE collection = ? AND id = ?",
                    params![marker, collection, tag.id.as_str()],
                )
                .map_err(|e| self.db_error(e))?;

            if updated == 0 {
                outcome.failures.push(RecordFailure {
                    index,
                    id: tag.id.clone(),
                    kind: WriteFailureKind::Rejected,
                    reason: "document not found".to_string(),
                });
                if ordered {
                    break;
                }
            } else {
                outcome.succeeded += 1;
            }
        }
        Ok(outcome)
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let clause = self.filter_clause(filter)?;
        let sql = format!("SELECT COUNT(*) FROM documents WHERE collection = ?{clause}");
        let count: i64 = self
            .conn()
            .query_row(&sql, params![self.collection], |row| row.get(0))
            .map_err(|e| self.db_error(e))?;
        Ok(count.max(0) as u64)
    }
}
