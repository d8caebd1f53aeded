//! Search index store over the Elasticsearch REST API
//!
//! Reads use `_search` (with scroll for full scans) and `_count`; writes go
//! through `_bulk` as NDJSON with `create` and `update` actions. Bulk requests
//! wait for a refresh so the next count sees their effect.
//!
//! Reads are sent once: the engine's retry policy is the only layer that
//! resends them. The client's own retry settings apply to bulk writes, which
//! are idempotent (`create` reports duplicates, `update` overwrites).

use super::{DocumentStore, Filter, Query, ScanCursor, ScanPage};
use crate::config::SearchIndexConfig;
use crate::error::{Error, Result};
use crate::http::{HttpClient, HttpClientConfig, RequestConfig};
use crate::types::{
    BulkOutcome, JsonObject, NewDocument, Record, RecordFailure, RecordId, Tag, WriteFailureKind,
};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::time::Duration;
use tracing::debug;

/// Credentials for the search cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchAuth {
    /// HTTP basic authentication
    Basic { username: String, password: String },
    /// `Authorization: ApiKey ...`
    ApiKey { key: String },
}

impl SearchAuth {
    /// Value of the `Authorization` header
    pub fn header_value(&self) -> String {
        match self {
            Self::Basic { username, password } => {
                format!("Basic {}", BASE64.encode(format!("{username}:{password}")))
            }
            Self::ApiKey { key } => format!("ApiKey {key}"),
        }
    }
}

/// Document store backed by one search index
#[derive(Debug)]
pub struct SearchIndexStore {
    client: HttpClient,
    index: String,
}

impl SearchIndexStore {
    /// Wrap an HTTP client whose base URL points at the cluster
    pub fn new(client: HttpClient, index: impl Into<String>) -> Self {
        Self {
            client,
            index: index.into(),
        }
    }

    /// Build the store from its configuration
    pub fn from_config(def: &SearchIndexConfig) -> Result<Self> {
        let url = url::Url::parse(&def.url)?;

        let mut builder = HttpClientConfig::builder()
            .base_url(url.as_str())
            .timeout(Duration::from_secs(def.timeout_secs))
            .retry(def.retry.clone());
        builder = match &def.rate_limit {
            Some(limit) => builder.rate_limit(limit.clone()),
            None => builder.no_rate_limit(),
        };
        if let Some(auth) = &def.auth {
            builder = builder.header("Authorization", auth.header_value());
        }

        Ok(Self::new(HttpClient::with_config(builder.build())?, &def.index))
    }

    /// Index this store reads from and writes to by default
    pub fn index(&self) -> &str {
        &self.index
    }

    /// Single-attempt read
    async fn read(&self, method: Method, path: &str, config: RequestConfig) -> Result<Value> {
        self.call(method, path, config.retries(0)).await
    }

    async fn call(&self, method: Method, path: &str, config: RequestConfig) -> Result<Value> {
        self.client
            .request_json::<Value>(method, path, config)
            .await
            .map_err(|e| self.classify(e))
    }

    /// Map transport errors onto store error classes
    fn classify(&self, err: Error) -> Error {
        match err {
            Error::Http(e) if e.is_connect() => Error::connectivity(&self.index, e.to_string()),
            Error::Http(e) => Error::transient_query(&self.index, e.to_string()),
            Error::Timeout { .. } | Error::RateLimited { .. } => {
                Error::transient_query(&self.index, err.to_string())
            }
            Error::HttpStatus { status, body } if status == 429 || status >= 500 => {
                Error::transient_query(&self.index, format!("HTTP {status}: {body}"))
            }
            Error::HttpStatus { status, body } => {
                Error::query(&self.index, format!("HTTP {status}: {body}"))
            }
            other => other,
        }
    }

    fn parse_hits(&self, body: &Value) -> Vec<Record> {
        let Some(hits) = body.pointer("/hits/hits").and_then(Value::as_array) else {
            return Vec::new();
        };

        hits.iter()
            .filter_map(|hit| {
                let id = hit.get("_id")?.as_str()?;
                let index = hit
                    .get("_index")
                    .and_then(Value::as_str)
                    .unwrap_or(&self.index);
                let kind = hit
                    .get("_type")
                    .and_then(Value::as_str)
                    .filter(|t| *t != "_doc")
                    .unwrap_or(index);
                let payload = hit
                    .get("_source")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                Some(Record::new(id, kind, payload).with_origin(index))
            })
            .collect()
    }

    fn scan_page(&self, body: &Value) -> Result<ScanPage> {
        let scroll_id = body
            .get("_scroll_id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::query(&self.index, "response has no _scroll_id"))?;
        Ok(ScanPage {
            cursor: ScanCursor(scroll_id.to_string()),
            records: self.parse_hits(body),
        })
    }

    async fn bulk(&self, payload: String, ids: Vec<RecordId>) -> Result<BulkOutcome> {
        let body = self
            .call(
                Method::POST,
                "/_bulk",
                RequestConfig::new()
                    .query("refresh", "wait_for")
                    .ndjson(payload),
            )
            .await
            .map_err(|e| match e {
                Error::Query { message, .. } => Error::write(&self.index, message),
                other => other,
            })?;

        let items = body
            .get("items")
            .and_then(Value::as_array)
            .ok_or_else(|| Error::write(&self.index, "bulk response has no items"))?;
        if items.len() != ids.len() {
            return Err(Error::write(
                &self.index,
                format!("bulk response has {} items for {} actions", items.len(), ids.len()),
            ));
        }

        let mut outcome = BulkOutcome::default();
        for (index, (item, id)) in items.iter().zip(ids).enumerate() {
            let action = item.as_object().and_then(|a| a.values().next());
            let error = action.and_then(|a| a.get("error"));
            match error {
                None => outcome.succeeded += 1,
                Some(error) => {
                    let status = action
                        .and_then(|a| a.get("status"))
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    let error_type = error.get("type").and_then(Value::as_str).unwrap_or("");
                    let reason = error
                        .get("reason")
                        .and_then(Value::as_str)
                        .unwrap_or(error_type)
                        .to_string();
                    outcome.failures.push(RecordFailure {
                        index,
                        id,
                        kind: failure_kind(status, error_type),
                        reason,
                    });
                }
            }
        }
        Ok(outcome)
    }
}

fn filter_query(filter: &Filter) -> Value {
    match filter {
        Filter::All => json!({ "match_all": {} }),
        Filter::Missing(field) => json!({
            "bool": { "must_not": { "exists": { "field": field } } }
        }),
        Filter::Present(field) => json!({ "exists": { "field": field } }),
    }
}

fn failure_kind(status: u64, error_type: &str) -> WriteFailureKind {
    if error_type == "version_conflict_engine_exception" {
        WriteFailureKind::DuplicateKey
    } else if status == 413 || error_type.contains("too_large") || error_type.contains("max_bytes") {
        WriteFailureKind::TooLarge
    } else {
        WriteFailureKind::Rejected
    }
}

fn push_line(payload: &mut String, line: &Value) {
    let _ = writeln!(payload, "{line}");
}

#[async_trait]
impl DocumentStore for SearchIndexStore {
    fn name(&self) -> &str {
        &self.index
    }

    async fn find(&self, query: &Query) -> Result<Vec<Record>> {
        let mut body = json!({
            "size": query.limit,
            "query": filter_query(&query.filter),
        });
        if let Some(field) = &query.sort_desc {
            body["sort"] = json!([{ field.as_str(): { "order": "desc", "unmapped_type": "long" } }]);
        }

        let response = self
            .read(
                Method::POST,
                &format!("/{}/_search", self.index),
                RequestConfig::new().json(body),
            )
            .await?;
        Ok(self.parse_hits(&response))
    }

    async fn open_scan(&self, page_size: usize, keep_alive: &str) -> Result<ScanPage> {
        let response = self
            .read(
                Method::POST,
                &format!("/{}/_search", self.index),
                RequestConfig::new().query("scroll", keep_alive).json(json!({
                    "size": page_size,
                    "query": { "match_all": {} },
                    "sort": ["_doc"],
                })),
            )
            .await?;
        self.scan_page(&response)
    }

    async fn next_scan_page(&self, cursor: &ScanCursor, keep_alive: &str) -> Result<ScanPage> {
        // The cluster advances the scroll even when the reply is lost, so a
        // resend would skip a page. Any failure here ends the scan.
        let response = self
            .read(
                Method::POST,
                "/_search/scroll",
                RequestConfig::new().json(json!({
                    "scroll": keep_alive,
                    "scroll_id": cursor.0,
                })),
            )
            .await
            .map_err(|e| match e {
                Error::Query { message, .. } => Error::query(
                    &self.index,
                    format!("scroll page lost, scan cannot continue: {message}"),
                ),
                other => other,
            })?;
        self.scan_page(&response)
    }

    async fn close_scan(&self, cursor: &ScanCursor) -> Result<()> {
        self.client
            .request(
                Method::DELETE,
                "/_search/scroll",
                // best effort, the scroll expires on its own after keep-alive
                RequestConfig::new()
                    .retries(0)
                    .json(json!({ "scroll_id": [cursor.0] })),
            )
            .await
            .map_err(|e| self.classify(e))?;
        Ok(())
    }

    async fn insert_many(
        &self,
        target: Option<&str>,
        docs: Vec<NewDocument>,
        ordered: bool,
    ) -> Result<BulkOutcome> {
        if docs.is_empty() {
            return Ok(BulkOutcome::default());
        }
        if ordered {
            debug!("bulk API has no ordered mode; writing {} documents unordered", docs.len());
        }

        let index = target.unwrap_or(&self.index);
        let mut payload = String::new();
        let mut ids = Vec::with_capacity(docs.len());
        for doc in docs {
            push_line(&mut payload, &json!({ "create": { "_index": index, "_id": doc.id } }));
            push_line(&mut payload, &Value::Object(doc.body));
            ids.push(doc.id);
        }

        self.bulk(payload, ids).await
    }

    async fn set_markers(&self, field: &str, tags: &[Tag], _ordered: bool) -> Result<BulkOutcome> {
        if tags.is_empty() {
            return Ok(BulkOutcome::default());
        }

        let mut payload = String::new();
        for tag in tags {
            let index = tag.origin.as_deref().unwrap_or(&self.index);
            push_line(&mut payload, &json!({ "update": { "_index": index, "_id": tag.id } }));
            let mut doc = JsonObject::new();
            doc.insert(field.to_string(), Value::from(tag.marker));
            push_line(&mut payload, &json!({ "doc": doc }));
        }

        self.bulk(payload, tags.iter().map(|t| t.id.clone()).collect())
            .await
    }

    async fn count(&self, filter: &Filter) -> Result<u64> {
        let response = self
            .read(
                Method::POST,
                &format!("/{}/_count", self.index),
                RequestConfig::new().json(json!({ "query": filter_query(filter) })),
            )
            .await?;
        response
            .get("count")
            .and_then(Value::as_u64)
            .ok_or_else(|| Error::query(&self.index, "count response has no count"))
    }
}
