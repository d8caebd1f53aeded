//! Tests for engine module

use super::*;
use crate::adapter::for_backend;
use crate::retry::RetryPolicy;
use crate::store::{Fault, MemoryStore, Operation};
use crate::types::{Backend, BackoffType, JsonObject};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

const FIELD: &str = "migration_marker";

fn record(id: &str, kind: &str, body: serde_json::Value) -> Record {
    let payload: JsonObject = body.as_object().cloned().unwrap_or_default();
    Record::new(id, kind, payload)
}

fn seeded(name: &str, count: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new(name));
    store.seed((0..count).map(|i| record(&format!("r{i}"), "product", json!({ "n": i }))));
    store
}

fn quick_retry() -> RetryPolicy {
    RetryPolicy::default().with_max_retries(2).with_backoff(
        BackoffType::Constant,
        Duration::from_millis(1),
        Duration::from_millis(1),
    )
}

fn config(fetch_size: usize) -> EngineConfig {
    EngineConfig::new()
        .with_fetch_size(fetch_size)
        .with_scroll_page_size(3)
        .with_retry(quick_retry())
}

fn engine(
    src: &Arc<MemoryStore>,
    src_backend: Backend,
    dst: &Arc<MemoryStore>,
    dst_backend: Backend,
    config: EngineConfig,
) -> TransferEngine {
    TransferEngine::new(
        for_backend(src_backend, src.clone(), FIELD),
        for_backend(dst_backend, dst.clone(), FIELD),
        config,
    )
}

fn markers(records: &[Record]) -> Vec<Marker> {
    records.iter().filter_map(|r| r.marker(FIELD)).collect()
}

// ============================================================================
// EngineConfig Tests
// ============================================================================

#[test]
fn test_engine_config_default() {
    let config = EngineConfig::default();
    assert_eq!(config.fetch_size, 500);
    assert_eq!(config.scroll_page_size, 500);
    assert_eq!(config.keep_alive, "2m");
    assert_eq!(config.marker_field, FIELD);
    assert_eq!(config.max_idle_batches, 3);
}

#[test]
fn test_progress_display() {
    let progress = Progress {
        resume_point: 12,
        remaining: 3,
    };
    assert_eq!(progress.to_string(), "resume point 12, 3 records remaining");
}

// ============================================================================
// Resumable Tests
// ============================================================================

#[tokio::test]
async fn test_resumable_copies_every_record_once() {
    let src = seeded("catalog", 23);
    let dst = seeded("catalog-v2", 0);
    let mut engine = engine(&src, Backend::Collection, &dst, Backend::SearchIndex, config(5));

    let mut seen: Vec<Progress> = Vec::new();
    let report = engine.run_resumable_with(&mut seen).await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.progress.remaining, 0);
    assert_eq!(report.progress.resume_point, 23);
    assert_eq!(report.stats.records_written, 23);
    assert_eq!(report.stats.records_tagged, 23);
    assert_eq!(report.stats.batches, 5);

    let copies = dst.records();
    assert_eq!(markers(&copies), (1..=23).collect::<Vec<Marker>>());
    let ids: Vec<String> = copies.iter().map(|r| r.id.to_string()).collect();
    let expected: Vec<String> = (1..=23).map(|m| m.to_string()).collect();
    assert_eq!(ids, expected);
    assert!(src.records().iter().all(|r| r.is_marked(FIELD)));

    // progress only moves forward
    assert_eq!(seen.len(), 5);
    assert!(seen.windows(2).all(|w| w[0].resume_point < w[1].resume_point));
    assert!(seen.windows(2).all(|w| w[0].remaining > w[1].remaining));
    assert_eq!(seen.last().copied(), Some(report.progress));
}

#[tokio::test]
async fn test_markers_continue_from_resume_point() {
    let src = Arc::new(MemoryStore::new("catalog"));
    src.seed((1..=3).map(|m| record(&format!("old{m}"), "product", json!({ FIELD: m }))));
    src.seed((0..7).map(|i| record(&format!("new{i}"), "product", json!({}))));
    let dst = Arc::new(MemoryStore::new("catalog-v2"));
    dst.seed((1..=3).map(|m| record(&m.to_string(), "product", json!({ FIELD: m }))));

    let mut engine = engine(&src, Backend::Collection, &dst, Backend::SearchIndex, config(4));
    let report = engine.run_resumable().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(markers(&dst.records()), (1..=10).collect::<Vec<Marker>>());
    let fresh: Vec<Marker> = src
        .records()
        .iter()
        .filter(|r| r.id.as_str().starts_with("new"))
        .filter_map(|r| r.marker(FIELD))
        .collect();
    assert_eq!(fresh, (4..=10).collect::<Vec<Marker>>());
}

#[tokio::test]
async fn test_second_run_is_already_complete() {
    let src = seeded("catalog", 6);
    let dst = seeded("catalog-v2", 0);
    let mut engine = engine(&src, Backend::Collection, &dst, Backend::SearchIndex, config(4));

    engine.run_resumable().await.unwrap();
    let inserts = dst.calls(Operation::Insert);
    let stamps = src.calls(Operation::SetMarkers);

    let again = engine.run_resumable().await.unwrap();
    assert_eq!(again.status, RunStatus::AlreadyComplete);
    assert_eq!(again.progress.resume_point, 6);
    assert_eq!(again.stats.records_written, 0);
    assert_eq!(dst.calls(Operation::Insert), inserts);
    assert_eq!(src.calls(Operation::SetMarkers), stamps);
}

#[tokio::test]
async fn test_status_reports_remaining_unmarked() {
    let src = Arc::new(MemoryStore::new("catalog"));
    src.seed((0..10).map(|i| {
        if i < 4 {
            record(&format!("r{i}"), "product", json!({ FIELD: i + 1 }))
        } else {
            record(&format!("r{i}"), "product", json!({}))
        }
    }));
    let dst = seeded("catalog-v2", 0);
    let engine = engine(&src, Backend::Collection, &dst, Backend::SearchIndex, config(4));

    let status = engine.status().await.unwrap();
    assert_eq!(
        status,
        Progress {
            resume_point: 4,
            remaining: 6
        }
    );
    assert_eq!(dst.calls(Operation::Insert), 0);
}

#[tokio::test]
async fn test_search_index_source_into_collection() {
    let src = seeded("products", 10);
    let dst = seeded("products", 0);
    let mut engine = engine(&src, Backend::SearchIndex, &dst, Backend::Collection, config(3));

    let report = engine.run_resumable().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.progress.resume_point, 10);
    let ids: Vec<String> = dst.records().iter().map(|r| r.id.to_string()).collect();
    let expected: Vec<String> = (0..10).map(|i| format!("r{i}")).collect();
    assert_eq!(ids, expected);
    assert_eq!(markers(&src.records()), (1..=10).collect::<Vec<Marker>>());
}

#[tokio::test]
async fn test_oversized_record_is_isolated_and_logged() {
    let src = Arc::new(MemoryStore::new("catalog"));
    src.seed((0..5).map(|i| {
        if i == 2 {
            record("big", "product", json!({ "blob": "x".repeat(500) }))
        } else {
            record(&format!("r{i}"), "product", json!({ "n": i }))
        }
    }));
    let dst = Arc::new(MemoryStore::new("catalog-v2").with_max_document_bytes(100));
    let failures = MemoryFailureSink::new();
    let mut engine = engine(&src, Backend::Collection, &dst, Backend::Collection, config(10))
        .with_failure_sink(failures.clone());

    let report = engine.run_resumable().await.unwrap();

    assert_eq!(report.status, RunStatus::Partial);
    assert_eq!(report.progress.remaining, 1);
    assert_eq!(report.stats.records_written, 4);
    assert_eq!(report.stats.write_failures, 1);
    assert_eq!(dst.records().len(), 4);

    let entries = failures.entries();
    assert_eq!(entries.len(), 1);
    let (sequence, entry) = &entries[0];
    assert_eq!(*sequence, 0);
    assert_eq!(entry.kind, "DocumentTooLarge");
    assert_eq!(entry.record_id.as_str(), "big");
    assert_eq!(entry.payload["blob"].as_str().map(str::len), Some(500));
    assert_eq!(engine.failure_count(), 1);
}

#[tokio::test]
async fn test_transient_query_errors_are_retried() {
    let src = seeded("catalog", 4);
    let dst = seeded("catalog-v2", 0);
    src.inject(Operation::Count, Fault::TransientQuery);
    src.inject(Operation::Find, Fault::TransientQuery);
    src.inject(Operation::Find, Fault::TransientQuery);
    let mut engine = engine(&src, Backend::Collection, &dst, Backend::SearchIndex, config(10));

    let report = engine.run_resumable().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.stats.retries, 3);
    assert_eq!(dst.records().len(), 4);
}

#[tokio::test]
async fn test_exhausted_retries_surface_as_error() {
    let src = seeded("catalog", 4);
    let dst = seeded("catalog-v2", 0);
    for _ in 0..3 {
        src.inject(Operation::Count, Fault::TransientQuery);
    }
    let mut engine = engine(&src, Backend::Collection, &dst, Backend::SearchIndex, config(10));

    let err = engine.run_resumable().await.unwrap_err();
    assert!(matches!(err, Error::Query { retryable: true, .. }));
    assert_eq!(src.calls(Operation::Count), 3);
}

#[tokio::test]
async fn test_connectivity_error_is_not_retried() {
    let src = seeded("catalog", 4);
    let dst = seeded("catalog-v2", 0);
    src.inject(Operation::Find, Fault::Connectivity);
    let mut engine = engine(&src, Backend::Collection, &dst, Backend::SearchIndex, config(10));

    let err = engine.run_resumable().await.unwrap_err();
    assert!(err.is_connectivity());
    assert_eq!(src.calls(Operation::Find), 1);
    assert_eq!(dst.calls(Operation::Insert), 0);
}

#[tokio::test]
async fn test_tagging_failure_is_recovered_next_iteration() {
    let src = seeded("catalog", 4);
    let dst = seeded("catalog-v2", 0);
    src.inject(Operation::SetMarkers, Fault::Query);
    let mut engine = engine(&src, Backend::Collection, &dst, Backend::SearchIndex, config(10));

    let report = engine.run_resumable().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.stats.tagging_failures, 4);
    // first copies stay behind as duplicates; the retry never reuses markers
    assert_eq!(markers(&dst.records()), (1..=8).collect::<Vec<Marker>>());
    assert_eq!(markers(&src.records()), (5..=8).collect::<Vec<Marker>>());
}

#[tokio::test]
async fn test_unstamped_index_source_is_not_complete_until_stamped() {
    let src = seeded("catalog", 4);
    let dst = seeded("catalog-v2", 0);
    src.inject(Operation::SetMarkers, Fault::Query);
    let mut engine = engine(&src, Backend::SearchIndex, &dst, Backend::Collection, config(10));

    let report = engine.run_resumable().await.unwrap();

    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.stats.tagging_failures, 4);
    assert_eq!(report.stats.duplicates, 4);
    assert!(src.records().iter().all(|r| r.is_marked(FIELD)));
    assert_eq!(markers(&src.records()), (5..=8).collect::<Vec<Marker>>());
    assert_eq!(dst.records().len(), 4);

    let again = engine.run_resumable().await.unwrap();
    assert_eq!(again.status, RunStatus::AlreadyComplete);
}

#[tokio::test]
async fn test_unstamped_index_source_stalls_when_stamps_keep_failing() {
    let src = seeded("catalog", 2);
    let dst = seeded("catalog-v2", 0);
    for _ in 0..5 {
        src.inject(Operation::SetMarkers, Fault::Query);
    }
    let mut engine = engine(
        &src,
        Backend::SearchIndex,
        &dst,
        Backend::Collection,
        config(10).with_max_idle_batches(2),
    );

    let err = engine.run_resumable().await.unwrap_err();
    assert!(matches!(err, Error::Stalled { remaining: 2, .. }), "got {err:?}");
}

#[tokio::test]
async fn test_stalls_instead_of_spinning() {
    let src = seeded("catalog", 2);
    let dst = seeded("catalog-v2", 0);
    for _ in 0..5 {
        src.inject(Operation::SetMarkers, Fault::Query);
    }
    let mut engine = engine(
        &src,
        Backend::Collection,
        &dst,
        Backend::SearchIndex,
        config(10).with_max_idle_batches(2),
    );

    let err = engine.run_resumable().await.unwrap_err();
    assert!(matches!(
        err,
        Error::Stalled {
            remaining: 2,
            iterations: 2
        }
    ));
}

// ============================================================================
// Full Transfer Tests
// ============================================================================

#[tokio::test]
async fn test_full_transfer_pages_and_single_release() {
    let src = seeded("catalog", 8);
    let dst = seeded("catalog-v2", 0);
    let mut engine = engine(&src, Backend::SearchIndex, &dst, Backend::Collection, config(10));

    let report = engine.run_full_transfer().await.unwrap();

    assert_eq!(report.pages, 3);
    assert_eq!(report.stats.records_written, 8);
    assert_eq!(dst.calls(Operation::Insert), 3);
    assert_eq!(src.calls(Operation::CloseScan), 1);
    assert_eq!(src.open_scans(), 0);
    assert_eq!(dst.documents("product").len(), 8);
    assert!(src.records().iter().all(|r| !r.is_marked(FIELD)));
}

#[tokio::test]
async fn test_full_transfer_groups_by_kind() {
    let src = Arc::new(MemoryStore::new("legacy"));
    src.seed([
        record("1", "book", json!({})),
        record("2", "author", json!({})),
        record("3", "book", json!({})),
    ]);
    let dst = seeded("unused", 0);
    let mut engine = engine(&src, Backend::SearchIndex, &dst, Backend::Collection, config(10));

    let report = engine.run_full_transfer().await.unwrap();

    assert_eq!(report.pages, 1);
    assert_eq!(dst.calls(Operation::Insert), 2);
    assert_eq!(
        report.collections.into_iter().collect::<Vec<_>>(),
        vec!["author", "book"]
    );
    assert_eq!(dst.documents("book").len(), 2);
    assert_eq!(dst.documents("author").len(), 1);
}

#[tokio::test]
async fn test_full_transfer_logs_rejected_records() {
    let src = Arc::new(MemoryStore::new("legacy"));
    src.seed([
        record("1", "book", json!({"title": "short"})),
        record("2", "book", json!({"title": "y".repeat(300)})),
    ]);
    let dst = Arc::new(MemoryStore::new("unused").with_max_document_bytes(100));
    let failures = MemoryFailureSink::new();
    let mut engine = engine(&src, Backend::SearchIndex, &dst, Backend::Collection, config(10))
        .with_failure_sink(failures.clone());

    let report = engine.run_full_transfer().await.unwrap();

    assert_eq!(report.stats.records_written, 1);
    assert_eq!(report.stats.write_failures, 1);
    let entries = failures.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].1.record_id.as_str(), "2");
    assert!(entries[0].1.payload.contains_key("title"));
}

#[tokio::test]
async fn test_full_transfer_releases_scan_on_error() {
    let src = seeded("catalog", 8);
    let dst = seeded("catalog-v2", 0);
    dst.inject(Operation::Insert, Fault::Write);
    let mut engine = engine(&src, Backend::SearchIndex, &dst, Backend::Collection, config(10));

    let err = engine.run_full_transfer().await.unwrap_err();

    assert!(matches!(err, Error::Write { .. }));
    assert_eq!(src.calls(Operation::CloseScan), 1);
    assert_eq!(src.open_scans(), 0);
}

#[tokio::test]
async fn test_release_failure_does_not_mask_primary_error() {
    let src = seeded("catalog", 8);
    let dst = seeded("catalog-v2", 0);
    dst.inject(Operation::Insert, Fault::Write);
    src.inject(Operation::CloseScan, Fault::Query);
    let mut engine = engine(&src, Backend::SearchIndex, &dst, Backend::Collection, config(10));

    let err = engine.run_full_transfer().await.unwrap_err();
    assert!(matches!(err, Error::Write { .. }));
    assert_eq!(src.calls(Operation::CloseScan), 1);
}

#[tokio::test]
async fn test_release_failure_after_success_is_only_logged() {
    let src = seeded("catalog", 2);
    let dst = seeded("catalog-v2", 0);
    src.inject(Operation::CloseScan, Fault::Connectivity);
    let mut engine = engine(&src, Backend::SearchIndex, &dst, Backend::Collection, config(10));

    let report = engine.run_full_transfer().await.unwrap();
    assert_eq!(report.stats.records_written, 2);
}

// ============================================================================
// Sink Tests
// ============================================================================

#[tokio::test]
async fn test_file_failure_sink_writes_one_file_per_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let sink = FileFailureSink::new(dir.path().join("failures"));
    let entry = FailureEntry::new(
        "DocumentTooLarge",
        "too big",
        RecordId::new("r1"),
        json!({"n": 1}).as_object().cloned().unwrap(),
    );

    sink.record(0, &entry).await.unwrap();
    sink.record(1, &entry).await.unwrap();

    let first = std::fs::read_to_string(sink.path_for(0)).unwrap();
    let parsed: FailureEntry = serde_json::from_str(&first).unwrap();
    assert_eq!(parsed, entry);
    assert!(sink.dir().join("errs-1.json").exists());
}

#[test]
fn test_tracing_progress_accepts_updates() {
    let mut sink = TracingProgress;
    sink.observe(Progress {
        resume_point: 1,
        remaining: 0,
    });
}
