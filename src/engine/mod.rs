//! Transfer engine
//!
//! Drives a migration between two [`Adapter`]s.
//!
//! # Overview
//!
//! The engine module provides:
//! - `TransferEngine::run_resumable` - checkpointed loop: count what is left,
//!   read an unmarked batch, write and mark it, recount
//! - `TransferEngine::run_full_transfer` - one-shot copy over a server-side
//!   scan, grouped by record kind
//! - `TransferEngine::status` - current resume point and remaining count
//!
//! Query failures marked retryable are retried with the configured backoff.
//! Connectivity failures end the run immediately.

mod sinks;
mod types;

pub use sinks::{
    FailureEntry, FailureSink, FileFailureSink, MemoryFailureSink, ProgressSink, TracingProgress,
};
pub use types::{EngineConfig, Progress, RunReport, RunStatus, TransferReport, TransferStats};

use crate::adapter::{write_and_mark, Adapter, WriteReport};
use crate::error::{Error, Result};
use crate::retry::retry;
use crate::store::{max_marker, DocumentStore, ScanCursor, ScanPage};
use crate::types::{Marker, NewDocument, Record, RecordId};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Migration engine for one source/destination pair
pub struct TransferEngine {
    source: Box<dyn Adapter>,
    destination: Box<dyn Adapter>,
    config: EngineConfig,
    failures: Option<Box<dyn FailureSink>>,
    /// Sequence number of the next logged failure
    failure_count: u64,
    /// Highest marker handed out by this engine
    high_water: Marker,
    /// Records the destination refused during the current run
    rejected: HashSet<RecordId>,
    /// Records copied during the current run whose source stamp has not landed
    unstamped: HashSet<RecordId>,
    stats: TransferStats,
}

impl TransferEngine {
    /// Create an engine copying from `source` into `destination`
    pub fn new(
        source: Box<dyn Adapter>,
        destination: Box<dyn Adapter>,
        config: EngineConfig,
    ) -> Self {
        Self {
            source,
            destination,
            config,
            failures: None,
            failure_count: 0,
            high_water: 0,
            rejected: HashSet::new(),
            unstamped: HashSet::new(),
            stats: TransferStats::default(),
        }
    }

    /// Persist per-record failures through `sink`
    #[must_use]
    pub fn with_failure_sink(mut self, sink: impl FailureSink + 'static) -> Self {
        self.failures = Some(Box::new(sink));
        self
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Statistics of the last run
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Failures logged so far
    pub fn failure_count(&self) -> u64 {
        self.failure_count
    }

    /// Current resume point and remaining count, without writing
    pub async fn status(&self) -> Result<Progress> {
        let (remaining, _) = self.remaining().await?;
        let (resume_point, _) = self.resume_point().await?;
        Ok(Progress {
            resume_point,
            remaining,
        })
    }

    /// Run the checkpointed loop, logging progress through tracing
    pub async fn run_resumable(&mut self) -> Result<RunReport> {
        self.run_resumable_with(&mut TracingProgress).await
    }

    /// Run the checkpointed loop until nothing remains
    pub async fn run_resumable_with(
        &mut self,
        progress: &mut dyn ProgressSink,
    ) -> Result<RunReport> {
        let start = Instant::now();
        self.stats = TransferStats::default();
        self.rejected.clear();
        self.unstamped.clear();

        let (mut remaining, retries) = self.remaining().await?;
        self.stats.add_retries(retries);
        let (mut resume_point, retries) = self.resume_point().await?;
        self.stats.add_retries(retries);

        if remaining == 0 {
            info!("Nothing left to migrate, resume point {resume_point}");
            let done = Progress {
                resume_point,
                remaining: 0,
            };
            return Ok(self.finish_run(RunStatus::AlreadyComplete, done, start));
        }

        // Copies already carrying a marker pin the floor, so a fresh run never
        // hands out an identity the destination already holds.
        let (floor, retries) = retry(&self.config.retry, "destination high marker", || {
            max_marker(
                self.destination.store().as_ref(),
                self.destination.marker_field(),
            )
        })
        .await?;
        self.stats.add_retries(retries);
        self.high_water = self.high_water.max(floor);

        info!(
            "Migrating {remaining} records from '{}' to '{}', resume point {resume_point}",
            self.source.store().name(),
            self.destination.store().name()
        );

        let mut idle = 0u32;
        while remaining != 0 {
            let fetch_size = self.config.fetch_size;
            let (batch, retries) = retry(&self.config.retry, "read unmarked batch", || {
                self.source.read_unmarked_batch(fetch_size)
            })
            .await?;
            self.stats.add_retries(retries);

            let progressed = if batch.is_empty() {
                debug!("No unmarked records returned while {remaining} remain");
                false
            } else {
                self.stats.add_batch(batch.len());
                let start_marker = resume_point.max(self.high_water);
                let report = write_and_mark(
                    self.source.as_ref(),
                    self.destination.as_ref(),
                    batch,
                    start_marker,
                )
                .await?;
                self.high_water = self.high_water.max(report.highest_assigned);
                self.absorb(report).await?
            };

            let (point, retries) = self.resume_point().await?;
            self.stats.add_retries(retries);
            let (left, retries) = self.remaining().await?;
            self.stats.add_retries(retries);
            resume_point = point;
            // A destination-counted source reports copied records as done even
            // when their stamp failed; they are not done until stamped.
            remaining = left.max(self.unstamped.len() as u64);

            let current = Progress {
                resume_point,
                remaining,
            };
            debug!("Progress: {current}");
            progress.observe(current);

            if progressed {
                idle = 0;
                continue;
            }
            if remaining != 0 && remaining <= self.rejected.len() as u64 {
                warn!(
                    "{remaining} records were refused by '{}' and are left unmigrated",
                    self.destination.store().name()
                );
                return Ok(self.finish_run(RunStatus::Partial, current, start));
            }
            if remaining == 0 {
                break;
            }

            idle += 1;
            if idle >= self.config.max_idle_batches {
                return Err(Error::Stalled {
                    remaining,
                    iterations: idle,
                });
            }
            let delay = self.config.retry.delay(idle - 1);
            warn!(
                "Iteration made no progress ({idle}/{}), waiting {delay:?}",
                self.config.max_idle_batches
            );
            tokio::time::sleep(delay).await;
        }

        let done = Progress {
            resume_point,
            remaining: 0,
        };
        Ok(self.finish_run(RunStatus::Complete, done, start))
    }

    /// Copy every source record once, without markers
    pub async fn run_full_transfer(&mut self) -> Result<TransferReport> {
        let start = Instant::now();
        self.stats = TransferStats::default();

        let store = Arc::clone(self.source.store());
        let page_size = self.config.scroll_page_size;
        let keep_alive = self.config.keep_alive.clone();

        let (first, retries) = retry(&self.config.retry, "open scan", || {
            store.open_scan(page_size, &keep_alive)
        })
        .await?;
        self.stats.add_retries(retries);

        let mut cursor = first.cursor.clone();
        let mut report = TransferReport {
            pages: 0,
            collections: Default::default(),
            stats: TransferStats::default(),
        };
        let copied = self
            .copy_pages(store.as_ref(), first, &mut cursor, &mut report)
            .await;

        if let Err(e) = store.close_scan(&cursor).await {
            warn!("Failed to release scan on '{}': {e}", store.name());
        }
        copied?;

        self.stats.set_duration(start.elapsed().as_millis() as u64);
        report.stats = self.stats.clone();
        info!(
            "Transferred {} records in {} pages ({} failures)",
            self.stats.records_written, report.pages, self.stats.write_failures
        );
        Ok(report)
    }

    async fn copy_pages(
        &mut self,
        store: &dyn DocumentStore,
        first: ScanPage,
        cursor: &mut ScanCursor,
        report: &mut TransferReport,
    ) -> Result<()> {
        let mut page = first;
        loop {
            *cursor = page.cursor.clone();
            if page.records.is_empty() {
                return Ok(());
            }

            report.pages += 1;
            self.stats.add_batch(page.records.len());
            for kind in self.write_page(page.records).await? {
                report.collections.insert(kind);
            }

            let current: &ScanCursor = cursor;
            let keep_alive = self.config.keep_alive.as_str();
            let (next, retries) = retry(&self.config.retry, "next scan page", || {
                store.next_scan_page(current, keep_alive)
            })
            .await?;
            self.stats.add_retries(retries);
            page = next;
        }
    }

    /// One unordered insert per record kind; returns the kinds written
    async fn write_page(&mut self, records: Vec<Record>) -> Result<Vec<String>> {
        let mut by_kind: BTreeMap<String, Vec<Record>> = BTreeMap::new();
        for record in records {
            by_kind.entry(record.kind.clone()).or_default().push(record);
        }

        let mut kinds = Vec::with_capacity(by_kind.len());
        for (kind, records) in by_kind {
            let docs = records.iter().map(NewDocument::verbatim).collect();
            let outcome = self
                .destination
                .store()
                .insert_many(Some(kind.as_str()), docs, false)
                .await?;

            self.stats.records_written += outcome.succeeded;
            for failure in outcome.failures {
                self.stats.write_failures += 1;
                let payload = records
                    .get(failure.index)
                    .map(|r| r.payload.clone())
                    .unwrap_or_default();
                self.log_failure(FailureEntry::new(
                    failure.kind.to_string(),
                    failure.reason,
                    failure.id,
                    payload,
                ))
                .await?;
            }
            kinds.push(kind);
        }
        Ok(kinds)
    }

    /// Fold a batch report into the stats and failure log; returns whether
    /// the batch made progress
    async fn absorb(&mut self, report: WriteReport) -> Result<bool> {
        let progressed = report.made_progress();
        self.stats.records_written += report.written;
        self.stats.duplicates += report.duplicates;
        self.stats.records_tagged += report.tagged;
        self.stats.tagging_failures += report.untagged.len();
        for id in &report.stamped {
            self.unstamped.remove(id);
        }
        self.unstamped.extend(report.untagged.iter().cloned());

        if let Some(err) = &report.tagging_error {
            warn!(
                "{} records copied but not marked, they will be read again: {err}",
                report.untagged.len()
            );
        }

        for failed in report.write_failures {
            if !self.rejected.insert(failed.record.id.clone()) {
                debug!("'{}' refused again", failed.record.id);
                continue;
            }
            self.stats.write_failures += 1;
            self.log_failure(FailureEntry::new(
                failed.failure.kind.to_string(),
                failed.failure.reason,
                failed.record.id,
                failed.record.payload,
            ))
            .await?;
        }
        Ok(progressed)
    }

    async fn log_failure(&mut self, entry: FailureEntry) -> Result<()> {
        let sequence = self.failure_count;
        self.failure_count += 1;
        warn!(
            "{} for record '{}': {}",
            entry.kind, entry.record_id, entry.reason
        );
        if let Some(sink) = &self.failures {
            sink.record(sequence, &entry).await?;
        }
        Ok(())
    }

    async fn remaining(&self) -> Result<(u64, u32)> {
        retry(&self.config.retry, "remaining count", || {
            self.source.remaining_count(self.destination.as_ref())
        })
        .await
    }

    async fn resume_point(&self) -> Result<(Marker, u32)> {
        retry(&self.config.retry, "resume point", || {
            self.source.highest_issued_marker(self.destination.as_ref())
        })
        .await
    }

    fn finish_run(&mut self, status: RunStatus, progress: Progress, start: Instant) -> RunReport {
        self.stats.set_duration(start.elapsed().as_millis() as u64);
        info!(
            "Run {status:?}: {} written, {} marked, {} failures",
            self.stats.records_written, self.stats.records_tagged, self.stats.write_failures
        );
        RunReport {
            status,
            progress,
            stats: self.stats.clone(),
        }
    }
}

#[cfg(test)]
mod tests;
