//! Extraction worker loop
//!
//! Each worker repeatedly claims an offset range, fetches it under the
//! rate-limit retry policy and persists the page in bounded chunks. Errors
//! are routed by [`ErrorScope`]: item failures become dead letters inside the
//! chunk that contained them, range failures dead-letter the whole window
//! and the worker moves on, session failures end the worker with `Err`.

use cv_common::ContentType;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::ranges::RangeTracker;
use super::record::{decode_record, record_id};
use crate::api::ContentApi;
use crate::batch::BatchProcessor;
use crate::coordinator::{OffsetCoordinator, OffsetRange};
use crate::error::{EngineError, ErrorScope, Result};
use crate::models::{CheckpointData, ContentItem, NewDeadLetter};
use crate::progress::ProgressTracker;
use crate::retry::RetryPolicy;
use crate::store::{BatchWrite, Store};

/// A worker that fails this many ranges in a row stops claiming
pub const MAX_CONSECUTIVE_RANGE_FAILURES: u32 = 3;

/// State shared by every worker of one content type
pub(crate) struct TypeRun {
    pub content_type: ContentType,
    pub session_id: String,
    pub checkpoint_id: i64,
    pub coordinator: OffsetCoordinator,
    pub store: Store,
    pub api: Arc<dyn ContentApi>,
    pub retry: RetryPolicy,
    pub batches: BatchProcessor,
    pub progress: ProgressTracker,
    pub checkpoint_interval: u64,
    pub stop: CancellationToken,
    tracker: Mutex<RangeTracker>,
    failed_ranges: AtomicU64,
}

/// Per-worker counters, summed by the orchestrator
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    pub ranges: u64,
    pub items: u64,
    pub dead_letters: u64,
    pub failed_ranges: u64,
}

impl WorkerStats {
    pub fn merge(&mut self, other: WorkerStats) {
        self.ranges += other.ranges;
        self.items += other.items;
        self.dead_letters += other.dead_letters;
        self.failed_ranges += other.failed_ranges;
    }
}

enum Capture {
    Item(ContentItem),
    Failed(NewDeadLetter),
}

impl TypeRun {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        content_type: ContentType,
        session_id: String,
        checkpoint_id: i64,
        resume_from: &CheckpointData,
        store: Store,
        api: Arc<dyn ContentApi>,
        retry: RetryPolicy,
        batches: BatchProcessor,
        progress: ProgressTracker,
        checkpoint_interval: u64,
        stop: CancellationToken,
    ) -> Self {
        Self {
            content_type,
            session_id,
            checkpoint_id,
            coordinator: OffsetCoordinator::starting_at(resume_from.next_offset, resume_from.stride),
            store,
            api,
            retry,
            batches,
            progress,
            checkpoint_interval: checkpoint_interval.max(1),
            stop,
            tracker: Mutex::new(RangeTracker::from_data(resume_from)),
            failed_ranges: AtomicU64::new(0),
        }
    }

    /// Resume data covering every range persisted so far
    pub fn snapshot(&self) -> CheckpointData {
        self.lock_tracker().snapshot()
    }

    pub fn failed_ranges(&self) -> u64 {
        self.failed_ranges.load(Ordering::Relaxed)
    }

    fn lock_tracker(&self) -> std::sync::MutexGuard<'_, RangeTracker> {
        self.tracker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn fetch(&self, range: OffsetRange) -> Result<Vec<Value>> {
        let records = self
            .retry
            .run("list_content", || {
                self.api.list(self.content_type, range.offset, range.limit)
            })
            .await?;
        Ok(records)
    }

    fn capture(&self, record: Value) -> Result<Capture> {
        match decode_record(self.content_type, &record) {
            Ok(item) => Ok(Capture::Item(item)),
            Err(e) if e.scope() == ErrorScope::Item => {
                let source_id = record_id(&record);
                warn!(
                    content_type = %self.content_type,
                    source_id = source_id.as_deref().unwrap_or("-"),
                    error = %e,
                    "Record could not be captured"
                );
                Ok(Capture::Failed(NewDeadLetter::for_item(
                    Some(&self.session_id),
                    self.content_type,
                    source_id,
                    &e,
                    cv_common::codec::serialize(&record).ok(),
                )))
            },
            Err(e) => Err(e),
        }
    }

    /// Persist one fetched page chunk by chunk. The last chunk carries the
    /// range so earlier failures of the same window get resolved.
    async fn persist_range(
        &self,
        range: OffsetRange,
        records: Vec<Value>,
        worker_id: usize,
        stats: &mut WorkerStats,
    ) -> Result<()> {
        let total = records.len();
        let mut seen = 0;
        let mut chunks = self.batches.process(records, |record| self.capture(record));

        for chunk in chunks.by_ref() {
            let chunk = chunk?;
            seen += chunk.len();

            let mut items = Vec::with_capacity(chunk.len());
            let mut dead_letters = Vec::new();
            for capture in chunk {
                match capture {
                    Capture::Item(item) => items.push(item),
                    Capture::Failed(entry) => dead_letters.push(entry),
                }
            }

            self.store
                .persist_batch(BatchWrite {
                    session_id: &self.session_id,
                    content_type: self.content_type,
                    checkpoint_id: self.checkpoint_id,
                    items: &items,
                    dead_letters: &dead_letters,
                    completed_range: (seen == total).then_some(range),
                })
                .await?;

            stats.items += items.len() as u64;
            stats.dead_letters += dead_letters.len() as u64;
            self.progress
                .record_batch(self.content_type, worker_id, items.len() as u64);
        }

        let batch_stats = chunks.stats();
        debug!(
            offset = range.offset,
            items = total,
            batches = batch_stats.batches,
            peak_buffered = batch_stats.peak_buffered,
            "Range persisted"
        );
        Ok(())
    }

    async fn complete_range(&self, range: OffsetRange) -> Result<()> {
        let data = self.lock_tracker().complete(range);
        if data.ranges_completed % self.checkpoint_interval == 0 {
            self.store
                .checkpoints()
                .advance(self.checkpoint_id, &data)
                .await?;
        }
        Ok(())
    }

    async fn fail_range(&self, range: OffsetRange, error: &EngineError) -> Result<()> {
        warn!(
            content_type = %self.content_type,
            offset = range.offset,
            limit = range.limit,
            error = %error,
            "Range failed, recording dead letter"
        );
        let entry = NewDeadLetter::for_range(
            Some(&self.session_id),
            self.content_type,
            range.offset,
            range.limit,
            error,
        );
        self.store
            .persist_batch(BatchWrite {
                session_id: &self.session_id,
                content_type: self.content_type,
                checkpoint_id: self.checkpoint_id,
                items: &[],
                dead_letters: std::slice::from_ref(&entry),
                completed_range: None,
            })
            .await?;
        self.failed_ranges.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Claim and persist ranges until the listing is exhausted or the run stops
#[tracing::instrument(
    name = "worker",
    skip(run),
    fields(content_type = %run.content_type)
)]
pub(crate) async fn run_worker(run: Arc<TypeRun>, worker_id: usize) -> Result<WorkerStats> {
    let mut stats = WorkerStats::default();
    let mut consecutive_failures = 0;

    loop {
        if run.stop.is_cancelled() {
            debug!(ranges = stats.ranges, "Stop requested, no further claims");
            return Ok(stats);
        }

        let range = run.coordinator.claim_range();
        let outcome = match run.fetch(range).await {
            Ok(records) if records.is_empty() => {
                run.coordinator.mark_worker_complete();
                debug!(offset = range.offset, items = stats.items, "Listing exhausted");
                return Ok(stats);
            },
            Ok(records) => run.persist_range(range, records, worker_id, &mut stats).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                consecutive_failures = 0;
                stats.ranges += 1;
                run.complete_range(range).await?;
            },
            Err(e) if e.scope() != ErrorScope::Session => {
                run.fail_range(range, &e).await?;
                stats.failed_ranges += 1;
                consecutive_failures += 1;
                // The listing was not drained, so the checkpoint must stay open
                if consecutive_failures >= MAX_CONSECUTIVE_RANGE_FAILURES {
                    warn!(
                        failures = consecutive_failures,
                        offset = range.offset,
                        "Too many consecutive range failures, worker stopping before the listing end"
                    );
                    return Ok(stats);
                }
            },
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::api::ApiError;
    use async_trait::async_trait;
    use serde_json::json;

    /// Serves `total` records and fails every request inside `failing`
    struct PagedApi {
        total: u64,
        failing: Option<std::ops::Range<u64>>,
    }

    #[async_trait]
    impl ContentApi for PagedApi {
        async fn list(
            &self,
            _content_type: ContentType,
            offset: u64,
            limit: u64,
        ) -> std::result::Result<Vec<Value>, ApiError> {
            if self.failing.as_ref().is_some_and(|f| f.contains(&offset)) {
                return Err(ApiError::Rejected {
                    status: 500,
                    message: "boom".into(),
                });
            }
            Ok((offset..(offset + limit).min(self.total))
                .map(|i| json!({"id": i, "name": format!("item {i}")}))
                .collect())
        }

        async fn create(&self, _: ContentType, _: &Value) -> std::result::Result<String, ApiError> {
            unreachable!()
        }

        async fn update(
            &self,
            _: ContentType,
            _: &str,
            _: &Value,
        ) -> std::result::Result<String, ApiError> {
            unreachable!()
        }
    }

    async fn type_run(api: PagedApi, stride: u64) -> (Arc<TypeRun>, Store) {
        let store = Store::open_in_memory().await.unwrap();
        let session = store.sessions().create(&json!({}), &json!({})).await.unwrap();
        let data = CheckpointData::fresh(stride);
        let checkpoint = store
            .checkpoints()
            .open(Some(&session.id), ContentType::Model, &data)
            .await
            .unwrap();

        let run = TypeRun::new(
            ContentType::Model,
            session.id,
            checkpoint.id,
            &data,
            store.clone(),
            Arc::new(api),
            RetryPolicy::rate_limit(),
            BatchProcessor::new(4),
            ProgressTracker::noop(),
            1,
            CancellationToken::new(),
        );
        run.coordinator.set_total_workers(1);
        (Arc::new(run), store)
    }

    #[tokio::test]
    async fn test_single_worker_drains_listing() {
        let (run, store) = type_run(PagedApi { total: 25, failing: None }, 10).await;

        let stats = run_worker(run.clone(), 0).await.unwrap();
        assert_eq!(stats.items, 25);
        assert_eq!(stats.ranges, 3);
        assert!(run.coordinator.all_workers_done());
        assert_eq!(run.snapshot().next_offset, 30);

        let checkpoint = store.checkpoints().get(run.checkpoint_id).await.unwrap().unwrap();
        assert_eq!(checkpoint.item_count, 25);
        assert_eq!(checkpoint.data().unwrap().next_offset, 30);
    }

    #[tokio::test]
    async fn test_failed_range_is_dead_lettered_and_skipped() {
        let (run, store) = type_run(PagedApi { total: 30, failing: Some(10..11) }, 10).await;

        let stats = run_worker(run.clone(), 0).await.unwrap();
        assert_eq!(stats.items, 20);
        assert_eq!(stats.failed_ranges, 1);
        assert_eq!(run.failed_ranges(), 1);
        // The watermark stays below the hole
        assert_eq!(run.snapshot().next_offset, 10);

        let entries = store
            .dead_letters()
            .list(&crate::store::DeadLetterFilter::default())
            .await
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].range_offset, Some(10));
        assert_eq!(entries[0].error_type, "api");
    }

    #[tokio::test]
    async fn test_consecutive_failures_leave_listing_unfinished() {
        let (run, store) = type_run(
            PagedApi {
                total: 1000,
                failing: Some(0..u64::MAX),
            },
            10,
        )
        .await;

        let stats = run_worker(run.clone(), 0).await.unwrap();
        assert_eq!(stats.failed_ranges, u64::from(MAX_CONSECUTIVE_RANGE_FAILURES));
        assert_eq!(stats.items, 0);
        // Unclaimed offsets remain, so the type is not drained
        assert!(!run.coordinator.all_workers_done());
        assert_eq!(run.snapshot().next_offset, 0);

        let checkpoint = store.checkpoints().get(run.checkpoint_id).await.unwrap().unwrap();
        assert!(checkpoint.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_stopped_worker_does_not_claim() {
        let (run, _store) = type_run(PagedApi { total: 30, failing: None }, 10).await;
        run.stop.cancel();

        let stats = run_worker(run.clone(), 0).await.unwrap();
        assert_eq!(stats, WorkerStats::default());
        assert!(!run.coordinator.all_workers_done());
    }
}
