//! Progress events and reporters
//!
//! Workers never print. They hand [`ProgressUpdate`]s to a
//! [`ProgressTracker`], which keeps per-content-type running totals and
//! forwards each update to the configured [`ProgressReporter`].

use chrono::{DateTime, Utc};
use cv_common::ContentType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tracing::info;

/// Ephemeral progress event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub content_type: ContentType,
    pub items_processed: u64,
    pub total_items: Option<u64>,
    pub batches_completed: u64,
    pub timestamp: DateTime<Utc>,
    pub worker_id: Option<usize>,
    pub metadata: BTreeMap<String, Value>,
}

impl ProgressUpdate {
    pub fn new(content_type: ContentType, items_processed: u64, batches_completed: u64) -> Self {
        Self {
            content_type,
            items_processed,
            total_items: None,
            batches_completed,
            timestamp: Utc::now(),
            worker_id: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_total(mut self, total: u64) -> Self {
        self.total_items = Some(total);
        self
    }

    pub fn with_worker(mut self, worker_id: usize) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Completion percentage (0-100), when the total is known and non-zero
    pub fn progress_percentage(&self) -> Option<f64> {
        match self.total_items {
            Some(total) if total > 0 => {
                Some((self.items_processed as f64 / total as f64 * 100.0).min(100.0))
            },
            _ => None,
        }
    }
}

/// Sink for progress events
pub trait ProgressReporter: Send + Sync {
    fn report(&self, update: &ProgressUpdate);

    /// Called once per content type after its workers have stopped
    fn finish(&self, _content_type: ContentType, _items: u64) {}
}

/// Emits one structured log line per update
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl ProgressReporter for TracingReporter {
    fn report(&self, update: &ProgressUpdate) {
        info!(
            content_type = %update.content_type,
            items = update.items_processed,
            batches = update.batches_completed,
            worker = update.worker_id,
            percent = update.progress_percentage(),
            "Progress"
        );
    }

    fn finish(&self, content_type: ContentType, items: u64) {
        info!(content_type = %content_type, items, "Content type finished");
    }
}

/// Forwards updates to an unbounded channel for callers that render them
#[derive(Debug, Clone)]
pub struct ChannelReporter {
    sender: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelReporter {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressReporter for ChannelReporter {
    fn report(&self, update: &ProgressUpdate) {
        // A dropped receiver only means nobody is watching
        let _ = self.sender.send(update.clone());
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn report(&self, _update: &ProgressUpdate) {}
}

#[derive(Debug, Default, Clone, Copy)]
struct Totals {
    items: u64,
    batches: u64,
}

/// Aggregates per-worker batch counts into cumulative per-type updates
#[derive(Clone)]
pub struct ProgressTracker {
    reporter: Arc<dyn ProgressReporter>,
    totals: Arc<Mutex<HashMap<ContentType, Totals>>>,
}

impl ProgressTracker {
    pub fn new(reporter: Arc<dyn ProgressReporter>) -> Self {
        Self {
            reporter,
            totals: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn noop() -> Self {
        Self::new(Arc::new(NoopReporter))
    }

    /// Record one persisted batch and emit the cumulative update
    pub fn record_batch(&self, content_type: ContentType, worker_id: usize, items: u64) {
        let totals = {
            let mut map = self.totals.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = map.entry(content_type).or_default();
            entry.items += items;
            entry.batches += 1;
            *entry
        };
        let update =
            ProgressUpdate::new(content_type, totals.items, totals.batches).with_worker(worker_id);
        self.reporter.report(&update);
    }

    pub fn items_processed(&self, content_type: ContentType) -> u64 {
        self.totals
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&content_type)
            .map(|t| t.items)
            .unwrap_or(0)
    }

    pub fn finish(&self, content_type: ContentType) {
        self.reporter
            .finish(content_type, self.items_processed(content_type));
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percentage() {
        let update = ProgressUpdate::new(ContentType::Dashboard, 25, 1);
        assert_eq!(update.progress_percentage(), None);

        assert_eq!(update.clone().with_total(0).progress_percentage(), None);
        assert_eq!(update.clone().with_total(100).progress_percentage(), Some(25.0));
        // Clamped when the source reports more than its total
        assert_eq!(update.with_total(20).progress_percentage(), Some(100.0));
    }

    #[tokio::test]
    async fn test_tracker_accumulates_across_workers() {
        let (reporter, mut rx) = ChannelReporter::new();
        let tracker = ProgressTracker::new(Arc::new(reporter));

        tracker.record_batch(ContentType::Model, 0, 10);
        tracker.record_batch(ContentType::Model, 1, 5);
        tracker.record_batch(ContentType::User, 1, 7);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.items_processed, 10);
        assert_eq!(first.worker_id, Some(0));

        let second = rx.recv().await.unwrap();
        assert_eq!(second.items_processed, 15);
        assert_eq!(second.batches_completed, 2);

        let third = rx.recv().await.unwrap();
        assert_eq!(third.content_type, ContentType::User);
        assert_eq!(third.items_processed, 7);

        assert_eq!(tracker.items_processed(ContentType::Model), 15);
        assert_eq!(tracker.items_processed(ContentType::Folder), 0);
    }

    #[test]
    fn test_channel_reporter_tolerates_dropped_receiver() {
        let (reporter, rx) = ChannelReporter::new();
        drop(rx);
        reporter.report(&ProgressUpdate::new(ContentType::Role, 1, 1));
    }
}
