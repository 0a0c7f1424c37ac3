//! Extraction orchestrator
//!
//! One [`ExtractionOrchestrator::run`] is one extraction session. Content
//! types are processed one after another; within a type a pool of workers
//! shares an [`OffsetCoordinator`](crate::coordinator::OffsetCoordinator)
//! and persists pages through the store's batch transaction.
//!
//! # Checkpoints
//!
//! Each type gets a checkpoint. Its resume data only moves after the ranges
//! below it are committed, so a crashed run resumed with `resume = true`
//! re-fetches at most the ranges that were in flight. Completing the
//! checkpoint is the durable signal that the type finished.
//!
//! # Failure handling
//!
//! - item failures are dead-lettered with the raw record
//! - range failures (rate limit exhausted, API rejection) are dead-lettered
//!   by offset window and the worker continues
//! - session failures (storage, auth, connectivity) stop the sibling workers,
//!   leave the checkpoint open with its error, and mark the session failed

mod ranges;
mod record;
mod worker;

pub use ranges::RangeTracker;
pub use record::{decode_record, record_id};
pub use worker::{WorkerStats, MAX_CONSECUTIVE_RANGE_FAILURES};

use chrono::{DateTime, Utc};
use cv_common::{ContentType, SessionStatus};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::ContentApi;
use crate::batch::BatchProcessor;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::models::{Checkpoint, CheckpointData};
use crate::progress::ProgressTracker;
use crate::store::Store;
use worker::{run_worker, TypeRun};

/// Outcome of one content type within a session
#[derive(Debug, Clone, Serialize)]
pub struct TypeSummary {
    pub content_type: ContentType,
    pub checkpoint_id: i64,
    /// False when the run stopped before the listing was exhausted
    pub completed: bool,
    pub resumed_from: u64,
    pub next_offset: u64,
    pub items: u64,
    pub dead_letters: u64,
    pub failed_ranges: u64,
    pub soft_deleted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub types: Vec<TypeSummary>,
}

impl ExtractionSummary {
    pub fn total_items(&self) -> u64 {
        self.types.iter().map(|t| t.items).sum()
    }

    pub fn total_dead_letters(&self) -> u64 {
        self.types.iter().map(|t| t.dead_letters + t.failed_ranges).sum()
    }
}

pub struct ExtractionOrchestrator {
    store: Store,
    api: Arc<dyn ContentApi>,
    config: EngineConfig,
    progress: ProgressTracker,
    cancel: CancellationToken,
}

impl ExtractionOrchestrator {
    pub fn new(store: Store, api: Arc<dyn ContentApi>, config: EngineConfig) -> Self {
        Self {
            store,
            api,
            config,
            progress: ProgressTracker::noop(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_progress(mut self, progress: ProgressTracker) -> Self {
        self.progress = progress;
        self
    }

    /// Share a run-level stop signal with the caller (e.g. a Ctrl-C handler)
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run one extraction session over the configured content types
    pub async fn run(&self) -> Result<ExtractionSummary> {
        let sessions = self.store.sessions();
        let content_types = &self.config.extraction.content_types;
        let session = sessions
            .create(
                &self.config.snapshot(),
                &json!({ "content_types": content_types }),
            )
            .await?;
        sessions.start(&session.id).await?;
        info!(
            session_id = %session.id,
            types = content_types.len(),
            workers = self.config.extraction.workers,
            "Extraction session started"
        );

        let mut types = Vec::with_capacity(content_types.len());
        for &content_type in content_types {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.extract_type(&session.id, content_type).await {
                Ok(summary) => types.push(summary),
                Err(e) => {
                    error!(session_id = %session.id, %content_type, error = %e, "Extraction session failed");
                    if let Err(finish_err) = sessions
                        .finish(&session.id, SessionStatus::Failed, Some(&e.to_string()))
                        .await
                    {
                        warn!(error = %finish_err, "Could not mark session failed");
                    }
                    return Err(e);
                },
            }
        }

        let status = if self.cancel.is_cancelled() {
            SessionStatus::Cancelled
        } else {
            SessionStatus::Completed
        };
        sessions
            .set_metadata(
                &session.id,
                &json!({ "content_types": content_types, "types": &types }),
            )
            .await?;
        sessions.finish(&session.id, status, None).await?;

        let summary = ExtractionSummary {
            session_id: session.id,
            status,
            started_at: session.started_at,
            types,
        };
        info!(
            session_id = %summary.session_id,
            status = %summary.status,
            items = summary.total_items(),
            dead_letters = summary.total_dead_letters(),
            "Extraction session finished"
        );
        Ok(summary)
    }

    async fn open_checkpoint(&self, session_id: &str, content_type: ContentType) -> Result<Checkpoint> {
        let checkpoints = self.store.checkpoints();
        if self.config.extraction.resume {
            if let Some(previous) = checkpoints.latest_incomplete(content_type).await? {
                let data = previous.data()?;
                info!(
                    %content_type,
                    checkpoint_id = previous.id,
                    next_offset = data.next_offset,
                    "Resuming unfinished checkpoint"
                );
                return checkpoints.adopt(previous.id, session_id).await;
            }
        }

        checkpoints
            .open(
                Some(session_id),
                content_type,
                &CheckpointData::fresh(self.config.extraction.stride),
            )
            .await
    }

    #[tracing::instrument(skip(self, session_id), fields(session_id = %session_id))]
    async fn extract_type(&self, session_id: &str, content_type: ContentType) -> Result<TypeSummary> {
        let settings = &self.config.extraction;
        let checkpoint = self.open_checkpoint(session_id, content_type).await?;
        let resume_from = checkpoint.data()?;
        let stop = self.cancel.child_token();

        let run = Arc::new(TypeRun::new(
            content_type,
            session_id.to_string(),
            checkpoint.id,
            &resume_from,
            self.store.clone(),
            Arc::clone(&self.api),
            self.config.retry.rate_limit_policy(),
            BatchProcessor::new(settings.batch_size),
            self.progress.clone(),
            settings.checkpoint_interval,
            stop.clone(),
        ));

        let workers = settings.workers.max(1);
        run.coordinator.set_total_workers(workers);
        let mut tasks = JoinSet::new();
        for worker_id in 0..workers {
            tasks.spawn(run_worker(Arc::clone(&run), worker_id));
        }

        let mut totals = WorkerStats::default();
        let mut fatal: Option<EngineError> = None;
        while let Some(joined) = tasks.join_next().await {
            let outcome = joined.unwrap_or_else(|e| Err(EngineError::WorkerFailed(e.to_string())));
            match outcome {
                Ok(stats) => totals.merge(stats),
                Err(e) => {
                    if fatal.is_none() {
                        error!(error = %e, "Worker failed, stopping content type");
                        stop.cancel();
                        fatal = Some(e);
                    }
                },
            }
        }

        let checkpoints = self.store.checkpoints();
        let data = run.snapshot();

        if let Some(err) = fatal {
            let recorded = async {
                checkpoints.advance(checkpoint.id, &data).await?;
                checkpoints.fail(checkpoint.id, &err.to_string()).await
            };
            if let Err(e) = recorded.await {
                warn!(checkpoint_id = checkpoint.id, error = %e, "Could not record checkpoint failure");
            }
            return Err(err);
        }

        let mut summary = TypeSummary {
            content_type,
            checkpoint_id: checkpoint.id,
            completed: false,
            resumed_from: resume_from.next_offset,
            next_offset: data.next_offset,
            items: totals.items,
            dead_letters: totals.dead_letters,
            failed_ranges: run.failed_ranges(),
            soft_deleted: 0,
        };

        if !run.coordinator.all_workers_done() {
            checkpoints.advance(checkpoint.id, &data).await?;
            info!(
                next_offset = data.next_offset,
                items = totals.items,
                failed_ranges = summary.failed_ranges,
                "Stopped before the listing was exhausted"
            );
            return Ok(summary);
        }

        checkpoints.complete(checkpoint.id, &data).await?;
        summary.completed = true;

        if settings.sweep_deleted && summary.failed_ranges == 0 {
            summary.soft_deleted = self
                .store
                .content()
                .soft_delete_missing(content_type, checkpoint.started_at)
                .await?;
        } else if summary.failed_ranges > 0 {
            warn!(
                failed_ranges = summary.failed_ranges,
                "Listing incomplete, skipping soft-delete sweep"
            );
        }

        self.progress.finish(content_type);
        info!(
            items = summary.items,
            dead_letters = summary.dead_letters,
            failed_ranges = summary.failed_ranges,
            soft_deleted = summary.soft_deleted,
            "Content type complete"
        );
        Ok(summary)
    }
}
