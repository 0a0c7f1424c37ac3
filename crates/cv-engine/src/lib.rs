//! ContentVault Engine
//!
//! Resumable parallel extraction and dependency-ordered restoration of
//! platform content.
//!
//! # Overview
//!
//! - **Coordination**: [`OffsetCoordinator`] hands out disjoint pagination windows
//! - **Retry**: [`RetryPolicy`] retries rate-limited calls with exponential backoff
//! - **Batching**: [`BatchProcessor`] streams records in bounded chunks
//! - **Store**: [`Store`] persists items, sessions, checkpoints, dead letters and mappings in SQLite
//! - **Extraction**: [`ExtractionOrchestrator`] runs one session across content types
//! - **Restoration**: [`RestorationEngine`] replays content with identifier remapping
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use cv_engine::{EngineConfig, ExtractionOrchestrator, HttpContentApi, Store};
//!
//! # async fn run() -> cv_engine::Result<()> {
//! let config = EngineConfig::load(None)?;
//! let store = Store::open(&config.database).await?;
//! let api = Arc::new(HttpContentApi::from_config(&config.api)?);
//!
//! let summary = ExtractionOrchestrator::new(store, api, config).run().await?;
//! println!("{} items captured", summary.total_items());
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod api;
pub mod batch;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod models;
pub mod progress;
pub mod restore;
pub mod retry;
pub mod store;

// Re-export commonly used types
pub use api::{ApiError, ContentApi, HttpContentApi};
pub use batch::BatchProcessor;
pub use config::EngineConfig;
pub use coordinator::{OffsetCoordinator, OffsetRange};
pub use error::{EngineError, ErrorScope, Result};
pub use extract::{ExtractionOrchestrator, ExtractionSummary, TypeSummary};
pub use progress::{ProgressReporter, ProgressTracker, ProgressUpdate};
pub use restore::{RestorationEngine, RestoreOptions, RestoreSummary};
pub use retry::{RetryPolicy, RetrySettings, RetryTiming};
pub use store::Store;
