//! `cvault extract` command implementation
//!
//! Runs one extraction session against the configured source.

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use cv_engine::config::parse_content_types;
use cv_engine::{
    EngineConfig, ExtractionOrchestrator, ExtractionSummary, HttpContentApi, ProgressTracker,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::progress::BarReporter;

/// Extract content into the vault
pub async fn run(
    mut config: EngineConfig,
    types: Option<String>,
    workers: Option<usize>,
    resume: bool,
    no_sweep: bool,
    base_url: Option<String>,
) -> Result<()> {
    if let Some(types) = types {
        config.extraction.content_types = parse_content_types(&types)?;
    }
    if let Some(workers) = workers {
        config.extraction.workers = workers;
    }
    if let Some(base_url) = base_url {
        config.api.base_url = base_url;
    }
    config.extraction.resume |= resume;
    config.extraction.sweep_deleted &= !no_sweep;
    config.validate()?;

    let store = super::open_store(&config).await?;
    let api = Arc::new(HttpContentApi::from_config(&config.api)?);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight ranges");
            on_interrupt.cancel();
        }
    });

    println!(
        "{} {} content types from {}",
        "Extracting".cyan().bold(),
        config.extraction.content_types.len(),
        config.api.base_url
    );

    let progress = ProgressTracker::new(Arc::new(BarReporter::new()));
    let outcome = ExtractionOrchestrator::new(store.clone(), api, config)
        .with_progress(progress)
        .with_cancellation(cancel)
        .run()
        .await;

    if let Err(e) = store.optimize().await {
        warn!(error = %e, "Could not optimize the vault");
    }
    store.close().await;
    let summary = outcome?;
    info!(session_id = %summary.session_id, "Extraction command finished");
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &ExtractionSummary) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Type",
            "Items",
            "Dead letters",
            "Failed ranges",
            "Soft deleted",
            "State",
        ]);

    for t in &summary.types {
        let state = if t.completed { "complete" } else { "partial" };
        table.add_row(vec![
            t.content_type.to_string(),
            t.items.to_string(),
            t.dead_letters.to_string(),
            t.failed_ranges.to_string(),
            t.soft_deleted.to_string(),
            state.to_string(),
        ]);
    }

    println!();
    println!("{}", table);
    println!(
        "Session {} {}: {} items, {} dead letters",
        summary.session_id.green(),
        summary.status,
        summary.total_items(),
        summary.total_dead_letters()
    );
    if summary.types.iter().any(|t| !t.completed) {
        println!("Run 'cvault extract --resume' to continue unfinished content types.");
    }
}
