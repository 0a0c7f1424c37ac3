//! `cvault restore` command implementation

use colored::Colorize;
use cv_engine::config::parse_content_types;
use cv_engine::{EngineConfig, HttpContentApi, RestorationEngine, RestoreOptions};
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Replay vault content against a target instance
pub async fn run(
    config: EngineConfig,
    target_url: String,
    target_token: Option<String>,
    instance: Option<String>,
    types: Option<String>,
    dry_run: bool,
) -> Result<()> {
    let content_types = match types {
        Some(types) => parse_content_types(&types)?,
        None => cv_common::ContentType::ALL.to_vec(),
    };
    let options = RestoreOptions {
        dry_run,
        content_types,
        source_instance: instance.unwrap_or_else(|| config.api.source_instance.clone()),
    };

    let store = super::open_store(&config).await?;
    let api = Arc::new(HttpContentApi::new(
        target_url.clone(),
        target_token,
        Duration::from_secs(config.api.timeout_secs),
    )?);

    let mode = if dry_run { " (dry run)" } else { "" };
    println!("{} to {}{}", "Restoring".cyan().bold(), target_url, mode);

    let outcome = RestorationEngine::new(store.clone(), api, options)
        .with_retry(config.retry.network_policy())
        .run()
        .await;
    store.close().await;
    let summary = outcome?;

    println!();
    println!("  Created:    {}", summary.created);
    println!("  Updated:    {}", summary.updated);
    println!("  Deferred:   {} (resolved)", summary.deferred_resolved);
    println!("  Failed:     {}", summary.failed);
    println!("  Unresolved: {}", summary.unresolved.len());

    for item in &summary.unresolved {
        let missing: Vec<String> = item
            .missing
            .iter()
            .map(|m| format!("{} -> {} {}", m.field, m.target, m.source_id))
            .collect();
        println!(
            "  {} {} {} waits on {}",
            "!".yellow(),
            item.content_type,
            item.source_id,
            missing.join(", ")
        );
    }
    if summary.failed > 0 {
        println!("Run 'cvault dead-letter list' to inspect failed items.");
    }
    Ok(())
}
