//! `cvault dead-letter` command implementations

use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use cv_common::ContentType;
use cv_engine::store::DeadLetterFilter;
use cv_engine::EngineConfig;
use std::str::FromStr;

use super::truncate;
use crate::error::{CliError, Result};

/// List dead-letter entries, oldest first
pub async fn list(
    config: EngineConfig,
    content_type: Option<String>,
    session: Option<String>,
    all: bool,
    limit: i64,
) -> Result<()> {
    let content_type = content_type
        .as_deref()
        .map(ContentType::from_str)
        .transpose()?;
    let filter = DeadLetterFilter {
        content_type,
        session_id: session,
        include_resolved: all,
        limit: Some(limit),
    };

    let store = super::open_store(&config).await?;
    let entries = store.dead_letters().list(&filter).await?;
    store.close().await;

    if entries.is_empty() {
        println!("No dead-letter entries.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["ID", "Type", "Item / Range", "Error", "Message", "Failed", "Resolved"]);

    for entry in &entries {
        let target = match (&entry.source_id, entry.range_offset, entry.range_limit) {
            (Some(id), _, _) => id.clone(),
            (None, Some(offset), Some(limit)) => format!("[{offset}, {})", offset + limit),
            _ => "-".to_string(),
        };
        table.add_row(vec![
            entry.id.to_string(),
            entry.content_type.to_string(),
            target,
            entry.error_type.clone(),
            truncate(&entry.error_message, 40),
            entry.failed_at.format("%Y-%m-%d %H:%M").to_string(),
            entry
                .resolved_at
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{}", table);
    Ok(())
}

/// Mark one entry as manually reprocessed
pub async fn resolve(config: EngineConfig, id: i64) -> Result<()> {
    let store = super::open_store(&config).await?;
    let resolved = store.dead_letters().mark_resolved(id).await?;
    store.close().await;

    if !resolved {
        return Err(CliError::not_found(format!("unresolved dead-letter entry {id}")));
    }
    println!("Marked entry {id} resolved.");
    Ok(())
}

/// Delete every resolved entry
pub async fn purge(config: EngineConfig) -> Result<()> {
    let store = super::open_store(&config).await?;
    let removed = store.dead_letters().purge_resolved().await?;
    store.close().await;

    println!("Purged {removed} resolved entries.");
    Ok(())
}
