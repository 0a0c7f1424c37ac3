//! `cvault stats` command implementation

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use cv_engine::EngineConfig;

use crate::error::Result;
use crate::progress::format_bytes;

/// Show per-type item counts and payload sizes
pub async fn run(config: EngineConfig) -> Result<()> {
    let store = super::open_store(&config).await?;
    let stats = store.content().stats().await?;
    let open_dead_letters = store.dead_letters().count(None, false).await?;
    let schema_version = store.schema_version().await?;
    store.close().await;

    if stats.is_empty() {
        println!("The vault is empty.");
        println!("Run 'cvault extract' to capture content.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Type", "Active", "Deleted", "Size", "Last sync"]);

    for row in &stats {
        table.add_row(vec![
            row.content_type.to_string(),
            row.active.to_string(),
            row.deleted.to_string(),
            format_bytes(row.total_bytes.max(0) as u64),
            row.last_synced_at
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{}", table);
    println!("{}", "Summary:".cyan().bold());
    println!("  Vault:          {}", config.database.path.display());
    println!("  Schema version: {}", schema_version);
    println!("  Open dead letters: {}", open_dead_letters);
    Ok(())
}
