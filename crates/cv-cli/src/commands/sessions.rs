//! `cvault sessions` and `cvault checkpoints` command implementations

use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use cv_engine::EngineConfig;

use super::truncate;
use crate::error::{CliError, Result};

/// List recent sessions, newest first
pub async fn list(config: EngineConfig, limit: i64) -> Result<()> {
    let store = super::open_store(&config).await?;
    let sessions = store.sessions().list(limit).await?;
    store.close().await;

    if sessions.is_empty() {
        println!("No extraction sessions found.");
        println!("Run 'cvault extract' to start one.");
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Session", "Started", "Status", "Items", "Errors", "Message"]);

    for session in &sessions {
        table.add_row(vec![
            session.id.clone(),
            session.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            session.status.to_string(),
            session.total_items.to_string(),
            session.error_count.to_string(),
            session
                .error_message
                .as_deref()
                .map(|m| truncate(m, 40))
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{}", table);
    Ok(())
}

/// Show the per-type checkpoints recorded for a session
pub async fn checkpoints(config: EngineConfig, session_id: String) -> Result<()> {
    let store = super::open_store(&config).await?;
    let session = store.sessions().get(&session_id).await?;
    let checkpoints = store.checkpoints().list_for_session(&session_id).await?;
    store.close().await;

    let Some(session) = session else {
        return Err(CliError::not_found(format!("session {session_id}")));
    };

    println!("{} {} ({})", "Session".cyan().bold(), session.id, session.status);

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec!["Type", "Items", "Next offset", "Ranges", "State", "Error"]);

    for checkpoint in &checkpoints {
        let (next_offset, ranges) = match checkpoint.data() {
            Ok(data) => (data.next_offset.to_string(), data.ranges_completed.to_string()),
            Err(_) => ("?".to_string(), "?".to_string()),
        };
        let state = if checkpoint.is_completed() {
            "completed".green().to_string()
        } else {
            "open".yellow().to_string()
        };
        table.add_row(vec![
            checkpoint.content_type.to_string(),
            checkpoint.item_count.to_string(),
            next_offset,
            ranges,
            state,
            checkpoint
                .error_message
                .as_deref()
                .map(|m| truncate(m, 40))
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }

    println!("{}", table);
    Ok(())
}
