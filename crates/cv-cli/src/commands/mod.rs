//! CLI command implementations
//!
//! Each subcommand has its own module with a `run` function.

pub mod checksum;
pub mod dead_letter;
pub mod extract;
pub mod restore;
pub mod sessions;
pub mod stats;

use cv_engine::{EngineConfig, Store};
use std::path::Path;

use crate::error::Result;

/// Load engine configuration and apply global CLI overrides
pub fn load_config(config: Option<&Path>, database: Option<&Path>) -> Result<EngineConfig> {
    let mut engine_config = EngineConfig::load(config)?;
    if let Some(path) = database {
        engine_config.database.path = path.to_path_buf();
    }
    Ok(engine_config)
}

/// Open the vault described by the configuration
pub async fn open_store(config: &EngineConfig) -> Result<Store> {
    Ok(Store::open(&config.database).await?)
}

/// Shorten long identifiers and messages for table cells
pub fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let kept: String = value.chars().take(max.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}
