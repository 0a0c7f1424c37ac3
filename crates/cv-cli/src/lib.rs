//! ContentVault CLI Library
//!
//! Command-line interface for extracting platform content into a local
//! vault and restoring it to another instance.
//!
//! # Overview
//!
//! - **Extraction**: Capture content with parallel workers (`cvault extract`)
//! - **Restoration**: Replay content with identifier remapping (`cvault restore`)
//! - **Audit**: Inspect sessions, checkpoints and dead letters
//! - **Integrity**: Compute and verify export-tree checksums (`cvault checksum`)

pub mod commands;
pub mod error;
pub mod progress;

// Re-export commonly used types
pub use error::{CliError, Result};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ContentVault - resumable content extraction and restoration
#[derive(Parser, Debug)]
#[command(name = "cvault")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Engine configuration file (TOML)
    #[arg(long, env = "CV_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Vault database path (overrides configuration)
    #[arg(long, global = true)]
    pub database: Option<PathBuf>,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Extract content from the source platform into the vault
    Extract {
        /// Content types to extract, comma separated (defaults to all)
        #[arg(short, long)]
        types: Option<String>,

        /// Concurrent workers per content type
        #[arg(short, long)]
        workers: Option<usize>,

        /// Continue the latest unfinished checkpoint of each type
        #[arg(long)]
        resume: bool,

        /// Keep items the source no longer reports
        #[arg(long)]
        no_sweep: bool,

        /// Source API base URL (overrides configuration)
        #[arg(long)]
        base_url: Option<String>,
    },

    /// Replay vault content against a target instance
    Restore {
        /// Target API base URL
        #[arg(long, env = "CV_TARGET_URL")]
        target_url: String,

        /// Target API token
        #[arg(long, env = "CV_TARGET_TOKEN", hide_env_values = true)]
        target_token: Option<String>,

        /// Source instance label the identifier mappings are kept under
        #[arg(long)]
        instance: Option<String>,

        /// Content types to restore, comma separated (defaults to all)
        #[arg(short, long)]
        types: Option<String>,

        /// Resolve dependencies and report without calling the target
        #[arg(long)]
        dry_run: bool,
    },

    /// List recent extraction sessions
    Sessions {
        /// Maximum sessions to show
        #[arg(short, long, default_value_t = 20)]
        limit: i64,
    },

    /// Show the checkpoints of one session
    Checkpoints {
        /// Session identifier
        session_id: String,
    },

    /// Inspect and manage dead-letter entries
    DeadLetter {
        #[command(subcommand)]
        command: DeadLetterCommand,
    },

    /// Per-type item counts and sizes
    Stats,

    /// Export-tree checksums
    Checksum {
        #[command(subcommand)]
        command: ChecksumCommand,
    },
}

/// Dead-letter subcommands
#[derive(Subcommand, Debug)]
pub enum DeadLetterCommand {
    /// List dead-letter entries
    List {
        /// Only this content type
        #[arg(short, long)]
        r#type: Option<String>,

        /// Only entries recorded by this session
        #[arg(long)]
        session: Option<String>,

        /// Include resolved entries
        #[arg(long)]
        all: bool,

        /// Maximum entries to show
        #[arg(short, long, default_value_t = 50)]
        limit: i64,
    },

    /// Mark an entry as manually reprocessed
    Resolve {
        /// Entry identifier
        id: i64,
    },

    /// Delete every resolved entry
    Purge,
}

/// Checksum subcommands
#[derive(Subcommand, Debug)]
pub enum ChecksumCommand {
    /// Compute the digest of an export tree
    Compute {
        /// Export directory
        dir: PathBuf,

        /// Write the digest to the tree's sidecar file
        #[arg(long)]
        write: bool,
    },

    /// Verify an export tree against a digest
    Verify {
        /// Export directory
        dir: PathBuf,

        /// Expected digest (defaults to the sidecar file)
        #[arg(long)]
        expected: Option<String>,
    },
}
