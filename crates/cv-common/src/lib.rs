//! ContentVault Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared types, utilities, and error handling for the ContentVault workspace.
//!
//! # Overview
//!
//! - **Types**: The closed `ContentType` and `SessionStatus` enumerations
//! - **Codec**: MessagePack encoding of captured payloads
//! - **Checksums**: Single-file and export-tree integrity digests
//! - **Logging**: Centralized `tracing` subscriber setup
//!
//! # Example
//!
//! ```no_run
//! use cv_common::{codec, ContentType, Result};
//!
//! fn capture(record: &serde_json::Value) -> Result<Vec<u8>> {
//!     let bytes = codec::serialize(record)?;
//!     assert!(codec::validate(&bytes));
//!     println!("{} payload: {} bytes", ContentType::Dashboard, bytes.len());
//!     Ok(bytes)
//! }
//! ```

pub mod checksum;
pub mod codec;
pub mod error;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use error::{CvError, Result};
pub use types::{ContentType, SessionStatus};
