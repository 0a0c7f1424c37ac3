//! `cvault checksum` command implementations

use colored::Colorize;
use cv_common::checksum::{self, CHECKSUM_FILE_NAME};
use cv_common::CvError;
use std::path::Path;

use crate::error::{CliError, Result};

/// Print (and optionally record) the digest of an export tree
pub fn compute(dir: &Path, write: bool) -> Result<()> {
    let digest = if write {
        checksum::write_tree_checksum(dir)?
    } else {
        checksum::checksum_tree(dir)?
    };

    println!("{digest}");
    if write {
        println!("Wrote {}", dir.join(CHECKSUM_FILE_NAME).display());
    }
    Ok(())
}

/// Verify an export tree against a digest or its sidecar file
pub fn verify(dir: &Path, expected: Option<&str>) -> Result<()> {
    let outcome = match expected {
        Some(expected) => checksum::verify_tree_checksum(dir, expected),
        None => checksum::verify_tree_sidecar(dir),
    };

    match outcome {
        Ok(()) => {
            println!("{} {}", "OK".green().bold(), dir.display());
            Ok(())
        },
        Err(CvError::ChecksumMismatch { expected, actual }) => Err(CliError::ChecksumMismatch {
            dir: dir.display().to_string(),
            expected,
            actual,
        }),
        Err(e) => Err(e.into()),
    }
}
