//! Checksum utilities for export verification
//!
//! Uses SHA-256. A tree digest folds each file's relative path, a NUL byte,
//! then its raw bytes, visiting files in ascending path order, so it changes
//! when any file is modified, added, removed or renamed.

use crate::error::{CvError, Result};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Sidecar file written next to an export tree. Excluded from the tree digest.
pub const CHECKSUM_FILE_NAME: &str = ".checksum";

/// Compute SHA-256 checksum of bytes
pub fn compute_checksum(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Compute SHA-256 checksum of a single file
pub fn checksum_file(path: impl AsRef<Path>) -> Result<String> {
    let mut file = std::fs::File::open(path.as_ref())?;
    let mut hasher = Sha256::new();
    feed(&mut hasher, &mut file)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Compute the digest of every regular file below `root`
pub fn checksum_tree(root: impl AsRef<Path>) -> Result<String> {
    let root = root.as_ref();
    let mut hasher = Sha256::new();

    for (relative, absolute) in sorted_files(root)? {
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        let mut file = std::fs::File::open(&absolute)?;
        feed(&mut hasher, &mut file)?;
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compute the tree digest and write it to the sidecar file inside `root`
pub fn write_tree_checksum(root: impl AsRef<Path>) -> Result<String> {
    let root = root.as_ref();
    let digest = checksum_tree(root)?;
    std::fs::write(root.join(CHECKSUM_FILE_NAME), &digest)?;
    tracing::debug!(root = %root.display(), checksum = %digest, "Wrote export checksum");
    Ok(digest)
}

/// Recompute the tree digest and compare it against `expected`, ignoring case
pub fn verify_tree_checksum(root: impl AsRef<Path>, expected: &str) -> Result<()> {
    let actual = checksum_tree(root)?;
    if actual.eq_ignore_ascii_case(expected.trim()) {
        Ok(())
    } else {
        Err(CvError::ChecksumMismatch {
            expected: expected.trim().to_string(),
            actual,
        })
    }
}

/// Verify a tree against the digest stored in its sidecar file
pub fn verify_tree_sidecar(root: impl AsRef<Path>) -> Result<()> {
    let root = root.as_ref();
    let expected = std::fs::read_to_string(root.join(CHECKSUM_FILE_NAME))?;
    verify_tree_checksum(root, &expected)
}

fn feed<R: Read>(hasher: &mut Sha256, reader: &mut R) -> Result<()> {
    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(())
}

/// Relative path strings use `/` separators regardless of platform
fn sorted_files(root: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();

    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Ok(relative) = entry.path().strip_prefix(root) else {
            continue;
        };
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        if relative == CHECKSUM_FILE_NAME {
            continue;
        }
        files.push((relative, entry.path().to_path_buf()));
    }

    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}
