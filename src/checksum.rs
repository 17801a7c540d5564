//! SHA-256 verification of downloaded files.

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::error::Result;

const READ_CHUNK: usize = 8 * 1024;

/// Computes the lowercase hex SHA-256 digest of a file, reading it in 8 KiB chunks.
///
/// # Errors
///
/// Returns an error if the file cannot be opened or read.
pub async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; READ_CHUNK];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Compares two hex digests, ignoring case and surrounding whitespace.
#[must_use]
pub fn digests_match(expected: &str, actual: &str) -> bool {
    expected.trim().eq_ignore_ascii_case(actual.trim())
}

/// Hashes `path` and reports whether it matches `expected`.
///
/// Returns the computed digest alongside the verdict so callers can log it.
///
/// # Errors
///
/// Returns an error if the file cannot be read.
pub async fn verify_file(path: &Path, expected: &str) -> Result<(bool, String)> {
    let actual = sha256_file(path).await?;
    Ok((digests_match(expected, &actual), actual))
}
