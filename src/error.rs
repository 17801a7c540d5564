//! Error types for the lumi-dl library.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during download operations.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP transport error (connection, DNS, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("HTTP status {status} for {url}")]
    Status {
        /// Status code returned by the server.
        status: u16,
        /// URL that was requested.
        url: String,
    },

    /// The server did not send response headers in time.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The response body ended before the advertised length was reached.
    #[error("incomplete transfer: received {received} of {expected} bytes")]
    Incomplete {
        /// Bytes on disk after the attempt.
        received: u64,
        /// Bytes the server advertised.
        expected: u64,
    },

    /// The downloaded file does not hash to the expected digest.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Expected SHA-256 hex digest.
        expected: String,
        /// Computed SHA-256 hex digest.
        actual: String,
    },

    /// Every attempt ended in a retryable failure.
    #[error("download did not succeed after {attempts} attempts: {reason}")]
    AttemptsExhausted {
        /// Attempts made.
        attempts: u32,
        /// Why the last attempt was rejected.
        reason: String,
    },

    /// The transfer was cancelled through its handle.
    #[error("download cancelled")]
    Cancelled,

    /// The background worker task could not be joined.
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Configuration file could not be read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// GitHub release lookup failed.
    #[error("release lookup failed: {0}")]
    Release(String),
}

impl Error {
    /// Returns true for failures raised while establishing or reading the
    /// HTTP response. These abort a transfer instead of being retried.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. } | Self::Timeout(_))
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Config(e.to_string())
    }
}

/// A specialized `Result` type for lumi-dl operations.
pub type Result<T> = std::result::Result<T, Error>;
