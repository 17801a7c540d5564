//! lumi-dl - A resumable, checksum-verified downloader for server artifacts.
//!
//! A [`TransferWorker`] downloads one URL to one file on a background Tokio
//! task. It resumes partial files with HTTP range requests, retries short
//! bodies and checksum mismatches with a fixed backoff, and reports progress
//! and the final result as [`TransferEvent`]s on an unbounded channel.
//!
//! # Example
//!
//! ```no_run
//! use lumi_dl::{DownloadConfig, TransferEvent, TransferRequest, start_transfer};
//!
//! # async fn example() -> lumi_dl::Result<()> {
//! let request = TransferRequest::new("https://example.com/Lumi.jar", "server/core.jar")
//!     .with_expected_digest("2c26b46b68ffc68ff99b453c1d30413413422d706483bfa0f98a5e886266e7ae");
//!
//! let (handle, mut events) = start_transfer(request, DownloadConfig::default())?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         TransferEvent::Progress { percentage, speed } => println!("{percentage}% ({speed})"),
//!         TransferEvent::Finished { path } => println!("saved to {}", path.display()),
//!         TransferEvent::Error { message } => eprintln!("{message}"),
//!     }
//! }
//! handle.join().await?;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod checksum;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod event;
pub mod format;
pub mod fs;
pub mod http;
pub mod release;
pub mod stats;

// Re-export main types for convenience
pub use config::{AppConfig, DownloadConfig, PathConfig, ReleaseConfig};
pub use download::{
    DEFAULT_MAX_ATTEMPTS, TransferHandle, TransferRequest, TransferWorker, failure_message,
    start_transfer,
};
pub use error::{Error, Result};
pub use event::{EventSink, TransferEvent};
pub use format::{format_bytes, format_duration, format_speed};
pub use fs::{FileSystem, TokioFileSystem, WriteMode};
pub use http::{FetchResponse, Fetcher, ReqwestFetcher, ResponseKind};
pub use release::{Asset, Release, ReleaseClient, ReleaseInfo};
pub use stats::{TransferState, TransferStats};
