//! The transfer worker: resumable, retrying, checksum-verified downloads.

use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::time::Instant;

use futures::{FutureExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::checksum;
use crate::config::DownloadConfig;
use crate::error::{Error, Result};
use crate::event::{self, EventSink, TransferEvent};
use crate::format::{format_bytes, format_duration, format_speed};
use crate::fs::{FileSystem, TokioFileSystem, WriteMode};
use crate::http::{BodyStream, Fetcher, ReqwestFetcher, ResponseKind};
use crate::stats::{SpeedWindow, TransferState, TransferStats};

/// Attempt budget used when a request does not specify one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// What to download and where to put it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// URL of the file.
    pub source_url: String,
    /// Where the file is written.
    pub destination_path: PathBuf,
    /// Expected SHA-256 hex digest; enables verification.
    pub expected_digest: Option<String>,
    /// Release the file belongs to; enables the check of a pre-existing file.
    pub version_tag: Option<String>,
    /// Maximum number of attempts, at least 1.
    pub max_attempts: u32,
}

impl TransferRequest {
    /// Creates a request with no digest, no tag and the default attempt budget.
    pub fn new(source_url: impl Into<String>, destination_path: impl Into<PathBuf>) -> Self {
        Self {
            source_url: source_url.into(),
            destination_path: destination_path.into(),
            expected_digest: None,
            version_tag: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the expected SHA-256 digest.
    #[must_use]
    pub fn with_expected_digest(mut self, digest: impl Into<String>) -> Self {
        self.expected_digest = Some(digest.into().to_ascii_lowercase());
        self
    }

    /// Sets the version tag.
    #[must_use]
    pub fn with_version_tag(mut self, tag: impl Into<String>) -> Self {
        self.version_tag = Some(tag.into());
        self
    }

    /// Sets the attempt budget. Zero is raised to one.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

/// Result of a single attempt that did not hit a hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
enum AttemptOutcome {
    /// File complete and, if requested, verified.
    Complete,
    /// Body ended before the advertised size.
    Incomplete { received: u64, expected: u64 },
    /// File complete but its digest is wrong.
    DigestMismatch { expected: String, actual: String },
}

/// Turns a run failure into the message carried by the `Error` event.
#[must_use]
pub fn failure_message(err: &Error) -> String {
    match err {
        e if e.is_transport() => format!("Download failed: {e}"),
        Error::Cancelled => "Download cancelled".to_string(),
        Error::AttemptsExhausted { attempts, reason } => {
            format!("Download failed after {attempts} attempts: {reason}")
        }
        e => format!("Unexpected error: {e}"),
    }
}

/// Downloads one URL to one file on a background task.
///
/// The worker does nothing until [`start`](Self::start) (or [`run`](Self::run))
/// is called. Every outcome, including failures, is reported through the
/// event channel, ending with exactly one `Finished` or `Error` event.
pub struct TransferWorker<H: Fetcher = ReqwestFetcher, F: FileSystem = TokioFileSystem> {
    request: TransferRequest,
    config: DownloadConfig,
    fetcher: H,
    fs: F,
    events: EventSink,
    cancel: CancellationToken,
}

impl TransferWorker<ReqwestFetcher, TokioFileSystem> {
    /// Creates a worker using `reqwest` and `tokio::fs`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(request: TransferRequest, config: DownloadConfig, events: EventSink) -> Result<Self> {
        let fetcher = ReqwestFetcher::new(&config)?;
        Ok(Self::with_parts(
            request,
            config,
            fetcher,
            TokioFileSystem,
            events,
        ))
    }
}

impl<H: Fetcher + 'static, F: FileSystem + 'static> TransferWorker<H, F> {
    /// Spawns the worker on the current Tokio runtime.
    ///
    /// Returns immediately; progress and the result arrive on the event channel.
    #[must_use]
    pub fn start(self) -> TransferHandle {
        let cancel = self.cancel.clone();
        let task = tokio::spawn(self.run());
        TransferHandle { cancel, task }
    }
}

impl<H: Fetcher, F: FileSystem> TransferWorker<H, F> {
    /// Creates a worker with custom HTTP and file system implementations.
    pub fn with_parts(
        request: TransferRequest,
        config: DownloadConfig,
        fetcher: H,
        fs: F,
        events: EventSink,
    ) -> Self {
        Self {
            request,
            config,
            fetcher,
            fs,
            events,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops the transfer between chunks when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the transfer to completion on the calling task.
    ///
    /// Never fails: the outcome is the terminal event on the channel.
    #[allow(clippy::cast_precision_loss)]
    pub async fn run(mut self) {
        let outcome = AssertUnwindSafe(self.execute()).catch_unwind().await;
        let destination = self.request.destination_path.clone();

        match outcome {
            Ok(Ok(stats)) => {
                log::info!(
                    "Downloaded {} ({}) in {} over {} attempt(s), {} avg",
                    destination.display(),
                    format_bytes(stats.size),
                    format_duration(stats.elapsed),
                    stats.attempts,
                    format_speed(stats.average_speed() as f64),
                );
                self.events.finished(destination);
            }
            Ok(Err(e)) => {
                log::error!("Download of {} failed: {e}", self.request.source_url);
                self.events.error(failure_message(&e));
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "worker panicked".to_string());
                log::error!("Download worker panicked: {detail}");
                self.events.error(format!("Unexpected error: {detail}"));
            }
        }
    }

    async fn execute(&mut self) -> Result<TransferStats> {
        let started = Instant::now();
        let destination = self.request.destination_path.clone();

        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        self.ensure_parent_dir(&destination).await?;
        self.preflight(&destination).await?;

        let max_attempts = self.request.max_attempts.max(1);
        let mut state = TransferState::new();
        let mut received = 0u64;
        let mut last_failure = String::new();

        for attempt in 1..=max_attempts {
            if attempt > 1 {
                self.backoff().await?;
            }
            state.attempt = attempt;

            match self.attempt(&mut state, &mut received).await? {
                AttemptOutcome::Complete => {
                    return Ok(TransferStats {
                        size: state.bytes_downloaded,
                        received,
                        elapsed: started.elapsed(),
                        attempts: attempt,
                    });
                }
                AttemptOutcome::Incomplete {
                    received: got,
                    expected,
                } => {
                    let err = Error::Incomplete {
                        received: got,
                        expected,
                    };
                    log::warn!("Attempt {attempt}/{max_attempts}: {err}, will resume");
                    last_failure = err.to_string();
                }
                AttemptOutcome::DigestMismatch { expected, actual } => {
                    let err = Error::ChecksumMismatch { expected, actual };
                    log::warn!("Attempt {attempt}/{max_attempts}: {err}, discarding file");
                    self.fs.remove_file(&destination).await?;
                    state.reset();
                    last_failure = err.to_string();
                }
            }
        }

        Err(Error::AttemptsExhausted {
            attempts: max_attempts,
            reason: last_failure,
        })
    }

    /// Ensures the parent directory exists for the destination.
    async fn ensure_parent_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            self.fs.create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Removes a pre-existing file that does not match the tagged release.
    async fn preflight(&self, path: &Path) -> Result<()> {
        let Some(tag) = self.request.version_tag.as_deref() else {
            return Ok(());
        };
        if !self.fs.file_exists(path).await {
            return Ok(());
        }
        let Some(expected) = self.request.expected_digest.as_deref() else {
            log::debug!("No digest for {tag}; keeping existing {}", path.display());
            return Ok(());
        };

        let (matches, actual) = checksum::verify_file(path, expected).await?;
        if matches {
            log::info!("Existing {} already matches {tag}", path.display());
        } else {
            log::info!(
                "Existing {} (sha256 {actual}) does not match {tag}, removing",
                path.display()
            );
            self.fs.remove_file(path).await?;
        }
        Ok(())
    }

    async fn backoff(&self) -> Result<()> {
        tokio::select! {
            () = tokio::time::sleep(self.config.retry_delay()) => Ok(()),
            () = self.cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    async fn attempt(&mut self, state: &mut TransferState, received: &mut u64) -> Result<AttemptOutcome> {
        let destination = self.request.destination_path.clone();
        let offset = self.fs.file_size(&destination).await.unwrap_or(0);
        state.bytes_downloaded = offset;

        log::info!(
            "Attempt {}/{}: GET {} from byte {offset}",
            state.attempt,
            self.request.max_attempts.max(1),
            self.request.source_url
        );

        let response = tokio::select! {
            response = self.fetcher.fetch(&self.request.source_url, offset) => response?,
            () = self.cancel.cancelled() => return Err(Error::Cancelled),
        };
        log::debug!("Response: {response:?}");

        let mode = match response.kind {
            ResponseKind::Unsatisfiable => {
                log::info!("Server has nothing past byte {offset}, checking local file");
                state.learn_total(offset);
                return self.finish_attempt(state).await;
            }
            ResponseKind::Partial => {
                if let Some(len) = response.content_length {
                    state.learn_total(offset + len);
                }
                WriteMode::Append
            }
            ResponseKind::Full => {
                if offset > 0 {
                    log::warn!("Server ignored range request, restarting from byte 0");
                    state.bytes_downloaded = 0;
                }
                if let Some(len) = response.content_length {
                    state.learn_total(len);
                }
                WriteMode::Truncate
            }
        };

        let file = self.fs.open_file(&destination, mode).await?;
        *received += self.stream_body(response.body, file, state).await?;

        self.finish_attempt(state).await
    }

    /// Writes the body to `file` in fixed-size chunks, reporting progress.
    ///
    /// Returns the number of bytes written.
    #[allow(clippy::cast_possible_truncation)]
    async fn stream_body(
        &mut self,
        mut body: BodyStream,
        mut file: tokio::fs::File,
        state: &mut TransferState,
    ) -> Result<u64> {
        let chunk_size = self.config.chunk_size.max(1);
        let mut window = SpeedWindow::new(self.config.progress_interval());
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                next = body.next() => next,
                () = self.cancel.cancelled() => {
                    if let Err(e) = file.flush().await {
                        log::warn!("Flushing partial file on cancel failed: {e}");
                    }
                    return Err(Error::Cancelled);
                }
            };
            let Some(bytes) = next else { break };
            let bytes = bytes?;

            for chunk in bytes.chunks(chunk_size) {
                file.write_all(chunk).await?;
                let n = chunk.len() as u64;
                state.bytes_downloaded += n;
                written += n;

                if let Some(rate) = window.record(n)
                    && let Some(percentage) = state.percentage()
                {
                    self.events.progress(percentage, format_speed(rate));
                }
            }
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    async fn finish_attempt(&self, state: &TransferState) -> Result<AttemptOutcome> {
        if state.is_short()
            && let Some(expected) = state.total_bytes
        {
            return Ok(AttemptOutcome::Incomplete {
                received: state.bytes_downloaded,
                expected,
            });
        }

        if let Some(expected) = self.request.expected_digest.as_deref() {
            let (matches, actual) =
                checksum::verify_file(&self.request.destination_path, expected).await?;
            if !matches {
                return Ok(AttemptOutcome::DigestMismatch {
                    expected: expected.to_string(),
                    actual,
                });
            }
            log::debug!("Checksum verified: {actual}");
        }

        Ok(AttemptOutcome::Complete)
    }
}

/// Handle to a worker started with [`TransferWorker::start`].
#[derive(Debug)]
pub struct TransferHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl TransferHandle {
    /// Asks the worker to stop. It reports `Error { "Download cancelled" }` and exits.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Returns true once the worker task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the worker task to exit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Join`] if the task was aborted.
    pub async fn join(self) -> Result<()> {
        self.task.await?;
        Ok(())
    }
}

/// Builds a default worker for `request`, starts it, and returns the handle and event receiver.
///
/// # Errors
///
/// Returns an error if the HTTP client cannot be built. Nothing is spawned in that case.
pub fn start_transfer(
    request: TransferRequest,
    config: DownloadConfig,
) -> Result<(TransferHandle, mpsc::UnboundedReceiver<TransferEvent>)> {
    let (sink, rx) = event::channel();
    let worker = TransferWorker::new(request, config, sink)?;
    Ok((worker.start(), rx))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use bytes::Bytes;
    use futures::stream;
    use sha2::{Digest, Sha256};
    use tempfile::TempDir;

    use crate::http::FetchResponse;

    type Journal = Arc<Mutex<Vec<String>>>;

    fn sha256_hex(data: &[u8]) -> String {
        hex::encode(Sha256::digest(data))
    }

    /// A scripted reply for one request.
    enum Reply {
        Body {
            kind: ResponseKind,
            content_length: Option<u64>,
            chunks: Vec<Result<Bytes>>,
            hang: bool,
        },
        Fail(Error),
    }

    impl Reply {
        fn full(data: &[u8]) -> Self {
            Self::Body {
                kind: ResponseKind::Full,
                content_length: Some(data.len() as u64),
                chunks: vec![Ok(Bytes::copy_from_slice(data))],
                hang: false,
            }
        }

        fn partial(data: &[u8], content_length: u64) -> Self {
            Self::Body {
                kind: ResponseKind::Partial,
                content_length: Some(content_length),
                chunks: vec![Ok(Bytes::copy_from_slice(data))],
                hang: false,
            }
        }

        fn short(kind: ResponseKind, data: &[u8], content_length: u64) -> Self {
            Self::Body {
                kind,
                content_length: Some(content_length),
                chunks: vec![Ok(Bytes::copy_from_slice(data))],
                hang: false,
            }
        }
    }

    /// A fetcher that replays scripted replies and records requested offsets.
    struct ScriptedFetcher {
        replies: Mutex<VecDeque<Reply>>,
        offsets: Arc<Mutex<Vec<u64>>>,
        journal: Journal,
    }

    impl ScriptedFetcher {
        fn new(replies: Vec<Reply>, journal: &Journal) -> (Self, Arc<Mutex<Vec<u64>>>) {
            let offsets = Arc::new(Mutex::new(Vec::new()));
            let fetcher = Self {
                replies: Mutex::new(replies.into()),
                offsets: Arc::clone(&offsets),
                journal: Arc::clone(journal),
            };
            (fetcher, offsets)
        }
    }

    #[async_trait::async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, _url: &str, offset: u64) -> Result<FetchResponse> {
            self.offsets.lock().unwrap().push(offset);
            self.journal.lock().unwrap().push(format!("fetch@{offset}"));
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("more requests than scripted replies");
            match reply {
                Reply::Fail(e) => Err(e),
                Reply::Body {
                    kind,
                    content_length,
                    chunks,
                    hang,
                } => {
                    let body = if hang {
                        stream::iter(chunks).chain(stream::pending()).boxed()
                    } else {
                        stream::iter(chunks).boxed()
                    };
                    Ok(FetchResponse {
                        kind,
                        content_length,
                        body,
                    })
                }
            }
        }
    }

    /// Real file system that journals deletions.
    struct JournalFs {
        journal: Journal,
    }

    #[async_trait::async_trait]
    impl FileSystem for JournalFs {
        async fn file_exists(&self, path: &Path) -> bool {
            TokioFileSystem.file_exists(path).await
        }

        async fn file_size(&self, path: &Path) -> Option<u64> {
            TokioFileSystem.file_size(path).await
        }

        async fn create_dir_all(&self, path: &Path) -> std::io::Result<()> {
            TokioFileSystem.create_dir_all(path).await
        }

        async fn open_file(&self, path: &Path, mode: WriteMode) -> std::io::Result<tokio::fs::File> {
            TokioFileSystem.open_file(path, mode).await
        }

        async fn remove_file(&self, path: &Path) -> std::io::Result<()> {
            self.journal.lock().unwrap().push("remove".to_string());
            TokioFileSystem.remove_file(path).await
        }
    }

    struct Harness {
        _dir: TempDir,
        dest: PathBuf,
        journal: Journal,
    }

    impl Harness {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let dest = dir.path().join("server").join("core.jar");
            Self {
                _dir: dir,
                dest,
                journal: Arc::new(Mutex::new(Vec::new())),
            }
        }

        fn seed(&self, data: &[u8]) {
            std::fs::create_dir_all(self.dest.parent().unwrap()).unwrap();
            std::fs::write(&self.dest, data).unwrap();
        }

        fn request(&self) -> TransferRequest {
            TransferRequest::new("http://mirror.test/core.jar", &self.dest)
        }

        fn journal(&self) -> Vec<String> {
            self.journal.lock().unwrap().clone()
        }

        async fn run(
            &self,
            request: TransferRequest,
            config: DownloadConfig,
            replies: Vec<Reply>,
        ) -> (Vec<TransferEvent>, Vec<u64>) {
            let (fetcher, offsets) = ScriptedFetcher::new(replies, &self.journal);
            let fs = JournalFs {
                journal: Arc::clone(&self.journal),
            };
            let (sink, mut rx) = event::channel();
            TransferWorker::with_parts(request, config, fetcher, fs, sink)
                .run()
                .await;

            let mut events = Vec::new();
            while let Ok(event) = rx.try_recv() {
                events.push(event);
            }
            let offsets = offsets.lock().unwrap().clone();
            (events, offsets)
        }
    }

    fn fast_config() -> DownloadConfig {
        DownloadConfig::default().with_retry_delay(Duration::ZERO)
    }

    fn assert_single_terminal_last(events: &[TransferEvent]) {
        let terminals = events.iter().filter(|e| e.is_terminal()).count();
        assert_eq!(terminals, 1, "events: {events:?}");
        assert!(events.last().unwrap().is_terminal());
    }

    fn error_message(events: &[TransferEvent]) -> String {
        match events.last() {
            Some(TransferEvent::Error { message }) => message.clone(),
            other => panic!("expected error event, got {other:?}"),
        }
    }

    #[test]
    fn request_defaults_and_builders() {
        let request = TransferRequest::new("http://a/b", "b")
            .with_expected_digest("ABCDEF")
            .with_version_tag("v1.2")
            .with_max_attempts(0);
        assert_eq!(request.expected_digest.as_deref(), Some("abcdef"));
        assert_eq!(request.version_tag.as_deref(), Some("v1.2"));
        assert_eq!(request.max_attempts, 1);
        assert_eq!(
            TransferRequest::new("u", "p").max_attempts,
            DEFAULT_MAX_ATTEMPTS
        );
    }

    #[test]
    fn failure_messages() {
        let transport = Error::Status {
            status: 404,
            url: "http://x".into(),
        };
        assert!(failure_message(&transport).starts_with("Download failed: "));
        assert_eq!(failure_message(&Error::Cancelled), "Download cancelled");
        let exhausted = Error::AttemptsExhausted {
            attempts: 4,
            reason: "r".into(),
        };
        assert_eq!(failure_message(&exhausted), "Download failed after 4 attempts: r");
        let io = Error::Io(std::io::Error::other("disk full"));
        assert!(failure_message(&io).starts_with("Unexpected error: "));
    }

    #[tokio::test]
    async fn plain_download_finishes_once() {
        let h = Harness::new();
        let data = vec![42u8; 1000];
        let (events, offsets) = h
            .run(h.request(), fast_config(), vec![Reply::full(&data)])
            .await;

        assert_eq!(
            events,
            vec![TransferEvent::Finished {
                path: h.dest.clone()
            }]
        );
        assert_eq!(offsets, vec![0]);
        assert_eq!(std::fs::read(&h.dest).unwrap(), data);
    }

    #[tokio::test]
    async fn preflight_removes_mismatching_file_before_request() {
        let h = Harness::new();
        h.seed(&[1u8; 500]);
        let data = b"fresh release contents".to_vec();
        let request = h
            .request()
            .with_version_tag("v2.0.0")
            .with_expected_digest(sha256_hex(&data));

        let (events, offsets) = h
            .run(request, fast_config(), vec![Reply::full(&data)])
            .await;

        assert_eq!(h.journal(), vec!["remove".to_string(), "fetch@0".to_string()]);
        assert_eq!(offsets, vec![0]);
        assert!(matches!(events.last(), Some(TransferEvent::Finished { .. })));
        assert_eq!(std::fs::read(&h.dest).unwrap(), data);
    }

    #[tokio::test]
    async fn preflight_needs_a_version_tag() {
        let h = Harness::new();
        let data = b"0123456789".to_vec();
        h.seed(&data[..4]);
        let request = h.request().with_expected_digest(sha256_hex(&data));

        let (events, offsets) = h
            .run(request, fast_config(), vec![Reply::partial(&data[4..], 6)])
            .await;

        // Without a tag the partial file is resumed, not checked.
        assert_eq!(offsets, vec![4]);
        assert!(!h.journal().contains(&"remove".to_string()));
        assert!(matches!(events.last(), Some(TransferEvent::Finished { .. })));
        assert_eq!(std::fs::read(&h.dest).unwrap(), data);
    }

    #[tokio::test]
    async fn resumes_from_existing_partial_file() {
        let h = Harness::new();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        h.seed(&data[..400]);

        let (events, offsets) = h
            .run(
                h.request(),
                fast_config(),
                vec![Reply::partial(&data[400..], 600)],
            )
            .await;

        assert_eq!(offsets, vec![400]);
        assert_single_terminal_last(&events);
        assert!(matches!(events.last(), Some(TransferEvent::Finished { .. })));
        assert_eq!(std::fs::read(&h.dest).unwrap(), data);
    }

    #[tokio::test]
    async fn incomplete_transfers_use_every_attempt() {
        let h = Harness::new();
        let request = h.request().with_max_attempts(3);
        let replies = vec![
            Reply::short(ResponseKind::Full, &[1u8; 40], 100),
            Reply::short(ResponseKind::Partial, &[2u8; 10], 60),
            Reply::short(ResponseKind::Partial, &[3u8; 10], 50),
        ];

        let (events, offsets) = h.run(request, fast_config(), replies).await;

        assert_eq!(offsets, vec![0, 40, 50]);
        assert_single_terminal_last(&events);
        let message = error_message(&events);
        assert!(message.contains("3 attempts"), "{message}");
        // The partial file is kept for a later resume.
        assert_eq!(std::fs::metadata(&h.dest).unwrap().len(), 60);
    }

    #[tokio::test]
    async fn incomplete_then_resumed_to_completion() {
        let h = Harness::new();
        let data: Vec<u8> = (0..300u32).map(|i| (i % 7) as u8).collect();
        let request = h.request().with_expected_digest(sha256_hex(&data));
        let replies = vec![
            Reply::short(ResponseKind::Full, &data[..120], 300),
            Reply::partial(&data[120..], 180),
        ];

        let (events, offsets) = h.run(request, fast_config(), replies).await;

        assert_eq!(offsets, vec![0, 120]);
        assert!(matches!(events.last(), Some(TransferEvent::Finished { .. })));
        assert_eq!(std::fs::read(&h.dest).unwrap(), data);
    }

    #[tokio::test]
    async fn digest_mismatch_discards_and_restarts() {
        let h = Harness::new();
        let good = b"right bytes".to_vec();
        let request = h.request().with_expected_digest(sha256_hex(&good));
        let replies = vec![Reply::full(b"wrong bytes"), Reply::full(&good)];

        let (events, offsets) = h.run(request, fast_config(), replies).await;

        assert_eq!(offsets, vec![0, 0]);
        assert_eq!(
            h.journal(),
            vec![
                "fetch@0".to_string(),
                "remove".to_string(),
                "fetch@0".to_string()
            ]
        );
        assert!(matches!(events.last(), Some(TransferEvent::Finished { .. })));
        assert_eq!(std::fs::read(&h.dest).unwrap(), good);
    }

    #[tokio::test]
    async fn digest_compare_ignores_case() {
        let h = Harness::new();
        let data = b"case test".to_vec();
        let mut request = h.request();
        request.expected_digest = Some(sha256_hex(&data).to_uppercase());

        let (events, _) = h.run(request, fast_config(), vec![Reply::full(&data)]).await;
        assert!(matches!(events.last(), Some(TransferEvent::Finished { .. })));
    }

    #[tokio::test]
    async fn persistent_digest_mismatch_exhausts_attempts() {
        let h = Harness::new();
        let request = h
            .request()
            .with_expected_digest(sha256_hex(b"never served"))
            .with_max_attempts(2);
        let replies = vec![Reply::full(b"bad one"), Reply::full(b"bad two")];

        let (events, offsets) = h.run(request, fast_config(), replies).await;

        assert_eq!(offsets, vec![0, 0]);
        let message = error_message(&events);
        assert!(message.contains("2 attempts"), "{message}");
        assert!(message.contains("checksum mismatch"), "{message}");
    }

    #[tokio::test]
    async fn transport_error_aborts_without_retry() {
        let h = Harness::new();
        let replies = vec![Reply::Fail(Error::Status {
            status: 404,
            url: "http://mirror.test/core.jar".into(),
        })];

        let (events, offsets) = h.run(h.request(), fast_config(), replies).await;

        assert_eq!(offsets, vec![0]);
        assert_eq!(events.len(), 1);
        let message = error_message(&events);
        assert!(message.starts_with("Download failed: "), "{message}");
        assert!(message.contains("404"), "{message}");
    }

    #[tokio::test]
    async fn body_error_aborts_without_retry() {
        let h = Harness::new();
        let replies = vec![Reply::Body {
            kind: ResponseKind::Full,
            content_length: Some(100),
            chunks: vec![
                Ok(Bytes::from_static(&[0u8; 10])),
                Err(Error::Timeout(Duration::from_secs(30))),
            ],
            hang: false,
        }];

        let (events, offsets) = h.run(h.request(), fast_config(), replies).await;

        assert_eq!(offsets, vec![0]);
        assert!(error_message(&events).starts_with("Download failed: "));
    }

    #[tokio::test]
    async fn progress_is_reported_in_order() {
        let h = Harness::new();
        let data = vec![9u8; 100];
        let config = fast_config()
            .with_chunk_size(10)
            .with_progress_interval(Duration::ZERO);

        let (events, _) = h.run(h.request(), config, vec![Reply::full(&data)]).await;

        assert_single_terminal_last(&events);
        let percentages: Vec<u8> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::Progress { percentage, speed } => {
                    assert!(speed.ends_with("B/s"));
                    Some(*percentage)
                }
                _ => None,
            })
            .collect();
        assert_eq!(percentages, vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]);
    }

    #[tokio::test]
    async fn no_progress_without_known_total() {
        let h = Harness::new();
        let config = fast_config()
            .with_chunk_size(10)
            .with_progress_interval(Duration::ZERO);
        let replies = vec![Reply::Body {
            kind: ResponseKind::Full,
            content_length: None,
            chunks: vec![Ok(Bytes::from_static(&[5u8; 50]))],
            hang: false,
        }];

        let (events, _) = h.run(h.request(), config, replies).await;
        assert_eq!(
            events,
            vec![TransferEvent::Finished {
                path: h.dest.clone()
            }]
        );
    }

    #[tokio::test]
    async fn ignored_range_restarts_from_zero() {
        let h = Harness::new();
        h.seed(b"garbage");
        let data = b"the whole object".to_vec();

        let (events, offsets) = h
            .run(h.request(), fast_config(), vec![Reply::full(&data)])
            .await;

        assert_eq!(offsets, vec![7]);
        assert!(matches!(events.last(), Some(TransferEvent::Finished { .. })));
        assert_eq!(std::fs::read(&h.dest).unwrap(), data);
    }

    #[tokio::test]
    async fn unsatisfiable_range_verifies_existing_file() {
        let h = Harness::new();
        let data = b"already complete".to_vec();
        h.seed(&data);
        let request = h.request().with_expected_digest(sha256_hex(&data));
        let replies = vec![Reply::Body {
            kind: ResponseKind::Unsatisfiable,
            content_length: None,
            chunks: vec![],
            hang: false,
        }];

        let (events, offsets) = h.run(request, fast_config(), replies).await;

        assert_eq!(offsets, vec![data.len() as u64]);
        assert!(matches!(events.last(), Some(TransferEvent::Finished { .. })));
        assert_eq!(std::fs::read(&h.dest).unwrap(), data);
    }

    #[tokio::test]
    async fn cancel_stops_a_stalled_transfer() {
        let h = Harness::new();
        let (fetcher, _) = ScriptedFetcher::new(
            vec![Reply::Body {
                kind: ResponseKind::Full,
                content_length: Some(1_000_000),
                chunks: vec![Ok(Bytes::from_static(&[1u8; 16]))],
                hang: true,
            }],
            &h.journal,
        );
        let fs = JournalFs {
            journal: Arc::clone(&h.journal),
        };
        let (sink, mut rx) = event::channel();
        let handle =
            TransferWorker::with_parts(h.request(), fast_config(), fetcher, fs, sink).start();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        handle.cancel();
        handle.join().await.unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            TransferEvent::Error {
                message: "Download cancelled".into()
            }
        );
        assert!(rx.recv().await.is_none());
        // The partial file stays as the resume basis.
        assert_eq!(std::fs::metadata(&h.dest).unwrap().len(), 16);
    }

    #[tokio::test]
    async fn cancelled_before_start_reports_once() {
        let h = Harness::new();
        let (fetcher, offsets) = ScriptedFetcher::new(vec![], &h.journal);
        let fs = JournalFs {
            journal: Arc::clone(&h.journal),
        };
        let (sink, mut rx) = event::channel();
        let worker = TransferWorker::with_parts(h.request(), fast_config(), fetcher, fs, sink);
        worker.cancellation_token().cancel();
        worker.start().join().await.unwrap();

        assert!(matches!(rx.recv().await, Some(TransferEvent::Error { .. })));
        assert!(rx.recv().await.is_none());
        assert!(offsets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn panics_become_error_events() {
        let h = Harness::new();
        // No scripted replies: the fetcher panics on the first request.
        let (events, _) = h.run(h.request(), fast_config(), vec![]).await;
        let message = error_message(&events);
        assert!(message.starts_with("Unexpected error: "), "{message}");
    }
}
