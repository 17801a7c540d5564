//! Events emitted by a transfer worker and the channel that carries them.

use std::path::PathBuf;

use tokio::sync::mpsc;

/// An event produced by a running transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferEvent {
    /// Periodic progress while bytes are flowing.
    Progress {
        /// Completed share of the file, 0 to 100.
        percentage: u8,
        /// Recent throughput, e.g. "1.46 KB/s".
        speed: String,
    },
    /// The file is complete (and verified when a digest was supplied).
    Finished {
        /// Destination path of the downloaded file.
        path: PathBuf,
    },
    /// The transfer failed; no further events follow.
    Error {
        /// Human-readable, never empty.
        message: String,
    },
}

impl TransferEvent {
    /// Returns true for `Finished` and `Error`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished { .. } | Self::Error { .. })
    }
}

/// Creates the unbounded FIFO channel a worker reports through.
#[must_use]
pub fn channel() -> (EventSink, mpsc::UnboundedReceiver<TransferEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSink::new(tx), rx)
}

/// Sending half of the event channel.
///
/// Drops every event offered after the first terminal one, so a run can
/// never report twice.
#[derive(Debug)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<TransferEvent>,
    closed: bool,
}

impl EventSink {
    /// Wraps an existing sender.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<TransferEvent>) -> Self {
        Self { tx, closed: false }
    }

    /// Sends a progress event.
    pub fn progress(&mut self, percentage: u8, speed: String) {
        self.send(TransferEvent::Progress { percentage, speed });
    }

    /// Sends the success event.
    pub fn finished(&mut self, path: PathBuf) {
        self.send(TransferEvent::Finished { path });
    }

    /// Sends the failure event. Empty messages are replaced with a generic one.
    pub fn error(&mut self, message: impl Into<String>) {
        let mut message = message.into();
        if message.trim().is_empty() {
            message = "Unknown download error".to_string();
        }
        self.send(TransferEvent::Error { message });
    }

    /// Returns true once a terminal event has been sent.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    fn send(&mut self, event: TransferEvent) {
        if self.closed {
            log::debug!("Dropping event after terminal: {event:?}");
            return;
        }
        self.closed = event.is_terminal();
        // A dropped receiver means nobody is listening; the worker still finishes its run.
        let _ = self.tx.send(event);
    }
}
