use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;

use crate::scan::ScanRow;

/// Notifications published by a [`crate::Library`].
#[derive(Debug, Clone)]
pub enum LibraryEvent {
    /// The album tree was rebuilt (also emitted when unbound).
    TreeUpdated,
    /// A recoverable problem, e.g. an unreadable album directory.
    Error { message: String },
    ScanProgress {
        root: PathBuf,
        processed: usize,
        total: usize,
    },
    /// A chunk of rows from the active scan; forwarded even when the live
    /// buffer is already full.
    ScanChunkReady {
        root: PathBuf,
        rows: Arc<[ScanRow]>,
    },
    ScanFinished {
        root: PathBuf,
        success: bool,
    },
    /// Some files in a batch could not be read.
    ScanBatchFailed { root: PathBuf, count: usize },
}

/// Fan-out channel for [`LibraryEvent`]s.
///
/// Each subscriber owns its own receiver, so a slow or dropped consumer never
/// blocks the publisher or other consumers. Dropping the receiver ends the
/// subscription.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LibraryEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: LibraryEvent) {
        // No subscribers is not an error.
        if self.tx.send(event).is_err() {
            trace!("event dropped; no subscribers");
        }
    }

    pub(crate) fn error(&self, message: impl Into<String>) {
        self.emit(LibraryEvent::Error {
            message: message.into(),
        });
    }
}
