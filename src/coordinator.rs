//! Owns the single active background scan and its live buffer.
//!
//! `(active worker, scan root, buffer)` sit behind one mutex. Every critical
//! section is short and the lock is always released before events go out,
//! so a slow subscriber never stalls the scanning thread.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::anyhow;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{LiveScanBuffer, rebase_rows};
use crate::config::ScanSettings;
use crate::error::Result;
use crate::events::{EventBus, LibraryEvent};
use crate::paths::{PathRelation, canonical, relation};
use crate::scan::{ScanJob, ScanReporter, ScanRow, ScanWorker};

/// Identity of the running scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScan {
    pub id: u64,
    pub root: PathBuf,
}

/// What `start_scanning` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started(ActiveScan),
    /// The running scan already overlaps the requested root; nothing changed.
    AlreadyCovered {
        active: ActiveScan,
        relation: PathRelation,
    },
}

#[derive(Debug)]
struct WorkerHandle {
    id: u64,
    root: PathBuf,
    cancel: CancellationToken,
}

impl WorkerHandle {
    fn describe(&self) -> ActiveScan {
        ActiveScan {
            id: self.id,
            root: self.root.clone(),
        }
    }
}

#[derive(Debug)]
struct ScanState {
    active: Option<WorkerHandle>,
    buffer: LiveScanBuffer,
}

struct Shared {
    state: Mutex<ScanState>,
    events: EventBus,
}

pub struct ScanCoordinator {
    shared: Arc<Shared>,
    worker: Arc<dyn ScanWorker>,
    runtime: Handle,
    chunk_size: usize,
    next_id: AtomicU64,
}

impl ScanCoordinator {
    pub fn new(
        worker: Arc<dyn ScanWorker>,
        events: EventBus,
        runtime: Handle,
        settings: &ScanSettings,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(ScanState {
                    active: None,
                    buffer: LiveScanBuffer::with_capacity(settings.max_live_buffer),
                }),
                events,
            }),
            worker,
            runtime,
            chunk_size: settings.chunk_size,
            next_id: AtomicU64::new(1),
        }
    }

    /// Start scanning `root` unless the running scan already overlaps it.
    ///
    /// A disjoint request cancels the running worker (without waiting for it)
    /// and clears the live buffer before the new worker is spawned.
    pub fn start_scanning(
        &self,
        root: &Path,
        include: &[String],
        exclude: &[String],
    ) -> Result<StartOutcome> {
        let root = std::fs::canonicalize(root)?;

        let mut state = self.shared.state.lock();
        if let Some(active) = &state.active {
            let rel = relation(&root, &active.root);
            if rel.overlaps() {
                debug!(
                    requested = %root.display(),
                    active = %active.root.display(),
                    relation = ?rel,
                    "scan request covered by active scan"
                );
                return Ok(StartOutcome::AlreadyCovered {
                    active: active.describe(),
                    relation: rel,
                });
            }
            info!(
                previous = %active.root.display(),
                next = %root.display(),
                "cancelling scan for disjoint root"
            );
            active.cancel.cancel();
        }

        let handle = WorkerHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            root: root.clone(),
            cancel: CancellationToken::new(),
        };
        let started = handle.describe();
        state.buffer.reset(root.clone());

        let job = ScanJob {
            root,
            include: include.to_vec(),
            exclude: exclude.to_vec(),
            chunk_size: self.chunk_size,
        };
        let sink = WorkerSink {
            shared: Arc::clone(&self.shared),
            id: handle.id,
            root: job.root.clone(),
            cancel: handle.cancel.clone(),
        };
        state.active = Some(handle);

        let worker = Arc::clone(&self.worker);
        // The blocking pool runs the walk; nothing here awaits it.
        self.runtime.spawn_blocking(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| worker.run(&job, &sink)))
                .unwrap_or_else(|_| Err(anyhow!("scan worker panicked")));
            sink.complete(outcome);
        });
        drop(state);

        info!(id = started.id, root = %started.root.display(), "scan started");
        Ok(StartOutcome::Started(started))
    }

    /// Cancel the running worker, if any. The buffer stays readable.
    pub fn stop_scanning(&self) -> Option<ActiveScan> {
        let stopped = self.shared.state.lock().active.take();
        stopped.map(|handle| {
            handle.cancel.cancel();
            info!(id = handle.id, root = %handle.root.display(), "scan stopped");
            handle.describe()
        })
    }

    pub fn active_scan(&self) -> Option<ActiveScan> {
        self.shared
            .state
            .lock()
            .active
            .as_ref()
            .map(WorkerHandle::describe)
    }

    /// True when `path` is the active scan root or inside it. Unresolvable
    /// paths are never being scanned.
    pub fn is_scanning_path(&self, path: &Path) -> bool {
        let Some(path) = canonical(path) else {
            return false;
        };
        self.shared
            .state
            .lock()
            .active
            .as_ref()
            .is_some_and(|active| path.starts_with(&active.root))
    }

    /// Buffered rows re-based onto `relative_to`. Unresolvable or unrelated
    /// roots yield nothing.
    pub fn get_live_scan_results(&self, relative_to: &Path) -> Vec<ScanRow> {
        let Some(view) = canonical(relative_to) else {
            return Vec::new();
        };
        let snapshot = self.shared.state.lock().buffer.snapshot_for(&view);
        match snapshot {
            Some((root, rows)) => rebase_rows(&root, &view, &rows),
            None => Vec::new(),
        }
    }

    pub fn buffered_len(&self) -> usize {
        self.shared.state.lock().buffer.len()
    }
}

impl Drop for ScanCoordinator {
    fn drop(&mut self) {
        if let Some(active) = self.shared.state.lock().active.take() {
            active.cancel.cancel();
        }
    }
}

/// Reporter handed to one worker run.
struct WorkerSink {
    shared: Arc<Shared>,
    id: u64,
    root: PathBuf,
    cancel: CancellationToken,
}

impl WorkerSink {
    fn complete(&self, outcome: anyhow::Result<()>) {
        {
            let mut state = self.shared.state.lock();
            if state.active.as_ref().is_some_and(|a| a.id == self.id) {
                state.active = None;
            }
        }

        let events = &self.shared.events;
        match outcome {
            Ok(()) => {
                let success = !self.cancel.is_cancelled();
                info!(id = self.id, root = %self.root.display(), success, "scan finished");
                events.emit(LibraryEvent::ScanFinished {
                    root: self.root.clone(),
                    success,
                });
            }
            Err(err) => {
                error!(id = self.id, root = %self.root.display(), error = %err, "scan failed");
                events.error(format!("scan of {} failed: {err:#}", self.root.display()));
                events.emit(LibraryEvent::ScanFinished {
                    root: self.root.clone(),
                    success: false,
                });
            }
        }
    }
}

impl ScanReporter for WorkerSink {
    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn progress(&self, processed: usize, total: usize) {
        self.shared.events.emit(LibraryEvent::ScanProgress {
            root: self.root.clone(),
            processed,
            total,
        });
    }

    fn chunk(&self, rows: Vec<ScanRow>) {
        let rows: Arc<[ScanRow]> = rows.into();
        let absorbed = {
            let mut state = self.shared.state.lock();
            let superseded = state.active.as_ref().is_some_and(|a| a.id != self.id);
            if superseded || state.buffer.root() != Some(self.root.as_path()) {
                None
            } else {
                Some(state.buffer.absorb(&rows))
            }
        };

        match absorbed {
            Some(absorbed) if absorbed.newly_full => warn!(
                root = %self.root.display(),
                dropped = absorbed.dropped,
                "live scan buffer full; relying on the row store for the rest"
            ),
            Some(_) => {}
            None => debug!(id = self.id, rows = rows.len(), "chunk from superseded scan not buffered"),
        }

        self.shared.events.emit(LibraryEvent::ScanChunkReady {
            root: self.root.clone(),
            rows,
        });
    }

    fn batch_failed(&self, count: usize) {
        warn!(root = %self.root.display(), count, "scan batch had unreadable files");
        self.shared.events.emit(LibraryEvent::ScanBatchFailed {
            root: self.root.clone(),
            count,
        });
    }
}
