//! Directory-change notifications with reentrant suspension and a debounced
//! tree refresh.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher, recommended_watcher};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;

/// Watches individual directories (non-recursively) for changes.
pub trait DirectoryWatcher: Send {
    fn watch(&mut self, path: &Path) -> Result<()>;
    fn unwatch(&mut self, path: &Path) -> Result<()>;
}

/// [`DirectoryWatcher`] backed by the platform's native notifications.
pub struct NotifyDirectoryWatcher {
    inner: RecommendedWatcher,
}

impl NotifyDirectoryWatcher {
    /// Raw notify events are forwarded to `tx`; see [`spawn_event_loop`].
    pub fn new(tx: UnboundedSender<notify::Result<Event>>) -> Result<Self> {
        let inner = recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        Ok(Self { inner })
    }

    /// Watcher plus the receiving end of its event channel.
    pub fn with_channel() -> Result<(Self, UnboundedReceiver<notify::Result<Event>>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok((Self::new(tx)?, rx))
    }
}

impl DirectoryWatcher for NotifyDirectoryWatcher {
    fn watch(&mut self, path: &Path) -> Result<()> {
        self.inner.watch(path, RecursiveMode::NonRecursive)?;
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> Result<()> {
        self.inner.unwatch(path)?;
        Ok(())
    }
}

/// Paths added and removed by one [`WatchController::rebuild_watches`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WatchDelta {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

struct WatchState {
    suspend_depth: usize,
    pending: Option<JoinHandle<()>>,
    /// Bumped whenever the pending timer is replaced or cancelled.
    generation: u64,
    watched: BTreeSet<PathBuf>,
    backend: Option<Box<dyn DirectoryWatcher>>,
    /// Paths written by the library itself, with the instant until which
    /// notifications about them (or anything below them) are dropped.
    own_writes: Vec<(PathBuf, Instant)>,
}

impl WatchState {
    /// True when every path lies under an unexpired own write.
    fn is_own_write(&mut self, paths: &[PathBuf]) -> bool {
        let now = Instant::now();
        self.own_writes.retain(|(_, until)| *until > now);
        !paths.is_empty()
            && paths
                .iter()
                .all(|p| self.own_writes.iter().any(|(own, _)| p.starts_with(own)))
    }

    fn cancel_pending(&mut self) -> bool {
        self.generation = self.generation.wrapping_add(1);
        match self.pending.take() {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }
}

/// Shortest time own-write notifications are ignored after the write.
const MIN_OWN_WRITE_GRACE: Duration = Duration::from_secs(1);

pub type RefreshFn = Box<dyn Fn() + Send + Sync>;

pub struct WatchController {
    state: Mutex<WatchState>,
    debounce: Duration,
    runtime: Handle,
    on_refresh: RefreshFn,
}

impl WatchController {
    pub fn new(
        debounce: Duration,
        runtime: Handle,
        backend: Option<Box<dyn DirectoryWatcher>>,
        on_refresh: RefreshFn,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(WatchState {
                suspend_depth: 0,
                pending: None,
                generation: 0,
                watched: BTreeSet::new(),
                backend,
                own_writes: Vec::new(),
            }),
            debounce,
            runtime,
            on_refresh,
        })
    }

    /// Suppress change handling until the matching [`resume`](Self::resume).
    /// Returns the new depth.
    pub fn pause(&self) -> usize {
        let mut state = self.state.lock();
        state.suspend_depth += 1;
        if state.suspend_depth == 1 && state.cancel_pending() {
            debug!("watcher paused; pending refresh cancelled");
        }
        state.suspend_depth
    }

    /// Undo one [`pause`](Self::pause). Extra calls are ignored.
    pub fn resume(&self) -> usize {
        let mut state = self.state.lock();
        if state.suspend_depth == 0 {
            debug!("resume without matching pause ignored");
            return 0;
        }
        state.suspend_depth -= 1;
        state.suspend_depth
    }

    /// Pause until the returned guard is dropped.
    pub fn suspend(&self) -> WatchSuspension<'_> {
        self.suspend_writes(Vec::new())
    }

    /// Pause while the caller writes `paths`. Notifications about them that
    /// arrive after the guard drops are still ignored for a grace period,
    /// since native backends deliver events after the write returns.
    pub fn suspend_writes(&self, paths: Vec<PathBuf>) -> WatchSuspension<'_> {
        self.pause();
        WatchSuspension {
            controller: self,
            writes: paths,
        }
    }

    fn grace(&self) -> Duration {
        self.debounce.max(MIN_OWN_WRITE_GRACE)
    }

    fn note_own_writes(&self, paths: Vec<PathBuf>) {
        if paths.is_empty() {
            return;
        }
        let until = Instant::now() + self.grace();
        let mut state = self.state.lock();
        state
            .own_writes
            .extend(paths.into_iter().map(|path| (path, until)));
    }

    pub fn suspend_depth(&self) -> usize {
        self.state.lock().suspend_depth
    }

    pub fn is_suspended(&self) -> bool {
        self.suspend_depth() > 0
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.state.lock().pending.is_some()
    }

    /// Handle one change notification: (re)start the debounce timer unless
    /// suspended. Returns whether a refresh is now scheduled.
    pub fn on_directory_changed(self: &Arc<Self>) -> bool {
        let mut state = self.state.lock();
        if state.suspend_depth > 0 {
            trace!(depth = state.suspend_depth, "change ignored while suspended");
            return false;
        }
        state.cancel_pending();
        let generation = state.generation;
        let delay = self.debounce;
        let weak = Arc::downgrade(self);
        state.pending = Some(self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(controller) = weak.upgrade() {
                controller.fire(generation);
            }
        }));
        true
    }

    /// Handle a notification naming `paths`. Changes caused by the library's
    /// own writes are dropped; anything else goes through
    /// [`on_directory_changed`](Self::on_directory_changed).
    pub fn on_paths_changed(self: &Arc<Self>, paths: &[PathBuf]) -> bool {
        let own = self.state.lock().is_own_write(paths);
        if own {
            trace!(?paths, "own write ignored");
            return false;
        }
        self.on_directory_changed()
    }

    fn fire(&self, generation: u64) {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.suspend_depth > 0 {
                return;
            }
            state.pending = None;
        }
        debug!("debounce elapsed; refreshing album tree");
        (self.on_refresh)();
    }

    /// Bring the watched set in line with `desired`, touching only the
    /// paths that changed.
    pub fn rebuild_watches(&self, desired: BTreeSet<PathBuf>) -> WatchDelta {
        let mut state = self.state.lock();
        let WatchState {
            watched, backend, ..
        } = &mut *state;
        let Some(backend) = backend.as_mut() else {
            return WatchDelta::default();
        };

        let mut delta = WatchDelta::default();
        let stale: Vec<PathBuf> = watched.difference(&desired).cloned().collect();
        for path in stale {
            if let Err(err) = backend.unwatch(&path) {
                debug!(path = %path.display(), error = %err, "unwatch failed; dropping anyway");
            }
            watched.remove(&path);
            delta.removed.push(path);
        }
        for path in desired.difference(watched).cloned().collect::<Vec<_>>() {
            match backend.watch(&path) {
                Ok(()) => {
                    watched.insert(path.clone());
                    delta.added.push(path);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "failed to watch directory"),
            }
        }
        if !delta.added.is_empty() || !delta.removed.is_empty() {
            debug!(
                added = delta.added.len(),
                removed = delta.removed.len(),
                watched = watched.len(),
                "directory watches updated"
            );
        }
        delta
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.state.lock().watched.iter().cloned().collect()
    }

    /// Cancel any pending refresh and drop every watch.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock();
            state.cancel_pending();
            state.own_writes.clear();
        }
        let removed = self.rebuild_watches(BTreeSet::new()).removed;
        if !removed.is_empty() {
            info!(count = removed.len(), "directory watches released");
        }
    }
}

/// Keeps the watcher paused while alive.
#[must_use = "the watcher resumes as soon as the guard is dropped"]
pub struct WatchSuspension<'a> {
    controller: &'a WatchController,
    writes: Vec<PathBuf>,
}

impl Drop for WatchSuspension<'_> {
    fn drop(&mut self) {
        // Record before resuming so a late event cannot slip in between.
        self.controller
            .note_own_writes(std::mem::take(&mut self.writes));
        self.controller.resume();
    }
}

/// Bridge raw notify events into the controller until `cancel` fires.
pub fn spawn_event_loop(
    runtime: &Handle,
    controller: Weak<WatchController>,
    mut rx: UnboundedReceiver<notify::Result<Event>>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    runtime.spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("cancel received; exiting watch loop");
                    break;
                }
                maybe = rx.recv() => match maybe {
                    Some(Ok(event)) => {
                        if matches!(event.kind, EventKind::Access(_)) {
                            continue;
                        }
                        trace!(kind = ?event.kind, paths = ?event.paths, "notify event");
                        let Some(controller) = controller.upgrade() else {
                            break;
                        };
                        controller.on_paths_changed(&event.paths);
                    }
                    Some(Err(err)) => error!("watch error: {err}"),
                    None => break,
                }
            }
        }
    })
}
