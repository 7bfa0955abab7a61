//! The library façade: bound root, album tree, scanning and watching.

use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::album::{ALBUM_LEVEL, AlbumNode, AlbumTree, SUBALBUM_LEVEL};
use crate::config::{Configuration, ScanSettings};
use crate::coordinator::{ActiveScan, ScanCoordinator, StartOutcome};
use crate::error::{LibraryError, Result};
use crate::events::{EventBus, LibraryEvent};
use crate::manifest::{JsonManifestReader, ManifestReader};
use crate::paths::canonical;
use crate::scan::{ScanRow, ScanWorker, WalkdirScanWorker};
use crate::tree::{DELETED_DIR_NAME, build_tree, is_excluded};
use crate::watch::{
    DirectoryWatcher, NotifyDirectoryWatcher, WatchController, WatchSuspension, spawn_event_loop,
};

/// Pluggable parts of a [`Library`].
pub struct Collaborators {
    pub worker: Arc<dyn ScanWorker>,
    pub manifests: Arc<dyn ManifestReader>,
    /// Custom watch backend. `None` uses native notifications when
    /// `watch.enabled` is set.
    pub watcher: Option<Box<dyn DirectoryWatcher>>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            worker: Arc::new(WalkdirScanWorker::default()),
            manifests: Arc::new(JsonManifestReader),
            watcher: None,
        }
    }
}

pub struct Library {
    inner: Arc<Inner>,
}

struct Inner {
    scan_settings: ScanSettings,
    root: RwLock<Option<PathBuf>>,
    tree: RwLock<Arc<AlbumTree>>,
    deleted_dir: Mutex<Option<PathBuf>>,
    events: EventBus,
    scans: ScanCoordinator,
    watch: Arc<WatchController>,
    manifests: Arc<dyn ManifestReader>,
    watch_loop: CancellationToken,
    /// Serialises rebuilds so an older build never replaces a newer tree.
    rebuilding: Mutex<()>,
}

impl Library {
    pub fn new(config: &Configuration, runtime: Handle) -> Self {
        Self::with_collaborators(config, runtime, Collaborators::default())
    }

    pub fn with_collaborators(
        config: &Configuration,
        runtime: Handle,
        collaborators: Collaborators,
    ) -> Self {
        let Collaborators {
            worker,
            manifests,
            watcher,
        } = collaborators;

        let mut notify_rx = None;
        let backend = match watcher {
            Some(custom) => Some(custom),
            None if config.watch.enabled => match NotifyDirectoryWatcher::with_channel() {
                Ok((native, rx)) => {
                    notify_rx = Some(rx);
                    Some(Box::new(native) as Box<dyn DirectoryWatcher>)
                }
                Err(err) => {
                    warn!(error = %err, "directory watching unavailable; tree refreshes only on demand");
                    None
                }
            },
            None => None,
        };

        let events = EventBus::new(config.event_capacity);
        let inner = Arc::new_cyclic(|weak: &Weak<Inner>| {
            let weak = weak.clone();
            let watch = WatchController::new(
                config.watch.debounce,
                runtime.clone(),
                backend,
                Box::new(move || {
                    if let Some(inner) = weak.upgrade() {
                        inner.refresh();
                    }
                }),
            );
            Inner {
                scan_settings: config.scan.clone(),
                root: RwLock::new(None),
                tree: RwLock::new(Arc::new(AlbumTree::default())),
                deleted_dir: Mutex::new(None),
                events: events.clone(),
                scans: ScanCoordinator::new(worker, events, runtime.clone(), &config.scan),
                watch,
                manifests,
                watch_loop: CancellationToken::new(),
                rebuilding: Mutex::new(()),
            }
        });

        if let Some(rx) = notify_rx {
            spawn_event_loop(
                &runtime,
                Arc::downgrade(&inner.watch),
                rx,
                inner.watch_loop.clone(),
            );
        }
        Self { inner }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LibraryEvent> {
        self.inner.events.subscribe()
    }

    /// Bind `root` as the library root and rebuild the tree.
    ///
    /// # Errors
    /// [`LibraryError::LibraryUnavailable`] if `root` is not an accessible
    /// directory.
    pub fn bind(&self, root: &Path) -> Result<()> {
        let root = canonical(root)
            .filter(|p| p.is_dir())
            .ok_or(LibraryError::LibraryUnavailable)?;
        self.inner.scans.stop_scanning();
        *self.inner.root.write() = Some(root.clone());
        *self.inner.deleted_dir.lock() = None;
        info!(root = %root.display(), "library bound");
        self.inner.refresh();
        Ok(())
    }

    pub fn unbind(&self) {
        self.inner.scans.stop_scanning();
        *self.inner.root.write() = None;
        *self.inner.deleted_dir.lock() = None;
        info!("library unbound");
        self.inner.refresh();
    }

    pub fn root(&self) -> Option<PathBuf> {
        self.inner.root.read().clone()
    }

    /// Rebuild the whole album tree from disk.
    pub fn refresh(&self) {
        self.inner.refresh();
    }

    /// Current tree snapshot.
    pub fn tree(&self) -> Arc<AlbumTree> {
        Arc::clone(&self.inner.tree.read())
    }

    pub fn list_albums(&self) -> Vec<AlbumNode> {
        self.tree().albums().to_vec()
    }

    pub fn list_children(&self, album: &AlbumNode) -> Vec<AlbumNode> {
        self.tree().children(&album.path).to_vec()
    }

    pub fn node_for_path(&self, path: &Path) -> Option<AlbumNode> {
        let path = canonical(path)?;
        self.tree().node(&path).cloned()
    }

    pub fn create_album(&self, name: &str) -> Result<AlbumNode> {
        let root = self.inner.require_root()?;
        self.inner.create_dir(&root, name, ALBUM_LEVEL)
    }

    /// # Errors
    /// [`LibraryError::AlbumDepth`] unless `parent` is a top-level album.
    pub fn create_subalbum(&self, parent: &AlbumNode, name: &str) -> Result<AlbumNode> {
        self.inner.require_root()?;
        if parent.level != ALBUM_LEVEL {
            return Err(LibraryError::AlbumDepth {
                parent: parent.path.clone(),
                level: parent.level,
            });
        }
        self.inner.create_dir(&parent.path, name, SUBALBUM_LEVEL)
    }

    pub fn rename_album(&self, node: &AlbumNode, name: &str) -> Result<AlbumNode> {
        self.inner.require_root()?;
        self.inner.rename_dir(node, name)
    }

    /// The recently-deleted directory, created on first use.
    pub fn ensure_deleted_dir(&self) -> Result<PathBuf> {
        let root = self.inner.require_root()?;
        let mut cached = self.inner.deleted_dir.lock();
        if let Some(dir) = cached.as_ref()
            && dir.is_dir()
        {
            return Ok(dir.clone());
        }
        let dir = root.join(DELETED_DIR_NAME);
        {
            let _quiet = self.inner.watch.suspend_writes(vec![dir.clone()]);
            fs::create_dir_all(&dir).map_err(|err| LibraryError::operation(&dir, err))?;
        }
        debug!(dir = %dir.display(), "recently-deleted directory ready");
        *cached = Some(dir.clone());
        Ok(dir)
    }

    pub fn start_scanning(
        &self,
        root: &Path,
        include: &[String],
        exclude: &[String],
    ) -> Result<StartOutcome> {
        self.inner.require_root()?;
        self.inner.scans.start_scanning(root, include, exclude)
    }

    /// Scan the whole library with the configured patterns.
    pub fn scan_library(&self) -> Result<StartOutcome> {
        let root = self.inner.require_root()?;
        let ScanSettings {
            include, exclude, ..
        } = &self.inner.scan_settings;
        self.inner.scans.start_scanning(&root, include, exclude)
    }

    /// Scan one album with the configured patterns.
    pub fn scan_album(&self, album: &AlbumNode) -> Result<StartOutcome> {
        self.start_scanning(
            &album.path,
            &self.inner.scan_settings.include,
            &self.inner.scan_settings.exclude,
        )
    }

    pub fn stop_scanning(&self) -> Option<ActiveScan> {
        self.inner.scans.stop_scanning()
    }

    pub fn active_scan(&self) -> Option<ActiveScan> {
        self.inner.scans.active_scan()
    }

    pub fn is_scanning_path(&self, path: &Path) -> bool {
        self.inner.scans.is_scanning_path(path)
    }

    pub fn get_live_scan_results(&self, relative_to: &Path) -> Vec<ScanRow> {
        self.inner.scans.get_live_scan_results(relative_to)
    }

    pub fn pause_watcher(&self) -> usize {
        self.inner.watch.pause()
    }

    pub fn resume_watcher(&self) -> usize {
        self.inner.watch.resume()
    }

    /// Pause the watcher until the guard drops.
    pub fn suspend_watcher(&self) -> WatchSuspension<'_> {
        self.inner.watch.suspend()
    }

    pub fn is_watcher_suspended(&self) -> bool {
        self.inner.watch.is_suspended()
    }

    pub fn has_pending_refresh(&self) -> bool {
        self.inner.watch.has_pending_refresh()
    }

    /// Directories currently watched: the root and every top-level album.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.inner.watch.watched_paths()
    }

    /// Entry point for change notifications; schedules a debounced refresh.
    pub fn directory_changed(&self) -> bool {
        self.inner.watch.on_directory_changed()
    }

    /// Stop scanning and release every watch.
    pub fn shutdown(&self) {
        self.inner.scans.stop_scanning();
        self.inner.watch_loop.cancel();
        self.inner.watch.shutdown();
    }
}

impl Drop for Library {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Inner {
    fn require_root(&self) -> Result<PathBuf> {
        self.root
            .read()
            .clone()
            .ok_or(LibraryError::LibraryUnavailable)
    }

    fn refresh(&self) {
        {
            // Root is read under the lock too, so bind/unbind order holds.
            let _rebuilding = self.rebuilding.lock();
            let root = self.root.read().clone();
            let tree = match &root {
                Some(root) => build_tree(root, &*self.manifests, &mut |msg: String| {
                    self.events.error(msg)
                }),
                None => AlbumTree::default(),
            };
            let desired: BTreeSet<PathBuf> = root
                .iter()
                .cloned()
                .chain(tree.albums().iter().map(|album| album.path.clone()))
                .collect();
            *self.tree.write() = Arc::new(tree);
            self.watch.rebuild_watches(desired);
        }
        self.events.emit(LibraryEvent::TreeUpdated);
    }

    fn node_or_placeholder(&self, path: PathBuf, level: u8, name: &str) -> AlbumNode {
        let node = self.tree.read().node(&path).cloned();
        node.unwrap_or_else(|| AlbumNode::new(path, level, name.to_owned(), true))
    }

    fn create_dir(&self, parent: &Path, name: &str, level: u8) -> Result<AlbumNode> {
        let name = validate_name(name)?;
        let target = parent.join(name);
        if target.symlink_metadata().is_ok() {
            return Err(LibraryError::AlbumNameConflict { name: name.into() });
        }

        {
            let _quiet = self.watch.suspend_writes(vec![target.clone()]);
            fs::create_dir(&target).map_err(|err| match err.kind() {
                io::ErrorKind::AlreadyExists => LibraryError::AlbumNameConflict { name: name.into() },
                _ => LibraryError::operation(&target, err),
            })?;
            if let Err(err) = self.manifests.ensure_marker(&target) {
                if let Err(cleanup) = fs::remove_dir_all(&target) {
                    warn!(
                        album = %target.display(),
                        error = %cleanup,
                        "failed to remove album after marker error"
                    );
                }
                return Err(LibraryError::operation(&target, err));
            }
        }
        info!(album = %target.display(), level, "album created");

        self.refresh();
        Ok(self.node_or_placeholder(target, level, name))
    }

    fn rename_dir(&self, node: &AlbumNode, name: &str) -> Result<AlbumNode> {
        let name = validate_name(name)?;
        let parent = node.path.parent().ok_or_else(|| {
            LibraryError::operation(&node.path, io::Error::from(io::ErrorKind::InvalidInput))
        })?;
        let target = parent.join(name);
        if target == node.path {
            return Ok(node.clone());
        }
        if target.symlink_metadata().is_ok() {
            return Err(LibraryError::AlbumNameConflict { name: name.into() });
        }

        {
            let _quiet = self
                .watch
                .suspend_writes(vec![node.path.clone(), target.clone()]);
            fs::rename(&node.path, &target)
                .map_err(|err| LibraryError::operation(&node.path, err))?;
            if let Err(err) = self.manifests.ensure_marker(&target) {
                if let Err(undo) = fs::rename(&target, &node.path) {
                    warn!(
                        from = %target.display(),
                        to = %node.path.display(),
                        error = %undo,
                        "failed to undo album rename after marker error"
                    );
                }
                return Err(LibraryError::operation(&target, err));
            }
        }
        info!(from = %node.path.display(), to = %target.display(), "album renamed");

        self.refresh();
        Ok(self.node_or_placeholder(target, node.level, name))
    }
}

fn validate_name(name: &str) -> Result<&str> {
    let trimmed = name.trim();
    let invalid = trimmed.is_empty()
        || trimmed == "."
        || trimmed == ".."
        || trimmed.contains(['/', '\\', std::path::MAIN_SEPARATOR])
        || is_excluded(OsStr::new(trimmed));
    if invalid {
        return Err(LibraryError::InvalidAlbumName(name.to_owned()));
    }
    Ok(trimmed)
}
