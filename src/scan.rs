//! Scan rows, the media classifier and the default directory scan worker.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use glob::Pattern;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::paths::relative_str;
use crate::tree::is_excluded;

/// Upper bound on rows held by the live scan buffer.
pub const MAX_LIVE_BUFFER_SIZE: usize = 5000;
pub const DEFAULT_CHUNK_SIZE: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MediaKind {
    Image,
    Video,
}

/// One discovered asset, relative to the root of the scan that found it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanRow {
    /// `/`-separated path relative to the scan root.
    pub rel: String,
    /// SHA-256 of `rel`, size and mtime; identical across runs and builds.
    pub id: String,
    pub media: MediaKind,
    pub bytes: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl ScanRow {
    pub fn new(
        rel: impl Into<String>,
        media: MediaKind,
        bytes: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        let rel = rel.into();
        let mut hasher = Sha256::new();
        hasher.update(rel.as_bytes());
        hasher.update([0]);
        hasher.update(bytes.to_le_bytes());
        hasher.update([0]);
        if let Some(t) = modified {
            hasher.update(t.timestamp_millis().to_le_bytes());
        }
        Self {
            id: format!("{:x}", hasher.finalize()),
            rel,
            media,
            bytes,
            modified,
        }
    }

    pub(crate) fn with_rel(&self, rel: String) -> Self {
        Self {
            rel,
            ..self.clone()
        }
    }
}

/// Decides which files count as library assets.
#[derive(Debug, Clone)]
pub struct MediaClassifier {
    image_exts: Vec<&'static str>,
    video_exts: Vec<&'static str>,
}

impl Default for MediaClassifier {
    fn default() -> Self {
        Self {
            image_exts: vec![
                "jpg", "jpeg", "png", "gif", "webp", "bmp", "tif", "tiff", "heic", "heif",
            ],
            video_exts: vec!["mov", "mp4", "m4v"],
        }
    }
}

impl MediaClassifier {
    #[must_use]
    pub fn classify(&self, path: &Path) -> Option<MediaKind> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        if self.image_exts.contains(&ext.as_str()) {
            Some(MediaKind::Image)
        } else if self.video_exts.contains(&ext.as_str()) {
            Some(MediaKind::Video)
        } else {
            None
        }
    }
}

/// Parameters for one scan run.
#[derive(Debug, Clone)]
pub struct ScanJob {
    pub root: PathBuf,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub chunk_size: usize,
}

/// Channel from a running worker back to whoever started it.
pub trait ScanReporter: Send + Sync {
    /// Checked by the worker between files; cancellation is cooperative.
    fn is_cancelled(&self) -> bool;
    fn progress(&self, processed: usize, total: usize);
    fn chunk(&self, rows: Vec<ScanRow>);
    fn batch_failed(&self, count: usize);
}

/// Runs one directory scan to completion or cancellation.
///
/// Returning `Ok` ends the scan normally (or after observing cancellation);
/// returning `Err` reports a failed scan.
pub trait ScanWorker: Send + Sync {
    fn run(&self, job: &ScanJob, reporter: &dyn ScanReporter) -> Result<()>;
}

/// Default worker: walks the tree with `walkdir` and stats each asset.
#[derive(Debug, Clone, Default)]
pub struct WalkdirScanWorker {
    classifier: MediaClassifier,
}

impl WalkdirScanWorker {
    pub fn new(classifier: MediaClassifier) -> Self {
        Self { classifier }
    }
}

impl ScanWorker for WalkdirScanWorker {
    fn run(&self, job: &ScanJob, reporter: &dyn ScanReporter) -> Result<()> {
        let include = compile_patterns(&job.include)?;
        let exclude = compile_patterns(&job.exclude)?;
        ensure_dir(&job.root)?;

        let mut candidates = Vec::new();
        let mut unreadable = 0usize;
        for entry in WalkDir::new(&job.root)
            .into_iter()
            .filter_entry(|e| !should_skip_dir(e))
        {
            if reporter.is_cancelled() {
                debug!(root = %job.root.display(), "scan cancelled during discovery");
                return Ok(());
            }
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    debug!(error = %err, "skipping unreadable entry");
                    unreadable += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(media) = self.classifier.classify(entry.path()) else {
                continue;
            };
            let Some(rel) = relative_str(&job.root, entry.path()) else {
                continue;
            };
            if !include.is_empty() && !include.iter().any(|p| p.matches(&rel)) {
                continue;
            }
            if exclude.iter().any(|p| p.matches(&rel)) {
                continue;
            }
            candidates.push((entry.into_path(), rel, media));
        }

        let total = candidates.len();
        info!(root = %job.root.display(), total, "scan discovered assets");
        if unreadable > 0 {
            reporter.batch_failed(unreadable);
        }
        reporter.progress(0, total);

        let chunk_size = job.chunk_size.max(1);
        let mut processed = 0usize;
        for batch in candidates.chunks(chunk_size) {
            let mut rows = Vec::with_capacity(batch.len());
            let mut failed = 0usize;
            for (path, rel, media) in batch {
                if reporter.is_cancelled() {
                    debug!(root = %job.root.display(), processed, "scan cancelled");
                    return Ok(());
                }
                match std::fs::metadata(path) {
                    Ok(meta) => {
                        let modified = meta.modified().ok().map(DateTime::<Utc>::from);
                        rows.push(ScanRow::new(rel.clone(), *media, meta.len(), modified));
                    }
                    Err(err) => {
                        warn!(path = %path.display(), error = %err, "failed to stat asset");
                        failed += 1;
                    }
                }
            }
            processed += batch.len();
            if failed > 0 {
                reporter.batch_failed(failed);
            }
            if !rows.is_empty() {
                reporter.chunk(rows);
            }
            reporter.progress(processed, total);
        }
        Ok(())
    }
}

fn ensure_dir(root: &Path) -> Result<()> {
    let meta = std::fs::metadata(root)
        .with_context(|| format!("scan root {} is not accessible", root.display()))?;
    anyhow::ensure!(meta.is_dir(), "scan root {} is not a directory", root.display());
    Ok(())
}

pub(crate) fn compile_patterns(raw: &[String]) -> Result<Vec<Pattern>> {
    raw.iter()
        .map(|p| Pattern::new(p).with_context(|| format!("invalid glob pattern '{p}'")))
        .collect()
}

fn should_skip_dir(entry: &DirEntry) -> bool {
    // Never skip the root; tempfile roots can be dot-dirs.
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    is_excluded(entry.file_name())
}
