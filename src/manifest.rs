//! Album manifest lookup.

use std::fs;
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

/// Manifest file names, highest priority first.
pub const MANIFEST_NAMES: &[&str] = &[".album.json", "album.json"];
/// Empty file that marks a directory as a managed album.
pub const MARKER_NAME: &str = ".album";

/// Title and manifest flag for an album directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumInfo {
    pub title: String,
    pub has_manifest: bool,
}

/// Source of album titles. Implementations must be cheap to call once per
/// album directory on every rebuild.
pub trait ManifestReader: Send + Sync {
    fn read(&self, album: &Path) -> Result<AlbumInfo>;

    /// Make sure `album` carries a manifest or marker.
    fn ensure_marker(&self, album: &Path) -> io::Result<()>;
}

#[derive(Debug, Deserialize)]
struct ManifestFile {
    #[serde(default)]
    title: Option<String>,
}

/// Reads JSON manifests (`{"title": "..."}`) and bare marker files.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonManifestReader;

impl ManifestReader for JsonManifestReader {
    fn read(&self, album: &Path) -> Result<AlbumInfo> {
        let fallback = dir_title(album);
        for name in MANIFEST_NAMES {
            let candidate = album.join(name);
            if !candidate.is_file() {
                continue;
            }
            let raw = fs::read_to_string(&candidate)
                .with_context(|| format!("failed to read manifest {}", candidate.display()))?;
            let manifest: ManifestFile = serde_json::from_str(&raw)
                .with_context(|| format!("malformed manifest {}", candidate.display()))?;
            let title = manifest
                .title
                .map(|t| t.trim().to_owned())
                .filter(|t| !t.is_empty())
                .unwrap_or(fallback);
            return Ok(AlbumInfo {
                title,
                has_manifest: true,
            });
        }
        Ok(AlbumInfo {
            title: fallback,
            has_manifest: album.join(MARKER_NAME).is_file(),
        })
    }

    fn ensure_marker(&self, album: &Path) -> io::Result<()> {
        let present = MANIFEST_NAMES
            .iter()
            .chain(std::iter::once(&MARKER_NAME))
            .any(|name| album.join(name).is_file());
        if present {
            return Ok(());
        }
        debug!(album = %album.display(), "writing album marker");
        fs::write(album.join(MARKER_NAME), b"")
    }
}

pub(crate) fn dir_title(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
