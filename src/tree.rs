//! Rebuilds the album forest from disk.
//!
//! Only two directory levels below the root are ever listed, so the depth cap
//! holds by construction.

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::album::{ALBUM_LEVEL, AlbumNode, AlbumTree, SUBALBUM_LEVEL};
use crate::manifest::{ManifestReader, dir_title};

/// Work/cache directory kept under the library root.
pub const WORK_DIR_NAME: &str = ".photo-library";
/// Recently-deleted directory kept under the library root.
pub const DELETED_DIR_NAME: &str = ".deleted";
/// Export directory kept under the library root.
pub const EXPORT_DIR_NAME: &str = "exported";

pub const RESERVED_NAMES: &[&str] = &[WORK_DIR_NAME, DELETED_DIR_NAME, EXPORT_DIR_NAME];

/// Whether a directory entry can never be an album.
pub fn is_excluded(name: &OsStr) -> bool {
    let name = name.to_string_lossy();
    name.starts_with('.') || RESERVED_NAMES.contains(&name.as_ref())
}

/// List `root` and its top-level albums and describe every album found.
///
/// Listing and manifest failures are passed to `report` and the affected
/// subtree is treated as empty; the returned tree is always complete for
/// whatever could be read.
pub fn build_tree(
    root: &Path,
    manifests: &dyn ManifestReader,
    report: &mut dyn FnMut(String),
) -> AlbumTree {
    let mut albums = Vec::new();
    let mut children = HashMap::new();

    for dir in album_dirs(root, report) {
        let album = describe(dir, ALBUM_LEVEL, manifests, report);
        let subs: Vec<AlbumNode> = album_dirs(&album.path, report)
            .into_iter()
            .map(|dir| describe(dir, SUBALBUM_LEVEL, manifests, report))
            .collect();
        children.insert(album.path.clone(), subs);
        albums.push(album);
    }

    let tree = AlbumTree::from_parts(albums, children);
    debug!(root = %root.display(), albums = tree.albums().len(), nodes = tree.len(), "album tree rebuilt");
    tree
}

fn album_dirs(parent: &Path, report: &mut dyn FnMut(String)) -> Vec<PathBuf> {
    let entries = match fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %parent.display(), error = %err, "failed to list album directory");
            report(format!("failed to list {}: {err}", parent.display()));
            return Vec::new();
        }
    };

    let mut dirs = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(dir = %parent.display(), error = %err, "failed to read directory entry");
                report(format!("failed to list {}: {err}", parent.display()));
                continue;
            }
        };
        if is_excluded(&entry.file_name()) {
            continue;
        }
        if entry.file_type().is_ok_and(|t| t.is_dir()) {
            dirs.push(entry.path());
        }
    }
    dirs
}

fn describe(
    path: PathBuf,
    level: u8,
    manifests: &dyn ManifestReader,
    report: &mut dyn FnMut(String),
) -> AlbumNode {
    match manifests.read(&path) {
        Ok(info) => AlbumNode::new(path, level, info.title, info.has_manifest),
        Err(err) => {
            warn!(album = %path.display(), error = %err, "failed to read album manifest");
            report(format!("{err:#}"));
            let title = dir_title(&path);
            AlbumNode::new(path, level, title, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reserved_and_hidden_names_are_excluded() {
        for name in [WORK_DIR_NAME, DELETED_DIR_NAME, EXPORT_DIR_NAME, ".git"] {
            assert!(is_excluded(OsStr::new(name)), "{name}");
        }
        assert!(!is_excluded(OsStr::new("Trip")));
        assert!(!is_excluded(OsStr::new("exports")));
    }

    #[test]
    fn unlistable_root_is_reported_and_yields_an_empty_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let mut reports = Vec::new();
        let tree = build_tree(
            &tmp.path().join("gone"),
            &crate::manifest::JsonManifestReader,
            &mut |msg: String| reports.push(msg),
        );
        assert!(tree.is_empty());
        assert_eq!(reports.len(), 1);
        assert!(reports[0].starts_with("failed to list"), "{}", reports[0]);
    }
}
