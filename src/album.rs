//! Album descriptors and the two-level album forest.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Depth of the library root itself.
pub const ROOT_LEVEL: u8 = 0;
/// Depth of a top-level album.
pub const ALBUM_LEVEL: u8 = 1;
/// Depth of a subalbum; nothing is nested deeper.
pub const SUBALBUM_LEVEL: u8 = 2;

/// Immutable descriptor of one album directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumNode {
    /// Canonical absolute directory path.
    pub path: PathBuf,
    pub level: u8,
    /// Manifest title, falling back to the directory name.
    pub title: String,
    pub has_manifest: bool,
}

impl AlbumNode {
    pub fn new(path: PathBuf, level: u8, title: String, has_manifest: bool) -> Self {
        Self {
            path,
            level,
            title,
            has_manifest,
        }
    }

    pub fn is_top_level(&self) -> bool {
        self.level == ALBUM_LEVEL
    }
}

/// Snapshot of the album forest. Built wholesale by a rebuild and never
/// mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct AlbumTree {
    albums: Vec<AlbumNode>,
    children: HashMap<PathBuf, Vec<AlbumNode>>,
    nodes: HashMap<PathBuf, AlbumNode>,
}

impl AlbumTree {
    /// Assemble a tree from top-level albums and their children. Both levels
    /// are sorted case-insensitively by title.
    pub(crate) fn from_parts(
        mut albums: Vec<AlbumNode>,
        mut children: HashMap<PathBuf, Vec<AlbumNode>>,
    ) -> Self {
        albums.sort_by_cached_key(sort_key);
        let mut nodes = HashMap::with_capacity(albums.len());
        for album in &albums {
            nodes.insert(album.path.clone(), album.clone());
        }
        for subs in children.values_mut() {
            subs.sort_by_cached_key(sort_key);
            for sub in subs.iter() {
                nodes.insert(sub.path.clone(), sub.clone());
            }
        }
        Self {
            albums,
            children,
            nodes,
        }
    }

    /// Top-level albums.
    pub fn albums(&self) -> &[AlbumNode] {
        &self.albums
    }

    /// Subalbums of `album`; empty for unknown paths and subalbums.
    pub fn children(&self, album: &Path) -> &[AlbumNode] {
        self.children.get(album).map(Vec::as_slice).unwrap_or(&[])
    }

    /// O(1) lookup by canonical path.
    pub fn node(&self, path: &Path) -> Option<&AlbumNode> {
        self.nodes.get(path)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All nodes, level 1 first, each followed by its subalbums.
    pub fn iter(&self) -> impl Iterator<Item = &AlbumNode> {
        self.albums
            .iter()
            .flat_map(|album| std::iter::once(album).chain(self.children(&album.path)))
    }
}

fn sort_key(node: &AlbumNode) -> (String, PathBuf) {
    (node.title.to_lowercase(), node.path.clone())
}
