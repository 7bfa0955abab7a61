//! Bounded buffer of rows from the in-flight scan, with re-basing onto
//! arbitrary view roots.

use std::path::{Path, PathBuf};

use crate::paths::{PathRelation, relation, relative_str};
use crate::scan::{MAX_LIVE_BUFFER_SIZE, ScanRow};

/// Rows delivered by the current (or last) scan, relative to `root`.
#[derive(Debug, Clone)]
pub struct LiveScanBuffer {
    root: Option<PathBuf>,
    rows: Vec<ScanRow>,
    capacity: usize,
    overflowed: bool,
}

/// Result of appending a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Absorbed {
    pub accepted: usize,
    pub dropped: usize,
    /// True only for the chunk that first hit the bound.
    pub newly_full: bool,
}

impl Default for LiveScanBuffer {
    fn default() -> Self {
        Self::with_capacity(MAX_LIVE_BUFFER_SIZE)
    }
}

impl LiveScanBuffer {
    /// Capacity is clamped to `1..=MAX_LIVE_BUFFER_SIZE`.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            root: None,
            rows: Vec::new(),
            capacity: capacity.clamp(1, MAX_LIVE_BUFFER_SIZE),
            overflowed: false,
        }
    }

    /// Drop all rows and start buffering for a scan of `root`.
    pub fn reset(&mut self, root: PathBuf) {
        self.root = Some(root);
        self.rows.clear();
        self.overflowed = false;
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn rows(&self) -> &[ScanRow] {
        &self.rows
    }

    /// Append as much of `chunk` as fits.
    pub fn absorb(&mut self, chunk: &[ScanRow]) -> Absorbed {
        let room = self.capacity.saturating_sub(self.rows.len());
        let accepted = room.min(chunk.len());
        self.rows.extend_from_slice(&chunk[..accepted]);
        let dropped = chunk.len() - accepted;
        let newly_full = dropped > 0 && !self.overflowed;
        if dropped > 0 {
            self.overflowed = true;
        }
        Absorbed {
            accepted,
            dropped,
            newly_full,
        }
    }

    /// Copy of the scan root and rows when they can be seen from `view` (a
    /// canonical path). Re-basing the copy is left to the caller so it can
    /// happen outside whatever lock guards the buffer.
    pub fn snapshot_for(&self, view: &Path) -> Option<(PathBuf, Vec<ScanRow>)> {
        let root = self.root.as_ref()?;
        match relation(view, root) {
            PathRelation::Equal | PathRelation::Ancestor | PathRelation::Descendant
                if !self.rows.is_empty() =>
            {
                Some((root.clone(), self.rows.clone()))
            }
            _ => None,
        }
    }
}

/// Translate `rows` (relative to `scan_root`) so they are relative to
/// `view_root`, keeping only rows that live inside `view_root`.
pub fn rebase_rows(scan_root: &Path, view_root: &Path, rows: &[ScanRow]) -> Vec<ScanRow> {
    match relation(view_root, scan_root) {
        PathRelation::Equal => rows.to_vec(),
        PathRelation::Ancestor => {
            let Some(prefix) = relative_str(view_root, scan_root) else {
                return Vec::new();
            };
            rows.iter()
                .map(|row| row.with_rel(format!("{prefix}/{}", row.rel)))
                .collect()
        }
        PathRelation::Descendant => {
            let Some(prefix) = relative_str(scan_root, view_root) else {
                return Vec::new();
            };
            let nested = format!("{prefix}/");
            rows.iter()
                .filter_map(|row| {
                    let rest = if row.rel == prefix {
                        ""
                    } else {
                        row.rel.strip_prefix(&nested)?
                    };
                    (!rest.is_empty()).then(|| row.with_rel(rest.to_owned()))
                })
                .collect()
        }
        PathRelation::Sibling | PathRelation::Disjoint => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::MediaKind;

    fn rows(rels: &[&str]) -> Vec<ScanRow> {
        rels.iter()
            .map(|r| ScanRow::new(*r, MediaKind::Image, 1, None))
            .collect()
    }

    fn rels(rows: &[ScanRow]) -> Vec<&str> {
        rows.iter().map(|r| r.rel.as_str()).collect()
    }

    #[test]
    fn absorb_stops_at_capacity_and_flags_once() {
        let mut buf = LiveScanBuffer::with_capacity(3);
        buf.reset(PathBuf::from("/lib"));
        let first = buf.absorb(&rows(&["a", "b"]));
        assert_eq!((first.accepted, first.dropped, first.newly_full), (2, 0, false));
        let second = buf.absorb(&rows(&["c", "d"]));
        assert_eq!((second.accepted, second.dropped, second.newly_full), (1, 1, true));
        let third = buf.absorb(&rows(&["e"]));
        assert_eq!((third.accepted, third.dropped, third.newly_full), (0, 1, false));
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn capacity_never_exceeds_global_bound() {
        assert_eq!(
            LiveScanBuffer::with_capacity(usize::MAX).capacity(),
            MAX_LIVE_BUFFER_SIZE
        );
        assert_eq!(LiveScanBuffer::with_capacity(0).capacity(), 1);
    }

    #[test]
    fn snapshot_skips_unrelated_and_empty_views() {
        let mut buf = LiveScanBuffer::default();
        assert!(buf.snapshot_for(Path::new("/lib")).is_none());

        buf.reset(PathBuf::from("/lib/trip"));
        assert!(buf.snapshot_for(Path::new("/lib")).is_none());

        buf.absorb(&rows(&["a.jpg"]));
        let (root, copied) = buf.snapshot_for(Path::new("/lib")).unwrap();
        assert_eq!(root, Path::new("/lib/trip"));
        assert_eq!(rels(&copied), ["a.jpg"]);
        assert!(buf.snapshot_for(Path::new("/lib/other")).is_none());
        assert!(buf.snapshot_for(Path::new("/elsewhere")).is_none());
    }

    #[test]
    fn rebase_same_root_is_identity() {
        let input = rows(&["a.jpg", "Day1/b.jpg"]);
        let out = rebase_rows(Path::new("/lib/trip"), Path::new("/lib/trip"), &input);
        assert_eq!(out, input);
    }

    #[test]
    fn rebase_onto_ancestor_prefixes_rel() {
        let out = rebase_rows(
            Path::new("/lib/trip/day1"),
            Path::new("/lib"),
            &rows(&["photo.jpg"]),
        );
        assert_eq!(rels(&out), ["trip/day1/photo.jpg"]);
    }

    #[test]
    fn rebase_onto_descendant_filters_and_strips() {
        let out = rebase_rows(
            Path::new("/lib"),
            Path::new("/lib/trip"),
            &rows(&["trip/photo.jpg", "other/x.jpg", "tripod/y.jpg", "trip", "trip/day1/z.jpg"]),
        );
        assert_eq!(rels(&out), ["photo.jpg", "day1/z.jpg"]);
    }

    #[test]
    fn rebase_onto_unrelated_root_is_empty() {
        let input = rows(&["a.jpg"]);
        assert!(rebase_rows(Path::new("/lib/a"), Path::new("/lib/b"), &input).is_empty());
        assert!(rebase_rows(Path::new("/lib/a"), Path::new("/other"), &input).is_empty());
    }
}
