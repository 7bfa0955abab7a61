//! Path helpers shared by the scan coordinator and the live buffer.
//!
//! Paths are compared component-wise after `fs::canonicalize`, so the
//! comparison is exactly as case-sensitive as the bytes the OS hands back.
//! No case folding or Unicode normalization is applied.

use std::path::{Component, Path, PathBuf};

/// How `a` relates to `b` in the directory hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRelation {
    Equal,
    /// `a` contains `b`.
    Ancestor,
    /// `a` lives inside `b`.
    Descendant,
    /// Same parent, neither nested in the other.
    Sibling,
    Disjoint,
}

impl PathRelation {
    /// Whether two scans over these roots would touch the same files
    /// (or, for siblings, the same parent listing).
    pub fn overlaps(self) -> bool {
        !matches!(self, Self::Disjoint)
    }
}

pub fn relation(a: &Path, b: &Path) -> PathRelation {
    if a == b {
        PathRelation::Equal
    } else if b.starts_with(a) {
        PathRelation::Ancestor
    } else if a.starts_with(b) {
        PathRelation::Descendant
    } else if a.parent().is_some() && a.parent() == b.parent() {
        PathRelation::Sibling
    } else {
        PathRelation::Disjoint
    }
}

/// Canonicalize `path`; `None` when it cannot be resolved.
pub fn canonical(path: &Path) -> Option<PathBuf> {
    std::fs::canonicalize(path).ok()
}

/// `path` relative to `base` as a `/`-joined string. `None` when `path` is
/// not inside `base`; empty when they are equal.
pub fn relative_str(base: &Path, path: &Path) -> Option<String> {
    let rest = path.strip_prefix(base).ok()?;
    let parts: Vec<_> = rest
        .components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy()),
            _ => None,
        })
        .collect();
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_relations() {
        let lib = Path::new("/lib");
        let trip = Path::new("/lib/trip");
        let day = Path::new("/lib/trip/day1");
        let other = Path::new("/lib/other");
        let far = Path::new("/elsewhere/x");

        assert_eq!(relation(trip, trip), PathRelation::Equal);
        assert_eq!(relation(lib, day), PathRelation::Ancestor);
        assert_eq!(relation(day, trip), PathRelation::Descendant);
        assert_eq!(relation(trip, other), PathRelation::Sibling);
        assert_eq!(relation(day, other), PathRelation::Disjoint);
        assert_eq!(relation(trip, far), PathRelation::Disjoint);
    }

    #[test]
    fn prefix_match_is_component_wise() {
        assert_eq!(
            relation(Path::new("/lib/trip"), Path::new("/lib/tripod/a")),
            PathRelation::Disjoint
        );
    }

    #[test]
    fn relative_str_joins_with_slash() {
        let base = Path::new("/lib");
        assert_eq!(
            relative_str(base, Path::new("/lib/trip/day1")).as_deref(),
            Some("trip/day1")
        );
        assert_eq!(relative_str(base, base).as_deref(), Some(""));
        assert_eq!(relative_str(base, Path::new("/other")), None);
    }
}
