//! Shared error type for library operations.

use std::path::PathBuf;

use thiserror::Error;

/// Library error type for album tree, scan and watch operations.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// No library root is bound, or the requested root is not a directory.
    #[error("photo library is not available")]
    LibraryUnavailable,

    /// Subalbums may only be created under a top-level album.
    #[error("albums can only be nested one level deep (parent {parent} is level {level})")]
    AlbumDepth { parent: PathBuf, level: u8 },

    /// The target album directory already exists.
    #[error("an album named '{name}' already exists")]
    AlbumNameConflict { name: String },

    /// The album name is empty or contains a path separator.
    #[error("invalid album name '{0}'")]
    InvalidAlbumName(String),

    /// The filesystem operation backing an album change failed.
    #[error("album operation failed on {path}: {source}")]
    AlbumOperation {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Directory watch backend error.
    #[error(transparent)]
    Watch(#[from] notify::Error),
}

impl LibraryError {
    pub(crate) fn operation(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::AlbumOperation {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T, E = LibraryError> = std::result::Result<T, E>;
