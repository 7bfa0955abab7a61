pub mod album;
pub mod buffer;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod library;
pub mod logging;
pub mod manifest;
pub mod paths;
pub mod scan;
pub mod tree;
pub mod watch;

pub use album::{AlbumNode, AlbumTree};
pub use coordinator::{ActiveScan, ScanCoordinator, StartOutcome};
pub use error::{LibraryError, Result};
pub use events::{EventBus, LibraryEvent};
pub use library::{Collaborators, Library};
pub use scan::{MAX_LIVE_BUFFER_SIZE, MediaKind, ScanRow};
