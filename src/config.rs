use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::scan::{DEFAULT_CHUNK_SIZE, MAX_LIVE_BUFFER_SIZE, compile_patterns};

/// Top-level configuration, loaded from YAML with kebab-case keys.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Configuration {
    /// Library root bound at startup, if any.
    pub library_root: Option<PathBuf>,
    /// Capacity of the notification channel per subscriber.
    pub event_capacity: usize,
    pub scan: ScanSettings,
    pub watch: WatchSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct ScanSettings {
    /// Glob patterns matched against asset paths relative to the scan root.
    /// Empty means every supported asset.
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    /// Rows per chunk delivered by the scan worker.
    pub chunk_size: usize,
    /// Rows kept in the live buffer before further chunks are only forwarded.
    pub max_live_buffer: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct WatchSettings {
    pub enabled: bool,
    /// Quiet period after the last change before the tree is rebuilt.
    #[serde(with = "humantime_serde")]
    pub debounce: Duration,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            library_root: None,
            event_capacity: Self::DEFAULT_EVENT_CAPACITY,
            scan: ScanSettings::default(),
            watch: WatchSettings::default(),
        }
    }
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_live_buffer: MAX_LIVE_BUFFER_SIZE,
        }
    }
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            debounce: Self::DEFAULT_DEBOUNCE,
        }
    }
}

impl WatchSettings {
    pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
}

impl Configuration {
    const DEFAULT_EVENT_CAPACITY: usize = 256;

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let s = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate runtime invariants that cannot be expressed via serde defaults alone.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.event_capacity > 0,
            "event-capacity must be greater than zero"
        );
        ensure!(
            self.scan.chunk_size > 0,
            "scan.chunk-size must be greater than zero"
        );
        ensure!(
            (1..=MAX_LIVE_BUFFER_SIZE).contains(&self.scan.max_live_buffer),
            "scan.max-live-buffer must be between 1 and {MAX_LIVE_BUFFER_SIZE}"
        );
        ensure!(
            !self.watch.debounce.is_zero(),
            "watch.debounce must be greater than zero"
        );
        compile_patterns(&self.scan.include).context("scan.include")?;
        compile_patterns(&self.scan.exclude).context("scan.exclude")?;
        if let Some(root) = &self.library_root {
            ensure!(
                !root.as_os_str().is_empty(),
                "library-root must not be empty"
            );
        }
        Ok(self)
    }
}
