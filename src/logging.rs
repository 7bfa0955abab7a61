use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Install the global subscriber (RUST_LOG controls level, default = info).
/// Each `-v` raises this crate's level one step; later calls are no-ops.
pub fn init(verbosity: u8) {
    INIT.call_once(|| {
        let mut filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let level = match verbosity {
            0 => None,
            1 => Some("debug"),
            _ => Some("trace"),
        };
        if let Some(level) = level
            && let Ok(directive) = format!("rust_photo_library={level}").parse()
        {
            filter = filter.add_directive(directive);
        }
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .compact()
            .init();
    });
}
