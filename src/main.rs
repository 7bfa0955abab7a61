//! Binary entrypoint for photo-library.
//!
//! Delegates all logic to the library crate; no local modules here.

use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{ArgAction, Parser};
use rust_photo_library::config::Configuration;
use rust_photo_library::{Library, LibraryEvent, logging};
use tokio::runtime::Handle;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(
    name = "photo-library",
    version,
    about = "Live album tree and background scans for a photo library"
)]
struct Args {
    /// Path to YAML config
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,
    /// Library root (overrides library-root from the config)
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,
    /// Scan the whole library once and report what was found
    #[arg(long)]
    scan: bool,
    /// Keep running and print the album tree whenever it changes
    #[arg(long)]
    watch: bool,
    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init(args.verbose);

    let mut cfg = match &args.config {
        Some(path) => Configuration::from_yaml_file(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Configuration::default(),
    };
    if let Some(root) = args.root {
        cfg.library_root = Some(root);
    }
    let cfg = cfg.validated().context("invalid configuration values")?;
    let root = cfg
        .library_root
        .clone()
        .ok_or_else(|| anyhow!("no library root; pass --root or set library-root"))?;
    info!(
        root = %root.display(),
        debounce = %humantime::format_duration(cfg.watch.debounce),
        watch = cfg.watch.enabled,
        "configuration loaded"
    );

    let library = Library::new(&cfg, Handle::current());
    let mut events = library.subscribe();
    library
        .bind(&root)
        .with_context(|| format!("failed to open library at {}", root.display()))?;
    print_tree(&library);

    if args.scan {
        run_scan(&library, &mut events).await?;
    }

    if args.watch {
        loop {
            tokio::select! {
                res = tokio::signal::ctrl_c() => {
                    if let Err(err) = res {
                        warn!("ctrl-c handler failed: {err}");
                    }
                    info!("ctrl-c received; shutting down");
                    break;
                }
                event = events.recv() => match event {
                    Ok(LibraryEvent::TreeUpdated) => print_tree(&library),
                    Ok(LibraryEvent::Error { message }) => warn!("{message}"),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "event consumer lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    library.shutdown();
    Ok(())
}

async fn run_scan(library: &Library, events: &mut Receiver<LibraryEvent>) -> Result<()> {
    let outcome = library.scan_library().context("failed to start scan")?;
    info!(?outcome, "scan requested");
    let root = library.root().context("library unbound during scan")?;

    let mut found = 0usize;
    loop {
        match events.recv().await {
            Ok(LibraryEvent::ScanProgress {
                processed, total, ..
            }) => info!(processed, total, "scan progress"),
            Ok(LibraryEvent::ScanChunkReady { rows, .. }) => found += rows.len(),
            Ok(LibraryEvent::ScanBatchFailed { count, .. }) => warn!(count, "unreadable files"),
            Ok(LibraryEvent::Error { message }) => warn!("{message}"),
            Ok(LibraryEvent::ScanFinished { root: done, success }) if done == root => {
                info!(found, success, "scan finished");
                println!("{found} assets found under {}", root.display());
                return Ok(());
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event consumer lagged"),
            Err(RecvError::Closed) => return Err(anyhow!("event channel closed during scan")),
        }
    }
}

fn print_tree(library: &Library) {
    let Some(root) = library.root() else {
        println!("(no library bound)");
        return;
    };
    println!("{}", root.display());
    let tree = library.tree();
    for album in tree.albums() {
        let marker = if album.has_manifest { "" } else { " *" };
        println!("  {}{marker}", album.title);
        for sub in tree.children(&album.path) {
            println!("    {}", sub.title);
        }
    }
}
