use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rust_photo_library::config::ScanSettings;
use rust_photo_library::paths::PathRelation;
use rust_photo_library::scan::{ScanJob, ScanReporter, ScanWorker};
use rust_photo_library::{
    EventBus, LibraryEvent, MAX_LIVE_BUFFER_SIZE, MediaKind, ScanCoordinator, ScanRow,
    StartOutcome,
};
use tempfile::tempdir;
use tokio::runtime::Handle;
use tokio::sync::broadcast::{Receiver, error::RecvError};

/// Emits fixed chunks, then optionally blocks until cancelled.
struct ScriptedWorker {
    chunks: Vec<Vec<ScanRow>>,
    hold: bool,
}

impl ScanWorker for ScriptedWorker {
    fn run(&self, _job: &ScanJob, reporter: &dyn ScanReporter) -> anyhow::Result<()> {
        for chunk in &self.chunks {
            reporter.chunk(chunk.clone());
        }
        if self.hold {
            let deadline = Instant::now() + Duration::from_secs(10);
            while !reporter.is_cancelled() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
        }
        Ok(())
    }
}

struct FailingWorker;

impl ScanWorker for FailingWorker {
    fn run(&self, _job: &ScanJob, _reporter: &dyn ScanReporter) -> anyhow::Result<()> {
        anyhow::bail!("disk on fire")
    }
}

struct PanickingWorker;

impl ScanWorker for PanickingWorker {
    fn run(&self, _job: &ScanJob, _reporter: &dyn ScanReporter) -> anyhow::Result<()> {
        panic!("worker bug")
    }
}

fn rows(rels: &[&str]) -> Vec<ScanRow> {
    rels.iter()
        .map(|r| ScanRow::new(*r, MediaKind::Image, 1, None))
        .collect()
}

fn rels(rows: &[ScanRow]) -> Vec<String> {
    rows.iter().map(|r| r.rel.clone()).collect()
}

fn coordinator(worker: impl ScanWorker + 'static) -> (ScanCoordinator, Receiver<LibraryEvent>) {
    let events = EventBus::new(1024);
    let rx = events.subscribe();
    let coordinator = ScanCoordinator::new(
        Arc::new(worker),
        events,
        Handle::current(),
        &ScanSettings::default(),
    );
    (coordinator, rx)
}

fn holding(chunks: Vec<Vec<ScanRow>>) -> ScriptedWorker {
    ScriptedWorker {
        chunks,
        hold: true,
    }
}

async fn wait_for(
    rx: &mut Receiver<LibraryEvent>,
    mut pred: impl FnMut(&LibraryEvent) -> bool,
) -> LibraryEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await
    .expect("timeout waiting for event")
}

async fn wait_chunk(rx: &mut Receiver<LibraryEvent>) {
    wait_for(rx, |ev| matches!(ev, LibraryEvent::ScanChunkReady { .. })).await;
}

async fn wait_finished(rx: &mut Receiver<LibraryEvent>, root: &Path) -> bool {
    match wait_for(
        rx,
        |ev| matches!(ev, LibraryEvent::ScanFinished { root: r, .. } if r == root),
    )
    .await
    {
        LibraryEvent::ScanFinished { success, .. } => success,
        _ => unreachable!(),
    }
}

/// lib/{Trip/Day1, Other} plus a directory outside lib.
fn layout() -> (tempfile::TempDir, PathBuf, PathBuf) {
    let tmp = tempdir().unwrap();
    let base = tmp.path().canonicalize().unwrap();
    let lib = base.join("lib");
    fs::create_dir_all(lib.join("Trip").join("Day1")).unwrap();
    fs::create_dir_all(lib.join("Other")).unwrap();
    fs::create_dir_all(base.join("elsewhere").join("inner")).unwrap();
    (tmp, base, lib)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overlapping_requests_leave_the_active_scan_alone() {
    let (_tmp, base, lib) = layout();
    let (scans, mut rx) = coordinator(holding(Vec::new()));
    let trip = lib.join("Trip");

    let StartOutcome::Started(first) = scans.start_scanning(&trip, &[], &[]).unwrap() else {
        panic!("first scan should start");
    };

    for (request, expected) in [
        (trip.clone(), PathRelation::Equal),
        (lib.clone(), PathRelation::Ancestor),
        (trip.join("Day1"), PathRelation::Descendant),
        (lib.join("Other"), PathRelation::Sibling),
    ] {
        match scans.start_scanning(&request, &[], &[]).unwrap() {
            StartOutcome::AlreadyCovered { active, relation } => {
                assert_eq!(active, first);
                assert_eq!(relation, expected, "{}", request.display());
            }
            other => panic!("{} should be covered, got {other:?}", request.display()),
        }
        assert_eq!(scans.active_scan().as_ref(), Some(&first));
    }

    // Disjoint: parent differs and neither contains the other.
    let elsewhere = base.join("elsewhere").join("inner");
    let StartOutcome::Started(second) = scans.start_scanning(&elsewhere, &[], &[]).unwrap() else {
        panic!("disjoint scan should start");
    };
    assert_ne!(second.id, first.id);
    assert_eq!(scans.active_scan(), Some(second.clone()));

    // The old worker observes cancellation and finishes unsuccessfully
    // without clearing the new handle.
    assert!(!wait_finished(&mut rx, &trip).await);
    assert_eq!(scans.active_scan(), Some(second));
    scans.stop_scanning();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn is_scanning_path_follows_the_active_root() {
    let (_tmp, base, lib) = layout();
    let (scans, mut rx) = coordinator(holding(Vec::new()));
    let trip = lib.join("Trip");
    scans.start_scanning(&trip, &[], &[]).unwrap();

    assert!(scans.is_scanning_path(&trip));
    assert!(scans.is_scanning_path(&trip.join("Day1")));
    assert!(!scans.is_scanning_path(&lib));
    assert!(!scans.is_scanning_path(&lib.join("Other")));
    assert!(!scans.is_scanning_path(&base.join("missing")));

    let stopped = scans.stop_scanning().expect("a scan was active");
    assert_eq!(stopped.root, trip);
    assert!(!scans.is_scanning_path(&trip));
    assert!(!wait_finished(&mut rx, &trip).await);
    assert!(scans.stop_scanning().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_results_rebase_onto_an_ancestor_view() {
    let (_tmp, _base, lib) = layout();
    let (scans, mut rx) = coordinator(holding(vec![rows(&["photo.jpg"])]));
    let trip = lib.join("Trip");
    scans.start_scanning(&trip, &[], &[]).unwrap();
    wait_chunk(&mut rx).await;

    assert_eq!(rels(&scans.get_live_scan_results(&lib)), ["Trip/photo.jpg"]);
    assert_eq!(rels(&scans.get_live_scan_results(&trip)), ["photo.jpg"]);
    assert!(scans.get_live_scan_results(&lib.join("Other")).is_empty());
    assert!(scans.get_live_scan_results(&lib.join("gone")).is_empty());
    scans.stop_scanning();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn live_results_filter_onto_a_descendant_view() {
    let (_tmp, _base, lib) = layout();
    let (scans, mut rx) = coordinator(holding(vec![rows(&[
        "Trip/photo.jpg",
        "Other/x.jpg",
        "Trip/Day1/y.jpg",
    ])]));
    scans.start_scanning(&lib, &[], &[]).unwrap();
    wait_chunk(&mut rx).await;

    assert_eq!(
        rels(&scans.get_live_scan_results(&lib.join("Trip"))),
        ["photo.jpg", "Day1/y.jpg"]
    );
    assert_eq!(
        rels(&scans.get_live_scan_results(&lib.join("Trip").join("Day1"))),
        ["y.jpg"]
    );
    assert_eq!(scans.get_live_scan_results(&lib).len(), 3);
    scans.stop_scanning();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffer_survives_stop_until_next_scan() {
    let (_tmp, base, lib) = layout();
    let (scans, mut rx) = coordinator(holding(vec![rows(&["a.jpg", "b.jpg"])]));
    let trip = lib.join("Trip");
    scans.start_scanning(&trip, &[], &[]).unwrap();
    wait_chunk(&mut rx).await;

    scans.stop_scanning();
    assert!(!wait_finished(&mut rx, &trip).await);
    assert_eq!(scans.get_live_scan_results(&trip).len(), 2);

    let elsewhere = base.join("elsewhere");
    scans.start_scanning(&elsewhere, &[], &[]).unwrap();
    assert!(scans.get_live_scan_results(&trip).is_empty());
    scans.stop_scanning();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn buffer_is_bounded_but_every_chunk_is_forwarded() {
    let (_tmp, _base, lib) = layout();
    let chunk: Vec<ScanRow> = (0..1000)
        .map(|i| ScanRow::new(format!("{i}.jpg"), MediaKind::Image, 1, None))
        .collect();
    let (scans, mut rx) = coordinator(ScriptedWorker {
        chunks: vec![chunk; 7],
        hold: false,
    });
    scans.start_scanning(&lib, &[], &[]).unwrap();

    let mut forwarded = 0;
    loop {
        match wait_for(&mut rx, |_| true).await {
            LibraryEvent::ScanChunkReady { rows, .. } => forwarded += rows.len(),
            LibraryEvent::ScanFinished { success, .. } => {
                assert!(success);
                break;
            }
            _ => {}
        }
    }
    assert_eq!(forwarded, 7000);
    assert_eq!(scans.buffered_len(), MAX_LIVE_BUFFER_SIZE);
    assert_eq!(scans.get_live_scan_results(&lib).len(), MAX_LIVE_BUFFER_SIZE);
    assert!(scans.active_scan().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_worker_reports_error_and_frees_the_slot() {
    let (_tmp, _base, lib) = layout();
    let (scans, mut rx) = coordinator(FailingWorker);
    scans.start_scanning(&lib, &[], &[]).unwrap();

    let err = wait_for(&mut rx, |ev| matches!(ev, LibraryEvent::Error { .. })).await;
    let LibraryEvent::Error { message } = err else {
        unreachable!()
    };
    assert!(message.contains("disk on fire"), "{message}");
    assert!(!wait_finished(&mut rx, &lib).await);
    assert!(scans.active_scan().is_none());

    // A fresh scan of the same root is accepted again.
    assert!(matches!(
        scans.start_scanning(&lib, &[], &[]).unwrap(),
        StartOutcome::Started(_)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_worker_still_finishes() {
    let (_tmp, _base, lib) = layout();
    let (scans, mut rx) = coordinator(PanickingWorker);
    scans.start_scanning(&lib, &[], &[]).unwrap();
    assert!(!wait_finished(&mut rx, &lib).await);
    assert!(scans.active_scan().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unresolvable_scan_root_is_an_error() {
    let (_tmp, base, _lib) = layout();
    let (scans, _rx) = coordinator(holding(Vec::new()));
    assert!(scans.start_scanning(&base.join("missing"), &[], &[]).is_err());
    assert!(scans.active_scan().is_none());
}
