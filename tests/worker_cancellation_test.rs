use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use tileview::render::{
    DocumentSession, Listeners, PageSize, RelativeRect, RenderRequest, RenderResponse,
    RenderWorker, TileConfig, TileKey, WorkerState,
};
use tileview::test_utils::test_helpers::{RecordingBackend, gated};

const WAIT: Duration = Duration::from_secs(10);
const QUIET: Duration = Duration::from_millis(200);

fn request(page: usize) -> RenderRequest {
    RenderRequest::tile(
        TileKey::new(page, page, 32.0, 32.0, RelativeRect::FULL_PAGE),
        page as u32,
    )
}

#[test]
fn cancelled_requests_are_never_published() {
    let (backend, mut gate) = gated(RecordingBackend::new(4, PageSize::new(100.0, 100.0)));
    let (tx, rx) = flume::unbounded();
    let (worker, _) = RenderWorker::spawn(
        move || Ok(backend),
        move |response| {
            let _ = tx.send(response);
        },
    )
    .unwrap();

    // Page 0 occupies the worker while A and B are queued behind it
    worker.submit(request(0));
    assert_eq!(gate.wait_started(WAIT), Some(0));
    worker.submit(request(1));
    worker.submit(request(2));
    assert_eq!(worker.cancel_all_pending(), 2);
    assert_eq!(worker.pending_len(), 0);

    gate.open();

    // The in-flight decode finishes but its tile is withdrawn with the rest
    assert!(rx.recv_timeout(QUIET).is_err());
    assert_eq!(gate.wait_started(QUIET), None);

    // Requests submitted after the cancel are published again
    worker.submit(request(3));
    match rx.recv_timeout(WAIT).unwrap() {
        RenderResponse::Tile(tile) => assert_eq!(tile.key().document_page, 3),
        RenderResponse::Error { error, .. } => panic!("unexpected failure: {error}"),
    }
}

#[test]
fn stopping_mid_decode_discards_the_result() {
    let (backend, gate) = gated(RecordingBackend::new(2, PageSize::new(100.0, 100.0)));
    let (tx, rx) = flume::unbounded();
    let (worker, _) = RenderWorker::spawn(
        move || Ok(backend),
        move |response| {
            let _ = tx.send(response);
        },
    )
    .unwrap();

    worker.submit(request(1));
    assert_eq!(gate.wait_started(WAIT), Some(1));

    let stopper = thread::spawn(move || {
        let mut worker = worker;
        worker.stop();
        worker.state()
    });
    thread::sleep(QUIET);
    gate.release_one();

    assert_eq!(stopper.join().unwrap(), WorkerState::Cancelled);
    assert!(rx.recv_timeout(QUIET).is_err());
}

#[test]
fn viewport_change_cancels_previous_plan() {
    let ready = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&ready);
    let listeners = Listeners::new().on_tile_ready(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let (backend, mut gate) = gated(RecordingBackend::new(3, PageSize::new(1000.0, 1000.0)));
    let mut session = DocumentSession::new(TileConfig::default(), listeners);
    session.load_document(backend, None).unwrap();

    // First plan: thumbnail of page 0 in flight, 9 tiles each for pages 0 and 1 queued
    let first = session.on_viewport_changed(768.0, 768.0, 0.0, 0.0, 1.0, 0);
    assert_eq!(first.requested, 18);
    assert!(gate.wait_started(WAIT).is_some());
    assert_eq!(session.pending_requests(), 18);

    // Second plan replaces the queue instead of appending to it
    session.on_viewport_changed(768.0, 768.0, -768.0, 0.0, 1.0, 1);
    assert!(session.pending_requests() <= 27);

    gate.open();
    session.settle(WAIT);
    assert!(ready.load(Ordering::SeqCst) <= 1 + 27 + 3);
    assert!(session.cache_stats().active <= 27);
}

#[test]
fn unload_stops_worker_and_clears_cache() {
    let (backend, mut gate) = gated(RecordingBackend::new(3, PageSize::new(500.0, 500.0)));
    let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
    session.load_document(backend, None).unwrap();

    session.on_viewport_changed(500.0, 500.0, 0.0, 0.0, 1.0, 0);
    assert!(gate.wait_started(WAIT).is_some());

    gate.open();
    session.unload();
    assert_eq!(session.pending_requests(), 0);
    assert!(session.with_cache(|cache| cache.is_empty()));
    assert!(session.poll_responses().is_empty());
}
