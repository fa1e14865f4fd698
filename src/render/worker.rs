//! Render worker - a single background thread owning the decode backend
//!
//! Requests are queued by the caller thread and drained in submission order.
//! The backend is created on the worker thread and never leaves it, so decode
//! calls are serialized without any lock around the backend itself.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use super::backend::DecodeBackend;
use super::request::{RenderFault, RenderRequest, RenderResponse, RequestSink};
use super::session::SessionError;
use super::tile::Tile;
use super::types::DocumentInfo;

/// Lifecycle of the worker thread
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WorkerState {
    /// Queue empty, waiting for a wake signal
    Idle,
    /// Working through the queue
    Draining,
    /// Stopped; terminal
    Cancelled,
}

struct Queue {
    pending: VecDeque<RenderRequest>,
    state: WorkerState,
    /// Bumped by every cancel; a decode started under an older epoch was
    /// withdrawn while running
    epoch: u64,
}

struct Shared {
    queue: Mutex<Queue>,
    wake: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                pending: VecDeque::new(),
                state: WorkerState::Idle,
                epoch: 0,
            }),
            wake: Condvar::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until a request is available. `None` once cancelled.
    fn next_request(&self) -> Option<(RenderRequest, u64)> {
        let mut queue = self.lock();
        loop {
            if queue.state == WorkerState::Cancelled {
                return None;
            }
            if let Some(request) = queue.pending.pop_front() {
                queue.state = WorkerState::Draining;
                return Some((request, queue.epoch));
            }
            queue.state = WorkerState::Idle;
            queue = self
                .wake
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Handle to the background render thread
pub struct RenderWorker {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl RenderWorker {
    /// Start the worker thread.
    ///
    /// `open` builds the backend on the worker thread; its document metadata
    /// is returned once available. Every rendered tile or decode failure is
    /// handed to `publish`, on the worker thread.
    pub fn spawn<B, F, P>(open: F, publish: P) -> Result<(Self, DocumentInfo), SessionError>
    where
        B: DecodeBackend + 'static,
        F: FnOnce() -> Result<B, RenderFault> + Send + 'static,
        P: FnMut(RenderResponse) + Send + 'static,
    {
        let shared = Arc::new(Shared::new());
        let worker_shared = Arc::clone(&shared);
        let (ready_tx, ready_rx) = flume::bounded(1);

        let handle = thread::Builder::new()
            .name("tile-render".to_string())
            .spawn(move || {
                let opened = open().and_then(|mut backend| {
                    let info = backend.document_info()?;
                    Ok((backend, info))
                });

                match opened {
                    Ok((backend, info)) => {
                        if ready_tx.send(Ok(info)).is_ok() {
                            drain_loop(backend, &worker_shared, publish);
                        }
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })?;

        let ready = ready_rx.recv();
        let mut worker = Self {
            shared,
            handle: Some(handle),
        };
        match ready {
            Ok(Ok(info)) => Ok((worker, info)),
            Ok(Err(e)) => {
                worker.stop();
                Err(SessionError::Open(e))
            }
            Err(_) => {
                worker.stop();
                Err(SessionError::WorkerExited)
            }
        }
    }

    /// Queue a request and wake the worker. Never blocks on rendering.
    pub fn submit(&self, request: RenderRequest) {
        let mut queue = self.shared.lock();
        if queue.state == WorkerState::Cancelled {
            debug!("Worker stopped, ignoring request for {:?}", request.key);
            return;
        }
        queue.pending.push_back(request);
        drop(queue);
        self.shared.wake.notify_one();
    }

    /// Drop every queued request. A decode already running is not
    /// interrupted, but its result is discarded instead of published.
    /// Returns the number of dropped queued requests.
    pub fn cancel_all_pending(&self) -> usize {
        let mut queue = self.shared.lock();
        let dropped = queue.pending.len();
        queue.pending.clear();
        queue.epoch = queue.epoch.wrapping_add(1);
        drop(queue);
        self.shared.wake.notify_one();

        if dropped > 0 {
            debug!("Cancelled {dropped} pending render requests");
        }
        dropped
    }

    /// Stop the worker and wait for its thread to exit.
    ///
    /// Queued requests are discarded, and a tile being decoded when this is
    /// called is not published. The backend is dropped before this returns.
    pub fn stop(&mut self) {
        {
            let mut queue = self.shared.lock();
            queue.state = WorkerState::Cancelled;
            queue.pending.clear();
        }
        self.shared.wake.notify_all();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("Render worker panicked");
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> WorkerState {
        self.shared.lock().state
    }

    /// True when the worker waits on an empty queue, or has stopped
    #[must_use]
    pub fn is_idle(&self) -> bool {
        let queue = self.shared.lock();
        match queue.state {
            WorkerState::Idle => queue.pending.is_empty(),
            WorkerState::Draining => false,
            WorkerState::Cancelled => true,
        }
    }

    /// Number of queued requests, thumbnails included
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Number of queued regular tile requests
    #[must_use]
    pub fn pending_tiles(&self) -> usize {
        self.shared
            .lock()
            .pending
            .iter()
            .filter(|request| !request.thumbnail)
            .count()
    }
}

impl RequestSink for RenderWorker {
    fn enqueue(&mut self, request: RenderRequest) {
        self.submit(request);
    }
}

impl Drop for RenderWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn drain_loop<B, P>(mut backend: B, shared: &Shared, mut publish: P)
where
    B: DecodeBackend,
    P: FnMut(RenderResponse),
{
    info!("Render worker started");

    while let Some((request, epoch)) = shared.next_request() {
        let result = decode(&mut backend, &request);

        // Published under the lock, so a cancel either sees the result in
        // the channel or withdraws it
        let queue = shared.lock();
        if queue.state == WorkerState::Cancelled {
            debug!("Worker stopped mid-decode, discarding {:?}", request.key);
            break;
        }
        if queue.epoch != epoch {
            debug!("Request withdrawn mid-decode, discarding {:?}", request.key);
            continue;
        }

        match result {
            Ok(tile) => publish(RenderResponse::Tile(tile)),
            Err(error) => {
                warn!(
                    "Failed to render page {} {:?}: {error}",
                    request.key.document_page, request.key.bounds
                );
                publish(RenderResponse::Error { request, error });
            }
        }
        drop(queue);
    }

    info!("Render worker exiting");
}

fn decode<B: DecodeBackend>(backend: &mut B, request: &RenderRequest) -> Result<Tile, RenderFault> {
    let (width, height) = request.key.raster_size();
    if width == 0 || height == 0 {
        return Err(RenderFault::UnsupportedSize { width, height });
    }

    let bitmap = backend.render(request.key.document_page, width, height, request.key.bounds)?;
    Ok(Tile::new(
        request.key,
        request.thumbnail,
        request.rank,
        bitmap,
    ))
}
