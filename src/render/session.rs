//! Document session: ties the cache, planner and render worker together
//!
//! The session lives on the caller thread. Viewport changes cancel queued
//! work and replan; rendered tiles come back through [`DocumentSession::poll_responses`],
//! which inserts them into the cache so eviction always runs on the caller
//! thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use log::{debug, info, trace, warn};

use super::backend::DecodeBackend;
use super::cache::{CacheStats, InsertOutcome, TileCache};
use super::layout::{center_offset_for_page, clamp_offsets, optimal_page_size};
use super::page_map::PageMap;
use super::planner::{PlanSummary, Scene, TilePlanner};
use super::request::{RenderFault, RenderRequest, RenderResponse};
use super::tile::{Tile, TileKey};
use super::types::{DocumentInfo, PageSize, TileConfig, Viewport};
use super::worker::RenderWorker;

const SETTLE_POLL: Duration = Duration::from_millis(20);

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a document is already loaded")]
    AlreadyLoaded,

    #[error("document has no pages")]
    EmptyDocument,

    #[error("failed to open document: {0}")]
    Open(#[source] RenderFault),

    #[error("failed to start render worker: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("render worker exited before the document was ready")]
    WorkerExited,
}

pub type TileReadyFn = Arc<dyn Fn(&Tile) + Send + Sync>;
pub type RenderErrorFn = Box<dyn FnMut(&RenderRequest, &RenderFault) + Send>;
pub type LoadCompleteFn = Box<dyn FnMut(usize) + Send>;
pub type PageChangedFn = Box<dyn FnMut(usize, usize) + Send>;

/// Callbacks a host view can subscribe to. All are optional.
#[derive(Default)]
pub struct Listeners {
    on_tile_ready: Option<TileReadyFn>,
    on_render_error: Option<RenderErrorFn>,
    on_load_complete: Option<LoadCompleteFn>,
    on_page_changed: Option<PageChangedFn>,
}

impl Listeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on the render thread each time a tile is published. The host
    /// is expected to marshal the notification to its own thread.
    #[must_use]
    pub fn on_tile_ready(mut self, f: impl Fn(&Tile) + Send + Sync + 'static) -> Self {
        self.on_tile_ready = Some(Arc::new(f));
        self
    }

    /// Called on the caller thread, once per failed decode, when the
    /// session collects worker results
    #[must_use]
    pub fn on_render_error(
        mut self,
        f: impl FnMut(&RenderRequest, &RenderFault) + Send + 'static,
    ) -> Self {
        self.on_render_error = Some(Box::new(f));
        self
    }

    /// Called with the user page count after a document is loaded
    #[must_use]
    pub fn on_load_complete(mut self, f: impl FnMut(usize) + Send + 'static) -> Self {
        self.on_load_complete = Some(Box::new(f));
        self
    }

    /// Called with `(page, page_count)` after [`DocumentSession::jump_to`]
    #[must_use]
    pub fn on_page_changed(mut self, f: impl FnMut(usize, usize) + Send + 'static) -> Self {
        self.on_page_changed = Some(Box::new(f));
        self
    }
}

/// What happened to a worker result once it reached the caller thread
#[derive(Debug)]
pub enum SessionEvent {
    TileCached {
        key: TileKey,
        thumbnail: bool,
        evicted: usize,
    },
    /// An equal tile was already cached
    TileDuplicate { key: TileKey },
    RenderFailed {
        request: RenderRequest,
        error: RenderFault,
    },
}

struct LoadedDocument {
    worker: RenderWorker,
    responses: flume::Receiver<RenderResponse>,
    info: DocumentInfo,
    pages: PageMap,
    viewport: Viewport,
    optimal: PageSize,
    current_page: usize,
}

pub struct DocumentSession {
    config: TileConfig,
    planner: TilePlanner,
    cache: Arc<Mutex<TileCache>>,
    listeners: Listeners,
    document: Option<LoadedDocument>,
    /// Results collected during a replan, handed out by the next poll
    backlog: Vec<SessionEvent>,
}

impl DocumentSession {
    #[must_use]
    pub fn new(config: TileConfig, listeners: Listeners) -> Self {
        let cache = TileCache::new(config.cache_capacity, config.thumbnail_capacity);
        Self {
            config,
            planner: TilePlanner::new(config),
            cache: Arc::new(Mutex::new(cache)),
            listeners,
            document: None,
            backlog: Vec::new(),
        }
    }

    /// Load a document from an already opened backend.
    ///
    /// `page_order` optionally lists the document pages in the order the
    /// user sees them.
    pub fn load_document<B>(
        &mut self,
        backend: B,
        page_order: Option<Vec<usize>>,
    ) -> Result<DocumentInfo, SessionError>
    where
        B: DecodeBackend + Send + 'static,
    {
        self.load_with(move || Ok(backend), page_order)
    }

    /// Load a document whose backend is opened by `open` on the render
    /// thread. Use this for backends that cannot be sent between threads.
    pub fn load_with<B, F>(
        &mut self,
        open: F,
        page_order: Option<Vec<usize>>,
    ) -> Result<DocumentInfo, SessionError>
    where
        B: DecodeBackend + 'static,
        F: FnOnce() -> Result<B, RenderFault> + Send + 'static,
    {
        if self.document.is_some() {
            return Err(SessionError::AlreadyLoaded);
        }

        let (tx, responses) = flume::unbounded();
        let on_tile_ready = self.listeners.on_tile_ready.clone();
        let (mut worker, info) = RenderWorker::spawn(open, move |response| {
            if let (Some(notify), RenderResponse::Tile(tile)) = (&on_tile_ready, &response) {
                notify(tile);
            }
            if tx.send(response).is_err() {
                trace!("Session gone, dropping render result");
            }
        })?;

        if info.page_count == 0 {
            worker.stop();
            return Err(SessionError::EmptyDocument);
        }

        let pages = match page_order {
            Some(order) => PageMap::with_order(info.page_count, order),
            None => PageMap::identity(info.page_count),
        };
        let page_count = pages.page_count();
        info!(
            "Loaded document: {} pages ({} shown), page size {}x{}",
            info.page_count, page_count, info.page_size.width, info.page_size.height
        );

        self.document = Some(LoadedDocument {
            worker,
            responses,
            info,
            pages,
            viewport: Viewport::default(),
            optimal: PageSize::default(),
            current_page: 0,
        });

        if let Some(notify) = self.listeners.on_load_complete.as_mut() {
            notify(page_count);
        }
        Ok(info)
    }

    /// Record new viewport geometry and replan.
    ///
    /// Every pending request is cancelled first, including a tile already
    /// being rendered.
    pub fn on_viewport_changed(
        &mut self,
        width: f32,
        height: f32,
        offset_x: f32,
        offset_y: f32,
        zoom: f32,
        current_page: usize,
    ) -> PlanSummary {
        let Some(doc) = self.document.as_mut() else {
            debug!("Viewport changed with no document loaded");
            return PlanSummary::default();
        };

        let viewport = Viewport::new(
            width,
            height,
            offset_x,
            offset_y,
            self.config.clamp_zoom(zoom),
        );
        if viewport.resized_from(&doc.viewport) || doc.optimal.is_empty() {
            doc.optimal = optimal_page_size(width, height, doc.info.page_size);
            debug!(
                "Optimal page size {}x{} for viewport {width}x{height}",
                doc.optimal.width, doc.optimal.height
            );
        }
        doc.viewport = viewport;
        doc.current_page = doc
            .pages
            .clamp(i64::try_from(current_page).unwrap_or(i64::MAX));

        self.replan()
    }

    /// Show `page` centered at zoom 1. Out of range pages are clamped.
    pub fn jump_to(&mut self, page: i64) -> PlanSummary {
        let Some(doc) = self.document.as_mut() else {
            return PlanSummary::default();
        };

        let page = doc.pages.clamp(page);
        let slot = doc.pages.layout_slot(page);
        doc.current_page = page;
        doc.viewport.zoom = self.config.clamp_zoom(1.0);
        doc.viewport.offset_x = center_offset_for_page(slot, doc.viewport.width, doc.optimal.width);
        doc.viewport.offset_y = (doc.viewport.height - doc.optimal.height) / 2.0;
        let page_count = doc.pages.page_count();

        let summary = self.replan();
        if let Some(notify) = self.listeners.on_page_changed.as_mut() {
            notify(page, page_count);
        }
        summary
    }

    /// Move the viewport to the given strip offsets, clamped so the current
    /// page stays on screen.
    pub fn move_to(&mut self, offset_x: f32, offset_y: f32) -> PlanSummary {
        let Some(doc) = self.document.as_mut() else {
            return PlanSummary::default();
        };

        doc.viewport.offset_x = offset_x;
        doc.viewport.offset_y = offset_y;
        let slot = doc.pages.layout_slot(doc.current_page);
        (doc.viewport.offset_x, doc.viewport.offset_y) =
            clamp_offsets(&doc.viewport, doc.optimal, slot);

        self.replan()
    }

    pub fn move_relative_to(&mut self, dx: f32, dy: f32) -> PlanSummary {
        let Some(viewport) = self.viewport() else {
            return PlanSummary::default();
        };
        self.move_to(viewport.offset_x + dx, viewport.offset_y + dy)
    }

    /// Zoom while keeping the screen point `(pivot_x, pivot_y)` fixed
    pub fn zoom_centered_to(&mut self, zoom: f32, pivot_x: f32, pivot_y: f32) -> PlanSummary {
        let Some(doc) = self.document.as_mut() else {
            return PlanSummary::default();
        };

        let zoom = self.config.clamp_zoom(zoom);
        let ratio = if doc.viewport.zoom > 0.0 {
            zoom / doc.viewport.zoom
        } else {
            1.0
        };
        let offset_x = doc.viewport.offset_x * ratio + pivot_x - pivot_x * ratio;
        let offset_y = doc.viewport.offset_y * ratio + pivot_y - pivot_y * ratio;
        doc.viewport.zoom = zoom;

        self.move_to(offset_x, offset_y)
    }

    /// Back to zoom 1; offsets are left alone
    pub fn reset_zoom(&mut self) -> PlanSummary {
        let Some(doc) = self.document.as_mut() else {
            return PlanSummary::default();
        };
        doc.viewport.zoom = self.config.clamp_zoom(1.0);
        self.replan()
    }

    fn replan(&mut self) -> PlanSummary {
        let Some(doc) = self.document.as_ref() else {
            return PlanSummary::default();
        };

        // Nothing of the previous plan is published after the cancel, so
        // whatever is already in the channel is final and can be cached
        // before planning.
        doc.worker.cancel_all_pending();
        self.collect_finished();

        let Some(doc) = self.document.as_mut() else {
            return PlanSummary::default();
        };
        let scene = Scene {
            viewport: doc.viewport,
            optimal: doc.optimal,
            current_slot: doc.pages.layout_slot(doc.current_page),
            pages: &doc.pages,
        };
        let mut cache = lock_cache(&self.cache);
        self.planner.plan(&scene, &mut cache, &mut doc.worker)
    }

    /// Move every finished worker result into the cache.
    ///
    /// Decode failures are reported through `on_render_error` and never
    /// retried.
    pub fn poll_responses(&mut self) -> Vec<SessionEvent> {
        self.collect_finished();
        std::mem::take(&mut self.backlog)
    }

    fn collect_finished(&mut self) {
        let Some(doc) = self.document.as_ref() else {
            return;
        };

        let responses: Vec<RenderResponse> = doc.responses.try_iter().collect();
        for response in responses {
            let event = self.handle_response(response);
            self.backlog.push(event);
        }
    }

    /// Poll until the worker has nothing left to do or `timeout` expires
    pub fn settle(&mut self, timeout: Duration) -> Vec<SessionEvent> {
        let deadline = Instant::now() + timeout;
        let mut events = Vec::new();

        loop {
            events.extend(self.poll_responses());

            let Some(doc) = self.document.as_ref() else {
                break;
            };
            if doc.worker.is_idle() && doc.responses.is_empty() {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Render worker still busy after {timeout:?}");
                break;
            }

            match doc.responses.recv_timeout((deadline - now).min(SETTLE_POLL)) {
                Ok(response) => events.push(self.handle_response(response)),
                Err(flume::RecvTimeoutError::Timeout) => {}
                Err(flume::RecvTimeoutError::Disconnected) => {
                    warn!("Render worker disconnected");
                    break;
                }
            }
        }

        events
    }

    fn handle_response(&mut self, response: RenderResponse) -> SessionEvent {
        match response {
            RenderResponse::Tile(tile) => {
                let key = *tile.key();
                let thumbnail = tile.is_thumbnail();
                match lock_cache(&self.cache).insert(tile) {
                    InsertOutcome::Inserted { evicted } => SessionEvent::TileCached {
                        key,
                        thumbnail,
                        evicted,
                    },
                    InsertOutcome::AlreadyCached => SessionEvent::TileDuplicate { key },
                }
            }
            RenderResponse::Error { request, error } => {
                if let Some(notify) = self.listeners.on_render_error.as_mut() {
                    notify(&request, &error);
                }
                SessionEvent::RenderFailed { request, error }
            }
        }
    }

    /// Release the document: cancel queued work, stop the worker (dropping
    /// the backend) and clear the cache. Does nothing if nothing is loaded.
    pub fn unload(&mut self) {
        let Some(mut doc) = self.document.take() else {
            return;
        };

        doc.worker.cancel_all_pending();
        doc.worker.stop();
        lock_cache(&self.cache).clear();
        self.backlog.clear();
        info!("Document unloaded");
    }

    /// Run `f` with the cache locked
    pub fn with_cache<R>(&self, f: impl FnOnce(&TileCache) -> R) -> R {
        f(&lock_cache(&self.cache))
    }

    /// Shared handle for drawing from another thread
    #[must_use]
    pub fn cache_handle(&self) -> Arc<Mutex<TileCache>> {
        Arc::clone(&self.cache)
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        lock_cache(&self.cache).stats()
    }

    #[must_use]
    pub fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    /// Number of user pages, 0 when nothing is loaded
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.document
            .as_ref()
            .map_or(0, |doc| doc.pages.page_count())
    }

    #[must_use]
    pub fn current_page(&self) -> Option<usize> {
        self.document.as_ref().map(|doc| doc.current_page)
    }

    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.document.as_ref().map(|doc| doc.viewport)
    }

    /// Page size at zoom 1 for the current viewport
    #[must_use]
    pub fn optimal_page_size(&self) -> Option<PageSize> {
        self.document.as_ref().map(|doc| doc.optimal)
    }

    #[must_use]
    pub fn document_info(&self) -> Option<DocumentInfo> {
        self.document.as_ref().map(|doc| doc.info)
    }

    /// Regular tile requests waiting for the worker
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.document
            .as_ref()
            .map_or(0, |doc| doc.worker.pending_tiles())
    }

    #[must_use]
    pub fn config(&self) -> &TileConfig {
        &self.config
    }
}

impl Drop for DocumentSession {
    fn drop(&mut self) {
        self.unload();
    }
}

fn lock_cache(cache: &Mutex<TileCache>) -> MutexGuard<'_, TileCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::render::backend::PatternBackend;
    use crate::test_utils::test_helpers::RecordingBackend;

    const SETTLE: Duration = Duration::from_secs(10);

    fn pattern(pages: usize) -> PatternBackend {
        PatternBackend::new(pages, PageSize::new(600.0, 800.0))
    }

    #[test]
    fn rejects_empty_documents() {
        let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
        let result = session.load_document(pattern(0), None);
        assert!(matches!(result, Err(SessionError::EmptyDocument)));
        assert!(!session.is_loaded());
    }

    #[test]
    fn second_load_requires_unload() {
        let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
        session.load_document(pattern(2), None).unwrap();
        assert!(matches!(
            session.load_document(pattern(2), None),
            Err(SessionError::AlreadyLoaded)
        ));

        session.unload();
        session.load_document(pattern(3), None).unwrap();
        assert_eq!(session.page_count(), 3);
    }

    #[test]
    fn load_complete_reports_user_page_count() {
        let reported = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&reported);
        let listeners = Listeners::new().on_load_complete(move |count| {
            sink.store(count, Ordering::SeqCst);
        });

        let mut session = DocumentSession::new(TileConfig::default(), listeners);
        session
            .load_document(pattern(8), Some(vec![0, 4, 4, 6, 6, 6, 3]))
            .unwrap();
        assert_eq!(reported.load(Ordering::SeqCst), 7);
    }

    #[test]
    fn jump_to_clamps_and_notifies() {
        let changes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&changes);
        let listeners = Listeners::new().on_page_changed(move |page, count| {
            sink.lock().unwrap().push((page, count));
        });

        let mut session = DocumentSession::new(TileConfig::default(), listeners);
        session.load_document(pattern(5), None).unwrap();
        session.on_viewport_changed(800.0, 600.0, 0.0, 0.0, 1.0, 0);

        session.jump_to(-2);
        session.jump_to(42);
        assert_eq!(*changes.lock().unwrap(), vec![(0, 5), (4, 5)]);
        assert_eq!(session.current_page(), Some(4));

        let viewport = session.viewport().unwrap();
        let optimal = session.optimal_page_size().unwrap();
        assert_eq!(viewport.zoom, 1.0);
        assert_eq!(
            viewport.offset_x,
            center_offset_for_page(4, 800.0, optimal.width)
        );
    }

    #[test]
    fn rendered_tiles_land_in_the_cache() {
        let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
        session.load_document(pattern(1), None).unwrap();

        let summary = session.on_viewport_changed(300.0, 400.0, 0.0, 0.0, 1.0, 0);
        assert_eq!(summary.thumbnails, 1);
        assert!(summary.requested > 0);

        let events = session.settle(SETTLE);
        let cached = events
            .iter()
            .filter(|event| matches!(event, SessionEvent::TileCached { thumbnail: false, .. }))
            .count();
        assert_eq!(cached, summary.requested);

        let stats = session.cache_stats();
        assert_eq!(stats.active, summary.requested);
        assert_eq!(stats.thumbnails, 1);
    }

    #[test]
    fn zoom_is_clamped_before_planning() {
        let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
        session.load_document(pattern(1), None).unwrap();
        session.on_viewport_changed(300.0, 400.0, 0.0, 0.0, 0.25, 0);
        assert_eq!(session.viewport().unwrap().zoom, 1.0);
    }

    #[test]
    fn unload_clears_cache_and_is_idempotent() {
        let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
        session.load_document(pattern(2), None).unwrap();
        session.on_viewport_changed(300.0, 400.0, 0.0, 0.0, 1.0, 0);
        session.settle(SETTLE);
        assert!(!session.with_cache(TileCache::is_empty));

        session.unload();
        session.unload();
        assert!(session.with_cache(TileCache::is_empty));
        assert_eq!(session.page_count(), 0);
        assert_eq!(session.poll_responses().len(), 0);
    }

    #[test]
    fn finished_tiles_are_not_requested_again_before_polling() {
        let backend = RecordingBackend::new(1, PageSize::new(1000.0, 1000.0));
        let log = backend.log();
        let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
        session.load_document(backend, None).unwrap();

        let first = session.on_viewport_changed(768.0, 768.0, 0.0, 0.0, 1.0, 0);
        assert_eq!((first.requested, first.thumbnails), (9, 1));

        // Let the worker finish without collecting its results
        let deadline = Instant::now() + SETTLE;
        while Instant::now() < deadline {
            let doc = session.document.as_ref().unwrap();
            if doc.worker.is_idle() && doc.responses.len() == 10 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(log.len(), 10);

        let second = session.on_viewport_changed(768.0, 768.0, 0.0, 0.0, 1.0, 0);
        assert_eq!(second.requested, 0);
        assert_eq!(second.thumbnails, 0);
        assert_eq!(second.promoted, 9);

        // Results collected by the replan are still reported once
        let cached = session
            .settle(SETTLE)
            .iter()
            .filter(|event| matches!(event, SessionEvent::TileCached { .. }))
            .count();
        assert_eq!(cached, 10);
        assert_eq!(log.len(), 10);
        assert!(session.poll_responses().is_empty());
    }

    #[test]
    fn move_to_keeps_page_on_screen() {
        let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
        session.load_document(pattern(3), None).unwrap();
        session.on_viewport_changed(600.0, 800.0, 0.0, 0.0, 1.0, 1);
        let center = center_offset_for_page(1, 600.0, 600.0);

        session.move_to(center + 5000.0, 40.0);
        let viewport = session.viewport().unwrap();
        assert_eq!(viewport.offset_x, center + 600.0);
        assert_eq!(viewport.offset_y, 0.0);

        session.move_relative_to(-100.0, 0.0);
        assert_eq!(session.viewport().unwrap().offset_x, center + 500.0);
    }

    #[test]
    fn zoom_centered_to_keeps_pivot_fixed() {
        let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
        session.load_document(pattern(1), None).unwrap();
        session.on_viewport_changed(600.0, 800.0, 0.0, 0.0, 1.0, 0);

        // The strip point under the pivot is the same before and after
        let (pivot_x, pivot_y) = (300.0, 400.0);
        session.zoom_centered_to(2.0, pivot_x, pivot_y);
        let viewport = session.viewport().unwrap();
        assert_eq!(viewport.zoom, 2.0);
        assert_eq!((pivot_x - viewport.offset_x) / 2.0, pivot_x);
        assert_eq!((pivot_y - viewport.offset_y) / 2.0, pivot_y);

        // Out of range zoom is clamped, and reset goes back to 1
        session.zoom_centered_to(50.0, pivot_x, pivot_y);
        assert_eq!(session.viewport().unwrap().zoom, 10.0);
        session.reset_zoom();
        assert_eq!(session.viewport().unwrap().zoom, 1.0);
    }

    #[test]
    fn inverted_zoom_bounds_do_not_panic() {
        let config = TileConfig {
            min_zoom: 5.0,
            max_zoom: 2.0,
            ..TileConfig::default()
        };
        let mut session = DocumentSession::new(config, Listeners::new());
        session.load_document(pattern(1), None).unwrap();
        session.on_viewport_changed(300.0, 400.0, 0.0, 0.0, 3.0, 0);
        assert_eq!(session.viewport().unwrap().zoom, 3.0);
    }

    #[test]
    fn calls_without_document_are_noops() {
        let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
        assert_eq!(
            session.on_viewport_changed(100.0, 100.0, 0.0, 0.0, 1.0, 3),
            PlanSummary::default()
        );
        assert_eq!(session.jump_to(2), PlanSummary::default());
        assert_eq!(session.move_relative_to(10.0, 10.0), PlanSummary::default());
        assert_eq!(session.zoom_centered_to(2.0, 0.0, 0.0), PlanSummary::default());
        assert!(session.settle(SETTLE).is_empty());
    }
}
