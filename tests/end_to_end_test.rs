use std::time::Duration;

use tileview::render::{
    DocumentSession, Listeners, PageMap, PageSize, RenderRequest, Scene, SessionEvent,
    TileCache, TileConfig, TilePlanner, Viewport, center_offset_for_page, optimal_page_size,
};
use tileview::test_utils::test_helpers::{RecordingBackend, gated};

const SETTLE: Duration = Duration::from_secs(10);
const PAGE: PageSize = PageSize::new(1000.0, 1000.0);

/// Page 3 of 10 shown at zoom 1, with a window of 3 pages and a 7x7 cache
fn plan_around_page_three(viewport_size: f32) -> Vec<RenderRequest> {
    let config = TileConfig::default();
    let pages = PageMap::identity(10);
    let optimal = optimal_page_size(viewport_size, viewport_size, PAGE);
    let viewport = Viewport::new(
        viewport_size,
        viewport_size,
        center_offset_for_page(3, viewport_size, optimal.width),
        0.0,
        1.0,
    );
    let scene = Scene {
        viewport,
        optimal,
        current_slot: 3,
        pages: &pages,
    };

    let mut cache = TileCache::new(config.cache_capacity, config.thumbnail_capacity);
    let mut requests = Vec::new();
    TilePlanner::new(config).plan(&scene, &mut cache, &mut requests);
    requests
}

#[test]
fn current_page_tiles_rank_below_neighbours() {
    let requests = plan_around_page_three(768.0);
    let tiles: Vec<&RenderRequest> = requests.iter().filter(|r| !r.thumbnail).collect();
    assert_eq!(tiles.len(), 27);

    let max_rank_of = |page: usize| {
        tiles
            .iter()
            .filter(|r| r.key.user_page == page)
            .map(|r| r.rank)
            .max()
            .unwrap()
    };
    let min_rank_of = |page: usize| {
        tiles
            .iter()
            .filter(|r| r.key.user_page == page)
            .map(|r| r.rank)
            .min()
            .unwrap()
    };

    assert!(max_rank_of(3) < min_rank_of(4));
    assert!(max_rank_of(3) < min_rank_of(2));
    assert!(max_rank_of(4) < min_rank_of(2));

    let mut ranks: Vec<u32> = tiles.iter().map(|r| r.rank).collect();
    ranks.dedup();
    assert_eq!(ranks, (0..27).collect::<Vec<_>>());
}

#[test]
fn full_grid_on_current_page_spends_whole_budget() {
    let requests = plan_around_page_three(1792.0);
    let tiles: Vec<&RenderRequest> = requests.iter().filter(|r| !r.thumbnail).collect();

    assert_eq!(tiles.len(), 49);
    assert!(tiles.iter().all(|r| r.key.user_page == 3));
    // The neighbours still get a thumbnail
    let thumbs: Vec<usize> = requests
        .iter()
        .filter(|r| r.thumbnail)
        .map(|r| r.key.user_page)
        .collect();
    assert_eq!(thumbs, vec![3]);
}

#[test]
fn pending_requests_never_exceed_cache_capacity() {
    let (backend, mut gate) = gated(RecordingBackend::new(10, PAGE));
    let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
    session.load_document(backend, None).unwrap();

    session.on_viewport_changed(1792.0, 1792.0, 0.0, 0.0, 1.0, 3);
    assert!(gate.wait_started(SETTLE).is_some());

    let capacity = session.config().cache_capacity;
    for step in 0..20 {
        let zoom = 1.0 + step as f32 * 0.25;
        session.on_viewport_changed(1792.0, 1792.0, -5376.0 * zoom, 0.0, zoom, 3);
        assert!(session.pending_requests() <= capacity);
    }

    gate.open();
    session.settle(SETTLE);
    let stats = session.cache_stats();
    assert!(stats.active + stats.passive <= capacity);
}

#[test]
fn session_renders_current_page_first() {
    let backend = RecordingBackend::new(10, PAGE);
    let log = backend.log();
    let mut session = DocumentSession::new(TileConfig::default(), Listeners::new());
    session.load_document(backend, None).unwrap();

    let offset_x = center_offset_for_page(3, 768.0, 768.0);
    session.on_viewport_changed(768.0, 768.0, offset_x, 0.0, 1.0, 3);
    let events = session.settle(SETTLE);

    let pages = log.pages();
    assert_eq!(pages.len(), 30);
    assert!(pages[..10].iter().all(|&page| page == 3));

    assert!(
        events
            .iter()
            .all(|event| !matches!(event, SessionEvent::RenderFailed { .. }))
    );
    let stats = session.cache_stats();
    assert_eq!(stats.active, 27);
    assert_eq!(stats.thumbnails, 3);
}
