//! Viewport-driven tile selection
//!
//! Each page is cut into a grid of `part_size` blocks at the current zoom.
//! Starting from the block under the center of the screen, blocks are walked
//! in spiral order: cached blocks are promoted, missing ones are requested
//! with increasing ranks until the budget is spent. Pages are swept as
//! `current, current+1, current-1, current+2, ...` so the visible page is
//! always planned first.

use std::ops::ControlFlow;

use log::debug;

use super::cache::TileCache;
use super::layout::to_current_scale;
use super::page_map::PageMap;
use super::request::{RenderRequest, RequestSink};
use super::spiral::SpiralSelector;
use super::tile::TileKey;
use super::types::{PageSize, RelativeRect, TileConfig, Viewport};

/// Everything the planner needs to know about the current view
#[derive(Clone, Copy, Debug)]
pub struct Scene<'a> {
    /// Viewport with the zoom already clamped
    pub viewport: Viewport,
    /// Size of a page at zoom 1
    pub optimal: PageSize,
    /// Layout slot of the page currently shown
    pub current_slot: usize,
    pub pages: &'a PageMap,
}

/// Tile grid of one page at a given zoom
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileGrid {
    pub rows: usize,
    pub cols: usize,
    /// Page-relative width of a full cell
    pub cell_width: f32,
    /// Page-relative height of a full cell
    pub cell_height: f32,
    part_size: f32,
}

impl TileGrid {
    /// Grid for a page of size `optimal` shown at `zoom`. `None` when the
    /// page has no area.
    #[must_use]
    pub fn compute(part_size: f32, optimal: PageSize, zoom: f32) -> Option<Self> {
        if optimal.is_empty() || zoom <= 0.0 || part_size <= 0.0 {
            return None;
        }

        let part_width = part_size / optimal.width / zoom;
        let part_height = part_size / optimal.height / zoom;
        let rows = (1.0 / part_height).ceil().max(1.0) as usize;
        let cols = (1.0 / part_width).ceil().max(1.0) as usize;

        Some(Self {
            rows,
            cols,
            cell_width: 1.0 / cols as f32,
            cell_height: 1.0 / rows as f32,
            part_size,
        })
    }

    /// Bounds and raster size of a cell.
    ///
    /// Cells on the right and bottom edges are clipped to the page, and their
    /// raster size shrinks in proportion. Returns `None` for cells with no
    /// area left after clipping.
    #[must_use]
    pub fn cell(&self, row: usize, col: usize) -> Option<(RelativeRect, f32, f32)> {
        let left = self.cell_width * col as f32;
        let top = self.cell_height * row as f32;
        let mut width = self.cell_width;
        let mut height = self.cell_height;

        let mut render_width = self.part_size / width;
        let mut render_height = self.part_size / height;
        if left + width > 1.0 {
            width = 1.0 - left;
        }
        if top + height > 1.0 {
            height = 1.0 - top;
        }
        render_width *= width;
        render_height *= height;

        if render_width <= 0.0 || render_height <= 0.0 {
            return None;
        }

        Some((
            RelativeRect::new(left, top, left + width, top + height),
            render_width,
            render_height,
        ))
    }

    /// Cell under the center of the viewport for the page at `slot`,
    /// clamped into the grid
    #[must_use]
    pub fn center_cell(&self, scene: &Scene<'_>, slot: usize) -> (usize, usize) {
        let zoom = scene.viewport.zoom;
        let page_width = to_current_scale(scene.optimal.width, zoom);
        let page_height = to_current_scale(scene.optimal.height, zoom);

        let middle_x = -scene.viewport.offset_x + scene.viewport.width / 2.0;
        let middle_y = -scene.viewport.offset_y + scene.viewport.height / 2.0;
        let page_x = middle_x - slot as f32 * page_width;

        let x_ratio = page_x / page_width;
        let y_ratio = middle_y / page_height;

        (
            clamp_cell(y_ratio * self.rows as f32, self.rows),
            clamp_cell(x_ratio * self.cols as f32, self.cols),
        )
    }
}

fn clamp_cell(position: f32, count: usize) -> usize {
    if position.is_nan() || position <= 0.0 {
        return 0;
    }
    (position as usize).min(count.saturating_sub(1))
}

/// Outcome of planning one page
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PagePlan {
    /// Tiles counted against the budget (hits and new requests)
    pub tiles: usize,
    pub requested: usize,
    pub promoted: usize,
    pub thumbnail_requested: bool,
}

/// Outcome of a full planning pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub pages: usize,
    pub tiles: usize,
    pub requested: usize,
    pub promoted: usize,
    pub thumbnails: usize,
}

impl PlanSummary {
    fn add(&mut self, page: PagePlan) {
        if page.tiles > 0 || page.thumbnail_requested {
            self.pages += 1;
        }
        self.tiles += page.tiles;
        self.requested += page.requested;
        self.promoted += page.promoted;
        self.thumbnails += usize::from(page.thumbnail_requested);
    }
}

/// Decides which tiles to request for the current view
#[derive(Clone, Debug)]
pub struct TilePlanner {
    config: TileConfig,
}

impl TilePlanner {
    #[must_use]
    pub fn new(config: TileConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &TileConfig {
        &self.config
    }

    /// Run a full planning pass.
    ///
    /// Starts a new cache generation, then sweeps the pages around the
    /// current one until the window or the cache capacity is exhausted.
    /// Ranks increase across the whole pass, so tiles of the current page get
    /// the lowest ranks.
    pub fn plan<S: RequestSink>(
        &self,
        scene: &Scene<'_>,
        cache: &mut TileCache,
        sink: &mut S,
    ) -> PlanSummary {
        cache.begin_new_generation();

        let budget = cache.capacity();
        let mut next_rank = 0;
        let mut summary = PlanSummary::default();
        let mut parts = 0;

        for distance in 0..=self.config.half_window() {
            if parts >= budget {
                break;
            }

            if let Some(slot) = scene.current_slot.checked_add(distance) {
                let page = self.plan_page(scene, slot, budget - parts, &mut next_rank, cache, sink);
                parts += page.tiles;
                summary.add(page);
            }

            if distance != 0 && parts < budget {
                if let Some(slot) = scene.current_slot.checked_sub(distance) {
                    let page =
                        self.plan_page(scene, slot, budget - parts, &mut next_rank, cache, sink);
                    parts += page.tiles;
                    summary.add(page);
                }
            }
        }

        debug!(
            "Planned {} tiles around slot {} ({} requested, {} promoted, {} thumbnails)",
            summary.tiles,
            scene.current_slot,
            summary.requested,
            summary.promoted,
            summary.thumbnails
        );
        summary
    }

    /// Plan the tiles of the page at layout slot `slot`, counting at most
    /// `budget` tiles. Ranks are taken from `next_rank`.
    pub fn plan_page<S: RequestSink>(
        &self,
        scene: &Scene<'_>,
        slot: usize,
        budget: usize,
        next_rank: &mut u32,
        cache: &mut TileCache,
        sink: &mut S,
    ) -> PagePlan {
        let mut plan = PagePlan::default();
        if budget == 0 {
            return plan;
        }
        let Some(document_page) = scene.pages.document_page(slot) else {
            return plan;
        };

        plan.thumbnail_requested = self.request_thumbnail(scene, slot, document_page, cache, sink);

        let Some(grid) =
            TileGrid::compute(self.config.part_size, scene.optimal, scene.viewport.zoom)
        else {
            return plan;
        };
        let (start_row, start_col) = grid.center_cell(scene, slot);

        SpiralSelector::new(grid.rows, grid.cols, start_row, start_col).walk(|row, col| {
            let Some((bounds, width, height)) = grid.cell(row, col) else {
                return ControlFlow::Continue(());
            };

            let key = TileKey::new(slot, document_page, width, height, bounds);
            let rank = *next_rank;
            *next_rank += 1;

            if cache.promote_if_present(&key, rank) {
                plan.promoted += 1;
            } else {
                sink.enqueue(RenderRequest::tile(key, rank));
                plan.requested += 1;
            }

            plan.tiles += 1;
            if plan.tiles >= budget {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        plan
    }

    fn request_thumbnail<S: RequestSink>(
        &self,
        scene: &Scene<'_>,
        slot: usize,
        document_page: usize,
        cache: &TileCache,
        sink: &mut S,
    ) -> bool {
        let width = (scene.optimal.width * self.config.thumbnail_ratio).floor();
        let height = (scene.optimal.height * self.config.thumbnail_ratio).floor();
        if width <= 0.0 || height <= 0.0 {
            return false;
        }

        let key = TileKey::new(slot, document_page, width, height, RelativeRect::FULL_PAGE);
        if cache.contains_thumbnail(&key) {
            return false;
        }
        sink.enqueue(RenderRequest::thumbnail(key));
        true
    }
}
