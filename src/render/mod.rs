//! Tiled page rendering infrastructure

mod backend;
mod cache;
mod layout;
#[cfg(feature = "pdf")]
mod mupdf_backend;
mod page_map;
mod planner;
mod request;
mod session;
mod spiral;
mod tile;
mod types;
mod worker;

pub use backend::{DecodeBackend, PagePool, PatternBackend};
pub use cache::{CacheStats, InsertOutcome, TileCache};
pub use layout::{center_offset_for_page, clamp_offsets, optimal_page_size, to_current_scale};
#[cfg(feature = "pdf")]
pub use mupdf_backend::MupdfBackend;
pub use page_map::PageMap;
pub use planner::{PagePlan, PlanSummary, Scene, TileGrid, TilePlanner};
pub use request::{RenderFault, RenderRequest, RenderResponse, RequestSink};
pub use session::{DocumentSession, Listeners, SessionError, SessionEvent};
pub use spiral::{Spiral, SpiralSelector};
pub use tile::{Tile, TileKey};
pub use types::*;
pub use worker::{RenderWorker, WorkerState};

/// Edge length of a rendered tile in pixels
pub const DEFAULT_PART_SIZE: f32 = 256.0;
/// Tiles per side of the planning grid; the cache holds its square
pub const DEFAULT_GRID_SIZE: usize = 7;
pub const DEFAULT_CACHE_CAPACITY: usize = DEFAULT_GRID_SIZE * DEFAULT_GRID_SIZE;
pub const DEFAULT_THUMBNAIL_CAPACITY: usize = 4;
/// Thumbnail size relative to the optimal page size
pub const DEFAULT_THUMBNAIL_RATIO: f32 = 0.2;
/// Pages planned around the current one, current included
pub const DEFAULT_LOADED_PAGES: usize = 3;
/// Decoded page handles kept open by the PDF backend
pub const DEFAULT_PAGE_POOL_SIZE: usize = 16;
pub const MIN_ZOOM: f32 = 1.0;
pub const MAX_ZOOM: f32 = 10.0;
