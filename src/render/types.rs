//! Core geometry and configuration types for tiled rendering

use super::{
    DEFAULT_CACHE_CAPACITY, DEFAULT_LOADED_PAGES, DEFAULT_PAGE_POOL_SIZE, DEFAULT_PART_SIZE,
    DEFAULT_THUMBNAIL_CAPACITY, DEFAULT_THUMBNAIL_RATIO, MAX_ZOOM, MIN_ZOOM,
};

/// Rendered raster buffer (RGBA, 8 bits per channel)
pub type Bitmap = image::RgbaImage;

/// Rectangle in page-relative coordinates.
///
/// `(0, 0)` is the top left corner of the page and `(1, 1)` the bottom right.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct RelativeRect {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
}

impl RelativeRect {
    /// The whole page
    pub const FULL_PAGE: Self = Self::new(0.0, 0.0, 1.0, 1.0);

    #[must_use]
    pub const fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    #[must_use]
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    #[must_use]
    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    /// True when the rectangle covers no area
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 || self.height() <= 0.0
    }
}

/// Width and height in pixels
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Viewport geometry supplied by the host view.
///
/// Pages are laid out side by side on a horizontal strip. The offsets are the
/// translation applied to that strip, so scrolling right makes `offset_x`
/// more negative.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub zoom: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 0.0,
            height: 0.0,
            offset_x: 0.0,
            offset_y: 0.0,
            zoom: 1.0,
        }
    }
}

impl Viewport {
    #[must_use]
    pub fn new(width: f32, height: f32, offset_x: f32, offset_y: f32, zoom: f32) -> Self {
        Self {
            width,
            height,
            offset_x,
            offset_y,
            zoom,
        }
    }

    /// Returns true if width or height differ from `other`
    #[must_use]
    pub fn resized_from(&self, other: &Viewport) -> bool {
        (self.width - other.width).abs() > f32::EPSILON
            || (self.height - other.height).abs() > f32::EPSILON
    }
}

/// Document metadata read from the decode backend when it is loaded
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DocumentInfo {
    /// Number of physical pages
    pub page_count: usize,
    /// Size of the first page; every page is laid out with this size
    pub page_size: PageSize,
}

/// Tuning knobs for the tile pipeline
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileConfig {
    /// Edge length of a rendered tile in pixels
    pub part_size: f32,
    /// Maximum number of regular tiles kept in the cache
    pub cache_capacity: usize,
    /// Maximum number of page thumbnails kept in the cache
    pub thumbnail_capacity: usize,
    /// Thumbnail resolution relative to the optimal page size
    pub thumbnail_ratio: f32,
    /// Number of pages planned around the current one (current included)
    pub loaded_pages: usize,
    /// Number of decoded page handles kept by the decode backend
    pub page_pool_size: usize,
    pub min_zoom: f32,
    pub max_zoom: f32,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            part_size: DEFAULT_PART_SIZE,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            thumbnail_capacity: DEFAULT_THUMBNAIL_CAPACITY,
            thumbnail_ratio: DEFAULT_THUMBNAIL_RATIO,
            loaded_pages: DEFAULT_LOADED_PAGES,
            page_pool_size: DEFAULT_PAGE_POOL_SIZE,
            min_zoom: MIN_ZOOM,
            max_zoom: MAX_ZOOM,
        }
    }
}

impl TileConfig {
    /// Half of the planning window; pages `current - half ..= current + half`
    #[must_use]
    pub fn half_window(&self) -> usize {
        self.loaded_pages / 2
    }

    /// Restrict a zoom factor to the configured range. Inverted bounds are
    /// swapped.
    #[must_use]
    pub fn clamp_zoom(&self, zoom: f32) -> f32 {
        let low = self.min_zoom.min(self.max_zoom);
        let high = self.min_zoom.max(self.max_zoom);
        if zoom.is_nan() {
            return low;
        }
        zoom.max(low).min(high)
    }
}
