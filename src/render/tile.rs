//! Rendered page fragments

use std::fmt;

use super::types::{Bitmap, RelativeRect};

/// Identity of a tile.
///
/// Two tiles are the same cache entry iff every field matches exactly. The
/// cache rank and the pixels are not part of the identity.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TileKey {
    /// Position of the page on the layout strip (user order, consecutive
    /// duplicates collapsed)
    pub user_page: usize,
    /// Physical page index in the decode backend
    pub document_page: usize,
    /// Requested raster width
    pub pixel_width: f32,
    /// Requested raster height
    pub pixel_height: f32,
    /// Region of the page covered by the tile
    pub bounds: RelativeRect,
}

impl TileKey {
    #[must_use]
    pub fn new(
        user_page: usize,
        document_page: usize,
        pixel_width: f32,
        pixel_height: f32,
        bounds: RelativeRect,
    ) -> Self {
        Self {
            user_page,
            document_page,
            pixel_width,
            pixel_height,
            bounds,
        }
    }

    /// Raster size handed to the decode backend
    #[must_use]
    pub fn raster_size(&self) -> (u32, u32) {
        (
            self.pixel_width.round().max(0.0) as u32,
            self.pixel_height.round().max(0.0) as u32,
        )
    }
}

/// A rendered fragment of a page
pub struct Tile {
    key: TileKey,
    thumbnail: bool,
    rank: u32,
    bitmap: Bitmap,
}

impl Tile {
    #[must_use]
    pub fn new(key: TileKey, thumbnail: bool, rank: u32, bitmap: Bitmap) -> Self {
        Self {
            key,
            thumbnail,
            rank,
            bitmap,
        }
    }

    #[must_use]
    pub fn key(&self) -> &TileKey {
        &self.key
    }

    #[must_use]
    pub fn is_thumbnail(&self) -> bool {
        self.thumbnail
    }

    /// Eviction priority; lower ranks leave the cache first
    #[must_use]
    pub fn rank(&self) -> u32 {
        self.rank
    }

    pub(crate) fn set_rank(&mut self, rank: u32) {
        self.rank = rank;
    }

    #[must_use]
    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    /// Consume the tile, keeping only its pixels
    #[must_use]
    pub fn into_bitmap(self) -> Bitmap {
        self.bitmap
    }
}

impl PartialEq for Tile {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl fmt::Debug for Tile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tile")
            .field("key", &self.key)
            .field("thumbnail", &self.thumbnail)
            .field("rank", &self.rank)
            .field(
                "bitmap",
                &format_args!("{}x{}", self.bitmap.width(), self.bitmap.height()),
            )
            .finish()
    }
}
