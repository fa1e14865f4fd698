//! Render request and response types

use super::tile::{Tile, TileKey};

/// A tile the planner wants rendered
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderRequest {
    /// Identity of the tile to produce
    pub key: TileKey,
    /// Whether the result belongs to the thumbnail pool
    pub thumbnail: bool,
    /// Cache rank the resulting tile is inserted with
    pub rank: u32,
}

impl RenderRequest {
    /// Request a regular tile
    #[must_use]
    pub const fn tile(key: TileKey, rank: u32) -> Self {
        Self {
            key,
            thumbnail: false,
            rank,
        }
    }

    /// Request a full-page thumbnail; thumbnails are not rank ordered
    #[must_use]
    pub const fn thumbnail(key: TileKey) -> Self {
        Self {
            key,
            thumbnail: true,
            rank: 0,
        }
    }
}

/// Errors raised while decoding a tile
#[derive(Debug, thiserror::Error)]
pub enum RenderFault {
    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("page {page} out of range (document has {page_count} pages)")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("unsupported raster size {width}x{height}")]
    UnsupportedSize { width: u32, height: u32 },

    #[error("{detail}")]
    Generic { detail: String },
}

impl RenderFault {
    pub fn generic(msg: impl Into<String>) -> Self {
        Self::Generic { detail: msg.into() }
    }
}

/// Message published by the render worker
#[derive(Debug)]
pub enum RenderResponse {
    /// A tile finished rendering
    Tile(Tile),

    /// The decode backend failed for a request
    Error {
        request: RenderRequest,
        error: RenderFault,
    },
}

/// Destination for render requests produced by the planner
pub trait RequestSink {
    fn enqueue(&mut self, request: RenderRequest);
}

impl RequestSink for Vec<RenderRequest> {
    fn enqueue(&mut self, request: RenderRequest) {
        self.push(request);
    }
}
