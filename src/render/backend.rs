//! Decode backend abstraction
//!
//! The backend turns a region of a page into pixels. Implementations are not
//! required to be thread safe: the render worker owns its backend and is the
//! only caller.

use std::num::NonZeroUsize;

use image::Rgba;
use log::trace;
use lru::LruCache;

use super::request::RenderFault;
use super::types::{Bitmap, DocumentInfo, PageSize, RelativeRect};

/// Source of page rasters
pub trait DecodeBackend {
    /// Number of physical pages
    fn page_count(&self) -> usize;

    /// Width of page `page` in document units
    fn page_width(&mut self, page: usize) -> Result<f32, RenderFault>;

    /// Height of page `page` in document units
    fn page_height(&mut self, page: usize) -> Result<f32, RenderFault>;

    /// Render the `bounds` region of `page` into a `width × height` bitmap
    fn render(
        &mut self,
        page: usize,
        width: u32,
        height: u32,
        bounds: RelativeRect,
    ) -> Result<Bitmap, RenderFault>;

    /// Page count and first page size
    fn document_info(&mut self) -> Result<DocumentInfo, RenderFault> {
        let page_count = self.page_count();
        if page_count == 0 {
            return Ok(DocumentInfo {
                page_count,
                page_size: PageSize::default(),
            });
        }
        Ok(DocumentInfo {
            page_count,
            page_size: PageSize::new(self.page_width(0)?, self.page_height(0)?),
        })
    }
}

impl<B: DecodeBackend + ?Sized> DecodeBackend for Box<B> {
    fn page_count(&self) -> usize {
        (**self).page_count()
    }

    fn page_width(&mut self, page: usize) -> Result<f32, RenderFault> {
        (**self).page_width(page)
    }

    fn page_height(&mut self, page: usize) -> Result<f32, RenderFault> {
        (**self).page_height(page)
    }

    fn render(
        &mut self,
        page: usize,
        width: u32,
        height: u32,
        bounds: RelativeRect,
    ) -> Result<Bitmap, RenderFault> {
        (**self).render(page, width, height, bounds)
    }

    fn document_info(&mut self) -> Result<DocumentInfo, RenderFault> {
        (**self).document_info()
    }
}

/// Bounded pool of decoded page handles.
///
/// Eviction is first-in first-out: lookups never refresh an entry, so the
/// page loaded longest ago is released first once the pool is full.
pub struct PagePool<P> {
    pages: LruCache<usize, P>,
}

impl<P> PagePool<P> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            pages: LruCache::new(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN)),
        }
    }

    /// Get page `index`, loading it with `load` on a miss
    pub fn get_or_load<E>(
        &mut self,
        index: usize,
        load: impl FnOnce() -> Result<P, E>,
    ) -> Result<&P, E> {
        if !self.pages.contains(&index) {
            let page = load()?;
            if let Some((evicted, _)) = self.pages.push(index, page) {
                trace!("Releasing decoded page {evicted}");
            }
        }

        match self.pages.peek(&index) {
            Some(page) => Ok(page),
            None => unreachable!("page {index} was inserted above"),
        }
    }

    #[must_use]
    pub fn contains(&self, index: usize) -> bool {
        self.pages.contains(&index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn clear(&mut self) {
        self.pages.clear();
    }
}

const PATTERN_CELLS: f32 = 8.0;

/// Generated document with a distinct checkerboard on every page
#[derive(Clone, Debug)]
pub struct PatternBackend {
    page_count: usize,
    page_size: PageSize,
}

impl PatternBackend {
    #[must_use]
    pub fn new(page_count: usize, page_size: PageSize) -> Self {
        Self {
            page_count,
            page_size,
        }
    }

    fn check_page(&self, page: usize) -> Result<(), RenderFault> {
        if page >= self.page_count {
            return Err(RenderFault::PageOutOfRange {
                page,
                page_count: self.page_count,
            });
        }
        Ok(())
    }

    fn page_color(page: usize) -> Rgba<u8> {
        let hue = (page * 47 % 255) as u8;
        Rgba([hue, 255 - hue, (page * 13 % 255) as u8, 255])
    }
}

impl DecodeBackend for PatternBackend {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_width(&mut self, page: usize) -> Result<f32, RenderFault> {
        self.check_page(page)?;
        Ok(self.page_size.width)
    }

    fn page_height(&mut self, page: usize) -> Result<f32, RenderFault> {
        self.check_page(page)?;
        Ok(self.page_size.height)
    }

    fn render(
        &mut self,
        page: usize,
        width: u32,
        height: u32,
        bounds: RelativeRect,
    ) -> Result<Bitmap, RenderFault> {
        self.check_page(page)?;
        if width == 0 || height == 0 {
            return Err(RenderFault::UnsupportedSize { width, height });
        }

        let ink = Self::page_color(page);
        let paper = Rgba([250, 250, 245, 255]);
        let step_x = bounds.width() / width as f32;
        let step_y = bounds.height() / height as f32;

        Ok(Bitmap::from_fn(width, height, |x, y| {
            let u = bounds.left + (x as f32 + 0.5) * step_x;
            let v = bounds.top + (y as f32 + 0.5) * step_y;
            let cell = (u * PATTERN_CELLS) as u32 + (v * PATTERN_CELLS) as u32;
            if cell % 2 == 0 { ink } else { paper }
        }))
    }
}
