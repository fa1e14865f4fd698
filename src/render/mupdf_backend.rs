//! MuPDF decode backend

use std::path::Path;

use log::{debug, info};
use mupdf::{Colorspace, Device, Document, Matrix, Page, Pixmap};

use super::DEFAULT_PAGE_POOL_SIZE;
use super::backend::{DecodeBackend, PagePool};
use super::request::RenderFault;
use super::types::{Bitmap, RelativeRect};

/// PDF pages rendered with MuPDF.
///
/// MuPDF handles are not thread safe; open the backend on the render thread
/// with [`crate::render::DocumentSession::load_with`].
pub struct MupdfBackend {
    document: Document,
    page_count: usize,
    pages: PagePool<Page>,
}

impl MupdfBackend {
    pub fn open(path: &Path) -> Result<Self, RenderFault> {
        Self::open_with_pool(path, DEFAULT_PAGE_POOL_SIZE)
    }

    pub fn open_with_pool(path: &Path, pool_size: usize) -> Result<Self, RenderFault> {
        let document = Document::open(path.to_string_lossy().as_ref())?;
        let page_count = usize::try_from(document.page_count()?).unwrap_or(0);
        info!("Opened {} ({page_count} pages)", path.display());

        Ok(Self {
            document,
            page_count,
            pages: PagePool::new(pool_size),
        })
    }

    fn page(&mut self, index: usize) -> Result<&Page, RenderFault> {
        if index >= self.page_count {
            return Err(RenderFault::PageOutOfRange {
                page: index,
                page_count: self.page_count,
            });
        }

        let document = &self.document;
        self.pages.get_or_load(index, || {
            debug!("Loading page {index}");
            let number = i32::try_from(index).map_err(|_| RenderFault::PageOutOfRange {
                page: index,
                page_count: index,
            })?;
            Ok(document.load_page(number)?)
        })
    }

    fn page_extent(&mut self, index: usize) -> Result<(f32, f32), RenderFault> {
        let bounds = self.page(index)?.bounds()?;
        Ok((bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
    }
}

impl DecodeBackend for MupdfBackend {
    fn page_count(&self) -> usize {
        self.page_count
    }

    fn page_width(&mut self, page: usize) -> Result<f32, RenderFault> {
        Ok(self.page_extent(page)?.0)
    }

    fn page_height(&mut self, page: usize) -> Result<f32, RenderFault> {
        Ok(self.page_extent(page)?.1)
    }

    fn render(
        &mut self,
        page: usize,
        width: u32,
        height: u32,
        bounds: RelativeRect,
    ) -> Result<Bitmap, RenderFault> {
        if width == 0 || height == 0 || bounds.is_empty() {
            return Err(RenderFault::UnsupportedSize { width, height });
        }

        let (page_width, page_height) = self.page_extent(page)?;
        // Scale that maps the tile region onto the requested raster, then
        // shift the region's top-left corner to the pixmap origin
        let scale_x = width as f32 / (bounds.width() * page_width);
        let scale_y = height as f32 / (bounds.height() * page_height);
        let transform = Matrix::new(
            scale_x,
            0.0,
            0.0,
            scale_y,
            -bounds.left * scale_x * page_width,
            -bounds.top * scale_y * page_height,
        );

        let (pixmap_width, pixmap_height) = (
            i32::try_from(width).map_err(|_| RenderFault::UnsupportedSize { width, height })?,
            i32::try_from(height).map_err(|_| RenderFault::UnsupportedSize { width, height })?,
        );
        let mut pixmap = Pixmap::new(
            &Colorspace::device_rgb(),
            0,
            0,
            pixmap_width,
            pixmap_height,
            false,
        )?;
        pixmap.clear_with(255)?;
        {
            let device = Device::from_pixmap(&pixmap)?;
            self.page(page)?.run(&device, &transform)?;
        }

        pixmap_to_bitmap(&pixmap, width, height)
    }
}

/// Copy an RGB pixmap of exactly `width`x`height` into an RGBA bitmap
fn pixmap_to_bitmap(pixmap: &Pixmap, width: u32, height: u32) -> Result<Bitmap, RenderFault> {
    let n = pixmap.n() as usize;
    if n < 3 {
        return Err(RenderFault::generic(format!(
            "Unsupported pixmap format: {n} channels"
        )));
    }

    let stride = pixmap.stride() as usize;
    let samples = pixmap.samples();
    let (cols, rows) = (width as usize, height as usize);
    if pixmap.width() as usize != cols
        || pixmap.height() as usize != rows
        || cols * n > stride
        || samples.len() < stride.saturating_mul(rows)
    {
        return Err(RenderFault::generic("Pixmap buffer size mismatch"));
    }

    let mut bitmap = Bitmap::new(width, height);
    for (x, y, pixel) in bitmap.enumerate_pixels_mut() {
        let at = y as usize * stride + x as usize * n;
        pixel.0 = [samples[at], samples[at + 1], samples[at + 2], 255];
    }

    Ok(bitmap)
}
