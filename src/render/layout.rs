//! Page placement on the horizontal page strip

use super::types::{PageSize, Viewport};

/// Fit a page into the viewport, keeping its aspect ratio.
///
/// The page takes the full viewport width unless that would make it taller
/// than the viewport, in which case it takes the full height instead.
#[must_use]
pub fn optimal_page_size(viewport_width: f32, viewport_height: f32, page: PageSize) -> PageSize {
    if page.is_empty() || viewport_width <= 0.0 || viewport_height <= 0.0 {
        return PageSize::default();
    }

    let ratio = page.width / page.height;
    let mut width = viewport_width;
    let mut height = (viewport_width / ratio).floor();
    if height > viewport_height {
        height = viewport_height;
        width = (viewport_height * ratio).floor();
    }
    PageSize::new(width, height)
}

/// Horizontal strip offset that centers layout slot `slot` in the viewport
/// at zoom 1.
#[must_use]
pub fn center_offset_for_page(slot: usize, viewport_width: f32, optimal_width: f32) -> f32 {
    -(slot as f32 * optimal_width) + viewport_width / 2.0 - optimal_width / 2.0
}

#[must_use]
pub fn to_current_scale(value: f32, zoom: f32) -> f32 {
    value * zoom
}

/// Keep the viewport offsets on the page in layout slot `slot`.
///
/// A page shorter than the viewport is centered vertically, a taller one
/// must cover it. When zoomed, a page narrower than the viewport is centered
/// horizontally and a wider one must cover it. At zoom 1 the horizontal
/// offset may range between the centers of the neighbouring slots, so a
/// swipe can reach them.
#[must_use]
pub fn clamp_offsets(viewport: &Viewport, optimal: PageSize, slot: usize) -> (f32, f32) {
    let page_width = to_current_scale(optimal.width, viewport.zoom);
    let page_height = to_current_scale(optimal.height, viewport.zoom);

    let mut offset_y = viewport.offset_y;
    if page_height < viewport.height {
        offset_y = viewport.height / 2.0 - page_height / 2.0;
    } else if offset_y > 0.0 {
        offset_y = 0.0;
    } else if offset_y + page_height < viewport.height {
        offset_y = viewport.height - page_height;
    }

    let mut offset_x = viewport.offset_x;
    if (viewport.zoom - 1.0).abs() > f32::EPSILON {
        let page_left = to_current_scale(slot as f32 * optimal.width, viewport.zoom);
        if page_width < viewport.width {
            offset_x = viewport.width / 2.0 - (page_left + page_width / 2.0);
        } else if offset_x + page_left > 0.0 {
            offset_x = -page_left;
        } else if offset_x + page_left + page_width < viewport.width {
            offset_x = viewport.width - page_left - page_width;
        }
    } else {
        let center = center_offset_for_page(slot, viewport.width, optimal.width);
        offset_x = offset_x
            .max(center - optimal.width)
            .min(center + optimal.width);
    }

    (offset_x, offset_y)
}
