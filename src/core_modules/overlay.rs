// Presentation bitmaps derived from a comparison: the translucent
// difference highlight, the alpha composite of the two sides, and rectangle
// outlines. These are plain pixel products for the embedding view to put on
// screen; no widget or drawing-surface code lives here.

use image::{Rgba, RgbaImage};

use crate::core_modules::diff_mask::DiffMask;
use crate::core_modules::diff_result::Rectangle;
use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::error::DiffError;

/// The classic difference tint: translucent red.
pub const HIGHLIGHT_RED: Rgba<u8> = Rgba([255, 0, 0, 120]);

/// A fully transparent image with `color` at every differing pixel,
/// suitable for stacking over the composed view.
pub fn highlight(mask: &DiffMask, color: Rgba<u8>) -> RgbaImage {
    let mut out = RgbaImage::new(mask.width(), mask.height());
    for y in 0..mask.height() {
        for x in 0..mask.width() {
            if mask.get(x, y) {
                out.put_pixel(x, y, color);
            }
        }
    }
    out
}

/// Composites `right` over `left` at the given opacity, the overlay view
/// the transparency slider controls. `alpha` is clamped to 0.0..=1.0.
pub fn blend(
    left: &PixelBuffer,
    right: &PixelBuffer,
    alpha: f32,
) -> Result<RgbaImage, DiffError> {
    if left.dimensions() != right.dimensions() {
        return Err(DiffError::SizeMismatch {
            left: left.dimensions(),
            right: right.dimensions(),
        });
    }
    let alpha = alpha.clamp(0.0, 1.0);
    let (width, height) = left.dimensions();
    let mut out = RgbaImage::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let a = left.at(x, y);
            let b = right.at(x, y);
            let mut px = [0u8; 4];
            for c in 0..4 {
                let mixed = a[c] as f32 * (1.0 - alpha) + b[c] as f32 * alpha;
                px[c] = mixed.round() as u8;
            }
            out.put_pixel(x, y, Rgba(px));
        }
    }
    Ok(out)
}

/// Draws one-pixel rectangle borders over a copy of `base`, the bounding
/// box view of the difference list. Rectangles are clamped to the image.
pub fn outline(base: &PixelBuffer, rectangles: &[Rectangle], color: Rgba<u8>) -> RgbaImage {
    let (width, height) = base.dimensions();
    let mut out = RgbaImage::from_raw(width, height, base.bytes().to_vec())
        .unwrap_or_else(|| RgbaImage::new(width, height));
    for rect in rectangles {
        let x0 = rect.x.min(width.saturating_sub(1));
        let y0 = rect.y.min(height.saturating_sub(1));
        let x1 = (rect.x + rect.w).min(width).saturating_sub(1);
        let y1 = (rect.y + rect.h).min(height).saturating_sub(1);
        for x in x0..=x1 {
            out.put_pixel(x, y0, color);
            out.put_pixel(x, y1, color);
        }
        for y in y0..=y1 {
            out.put_pixel(x0, y, color);
            out.put_pixel(x1, y, color);
        }
    }
    out
}
