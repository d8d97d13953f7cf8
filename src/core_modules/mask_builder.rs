// THEORY:
// The `DiffMaskBuilder` turns two equal-sized `PixelBuffer`s into a boolean
// "differs" mask. A difference is any non-identical pixel value; there is no
// thresholding and no tolerance, exact byte equality is required per channel.
//
// Key architectural principles:
// 1.  **Two build paths, one comparison rule**: the full-resolution path
//     fans tiles out across the shared worker pool; the reduced-resolution
//     path (used only by the coarse pre-filter) compares exact per-block
//     channel sums single-threaded and then suppresses speckle with a 3x3
//     morphological opening followed by a closing. Both paths implement the
//     same exact-equality rule, just at different granularity.
// 2.  **Positional assembly**: tile results arrive in completion order but
//     carry their tile geometry, so the mask is assembled by position and
//     the final mask is identical regardless of worker count or scheduling.
// 3.  **Region restriction**: a build scoped to a sub-region only ever
//     writes inside that region; everything outside stays false. The
//     coarse-to-fine detector uses this to re-verify only candidate areas.

use std::sync::Arc;

use crate::core_modules::control::{CancelToken, ProgressFn};
use crate::core_modules::diff_mask::DiffMask;
use crate::core_modules::pixel_buffer::{CHANNELS, PixelBuffer};
use crate::core_modules::region::Region;
use crate::core_modules::scheduler::TileScheduler;
use crate::error::DiffError;

pub struct DiffMaskBuilder {
    tile_size: u32,
}

impl DiffMaskBuilder {
    pub fn new(tile_size: u32) -> Self {
        Self {
            tile_size: tile_size.max(1),
        }
    }

    fn check_sizes(left: &PixelBuffer, right: &PixelBuffer) -> Result<(), DiffError> {
        if left.dimensions() != right.dimensions() {
            return Err(DiffError::SizeMismatch {
                left: left.dimensions(),
                right: right.dimensions(),
            });
        }
        Ok(())
    }

    /// Full-resolution build, tiled across the worker pool. When `region`
    /// is given the comparison is restricted to it; cells outside are left
    /// false. Never mutates the input buffers.
    pub async fn build_full(
        &self,
        scheduler: &TileScheduler,
        left: Arc<PixelBuffer>,
        right: Arc<PixelBuffer>,
        region: Option<Region>,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<DiffMask, DiffError> {
        Self::check_sizes(&left, &right)?;
        let (width, height) = left.dimensions();
        let full = Region::of_image(width, height);
        // expanded(0, ..) clamps an arbitrary caller region to image bounds.
        let region = region.map_or(full, |r| r.expanded(0, &full));

        let mut mask = DiffMask::new(width, height);
        if region.is_empty() {
            return Ok(mask);
        }

        let worker_left = Arc::clone(&left);
        let worker_right = Arc::clone(&right);
        let tiles = scheduler
            .run_tiles(
                region,
                self.tile_size,
                move |tile: Region| Ok((tile, compare_tile(&worker_left, &worker_right, tile))),
                "comparing pixels",
                cancel,
                progress,
            )
            .await?;

        for (_, (tile, cells)) in tiles {
            for row in 0..tile.height {
                let base = (row * tile.width) as usize;
                for col in 0..tile.width {
                    if cells[base + col as usize] {
                        mask.set(tile.x + col, tile.y + row, true);
                    }
                }
            }
        }
        Ok(mask)
    }

    /// Reduced-resolution build for the coarse pass: both buffers are
    /// area-averaged down by `factor` and compared cell by cell, then the
    /// mask is cleaned with a 3x3 opening and closing when `speckle_filter`
    /// is set.
    ///
    /// The averages are compared as exact per-block channel sums. Rounding
    /// them to bytes first would let a small change (a single differing
    /// pixel in a 64-pixel block) vanish, and the comparison is defined as
    /// exact. For the same reason the filter is never allowed to erase a
    /// nonempty mask outright: with exact equality a detection is never
    /// pure noise.
    pub fn build_reduced(
        &self,
        left: &PixelBuffer,
        right: &PixelBuffer,
        factor: u32,
        speckle_filter: bool,
    ) -> Result<DiffMask, DiffError> {
        Self::check_sizes(left, right)?;
        let factor = factor.max(1);
        let coarse_w = left.width().div_ceil(factor);
        let left_sums = left.block_sums(factor);
        let right_sums = right.block_sums(factor);

        let mut mask = DiffMask::new(coarse_w, left.height().div_ceil(factor));
        for (i, (l, r)) in left_sums.iter().zip(&right_sums).enumerate() {
            if l != r {
                mask.set(i as u32 % coarse_w, i as u32 / coarse_w, true);
            }
        }

        if speckle_filter && mask.any() {
            let filtered = mask.opened().closed();
            if filtered.any() {
                mask = filtered;
            }
        }
        Ok(mask)
    }
}

/// Compares one tile of the two buffers, returning a row-major tile-local
/// cell grid. Rows are compared as whole byte spans first; only rows that
/// differ somewhere fall back to the per-pixel scan.
fn compare_tile(left: &PixelBuffer, right: &PixelBuffer, tile: Region) -> Vec<bool> {
    let mut cells = vec![false; tile.area() as usize];
    for row in 0..tile.height {
        let y = tile.y + row;
        let l = left.row_span(y, tile.x, tile.width);
        let r = right.row_span(y, tile.x, tile.width);
        if l == r {
            continue;
        }
        let base = (row * tile.width) as usize;
        for col in 0..tile.width as usize {
            let offset = col * CHANNELS;
            if l[offset..offset + CHANNELS] != r[offset..offset + CHANNELS] {
                cells[base + col] = true;
            }
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer_from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> [u8; 4]) -> PixelBuffer {
        let mut data = Vec::with_capacity((width * height) as usize * CHANNELS);
        for y in 0..height {
            for x in 0..width {
                data.extend_from_slice(&f(x, y));
            }
        }
        PixelBuffer::from_rgba_bytes(width, height, data).expect("valid buffer")
    }

    fn white(width: u32, height: u32) -> PixelBuffer {
        buffer_from_fn(width, height, |_, _| [255, 255, 255, 255])
    }

    #[tokio::test]
    async fn identical_buffers_give_empty_mask() {
        let scheduler = TileScheduler::new(Some(2));
        let left = Arc::new(white(64, 64));
        let right = Arc::new(white(64, 64));
        let mask = DiffMaskBuilder::new(16)
            .build_full(&scheduler, left, right, None, &CancelToken::new(), None)
            .await
            .expect("build succeeds");
        assert!(!mask.any());
    }

    #[tokio::test]
    async fn differing_pixels_are_set_exactly() {
        let scheduler = TileScheduler::new(Some(4));
        let left = Arc::new(white(100, 80));
        let right = Arc::new(buffer_from_fn(100, 80, |x, y| {
            if (x, y) == (3, 5) || (x, y) == (97, 70) {
                [0, 0, 0, 255]
            } else {
                [255, 255, 255, 255]
            }
        }));
        let mask = DiffMaskBuilder::new(32)
            .build_full(&scheduler, left, right, None, &CancelToken::new(), None)
            .await
            .expect("build succeeds");
        assert_eq!(mask.true_count(), 2);
        assert!(mask.get(3, 5));
        assert!(mask.get(97, 70));
    }

    #[tokio::test]
    async fn alpha_only_difference_counts() {
        let scheduler = TileScheduler::new(Some(2));
        let left = Arc::new(white(16, 16));
        let right = Arc::new(buffer_from_fn(16, 16, |x, y| {
            if (x, y) == (8, 8) {
                [255, 255, 255, 254]
            } else {
                [255, 255, 255, 255]
            }
        }));
        let mask = DiffMaskBuilder::new(8)
            .build_full(&scheduler, left, right, None, &CancelToken::new(), None)
            .await
            .expect("build succeeds");
        assert_eq!(mask.true_count(), 1);
        assert!(mask.get(8, 8));
    }

    #[tokio::test]
    async fn region_restriction_leaves_outside_false() {
        let scheduler = TileScheduler::new(Some(2));
        let left = Arc::new(white(64, 64));
        // Every pixel differs, but only the region should be scanned.
        let right = Arc::new(buffer_from_fn(64, 64, |_, _| [0, 0, 0, 255]));
        let region = Region::new(10, 10, 8, 8);
        let mask = DiffMaskBuilder::new(4)
            .build_full(&scheduler, left, right, Some(region), &CancelToken::new(), None)
            .await
            .expect("build succeeds");
        assert_eq!(mask.true_count(), 64);
        assert!(mask.get(10, 10));
        assert!(mask.get(17, 17));
        assert!(!mask.get(9, 10));
        assert!(!mask.get(18, 17));
    }

    #[tokio::test]
    async fn size_mismatch_is_refused() {
        let scheduler = TileScheduler::new(Some(1));
        let left = Arc::new(white(100, 100));
        let right = Arc::new(white(200, 100));
        let outcome = DiffMaskBuilder::new(64)
            .build_full(&scheduler, left, right, None, &CancelToken::new(), None)
            .await;
        assert!(matches!(outcome, Err(DiffError::SizeMismatch { .. })));
    }

    #[test]
    fn reduced_build_flags_single_pixel_change() {
        // One pixel in 64 changes the block sum even though the rounded
        // block average would be unchanged.
        let left = white(32, 32);
        let right = buffer_from_fn(32, 32, |x, y| {
            if (x, y) == (20, 20) {
                [254, 255, 255, 255]
            } else {
                [255, 255, 255, 255]
            }
        });
        let mask = DiffMaskBuilder::new(64)
            .build_reduced(&left, &right, 8, true)
            .expect("build succeeds");
        assert_eq!(mask.width(), 4);
        assert_eq!(mask.height(), 4);
        assert_eq!(mask.true_count(), 1);
        assert!(mask.get(2, 2));
    }

    #[test]
    fn reduced_build_filter_keeps_isolated_genuine_cell() {
        // The opening would erase a lone cell; the builder falls back to
        // the unfiltered mask rather than report a clean compare.
        let left = white(80, 80);
        let right = buffer_from_fn(80, 80, |x, y| {
            if (x, y) == (40, 40) {
                [0, 0, 0, 255]
            } else {
                [255, 255, 255, 255]
            }
        });
        let mask = DiffMaskBuilder::new(64)
            .build_reduced(&left, &right, 10, true)
            .expect("build succeeds");
        assert!(mask.any());
        assert!(mask.get(4, 4));
    }

    #[test]
    fn reduced_build_size_mismatch_is_refused() {
        let left = white(10, 10);
        let right = white(10, 12);
        assert!(matches!(
            DiffMaskBuilder::new(64).build_reduced(&left, &right, 8, true),
            Err(DiffError::SizeMismatch { .. })
        ));
    }
}
