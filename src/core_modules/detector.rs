// THEORY:
// The `CoarseToFineDetector` orchestrates the two-pass comparison strategy
// that makes multi-megapixel diffs interactive. Full exact-equality
// comparison of two large images is the dominant cost; a cheap downsampled
// pre-filter rules out identical images outright and narrows the expensive
// full-resolution work to the bounding area of actual change.
//
// Key architectural principles:
// 1.  **Precondition first**: the dimension check happens before any
//     resampling; a size mismatch refuses the comparison entirely.
// 2.  **One merged candidate**: all coarse detections are deliberately
//     merged into a single padded super-region rather than tracked as
//     separate blobs. This trades some wasted recomputation for robustness
//     against under-segmented coarse blobs.
// 3.  **Padding never changes the answer**: the padding only widens which
//     pixels get rescanned at full resolution; the final mask is still the
//     exact per-pixel truth inside the candidate region.
// 4.  **Tunables are configuration**: the downsample factor and padding are
//     empirically chosen defaults, exposed on `DetectorConfig` rather than
//     buried as constants.

use std::sync::Arc;

use log::debug;

use crate::core_modules::control::{CancelToken, ProgressFn};
use crate::core_modules::diff_mask::DiffMask;
use crate::core_modules::mask_builder::DiffMaskBuilder;
use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::core_modules::region::Region;
use crate::core_modules::scheduler::TileScheduler;
use crate::error::DiffError;

const DEFAULT_DOWNSAMPLE_FACTOR: u32 = 8;
const DEFAULT_PADDING: u32 = 32;
const DEFAULT_TILE_SIZE: u32 = 256;

/// Tunable parameters of the coarse-to-fine strategy.
#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Linear downsample factor for the coarse pass (8 means 1/8 width and
    /// height).
    pub downsample_factor: u32,
    /// Pixels of padding added around the mapped coarse bounding box before
    /// the full-resolution rescan, clamped to image bounds.
    pub padding: u32,
    /// Edge length of the square tiles used by the full-resolution pass.
    pub tile_size: u32,
    /// Apply the 3x3 open/close speckle suppression to the coarse mask.
    pub speckle_filter: bool,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            downsample_factor: DEFAULT_DOWNSAMPLE_FACTOR,
            padding: DEFAULT_PADDING,
            tile_size: DEFAULT_TILE_SIZE,
            speckle_filter: true,
        }
    }
}

pub struct CoarseToFineDetector {
    config: DetectorConfig,
    builder: DiffMaskBuilder,
}

impl CoarseToFineDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let builder = DiffMaskBuilder::new(config.tile_size);
        Self { config, builder }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Runs the two-pass detection. `Ok(None)` means the coarse pass found
    /// no differences at all; `Ok(Some(mask))` is the full-resolution
    /// difference mask, populated only inside the candidate region.
    pub async fn detect(
        &self,
        scheduler: &TileScheduler,
        left: &Arc<PixelBuffer>,
        right: &Arc<PixelBuffer>,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<Option<DiffMask>, DiffError> {
        if left.dimensions() != right.dimensions() {
            return Err(DiffError::SizeMismatch {
                left: left.dimensions(),
                right: right.dimensions(),
            });
        }
        if cancel.is_cancelled() {
            return Err(DiffError::Cancelled);
        }

        let factor = self.config.downsample_factor.max(1);
        let coarse =
            self.builder
                .build_reduced(left, right, factor, self.config.speckle_filter)?;
        if let Some(progress) = &progress {
            progress(1, 1, "coarse scan");
        }
        if cancel.is_cancelled() {
            return Err(DiffError::Cancelled);
        }

        let Some(coarse_bounds) = coarse.bounding_region() else {
            debug!("coarse pass found no differences");
            return Ok(None);
        };
        debug!(
            "coarse pass: {} of {} cells differ, bounds {:?}",
            coarse.true_count(),
            (coarse.width() * coarse.height()),
            coarse_bounds,
        );

        let candidate = self.candidate_region(coarse_bounds, left.dimensions());
        debug!("rescanning candidate region {candidate:?} at full resolution");

        let mask = self
            .builder
            .build_full(
                scheduler,
                Arc::clone(left),
                Arc::clone(right),
                Some(candidate),
                cancel,
                progress,
            )
            .await?;
        Ok(Some(mask))
    }

    /// Maps a coarse-grid bounding box back to full-resolution coordinates
    /// and pads it. The right and bottom edges round up so every pixel of
    /// the edge blocks is covered.
    fn candidate_region(&self, coarse_bounds: Region, (width, height): (u32, u32)) -> Region {
        let factor = self.config.downsample_factor.max(1);
        let x0 = coarse_bounds.x.saturating_mul(factor).min(width);
        let y0 = coarse_bounds.y.saturating_mul(factor).min(height);
        let x1 = coarse_bounds.right().saturating_mul(factor).min(width);
        let y1 = coarse_bounds.bottom().saturating_mul(factor).min(height);
        let mapped = Region::new(x0, y0, x1 - x0, y1 - y0);
        mapped.expanded(self.config.padding, &Region::of_image(width, height))
    }
}
