// THEORY:
// The `pipeline` module is the top-level API of the comparison engine. It
// encapsulates the full stack (coarse-to-fine detection, tiled masking,
// connected-component extraction) behind a single entry point that takes
// two rasterized buffers and returns a status the embedding UI can act on.
//
// Key architectural principles:
// 1.  **One long-lived pool**: the pipeline owns a single `TileScheduler`
//     created at construction and reused by every comparison, instead of
//     spinning a pool up per call.
// 2.  **Status out, never dialogs**: every stage error is recovered here and
//     folded into the returned value. Cancellation is a status, not a
//     failure; real failures propagate as errors for the caller to present.
// 3.  **Snapshot the inputs**: a comparison borrows its two buffers behind
//     `Arc` for its entire duration. Whoever loads a new side must swap in
//     a new `Arc`; the running comparison keeps reading its own snapshot.

use std::sync::Arc;

use log::{debug, info};

use crate::core_modules::diff_mask::DiffMask;
use crate::core_modules::extractor::ConnectedComponentExtractor;
use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::core_modules::scheduler::TileScheduler;
use crate::error::DiffError;

// Re-export the data structures a consumer of the pipeline works with.
pub use crate::core_modules::control::{CancelToken, ProgressFn};
pub use crate::core_modules::detector::{CoarseToFineDetector, DetectorConfig};
pub use crate::core_modules::diff_result::{DiffResult, Rectangle};

const DEFAULT_EXTRACTION_CHUNKS: usize = 8;

/// Configuration for the full comparison pipeline.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub detector: DetectorConfig,
    /// Upper bound on concurrent label chunks during bounding-box
    /// extraction.
    pub extraction_chunks: usize,
    /// Worker pool size; defaults to the available hardware concurrency.
    pub worker_threads: Option<usize>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            detector: DetectorConfig::default(),
            extraction_chunks: DEFAULT_EXTRACTION_CHUNKS,
            worker_threads: None,
        }
    }
}

/// The outcome of one comparison invocation.
#[derive(Debug, Clone)]
pub enum ComparisonOutcome {
    /// The two sides are pixel-identical.
    NoDifferences,
    /// At least one region differs.
    Differences(DiffResult),
    /// The run was cancelled; partial work was discarded and no rectangles
    /// may be shown.
    Cancelled,
}

/// The main, top-level struct of the comparison engine.
pub struct ComparisonPipeline {
    scheduler: TileScheduler,
    detector: CoarseToFineDetector,
    extractor: ConnectedComponentExtractor,
}

impl ComparisonPipeline {
    /// Must be called from inside a tokio runtime; the worker pool spawns
    /// immediately and lives until the pipeline is dropped or shut down.
    pub fn new(config: PipelineConfig) -> Self {
        let scheduler = TileScheduler::new(config.worker_threads);
        let detector = CoarseToFineDetector::new(config.detector.clone());
        let extractor = ConnectedComponentExtractor::new(config.extraction_chunks);
        Self {
            scheduler,
            detector,
            extractor,
        }
    }

    /// Compares two rasterized documents and returns the outcome.
    ///
    /// Fails fast with `SizeMismatch` when the dimensions disagree. A
    /// cancellation observed at any stage yields
    /// `Ok(ComparisonOutcome::Cancelled)`; any other stage error is
    /// returned as-is for the caller to report.
    pub async fn compare(
        &self,
        left: &Arc<PixelBuffer>,
        right: &Arc<PixelBuffer>,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<ComparisonOutcome, DiffError> {
        match self.run_stages(left, right, cancel, progress).await {
            Ok(outcome) => Ok(outcome),
            Err(DiffError::Cancelled) => {
                info!("comparison cancelled");
                Ok(ComparisonOutcome::Cancelled)
            }
            Err(error) => Err(error),
        }
    }

    async fn run_stages(
        &self,
        left: &Arc<PixelBuffer>,
        right: &Arc<PixelBuffer>,
        cancel: &CancelToken,
        progress: Option<ProgressFn>,
    ) -> Result<ComparisonOutcome, DiffError> {
        info!(
            "comparing {}x{} documents",
            left.width(),
            left.height()
        );
        let detected = self
            .detector
            .detect(&self.scheduler, left, right, cancel, progress.clone())
            .await?;
        let Some(mask) = detected else {
            return Ok(ComparisonOutcome::NoDifferences);
        };

        let rectangles = self
            .extractor
            .extract(&self.scheduler, &mask, cancel, progress)
            .await?;
        debug!("extracted {} difference regions", rectangles.len());
        if rectangles.is_empty() {
            return Ok(ComparisonOutcome::NoDifferences);
        }
        Ok(ComparisonOutcome::Differences(DiffResult {
            rectangles,
            mask,
        }))
    }

    /// Drains and joins the worker pool. Dropping the pipeline also stops
    /// the pool; this exists for callers that want a clean join at exit.
    pub async fn shutdown(self) {
        self.scheduler.shutdown().await;
    }

    /// The naive single-threaded nested-loop comparison, the baseline the
    /// optimized path must match exactly. Kept for small images and as the
    /// cross-check oracle in tests; not used by `compare`.
    pub fn naive_compare(
        left: &PixelBuffer,
        right: &PixelBuffer,
    ) -> Result<DiffMask, DiffError> {
        if left.dimensions() != right.dimensions() {
            return Err(DiffError::SizeMismatch {
                left: left.dimensions(),
                right: right.dimensions(),
            });
        }
        let (width, height) = left.dimensions();
        let mut mask = DiffMask::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if left.at(x, y) != right.at(x, y) {
                    mask.set(x, y, true);
                }
            }
        }
        Ok(mask)
    }

    pub fn scheduler(&self) -> &TileScheduler {
        &self.scheduler
    }
}
