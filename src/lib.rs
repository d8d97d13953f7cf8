// THEORY:
// This file is the main entry point for the `raster_diff` library crate.
// It exposes the `ComparisonPipeline` and its associated data structures
// (`PipelineConfig`, `ComparisonOutcome`, `DiffResult`, ...) as the clean,
// high-level interface for the whole comparison engine, plus the sidecar
// persistence helpers for the on-disk result format.
//
// The engine consumes two already-rasterized pixel buffers and produces an
// ordered set of difference rectangles; rendering the source documents,
// wiring up widgets, and driving file dialogs are the embedding
// application's job. The only interaction the engine has with its host is
// a pollable cancellation token and an optional progress callback.

pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod sidecar;

pub use crate::core_modules::pixel_buffer::PixelBuffer;
pub use crate::error::DiffError;
pub use crate::pipeline::{
    CancelToken, ComparisonOutcome, ComparisonPipeline, DetectorConfig, DiffResult,
    PipelineConfig, ProgressFn, Rectangle,
};
