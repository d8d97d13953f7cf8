use thiserror::Error;

/// Errors surfaced by the comparison engine.
///
/// Everything here is recovered at the comparison-invocation boundary and
/// turned into a status for the embedding UI; the engine itself never shows
/// a dialog or writes to a console.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DiffError {
    /// A source image could not be normalized to 4-channel 8-bit RGBA.
    /// Fatal to that load only.
    #[error("cannot normalize source image: {0}")]
    Format(String),

    /// The two sides have different pixel dimensions. Comparison is refused
    /// entirely; no partial or letterboxed comparison is attempted.
    #[error("image dimensions differ: left is {left:?}, right is {right:?}")]
    SizeMismatch { left: (u32, u32), right: (u32, u32) },

    /// The comparison was aborted by user request. Informational, not a
    /// failure; partial work is discarded.
    #[error("comparison cancelled")]
    Cancelled,

    /// A tile or chunk worker failed or panicked. The whole run is aborted
    /// after in-flight work drains; no partial result is returned.
    #[error("worker failed: {0}")]
    Worker(String),

    /// The worker pool's channels closed underneath an active run.
    #[error("worker pool shut down")]
    PoolShutDown,

    /// A persisted comparison result could not be fully rehydrated
    /// (missing sidecar, malformed JSON, missing referenced sources).
    /// Nothing is partially loaded.
    #[error("persisted result incomplete: {0}")]
    PersistedResultIncomplete(String),
}
