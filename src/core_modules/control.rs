use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Cooperative cancellation flag shared between the UI layer and a running
/// comparison. Clones observe the same flag.
///
/// The engine polls the token between tile dispatches and after each tile
/// completion; it never interrupts a tile mid-flight. A token is passed
/// explicitly into every comparison call, replacing the process-wide flag
/// the earliest revisions of this tool used.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. In-flight tiles still run to completion; their
    /// results are discarded by the caller.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Progress sink owned by the UI layer: `(completed, total, stage label)`.
/// Invoked from the coordinating task after each unit of work completes.
pub type ProgressFn = Arc<dyn Fn(usize, usize, &str) + Send + Sync>;
