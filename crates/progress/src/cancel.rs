//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};

/// Monotonic stop flag that can only transition from false to true.
///
/// Workers only look at it at progress-report boundaries.
#[derive(Debug, Default)]
pub struct StopFlag {
    inner: AtomicBool,
}

impl StopFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the owning worker to stop.
    pub fn request(&self) {
        self.inner.store(true, Ordering::Release);
    }

    /// Whether a stop has been requested.
    pub fn is_requested(&self) -> bool {
        self.inner.load(Ordering::Acquire)
    }
}
