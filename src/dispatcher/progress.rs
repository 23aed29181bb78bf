//! Progress callback seam

/// Receives a notification after every completed item
///
/// Calls are fire-and-forget and may arrive from several workers at once.
/// Any `Fn(usize, usize, &str) + Send + Sync` closure is a sink.
pub trait ProgressSink: Send + Sync {
    /// `completed` of `total` items are done; `message` describes the latest one
    fn on_progress(&self, completed: usize, total: usize, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(usize, usize, &str) + Send + Sync,
{
    fn on_progress(&self, completed: usize, total: usize, message: &str) {
        self(completed, total, message)
    }
}
