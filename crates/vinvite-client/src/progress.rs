//! Monotonic progress reporting for long requests.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

type ProgressFn = dyn Fn(u8) + Send + Sync;

/// Reports a percentage that never decreases.
///
/// Updates that would not raise the value are dropped, as is everything
/// after the attached cancellation token fires.
#[derive(Clone)]
pub struct ProgressReporter {
    callback: Arc<ProgressFn>,
    current: Arc<AtomicU8>,
    cancel: Option<CancellationToken>,
}

impl ProgressReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
            current: Arc::new(AtomicU8::new(0)),
            cancel: None,
        }
    }

    /// Reporter that discards every update.
    pub fn noop() -> Self {
        Self::new(|_| {})
    }

    /// Stop reporting once `cancel` fires.
    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn current(&self) -> u8 {
        self.current.load(Ordering::SeqCst)
    }

    /// Raise progress to `percent` (clamped to 100).
    pub fn report(&self, percent: u8) {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return;
        }
        let percent = percent.min(100);
        let previous = self.current.fetch_max(percent, Ordering::SeqCst);
        if percent > previous {
            (self.callback)(percent);
        }
    }

    /// Report `done / total` mapped linearly onto `[from, to]`.
    pub fn report_fraction(&self, done: u64, total: u64, from: u8, to: u8) {
        self.report(scale(done, total, from, to));
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("current", &self.current())
            .finish_non_exhaustive()
    }
}

/// Map `done / total` onto `[from, to]`.
pub fn scale(done: u64, total: u64, from: u8, to: u8) -> u8 {
    if total == 0 || to <= from {
        return to.max(from);
    }
    let span = u64::from(to - from);
    let done = done.min(total);
    from + (span * done / total) as u8
}
