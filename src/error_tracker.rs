//! Rate-limited logging of skipped input lines.
//!
//! Every skipped line is logged at debug. A warn is emitted on the first
//! skip and every 100th after that so a badly truncated log does not flood
//! stderr.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::LineParseError;

/// Shared skip counter. Clones share one atomic count, so the files of
/// a rolling log can be parsed on different pool threads.
#[derive(Clone, Default)]
pub struct SkippedLineTracker {
    skipped: Arc<AtomicU64>,
}

impl SkippedLineTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a skipped line. Returns true if it warranted a warn.
    pub fn record(&self, err: &LineParseError) -> bool {
        let n = self.skipped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(origin = %err.origin, error = %err.message, "Skipping invalid line");

        let should_warn = n == 0 || (n + 1) % 100 == 0;
        if should_warn {
            tracing::warn!(
                skipped = n + 1,
                "Skipped invalid line at {}: {}",
                err.origin,
                err.message
            );
        }
        should_warn
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }
}
