//! In-flight request tracking.
//!
//! # Responsibilities
//! - Count requests currently being handled
//! - Report the count when a drain deadline is exceeded
//! - Publish the count as a metrics gauge

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::observability::metrics;

/// Shared counter of requests that have entered the router and not yet completed.
#[derive(Debug, Clone, Default)]
pub struct InFlightTracker {
    count: Arc<AtomicU64>,
}

impl InFlightTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request. The returned guard decrements the count on drop.
    pub fn track(&self) -> InFlightGuard {
        let now = self.count.fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_in_flight(now);
        InFlightGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count when dropped, including when the request
/// future is cancelled or aborted.
#[derive(Debug)]
pub struct InFlightGuard {
    count: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let now = self.count.fetch_sub(1, Ordering::SeqCst) - 1;
        metrics::record_in_flight(now);
    }
}
