//! Range lock metrics
//!
//! Thin wrappers over the `metrics` crate. Every recorder is a no-op when the
//! `metrics` feature is disabled, so callers never need to gate on it.
//!
//! ```rust,ignore
//! use regionspan::observability::RangeLockMetrics;
//!
//! RangeLockMetrics::increment_acquired();
//! RangeLockMetrics::record_wait_latency(Duration::from_millis(3));
//! ```

use std::time::Duration;

/// Region range lock metrics
pub struct RangeLockMetrics;

impl RangeLockMetrics {
    // ---- Counters ----

    /// Ranges locked successfully
    pub fn increment_acquired() {
        #[cfg(feature = "metrics")]
        metrics::counter!("regionspan_lock_acquired_total").increment(1);
    }

    /// Lock attempts rejected as stale
    pub fn increment_stale() {
        #[cfg(feature = "metrics")]
        metrics::counter!("regionspan_lock_stale_total").increment(1);
    }

    /// Lock attempts that had to wait on older ranges
    pub fn increment_blocked() {
        #[cfg(feature = "metrics")]
        metrics::counter!("regionspan_lock_blocked_total").increment(1);
    }

    /// Waiting lock attempts abandoned through cancellation
    pub fn increment_cancelled() {
        #[cfg(feature = "metrics")]
        metrics::counter!("regionspan_lock_cancelled_total").increment(1);
    }

    /// Ranges unlocked
    pub fn increment_released() {
        #[cfg(feature = "metrics")]
        metrics::counter!("regionspan_lock_released_total").increment(1);
    }

    // ---- Gauges ----

    /// Ranges currently locked on one lock instance
    pub fn set_locked_ranges(lock_id: u64, count: usize) {
        #[cfg(feature = "metrics")]
        metrics::gauge!("regionspan_locked_ranges", "lock_id" => lock_id.to_string())
            .set(count as f64);
        #[cfg(not(feature = "metrics"))]
        let _ = (lock_id, count);
    }

    // ---- Histograms ----

    /// Time between a blocked attempt and its final outcome
    pub fn record_wait_latency(latency: Duration) {
        #[cfg(feature = "metrics")]
        metrics::histogram!("regionspan_lock_wait_seconds").record(latency.as_secs_f64());
        #[cfg(not(feature = "metrics"))]
        let _ = latency;
    }
}
