//! Coordinator and cache metrics.
//!
//! Recorded through the `metrics` facade; the API binary installs the
//! Prometheus recorder. Without a recorder these calls are no-ops.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "vinfer_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "vinfer_cache_misses_total";
    pub const COALESCED_REQUESTS_TOTAL: &str = "vinfer_coalesced_requests_total";
    pub const COMPUTATIONS_TOTAL: &str = "vinfer_computations_total";
    pub const COMPUTATION_DURATION_SECONDS: &str = "vinfer_computation_duration_seconds";
    pub const COMPUTATIONS_IN_FLIGHT: &str = "vinfer_computations_in_flight";
    pub const WAITER_TIMEOUTS_TOTAL: &str = "vinfer_waiter_timeouts_total";
    pub const STORAGE_ERRORS_TOTAL: &str = "vinfer_storage_errors_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "vinfer_cache_evictions_total";
}

pub fn record_cache_hit() {
    counter!(names::CACHE_HITS_TOTAL).increment(1);
}

pub fn record_cache_miss() {
    counter!(names::CACHE_MISSES_TOTAL).increment(1);
}

pub fn record_coalesced() {
    counter!(names::COALESCED_REQUESTS_TOTAL).increment(1);
}

/// Record a finished computation. `outcome` is `"ready"` or `"failed"`.
pub fn record_computation(outcome: &str, duration_secs: f64) {
    let labels = [("outcome", outcome.to_string())];
    counter!(names::COMPUTATIONS_TOTAL, &labels).increment(1);
    histogram!(names::COMPUTATION_DURATION_SECONDS, &labels).record(duration_secs);
}

pub fn set_computations_in_flight(count: usize) {
    gauge!(names::COMPUTATIONS_IN_FLIGHT).set(count as f64);
}

pub fn record_waiter_timeout() {
    counter!(names::WAITER_TIMEOUTS_TOTAL).increment(1);
}

/// Record a storage error. `operation` names the store call that failed.
pub fn record_storage_error(operation: &str) {
    let labels = [("operation", operation.to_string())];
    counter!(names::STORAGE_ERRORS_TOTAL, &labels).increment(1);
}

pub fn record_evictions(count: usize) {
    counter!(names::CACHE_EVICTIONS_TOTAL).increment(count as u64);
}
