//! Metric helpers for `interceptor_chain`.
//!
//! This module defines metric names and simple helper functions
//! wrapping the [`metrics`](https://docs.rs/metrics) crate. Without the
//! `metrics` feature every helper is a no-op.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Name of the counter tracking resolved interceptor invocations.
pub const INVOCATIONS_TOTAL: &str = "interceptor_chain_invocations_total";
/// Name of the counter tracking packets leaving the pipeline.
pub const PACKETS_TOTAL: &str = "interceptor_chain_packets_total";
/// Name of the counter tracking ignored completion signals.
pub const DUPLICATE_RESOLUTIONS_TOTAL: &str = "interceptor_chain_duplicate_resolutions_total";
/// Name of the counter tracking registry lookup failures.
pub const RESOLUTION_ERRORS_TOTAL: &str = "interceptor_chain_resolution_errors_total";

/// Record a resolved invocation labelled with its outcome.
pub fn inc_invocations(outcome: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(INVOCATIONS_TOTAL, "outcome" => outcome).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = outcome;
}

/// Record a packet leaving the pipeline with the given disposition.
pub fn inc_packets(disposition: &'static str) {
    #[cfg(feature = "metrics")]
    counter!(PACKETS_TOTAL, "disposition" => disposition).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = disposition;
}

/// Record a completion signal received after resolution.
pub fn inc_duplicate_resolutions() {
    #[cfg(feature = "metrics")]
    counter!(DUPLICATE_RESOLUTIONS_TOTAL).increment(1);
}

/// Record a failed registry lookup.
pub fn inc_resolution_errors() {
    #[cfg(feature = "metrics")]
    counter!(RESOLUTION_ERRORS_TOTAL).increment(1);
}
