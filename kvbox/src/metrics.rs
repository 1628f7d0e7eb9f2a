//! Connection and lookup metrics.
//!
//! Enable the `metrics` feature to export them through the [`metrics`] facade.
//! Without it every function here is a no-op.
//!
//! - `kvbox_exists_hits_total` - existence checks that found the key
//! - `kvbox_exists_misses_total` - existence checks that did not
//! - `kvbox_connect_attempts_total` - low-level connection attempts
//! - `kvbox_connect_failures_total` - connect cycles that ran out of tries

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    /// Metric name for existence hits counter.
    pub static ref EXISTS_HITS: &'static str = {
        metrics::describe_counter!(
            "kvbox_exists_hits_total",
            "Total number of existence checks that found the key."
        );
        "kvbox_exists_hits_total"
    };

    /// Metric name for existence misses counter.
    pub static ref EXISTS_MISSES: &'static str = {
        metrics::describe_counter!(
            "kvbox_exists_misses_total",
            "Total number of existence checks that did not find the key."
        );
        "kvbox_exists_misses_total"
    };

    /// Metric name for connection attempts counter.
    pub static ref CONNECT_ATTEMPTS: &'static str = {
        metrics::describe_counter!(
            "kvbox_connect_attempts_total",
            "Total number of low-level connection attempts."
        );
        "kvbox_connect_attempts_total"
    };

    /// Metric name for exhausted connect cycles counter.
    pub static ref CONNECT_FAILURES: &'static str = {
        metrics::describe_counter!(
            "kvbox_connect_failures_total",
            "Total number of connect cycles that exhausted their tries."
        );
        "kvbox_connect_failures_total"
    };
}

#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_lookup(hit: bool) {
    if hit {
        metrics::counter!(*EXISTS_HITS).increment(1);
    } else {
        metrics::counter!(*EXISTS_MISSES).increment(1);
    }
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_lookup(_hit: bool) {}

#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_connect_attempt(endpoint: &str) {
    metrics::counter!(*CONNECT_ATTEMPTS, "endpoint" => endpoint.to_string()).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_connect_attempt(_endpoint: &str) {}

#[cfg(feature = "metrics")]
#[inline]
pub(crate) fn record_connect_failure(endpoint: &str) {
    metrics::counter!(*CONNECT_FAILURES, "endpoint" => endpoint.to_string()).increment(1);
}

#[cfg(not(feature = "metrics"))]
#[inline]
pub(crate) fn record_connect_failure(_endpoint: &str) {}
