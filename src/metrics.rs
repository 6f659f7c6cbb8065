// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! increment_counter {
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
use crate::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
    increment_counter,
};

use std::time::Duration;

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "assets_cache_hits_total",
        Unit::Count,
        "Chain cache lookups that found an entry, labeled by cache."
    );
    describe_counter!(
        "assets_cache_miss_total",
        Unit::Count,
        "Chain cache lookups without an entry, labeled by cache."
    );
    describe_gauge!(
        "assets_cache_chains",
        "Number of chains with an entry in the cache, labeled by cache."
    );
    describe_counter!(
        "assets_remote_calls_total",
        Unit::Count,
        "Remote API calls, labeled by component, method and outcome."
    );
    describe_histogram!(
        "assets_remote_call_latency_ms",
        "Remote API call latency in milliseconds."
    );
    describe_histogram!(
        "assets_batch_size",
        "Number of keys sent in one batched remote call."
    );
    describe_counter!(
        "assets_coalesced_requests_total",
        Unit::Count,
        "Update requests that joined an update already in flight."
    );
    describe_counter!(
        "assets_poll_ticks_total",
        Unit::Count,
        "Poll executions, labeled by component."
    );
    describe_gauge!(
        "assets_active_polling_groups",
        "Number of running poll timers, labeled by component."
    );
}

pub fn increment_cache_hit(cache_name: &str) {
    counter!("assets_cache_hits_total", 1, "cache" => cache_name.to_string());
}

pub fn increment_cache_miss(cache_name: &str) {
    counter!("assets_cache_miss_total", 1, "cache" => cache_name.to_string());
}

pub fn set_cache_size(cache_name: &str, size: f64) {
    gauge!("assets_cache_chains", size, "cache" => cache_name.to_string());
}

pub fn record_remote_call(component: &str, method: &str, duration: Duration, success: bool) {
    counter!("assets_remote_calls_total", 1,
             "component" => component.to_string(),
             "method" => method.to_string(),
             "outcome" => if success { "ok" } else { "error" });
    histogram!("assets_remote_call_latency_ms", duration.as_millis() as f64,
               "component" => component.to_string(),
               "method" => method.to_string());
}

pub fn record_batch_size(size: usize) {
    histogram!("assets_batch_size", size as f64);
}

pub fn increment_coalesced_request(component: &str) {
    increment_counter!("assets_coalesced_requests_total", "component" => component.to_string());
}

pub fn increment_poll_tick(component: &str) {
    increment_counter!("assets_poll_ticks_total", "component" => component.to_string());
}

pub fn set_active_polling_groups(component: &str, count: usize) {
    gauge!("assets_active_polling_groups", count as f64, "component" => component.to_string());
}
