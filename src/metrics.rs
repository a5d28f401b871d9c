// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Facade operations and dependency state
//! - Connector intake and fallback
//! - Durable queue depth and corruption
//! - Remote producer delivery
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `kvproxy_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (duration)
//!
//! Without an installed recorder these calls are no-ops.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a facade operation outcome.
pub fn record_store_operation(operation: &'static str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("kvproxy_store_operations_total", "operation" => operation, "status" => status).increment(1);
    histogram!("kvproxy_store_operation_duration_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

/// Record a dependency lifecycle transition (`backend` / `connector`).
pub fn record_dependency_state(dependency: &'static str, state: &str) {
    counter!(
        "kvproxy_dependency_transitions_total",
        "dependency" => dependency,
        "state" => state.to_string()
    )
    .increment(1);
}

/// Record a call rejected because a dependency is not open.
pub fn record_not_available(dependency: &'static str) {
    counter!("kvproxy_not_available_total", "dependency" => dependency).increment(1);
}

/// Record an entry accepted into the connector intake.
pub fn record_intake_accepted() {
    counter!("kvproxy_intake_accepted_total").increment(1);
}

/// Record a durable queue append.
pub fn record_queue_append(success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("kvproxy_queue_appends_total", "status" => status).increment(1);
}

/// Record the durable queue depth.
pub fn record_queue_depth(depth: u64) {
    gauge!("kvproxy_queue_depth").set(depth as f64);
}

/// Record a corrupt segment quarantined by the durable queue.
pub fn record_queue_corruption() {
    counter!("kvproxy_queue_corrupt_segments_total").increment(1);
}

/// Record a durable-queue record that failed to decode.
pub fn record_record_decode_error() {
    counter!("kvproxy_record_decode_errors_total").increment(1);
}

/// Record the outcome of a direct producer send after an append failure.
pub fn record_fallback(delivered: bool) {
    let status = if delivered { "delivered" } else { "dropped" };
    counter!("kvproxy_fallback_sends_total", "status" => status).increment(1);
}

/// Record an event dropped by the connector.
pub fn record_dropped(reason: &'static str) {
    counter!("kvproxy_dropped_events_total", "reason" => reason).increment(1);
}

/// Record a message handed to the remote producer.
pub fn record_forwarded() {
    counter!("kvproxy_forwarded_total").increment(1);
}

/// Record a publish attempt against the broker.
pub fn record_publish(success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("kvproxy_publish_total", "status" => status).increment(1);
    histogram!("kvproxy_publish_duration_seconds").record(duration.as_secs_f64());
}

/// Record a producer retry.
pub fn record_publish_retry() {
    counter!("kvproxy_publish_retries_total").increment(1);
}

/// Record an asynchronous delivery failure reported by the producer.
pub fn record_producer_error() {
    counter!("kvproxy_producer_errors_total").increment(1);
}
