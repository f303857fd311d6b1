// FleetSim Runner - Prometheus metrics definitions
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Prometheus metrics for a running fleet.
//!
//! Publish counters are updated by the sink as messages go out; the device
//! gauges are refreshed by the supervisor from fleet statistics.

use fleetsim::{DeviceCategory, FleetStats};
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Encoder, Gauge, GaugeVec,
    TextEncoder,
};
use tracing::warn;

lazy_static! {
    /// Messages accepted by the output, labeled by kind.
    pub static ref MESSAGES_PUBLISHED_TOTAL: CounterVec = register_counter_vec!(
        "fleetsim_messages_published_total",
        "Messages written to the output",
        &["kind"]
    ).unwrap();

    /// Payload bytes written, labeled by kind.
    pub static ref BYTES_PUBLISHED_TOTAL: CounterVec = register_counter_vec!(
        "fleetsim_bytes_published_total",
        "Payload bytes written to the output",
        &["kind"]
    ).unwrap();

    /// Messages the output refused.
    pub static ref PUBLISH_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "fleetsim_publish_failures_total",
        "Messages the output refused",
        &["kind"]
    ).unwrap();

    /// Devices currently running, labeled by category.
    pub static ref ACTIVE_DEVICES: GaugeVec = register_gauge_vec!(
        "fleetsim_active_devices",
        "Devices currently running",
        &["category"]
    ).unwrap();

    /// Devices whose loops have ended.
    pub static ref FINISHED_DEVICES: Gauge = register_gauge!(
        "fleetsim_finished_devices",
        "Devices whose loops have ended"
    ).unwrap();
}

/// Metric label for a topic.
///
/// Trip summaries are counted apart from regular telemetry.
pub fn topic_kind(topic: &str) -> &'static str {
    if topic.ends_with("/trip") {
        "trip"
    } else {
        "telemetry"
    }
}

pub fn record_published(topic: &str, bytes: usize) {
    let kind = topic_kind(topic);
    MESSAGES_PUBLISHED_TOTAL.with_label_values(&[kind]).inc();
    BYTES_PUBLISHED_TOTAL
        .with_label_values(&[kind])
        .inc_by(bytes as f64);
}

pub fn record_failure(topic: &str) {
    PUBLISH_FAILURES_TOTAL
        .with_label_values(&[topic_kind(topic)])
        .inc();
}

fn category_label(category: DeviceCategory) -> &'static str {
    match category {
        DeviceCategory::Widget => "widget",
        DeviceCategory::Automotive => "automotive",
    }
}

/// Update the device gauges.
pub fn update_device_metrics(stats: &FleetStats, per_category: &[(DeviceCategory, usize)]) {
    for (category, count) in per_category {
        ACTIVE_DEVICES
            .with_label_values(&[category_label(*category)])
            .set(*count as f64);
    }
    FINISHED_DEVICES.set(stats.finished_devices as f64);
}

/// Encode all metrics to Prometheus text format.
pub fn encode_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
