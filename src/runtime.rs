// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Shared pieces of the per-device async loops

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::sink::MessageSink;

/// Current wall-clock time in epoch milliseconds
pub fn wall_clock_ms() -> u64 {
    Utc::now().timestamp_millis().max(0) as u64
}

/// Epoch-millisecond clock anchored to the tokio clock.
///
/// Follows tokio's paused/advanced time in tests while still producing
/// realistic timestamps in payloads.
#[derive(Debug, Clone, Copy)]
pub struct LoopClock {
    base_ms: u64,
    origin: Instant,
}

impl LoopClock {
    /// Anchor at the current wall-clock time
    pub fn start() -> Self {
        Self::starting_at(wall_clock_ms())
    }

    /// Anchor at an explicit epoch time
    pub fn starting_at(base_ms: u64) -> Self {
        Self {
            base_ms,
            origin: Instant::now(),
        }
    }

    /// Epoch milliseconds now
    pub fn now_ms(&self) -> u64 {
        self.base_ms + self.origin.elapsed().as_millis() as u64
    }
}

/// Why a device loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StopReason {
    /// Run time exceeded the message spec's duration
    DurationElapsed,
    /// Message spec has no payload schema
    NoPayload,
    /// Vehicle finished its route
    RouteEnded,
    /// Stopped from outside
    Stopped,
}

/// Live message counters of one device loop
#[derive(Debug, Default)]
pub struct RunStats {
    published: AtomicU64,
    failed: AtomicU64,
}

impl RunStats {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages accepted by the sink
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Messages the sink refused
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }
}

/// Final account of a device loop
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub device_id: String,
    pub published: u64,
    pub failed: u64,
    pub reason: StopReason,
}

impl RunReport {
    pub(crate) fn new(device_id: &str, stats: &RunStats, reason: StopReason) -> Self {
        Self {
            device_id: device_id.to_string(),
            published: stats.published(),
            failed: stats.failed(),
            reason,
        }
    }
}

/// Publish one JSON payload; failures are logged and counted, never raised.
pub async fn publish_json(
    sink: &dyn MessageSink,
    stats: &RunStats,
    device_id: &str,
    topic: &str,
    payload: &serde_json::Value,
) {
    let bytes = match serde_json::to_vec(payload) {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(device_id, topic, error = %e, "Failed to encode payload");
            stats.failed.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    match sink.publish(topic, &bytes).await {
        Ok(()) => {
            stats.published.fetch_add(1, Ordering::Relaxed);
            debug!(device_id, topic, bytes = bytes.len(), "Published message");
        }
        Err(e) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(device_id, topic, error = %e, "Publish failed");
        }
    }
}
