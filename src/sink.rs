// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Message sink abstraction
//!
//! Devices publish `(topic, payload)` pairs to a [`MessageSink`]. Delivery is
//! fire-and-forget: the caller logs a failed publish and carries on.

use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use rand::prelude::*;
use rand::rngs::StdRng;

use crate::error::PublishError;

/// Statistics about sink usage
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SinkMetrics {
    /// Messages accepted
    pub messages_published: u64,
    /// Payload bytes accepted
    pub bytes_published: u64,
    /// Messages refused
    pub messages_rejected: u64,
}

/// A message accepted by a sink
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

impl PublishedMessage {
    /// Decode the payload as JSON
    pub fn json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_slice(&self.payload)
    }
}

/// Trait for message sinks
#[async_trait]
pub trait MessageSink: Send + Sync {
    /// Publish one message
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError>;

    /// Get sink metrics
    fn metrics(&self) -> SinkMetrics;
}

/// In-memory sink that records every message, for tests and local runs
#[derive(Debug, Default)]
pub struct MemorySink {
    messages: Mutex<Vec<PublishedMessage>>,
    metrics: Mutex<SinkMetrics>,
    closed: Mutex<bool>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemorySink {
    /// Create a new memory sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all accepted messages, oldest first
    pub fn messages(&self) -> Vec<PublishedMessage> {
        lock(&self.messages).clone()
    }

    /// Messages published on a topic
    pub fn on_topic(&self, topic: &str) -> Vec<PublishedMessage> {
        lock(&self.messages)
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of accepted messages
    pub fn len(&self) -> usize {
        lock(&self.messages).len()
    }

    /// Check if nothing has been published
    pub fn is_empty(&self) -> bool {
        lock(&self.messages).is_empty()
    }

    /// Refuse all further messages
    pub fn close(&self) {
        *lock(&self.closed) = true;
    }

    fn record_rejected(&self) {
        lock(&self.metrics).messages_rejected += 1;
    }
}

#[async_trait]
impl MessageSink for MemorySink {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if *lock(&self.closed) {
            self.record_rejected();
            return Err(PublishError::Closed);
        }

        lock(&self.messages).push(PublishedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
        });

        let mut metrics = lock(&self.metrics);
        metrics.messages_published += 1;
        metrics.bytes_published += payload.len() as u64;
        Ok(())
    }

    fn metrics(&self) -> SinkMetrics {
        lock(&self.metrics).clone()
    }
}

/// Sink that randomly rejects a fraction of messages
#[derive(Debug)]
pub struct LossySink {
    inner: MemorySink,
    loss_rate: f64,
    rng: Mutex<StdRng>,
}

impl LossySink {
    /// Create a lossy sink with the given rejection rate (0.0-1.0)
    pub fn new(loss_rate: f64, seed: u64) -> Self {
        Self {
            inner: MemorySink::new(),
            loss_rate: loss_rate.clamp(0.0, 1.0),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// The messages that made it through
    pub fn delivered(&self) -> &MemorySink {
        &self.inner
    }
}

#[async_trait]
impl MessageSink for LossySink {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        let dropped = lock(&self.rng).gen::<f64>() < self.loss_rate;
        if dropped {
            self.inner.record_rejected();
            return Err(PublishError::Rejected {
                topic: topic.to_string(),
                reason: "simulated loss".to_string(),
            });
        }
        self.inner.publish(topic, payload).await
    }

    fn metrics(&self) -> SinkMetrics {
        self.inner.metrics()
    }
}
