// FleetSim Runner - JSON lines output
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Message sink writing one JSON object per line.
//!
//! Each line is `{"topic": ..., "payload": ...}`. The payload is embedded as
//! JSON when it parses, as a string otherwise.

use std::io;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use fleetsim::{MessageSink, PublishError, SinkMetrics};
use serde_json::{json, Value};
use tokio::fs::OpenOptions;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

use crate::metrics::{record_failure, record_published};

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Sink writing JSON lines to a file or stdout
pub struct JsonLinesSink {
    writer: tokio::sync::Mutex<Writer>,
    metrics: Mutex<SinkMetrics>,
}

impl JsonLinesSink {
    /// Write to any async writer
    pub fn new(writer: Writer) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            metrics: Mutex::new(SinkMetrics::default()),
        }
    }

    pub fn stdout() -> Self {
        Self::new(Box::new(tokio::io::stdout()))
    }

    /// Append to a file, creating it if needed
    pub async fn append_to(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        Ok(Self::new(Box::new(BufWriter::new(file))))
    }

    async fn write_line(&self, topic: &str, payload: &[u8]) -> io::Result<()> {
        let payload = serde_json::from_slice::<Value>(payload)
            .unwrap_or_else(|_| Value::from(String::from_utf8_lossy(payload).into_owned()));
        let mut line = serde_json::to_vec(&json!({ "topic": topic, "payload": payload }))?;
        line.push(b'\n');

        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await
    }
}

#[async_trait]
impl MessageSink for JsonLinesSink {
    async fn publish(&self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        match self.write_line(topic, payload).await {
            Ok(()) => {
                let mut metrics = lock(&self.metrics);
                metrics.messages_published += 1;
                metrics.bytes_published += payload.len() as u64;
                record_published(topic, payload.len());
                Ok(())
            }
            Err(e) => {
                lock(&self.metrics).messages_rejected += 1;
                record_failure(topic);
                Err(PublishError::Rejected {
                    topic: topic.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    fn metrics(&self) -> SinkMetrics {
        lock(&self.metrics).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[tokio::test]
    async fn test_writes_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let sink = JsonLinesSink::append_to(&path).await.unwrap();

        sink.publish("a/b", br#"{"x":1}"#).await.unwrap();
        sink.publish("a/c", b"not json").await.unwrap();
        assert_eq!(sink.metrics().messages_published, 2);

        let file = std::fs::File::open(&path).unwrap();
        let lines: Vec<Value> = BufReader::new(file)
            .lines()
            .map(|l| serde_json::from_str(&l.unwrap()).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["topic"], "a/b");
        assert_eq!(lines[0]["payload"]["x"], 1);
        assert_eq!(lines[1]["payload"], "not json");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_publishers_write_whole_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl");
        let sink = std::sync::Arc::new(JsonLinesSink::append_to(&path).await.unwrap());

        let tasks: Vec<_> = (0..8)
            .map(|n| {
                let sink = std::sync::Arc::clone(&sink);
                tokio::spawn(async move {
                    for i in 0..25 {
                        let payload = format!(r#"{{"device":{},"seq":{}}}"#, n, i);
                        sink.publish("sim/load", payload.as_bytes()).await.unwrap();
                    }
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(sink.metrics().messages_published, 200);
        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 200);
        assert!(lines.iter().all(|l| l["topic"] == "sim/load"));
    }
}
