// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Generic attribute-driven device
//!
//! A [`Widget`] owns a message spec and turns it into one JSON message per
//! tick. Generation state is kept per attribute path (`env.humidity` for a
//! nested attribute), so static values and tick counters survive for the
//! widget's lifetime.
//!
//! The widget itself is synchronous and clock-agnostic: [`Widget::tick`]
//! takes the current time. [`Widget::run`] drives it from a tokio interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::generator::AttributeGenerator;
use crate::runtime::{publish_json, LoopClock, RunReport, RunStats, StopReason};
use crate::sink::MessageSink;
use crate::spec::{AttributeKind, AttributeSpec, MessageSpec};

type Gen = AttributeGenerator;

/// Payload key carrying the device id
pub const DEVICE_ID_KEY: &str = "_id_";

/// Per-attribute generation state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerationState {
    /// Last generated value
    pub value: Value,
    /// Number of generations so far
    pub cnt: u64,
}

/// Lifecycle of a widget
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetStatus {
    Created,
    Running,
    Stopped,
}

/// A message ready to publish
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    pub payload: Value,
}

/// Result of one tick
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// Publish this message and keep going
    Publish(Message),
    /// The widget has stopped itself (or was never started)
    Stop(StopReason),
}

/// Generic simulated device
#[derive(Debug)]
pub struct Widget {
    id: String,
    user_id: String,
    spec: MessageSpec,
    status: WidgetStatus,
    started: Option<u64>,
    current_state: HashMap<String, GenerationState>,
    info: HashMap<String, Value>,
    generator: AttributeGenerator,
}

impl Widget {
    /// Create a widget with an entropy-seeded generator
    pub fn new(id: impl Into<String>, user_id: impl Into<String>, spec: MessageSpec) -> Self {
        Self::with_generator(id, user_id, spec, AttributeGenerator::new())
    }

    /// Create a widget with a given generator
    pub fn with_generator(
        id: impl Into<String>,
        user_id: impl Into<String>,
        spec: MessageSpec,
        generator: AttributeGenerator,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            spec,
            status: WidgetStatus::Created,
            started: None,
            current_state: HashMap::new(),
            info: HashMap::new(),
            generator,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn spec(&self) -> &MessageSpec {
        &self.spec
    }

    pub fn status(&self) -> WidgetStatus {
        self.status
    }

    /// Time `start` was called, in epoch milliseconds
    pub fn started(&self) -> Option<u64> {
        self.started
    }

    /// Cached static values, keyed by attribute path
    pub fn info(&self) -> &HashMap<String, Value> {
        &self.info
    }

    /// Generation state of an attribute path
    pub fn state(&self, path: &str) -> Option<&GenerationState> {
        self.current_state.get(path)
    }

    /// Enter the running state
    pub fn start(&mut self, now_ms: u64) {
        self.started = Some(now_ms);
        self.status = WidgetStatus::Running;
        info!(device_id = %self.id, topic = %self.spec.topic, "Widget started");
    }

    /// Halt publishing
    pub fn stop(&mut self) {
        if self.status != WidgetStatus::Stopped {
            self.status = WidgetStatus::Stopped;
            info!(device_id = %self.id, "Widget stopped");
        }
    }

    /// Advance one tick.
    ///
    /// Stops the widget once more than `duration` has elapsed since start,
    /// or when the spec has no payload.
    pub fn tick(&mut self, now_ms: u64) -> TickOutcome {
        let started = match (self.status, self.started) {
            (WidgetStatus::Running, Some(started)) => started,
            _ => return TickOutcome::Stop(StopReason::Stopped),
        };

        if now_ms.saturating_sub(started) > self.spec.duration {
            self.stop();
            return TickOutcome::Stop(StopReason::DurationElapsed);
        }

        match self.build_message(now_ms) {
            Some(message) => TickOutcome::Publish(message),
            None => {
                warn!(device_id = %self.id, "No payload defined, stopping");
                self.stop();
                TickOutcome::Stop(StopReason::NoPayload)
            }
        }
    }

    /// Generate one message, or `None` when the spec has no payload.
    pub fn build_message(&mut self, now_ms: u64) -> Option<Message> {
        let attributes = self.spec.payload.clone()?;
        let mut payload = self.generate_payload(&attributes, "", now_ms);
        payload.insert(DEVICE_ID_KEY.to_string(), Value::String(self.id.clone()));
        let topic = substitute_topic(&self.spec.topic, &payload);
        Some(Message {
            topic,
            payload: Value::Object(payload),
        })
    }

    fn generate_payload(
        &mut self,
        attributes: &[AttributeSpec],
        prefix: &str,
        now_ms: u64,
    ) -> Map<String, Value> {
        attributes
            .iter()
            .map(|attr| {
                let path = if prefix.is_empty() {
                    attr.name.clone()
                } else {
                    format!("{}.{}", prefix, attr.name)
                };
                let value = self.generate_attribute(attr, &path, now_ms);
                (attr.name.clone(), value)
            })
            .collect()
    }

    fn generate_attribute(&mut self, attr: &AttributeSpec, path: &str, now_ms: u64) -> Value {
        let state = self.current_state.entry(path.to_string()).or_default();
        let cnt = state.cnt;
        state.cnt += 1;

        let cacheable = attr.is_static && !matches!(attr.kind, AttributeKind::Object { .. });
        let cached = if cacheable {
            self.info.get(path).cloned()
        } else {
            None
        };
        let value = match cached {
            Some(cached) => cached,
            None => {
                let value = match attr.default {
                    Some(ref default) if cacheable => default.clone(),
                    _ => self.generate_kind(&attr.kind, path, now_ms, cnt),
                };
                if cacheable {
                    self.info.insert(path.to_string(), value.clone());
                }
                value
            }
        };

        if let Some(state) = self.current_state.get_mut(path) {
            state.value = value.clone();
        }
        value
    }

    fn generate_kind(&mut self, kind: &AttributeKind, path: &str, now_ms: u64, cnt: u64) -> Value {
        let gen = &mut self.generator;
        match kind {
            AttributeKind::Id { char_set, length } => Value::from(gen.id(char_set, length)),
            AttributeKind::String { min, max } => Value::from(gen.str(min, max)),
            AttributeKind::Int { min, max } => Value::from(gen.int(min, max)),
            AttributeKind::Timestamp { tsformat } => {
                Value::from(Gen::ts(tsformat, now_ms))
            }
            AttributeKind::Bool { min, max, seed } => Value::from(gen.bool(min, max, seed)),
            AttributeKind::Range { start, stop, step } => {
                Value::from(Gen::range(start, stop, step))
            }
            AttributeKind::Float {
                imin,
                imax,
                dmin,
                dmax,
                precision,
            } => Value::from(gen.float(imin, imax, dmin, dmax, precision)),
            AttributeKind::PickSome {
                arr,
                count,
                shuffle,
            } => Value::Array(gen.pick_some(arr, count, shuffle)),
            AttributeKind::PickOne { arr } => gen.pick_one(arr),
            AttributeKind::Uuid => Value::from(gen.uuid()),
            AttributeKind::Shortid => Value::from(gen.shortid()),
            AttributeKind::Location { lat, long, radius } => {
                let (latitude, longitude) = gen.location(lat, long, radius);
                serde_json::json!({ "latitude": latitude, "longitude": longitude })
            }
            AttributeKind::Sinusoidal { min, max } => {
                Value::from(Gen::sinusoidal(min, max, cnt))
            }
            AttributeKind::Decay { min, max } => {
                Value::from(Gen::decay(min, max, cnt))
            }
            AttributeKind::Object { payload } => {
                Value::Object(self.generate_payload(payload, path, now_ms))
            }
            AttributeKind::Unsupported => Value::Null,
        }
    }

    /// Run the publish loop until the widget stops itself or `stop` fires.
    ///
    /// The first message goes out one interval after start. A tick that has
    /// begun always completes before a stop request is observed.
    pub async fn run(
        mut self,
        sink: Arc<dyn MessageSink>,
        stats: Arc<RunStats>,
        mut stop: watch::Receiver<bool>,
    ) -> RunReport {
        let clock = LoopClock::start();
        self.start(clock.now_ms());

        let mut ticker = interval(Duration::from_millis(self.spec.interval.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        let reason = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick(clock.now_ms()) {
                        TickOutcome::Publish(message) => {
                            publish_json(
                                sink.as_ref(),
                                &stats,
                                &self.id,
                                &message.topic,
                                &message.payload,
                            )
                            .await;
                        }
                        TickOutcome::Stop(reason) => break reason,
                    }
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break StopReason::Stopped;
                    }
                }
            }
        };

        self.stop();
        debug!(device_id = %self.id, ?reason, published = stats.published(), "Widget loop ended");
        RunReport::new(&self.id, &stats, reason)
    }
}

/// Replace `${name}` placeholders with top-level payload values.
///
/// String values are inserted bare, other values as JSON. Unknown
/// placeholders are left untouched.
pub fn substitute_topic(template: &str, payload: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match payload.get(name) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(other) => out.push_str(&other.to_string()),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn widget(payload: Vec<AttributeSpec>) -> Widget {
        let spec = MessageSpec::new("sim/${kind}/data", 1000, 10_000, payload);
        Widget::with_generator("dev-1", "user-1", spec, AttributeGenerator::with_seed(42))
    }

    #[test]
    fn test_substitute_topic() {
        let payload = json!({"a": "x", "n": 3}).as_object().cloned().unwrap();
        assert_eq!(substitute_topic("t/${a}/${n}", &payload), "t/x/3");
        assert_eq!(substitute_topic("t/${missing}", &payload), "t/${missing}");
        assert_eq!(substitute_topic("t/${a", &payload), "t/${a");
        assert_eq!(substitute_topic("plain", &payload), "plain");
    }

    #[test]
    fn test_tick_before_start() {
        let mut w = widget(vec![]);
        assert_eq!(w.tick(0), TickOutcome::Stop(StopReason::Stopped));
        assert_eq!(w.status(), WidgetStatus::Created);
    }

    #[test]
    fn test_message_has_id_and_topic() {
        let mut w = widget(vec![AttributeSpec::new(
            "kind",
            AttributeKind::pick_one(vec![json!("pump")]),
        )]);
        w.start(0);
        match w.tick(1000) {
            TickOutcome::Publish(m) => {
                assert_eq!(m.topic, "sim/pump/data");
                assert_eq!(m.payload[DEVICE_ID_KEY], "dev-1");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_static_attribute_cached() {
        let mut w = widget(vec![
            AttributeSpec::new("serial", AttributeKind::Uuid).fixed(),
            AttributeSpec::new("reading", AttributeKind::Uuid),
        ]);
        w.start(0);
        let a = w.build_message(0).unwrap();
        let b = w.build_message(1).unwrap();
        assert_eq!(a.payload["serial"], b.payload["serial"]);
        assert_ne!(a.payload["reading"], b.payload["reading"]);
        assert_eq!(w.info()["serial"], a.payload["serial"]);
        assert_eq!(w.state("serial").unwrap().cnt, 2);
    }

    #[test]
    fn test_static_default_used() {
        let mut w = widget(vec![AttributeSpec::new("fw", AttributeKind::string(3, 7))
            .fixed()
            .with_default(json!("1.0.4"))]);
        assert_eq!(w.build_message(0).unwrap().payload["fw"], "1.0.4");
    }

    #[test]
    fn test_nested_static_cached_independently() {
        let mut w = widget(vec![AttributeSpec::new(
            "env",
            AttributeKind::object(vec![
                AttributeSpec::new("site", AttributeKind::Shortid).fixed(),
                AttributeSpec::new("probe", AttributeKind::Shortid),
            ]),
        )
        .fixed()]);
        let a = w.build_message(0).unwrap();
        let b = w.build_message(1).unwrap();
        assert_eq!(a.payload["env"]["site"], b.payload["env"]["site"]);
        assert_ne!(a.payload["env"]["probe"], b.payload["env"]["probe"]);
        assert!(w.info().contains_key("env.site"));
        assert!(!w.info().contains_key("env"));
    }

    #[test]
    fn test_decay_uses_counter() {
        let attr: AttributeSpec =
            serde_json::from_value(json!({"name": "d", "type": "decay", "min": 0, "max": 50}))
                .unwrap();
        let mut w = widget(vec![attr]);
        let first = w.build_message(0).unwrap().payload["d"].as_f64().unwrap();
        let second = w.build_message(0).unwrap().payload["d"].as_f64().unwrap();
        assert!((first - 50.0).abs() < 1e-9);
        assert!(second < first);
    }

    #[test]
    fn test_unsupported_is_null() {
        let attr: AttributeSpec =
            serde_json::from_value(json!({"name": "x", "type": "hologram"})).unwrap();
        let mut w = widget(vec![attr]);
        assert_eq!(w.build_message(0).unwrap().payload["x"], Value::Null);
    }

    #[test]
    fn test_no_payload_stops() {
        let mut spec = MessageSpec::new("t", 1000, 10_000, vec![]);
        spec.payload = None;
        let mut w = Widget::new("d", "u", spec);
        w.start(0);
        assert_eq!(w.tick(1000), TickOutcome::Stop(StopReason::NoPayload));
        assert_eq!(w.status(), WidgetStatus::Stopped);
    }

    #[test]
    fn test_duration_elapsed_stops() {
        let mut w = widget(vec![AttributeSpec::new("n", AttributeKind::int(0, 9))]);
        w.start(5_000);
        assert!(matches!(w.tick(15_000), TickOutcome::Publish(_)));
        assert_eq!(w.tick(15_001), TickOutcome::Stop(StopReason::DurationElapsed));
        assert_eq!(w.tick(16_000), TickOutcome::Stop(StopReason::Stopped));
    }
}
