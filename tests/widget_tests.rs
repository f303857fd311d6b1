// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Widget generation and publish loop

use std::sync::Arc;
use std::time::Duration;

use fleetsim::*;
use serde_json::{json, Value};
use tokio::sync::watch;

fn climate_spec(interval: u64, duration: u64) -> MessageSpec {
    MessageSpec::new(
        "sim/${site}/${sensorId}",
        interval,
        duration,
        vec![
            AttributeSpec::new(
                "sensorId",
                AttributeKind::Id {
                    char_set: json!("hex"),
                    length: json!(8),
                },
            )
            .fixed(),
            AttributeSpec::new(
                "site",
                AttributeKind::pick_one(vec![json!("north"), json!("south"), json!("west")]),
            )
            .fixed(),
            AttributeSpec::new("temp", AttributeKind::float(15, 30, 0, 99, 2)),
            AttributeSpec::new(
                "wave",
                AttributeKind::Sinusoidal {
                    min: json!(0),
                    max: json!(100),
                },
            ),
            AttributeSpec::new(
                "meta",
                AttributeKind::object(vec![
                    AttributeSpec::new("rev", AttributeKind::string(4, 4)).fixed(),
                    AttributeSpec::new("load", AttributeKind::int(0, 100)),
                ]),
            ),
        ],
    )
}

fn widget(seed: u64, spec: MessageSpec) -> Widget {
    Widget::with_generator("w-1", "u-1", spec, AttributeGenerator::with_seed(seed))
}

#[test]
fn test_static_attributes_are_idempotent() {
    let mut w = widget(11, climate_spec(1000, 60_000));
    w.start(0);

    let first = w.build_message(1000).unwrap();
    for t in 2..20 {
        let m = w.build_message(t * 1000).unwrap();
        assert_eq!(m.payload["sensorId"], first.payload["sensorId"]);
        assert_eq!(m.payload["site"], first.payload["site"]);
        assert_eq!(m.payload["meta"]["rev"], first.payload["meta"]["rev"]);
        assert_eq!(m.topic, first.topic);
    }
    assert_eq!(w.info().get("meta.rev"), Some(&first.payload["meta"]["rev"]));
}

#[test]
fn test_topic_uses_generated_values() {
    let mut w = widget(3, climate_spec(1000, 60_000));
    w.start(0);
    let m = w.build_message(1000).unwrap();

    let site = m.payload["site"].as_str().unwrap();
    let sensor = m.payload["sensorId"].as_str().unwrap();
    assert_eq!(m.topic, format!("sim/{}/{}", site, sensor));
    assert_eq!(m.payload["_id_"], "w-1");
}

#[test]
fn test_counters_advance_per_message() {
    let mut w = widget(5, climate_spec(1000, 60_000));
    w.start(0);
    for t in 1..=4 {
        w.build_message(t * 1000).unwrap();
    }
    assert_eq!(w.state("wave").unwrap().cnt, 4);
    assert_eq!(w.state("meta.load").unwrap().cnt, 4);

    // First wave sample is taken at cnt 0, the midpoint
    let mut fresh = widget(5, climate_spec(1000, 60_000));
    fresh.start(0);
    let m = fresh.build_message(1000).unwrap();
    assert!((m.payload["wave"].as_f64().unwrap() - 50.0).abs() < 1e-9);
}

#[test]
fn test_same_seed_same_messages() {
    let mut a = widget(99, climate_spec(1000, 60_000));
    let mut b = widget(99, climate_spec(1000, 60_000));
    a.start(0);
    b.start(0);
    for t in 1..10 {
        assert_eq!(a.build_message(t * 1000), b.build_message(t * 1000));
    }
}

#[test]
fn test_tick_stops_after_duration() {
    let mut w = widget(1, climate_spec(1000, 5_000));
    w.start(10_000);
    assert!(matches!(w.tick(15_000), TickOutcome::Publish(_)));
    assert_eq!(
        w.tick(15_001),
        TickOutcome::Stop(StopReason::DurationElapsed)
    );
    assert_eq!(w.status(), WidgetStatus::Stopped);
    assert_eq!(w.tick(16_000), TickOutcome::Stop(StopReason::Stopped));
}

#[test]
fn test_spec_from_json_with_unknown_type() {
    let spec: MessageSpec = serde_json::from_value(json!({
        "interval": 1000,
        "duration": 10000,
        "topic": "t/${kind}",
        "payload": [
            {"name": "kind", "type": "pickOne", "arr": ["a"], "static": true},
            {"name": "mystery", "type": "hologram"},
            {"name": "count", "type": "int", "min": "bad", "max": 5}
        ]
    }))
    .unwrap();

    let mut w = widget(2, spec);
    w.start(0);
    let m = w.build_message(1000).unwrap();
    assert_eq!(m.topic, "t/a");
    assert_eq!(m.payload["mystery"], Value::Null);
    assert!(m.payload["count"].is_i64());
}

#[tokio::test(start_paused = true)]
async fn test_run_publishes_until_duration() {
    let sink = Arc::new(MemorySink::new());
    let stats = Arc::new(RunStats::new());
    let (_tx, rx) = watch::channel(false);

    let report = widget(4, climate_spec(1000, 5_000))
        .run(sink.clone(), stats.clone(), rx)
        .await;

    assert_eq!(report.reason, StopReason::DurationElapsed);
    assert_eq!(report.published, 5);
    assert_eq!(sink.len(), 5);
    let topics: Vec<String> = sink.messages().into_iter().map(|m| m.topic).collect();
    assert!(topics.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test(start_paused = true)]
async fn test_publish_failures_do_not_stop_the_loop() {
    let sink = Arc::new(LossySink::new(0.5, 17));
    let stats = Arc::new(RunStats::new());
    let (_tx, rx) = watch::channel(false);

    let report = widget(4, climate_spec(1000, 40_000))
        .run(sink.clone(), stats, rx)
        .await;

    assert_eq!(report.reason, StopReason::DurationElapsed);
    assert_eq!(report.published + report.failed, 40);
    assert!(report.failed > 0);
    assert!(report.published > 0);
    assert_eq!(sink.delivered().len() as u64, report.published);
}

#[tokio::test(start_paused = true)]
async fn test_stop_signal_ends_the_loop() {
    let sink = Arc::new(MemorySink::new());
    let stats = Arc::new(RunStats::new());
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(
        widget(4, climate_spec(1000, 3_600_000)).run(sink.clone(), stats, rx),
    );
    tokio::time::sleep(Duration::from_millis(3_500)).await;
    tx.send(true).unwrap();

    let report = handle.await.unwrap();
    assert_eq!(report.reason, StopReason::Stopped);
    assert_eq!(report.published, 3);
}

#[tokio::test(start_paused = true)]
async fn test_no_payload_stops_on_first_tick() {
    let spec = MessageSpec {
        interval: 1000,
        duration: 60_000,
        topic: "t".to_string(),
        payload: None,
        route: None,
    };
    let sink = Arc::new(MemorySink::new());
    let (_tx, rx) = watch::channel(false);

    let report = widget(1, spec)
        .run(sink.clone(), Arc::new(RunStats::new()), rx)
        .await;
    assert_eq!(report.reason, StopReason::NoPayload);
    assert!(sink.is_empty());
}
