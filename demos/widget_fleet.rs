//! Widget fleet example
//!
//! Provisions a handful of environment sensors, runs them for a few seconds
//! against an in-memory sink and prints what they published.
//!
//! Run with: `cargo run --example widget_fleet`

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use fleetsim::presets;
use fleetsim::{Fleet, MemoryRouteSource, MemorySink, ProvisionParams, SimulatorConfig};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new("fleetsim=info"))
        .init();

    println!("=== FleetSim Widget Fleet Example ===\n");

    let sink = Arc::new(MemorySink::new());
    let mut fleet = Fleet::new(
        SimulatorConfig::default(),
        sink.clone(),
        Arc::new(MemoryRouteSource::new()),
    );

    // Speed the preset up so the example finishes quickly
    let mut sensor = presets::environment_sensor();
    sensor.spec.interval = 250;
    sensor.spec.duration = 2_000;

    for seed in 0..5 {
        let device = fleet
            .provision(ProvisionParams::new("demo-user", sensor.clone()).with_seed(seed))
            .await?;
        let id = fleet.start(device).await;
        println!("Started {}", id);
    }

    while fleet.stats().active_devices > 0 {
        tokio::time::sleep(Duration::from_millis(250)).await;
        fleet.reap().await;
    }

    let mut per_topic: BTreeMap<String, usize> = BTreeMap::new();
    for message in sink.messages() {
        *per_topic.entry(message.topic).or_default() += 1;
    }

    println!("\n{:<30} {:>8}", "Topic", "Messages");
    println!("{}", "-".repeat(40));
    for (topic, count) in &per_topic {
        println!("{:<30} {:>8}", topic, count);
    }

    if let Some(last) = sink.messages().last() {
        println!("\nLast payload:\n{}", serde_json::to_string_pretty(&last.json()?)?);
    }

    let stats = fleet.stats();
    println!("\n=== Statistics ===\n");
    println!("Devices finished:   {}", stats.finished_devices);
    println!("Messages published: {}", stats.messages_published);
    println!("Publish failures:   {}", stats.publish_failures);

    Ok(())
}
