//! Vehicle route example
//!
//! Drives a vehicle around the built-in city loop on simulated time and
//! prints a row every 30 seconds of driving.
//!
//! Run with: `cargo run --example vehicle_route`

use fleetsim::presets;
use fleetsim::vehicle::dynamics::POLLER_DELAY_MS;
use fleetsim::{DynamicsModel, MessageSpec, RouteError, VehicleDevice};

fn main() -> Result<(), RouteError> {
    println!("=== FleetSim Vehicle Route Example ===\n");

    let route = presets::city_loop();
    println!("Route: {} ({:.1} km, {} stages)\n", route.name, route.km, route.stages.len());

    let spec = MessageSpec {
        interval: 5_000,
        duration: 3_600_000,
        topic: "connectedcar/telemetry/${vin}".to_string(),
        payload: None,
        route: Some(route.name.clone()),
    };
    let mut car = VehicleDevice::new("demo-car", "demo-user", spec, DynamicsModel::with_route(route, 2024)?, 2024);
    car.start(0);

    println!(
        "{:>7} {:>6} {:>9} {:>5} {:>7} {:>9} {:>6}",
        "Time(s)", "Stage", "Speed", "Gear", "RPM", "Odo (km)", "Oil"
    );
    println!("{}", "-".repeat(56));

    let mut now = 0;
    while !car.model().route_ended() && now < 3_600_000 {
        car.tick_physics(now);
        if now % 30_000 == 0 {
            let s = car.model().snapshot();
            let stage = s.route_info.as_ref().map(|r| r.current_stage).unwrap_or(0);
            println!(
                "{:>7} {:>6} {:>9.1} {:>5} {:>7.0} {:>9.2} {:>6.1}",
                now / 1000,
                stage,
                s.vehicle_speed,
                s.transmission_gear_int,
                s.engine_speed,
                s.odometer,
                s.oil_temp
            );
        }
        now += POLLER_DELAY_MS;
    }

    println!("{}", "-".repeat(56));
    let summary = car.trip_summary(now);
    println!("\nTrip summary on {}:", summary.topic);
    match serde_json::to_string_pretty(&summary.payload) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Failed to render summary: {}", e),
    }

    Ok(())
}
