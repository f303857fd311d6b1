// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Built-in device types and routes
//!
//! Ready-made specs for demos, benches and the runner when no type files
//! are given.

use serde_json::json;

use crate::spec::{
    AttributeKind, AttributeSpec, DeviceCategory, DeviceTypeSpec, MessageSpec, Visibility,
};
use crate::vehicle::route::{DrivingProfile, GeoPoint, Route, Stage, TriggerKind};

/// Type id of the built-in environmental sensor
pub const ENVIRONMENT_SENSOR: &str = "environment-sensor";
/// Type id of the built-in connected vehicle
pub const CONNECTED_VEHICLE: &str = "connected-vehicle";

/// Environmental sensor publishing every 2 s for 10 minutes
pub fn environment_sensor() -> DeviceTypeSpec {
    let payload = vec![
        AttributeSpec::new(
            "sensorId",
            AttributeKind::Id {
                char_set: json!("hex"),
                length: json!(12),
            },
        )
        .fixed(),
        AttributeSpec::new(
            "site",
            AttributeKind::pick_one(vec![json!("north"), json!("south"), json!("east")]),
        )
        .fixed(),
        AttributeSpec::new("temperature", AttributeKind::float(18, 27, 0, 99, 2)),
        AttributeSpec::new("humidity", AttributeKind::int(30, 70)),
        AttributeSpec::new(
            "light",
            AttributeKind::Sinusoidal {
                min: json!(0),
                max: json!(1000),
            },
        ),
        AttributeSpec::new(
            "battery",
            AttributeKind::Decay {
                min: json!(20),
                max: json!(100),
            },
        ),
        AttributeSpec::new(
            "location",
            AttributeKind::Location {
                lat: json!(47.6062),
                long: json!(-122.3321),
                radius: json!(500),
            },
        )
        .fixed(),
        AttributeSpec::new(
            "ts",
            AttributeKind::Timestamp {
                tsformat: json!("default"),
            },
        ),
        AttributeSpec::new(
            "status",
            AttributeKind::object(vec![
                AttributeSpec::new("firmware", AttributeKind::string(3, 7))
                    .fixed()
                    .with_default(json!("2.4.1")),
                AttributeSpec::new(
                    "ok",
                    AttributeKind::Bool {
                        min: json!(0),
                        max: json!(9),
                        seed: json!(8),
                    },
                ),
            ]),
        ),
    ];

    DeviceTypeSpec {
        type_id: ENVIRONMENT_SENSOR.to_string(),
        name: "Environment sensor".to_string(),
        custom: false,
        visibility: Visibility::Shared,
        category: DeviceCategory::Widget,
        user_id: None,
        spec: MessageSpec::new("sim/environment/${site}", 2_000, 600_000, payload),
    }
}

/// Connected vehicle publishing every 5 s, on a random route
pub fn connected_vehicle() -> DeviceTypeSpec {
    DeviceTypeSpec {
        type_id: CONNECTED_VEHICLE.to_string(),
        name: "Connected vehicle".to_string(),
        custom: false,
        visibility: Visibility::Shared,
        category: DeviceCategory::Automotive,
        user_id: None,
        spec: MessageSpec {
            interval: 5_000,
            duration: 3_600_000,
            topic: "connectedcar/telemetry/${vin}".to_string(),
            payload: None,
            route: None,
        },
    }
}

/// All built-in types
pub fn device_types() -> Vec<DeviceTypeSpec> {
    vec![environment_sensor(), connected_vehicle()]
}

/// Short city loop with one hard-brake event
pub fn city_loop() -> Route {
    let a = GeoPoint::new(38.9072, -77.0369);
    let b = GeoPoint::new(38.9150, -77.0369);
    let c = GeoPoint::new(38.9150, -77.0250);
    Route::new(
        "city-loop",
        vec![
            Stage {
                start: a,
                end: b,
                km: 0.9,
                throttle: Some(30.0),
            },
            Stage {
                start: b,
                end: c,
                km: 1.0,
                throttle: None,
            },
            Stage {
                start: c,
                end: a,
                km: 1.6,
                throttle: Some(25.0),
            },
        ],
        DrivingProfile::Normal,
    )
    .with_trigger(TriggerKind::Brake, 1)
}

/// Highway run with aggressive driving and an oil temperature fault
pub fn highway_run() -> Route {
    let a = GeoPoint::new(47.6062, -122.3321);
    let b = GeoPoint::new(47.2529, -122.4443);
    let c = GeoPoint::new(46.9965, -122.9077);
    Route::new(
        "highway-run",
        vec![
            Stage {
                start: a,
                end: b,
                km: 40.0,
                throttle: Some(70.0),
            },
            Stage {
                start: b,
                end: c,
                km: 45.0,
                throttle: None,
            },
        ],
        DrivingProfile::Aggressive,
    )
    .with_trigger(TriggerKind::OilTemp, 1)
    .with_trigger(TriggerKind::Brake, 2)
}

/// All built-in routes
pub fn routes() -> Vec<Route> {
    vec![city_loop(), highway_run()]
}
