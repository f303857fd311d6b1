// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Connected vehicle device
//!
//! Runs the dynamics model on the physics period and publishes a telemetry
//! snapshot on the message spec's interval. When the route ends, one trip
//! summary goes out on `<topic>/trip` and the device stops.

use std::sync::Arc;
use std::time::Duration;

use rand::prelude::*;
use rand::rngs::StdRng;
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::dynamics::DynamicsModel;
use crate::runtime::{publish_json, LoopClock, RunReport, RunStats, StopReason};
use crate::sink::MessageSink;
use crate::spec::MessageSpec;
use crate::widget::{substitute_topic, Message, DEVICE_ID_KEY};

const VIN_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPRSTUVWXYZ0123456789";
const VIN_LENGTH: usize = 17;

/// Random 17-character VIN (no I, O or Q)
pub fn random_vin(rng: &mut impl Rng) -> String {
    (0..VIN_LENGTH)
        .map(|_| VIN_ALPHABET[rng.gen_range(0..VIN_ALPHABET.len())] as char)
        .collect()
}

/// Simulated vehicle
#[derive(Debug)]
pub struct VehicleDevice {
    id: String,
    user_id: String,
    spec: MessageSpec,
    vin: String,
    trip_id: String,
    model: DynamicsModel,
    started: Option<u64>,
    /// Odometer and fuel consumed when the trip started
    trip_baseline: (f64, f64),
    physics_interval_ms: u64,
}

impl VehicleDevice {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        spec: MessageSpec,
        model: DynamicsModel,
        seed: u64,
    ) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let vin = random_vin(&mut rng);
        let trip_id = uuid::Builder::from_random_bytes(rng.gen())
            .into_uuid()
            .to_string();
        Self {
            id: id.into(),
            user_id: user_id.into(),
            spec,
            vin,
            trip_id,
            model,
            started: None,
            trip_baseline: (0.0, 0.0),
            physics_interval_ms: super::dynamics::POLLER_DELAY_MS,
        }
    }

    /// Override the physics tick period
    pub fn with_physics_interval_ms(mut self, ms: u64) -> Self {
        self.physics_interval_ms = ms.max(1);
        self
    }

    /// Keep an existing VIN (hydrating a known vehicle)
    pub fn set_vin(&mut self, vin: impl Into<String>) {
        self.vin = vin.into();
    }

    /// Restore odometer and fuel consumed from device metadata
    pub fn restore_state(&mut self, metadata: &Value) -> usize {
        self.model.restore_state(metadata)
    }

    /// Metadata to store on the device record so a later run resumes here
    pub fn state_metadata(&self) -> Value {
        let mut metadata = self.model.persisted_state();
        metadata.insert("vin".to_string(), Value::from(self.vin.as_str()));
        Value::Object(metadata)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn vin(&self) -> &str {
        &self.vin
    }

    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }

    pub fn spec(&self) -> &MessageSpec {
        &self.spec
    }

    pub fn model(&self) -> &DynamicsModel {
        &self.model
    }

    pub fn model_mut(&mut self) -> &mut DynamicsModel {
        &mut self.model
    }

    pub fn start(&mut self, now_ms: u64) {
        self.started = Some(now_ms);
        let s = self.model.snapshot();
        self.trip_baseline = (s.odometer, s.fuel_consumed_since_restart);
        info!(device_id = %self.id, vin = %self.vin, "Vehicle started");
    }

    /// Advance the physics by one tick
    pub fn tick_physics(&mut self, now_ms: u64) {
        self.model.tick(now_ms);
    }

    /// Whether the run time exceeded the spec's duration
    pub fn duration_elapsed(&self, now_ms: u64) -> bool {
        match self.started {
            Some(started) => now_ms.saturating_sub(started) > self.spec.duration,
            None => false,
        }
    }

    fn base_payload(&self, now_ms: u64) -> Map<String, Value> {
        let mut payload = Map::new();
        payload.insert("vin".to_string(), Value::from(self.vin.as_str()));
        payload.insert("tripId".to_string(), Value::from(self.trip_id.as_str()));
        payload.insert("timestamp".to_string(), Value::from(now_ms));
        payload.insert(DEVICE_ID_KEY.to_string(), Value::from(self.id.as_str()));
        payload
    }

    /// Telemetry message for the current snapshot
    pub fn telemetry(&self, now_ms: u64) -> Message {
        let mut payload = self.base_payload(now_ms);
        if let Ok(Value::Object(fields)) = serde_json::to_value(self.model.snapshot()) {
            payload.extend(fields);
        }
        Message {
            topic: substitute_topic(&self.spec.topic, &payload),
            payload: Value::Object(payload),
        }
    }

    /// Summary of the finished trip
    pub fn trip_summary(&self, now_ms: u64) -> Message {
        let s = self.model.snapshot();
        let mut payload = self.base_payload(now_ms);
        let summary = json!({
            "routeName": s.route_info.as_ref().map(|r| r.route_name.clone()),
            "distance": s.odometer - self.trip_baseline.0,
            "fuelConsumed": s.fuel_consumed_since_restart - self.trip_baseline.1,
            "odometer": s.odometer,
            "routeDuration": s.route_duration,
            "latitude": s.latitude,
            "longitude": s.longitude,
        });
        if let Value::Object(fields) = summary {
            payload.extend(fields);
        }
        let topic = format!("{}/trip", substitute_topic(&self.spec.topic, &payload));
        Message {
            topic,
            payload: Value::Object(payload),
        }
    }

    /// Run physics and publishing until the route ends, the duration
    /// elapses, or `stop` fires.
    pub async fn run(
        mut self,
        sink: Arc<dyn MessageSink>,
        stats: Arc<RunStats>,
        mut stop: watch::Receiver<bool>,
    ) -> RunReport {
        let clock = LoopClock::start();
        self.start(clock.now_ms());

        let mut physics = interval(Duration::from_millis(self.physics_interval_ms));
        physics.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut publish = interval(Duration::from_millis(self.spec.interval.max(1)));
        publish.set_missed_tick_behavior(MissedTickBehavior::Delay);
        publish.tick().await;

        let reason = loop {
            tokio::select! {
                _ = physics.tick() => {
                    let now = clock.now_ms();
                    self.tick_physics(now);
                    if self.model.route_ended() {
                        let summary = self.trip_summary(now);
                        publish_json(sink.as_ref(), &stats, &self.id, &summary.topic, &summary.payload).await;
                        break StopReason::RouteEnded;
                    }
                }
                _ = publish.tick() => {
                    let now = clock.now_ms();
                    if self.duration_elapsed(now) {
                        break StopReason::DurationElapsed;
                    }
                    let message = self.telemetry(now);
                    publish_json(sink.as_ref(), &stats, &self.id, &message.topic, &message.payload).await;
                }
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break StopReason::Stopped;
                    }
                }
            }
        };

        debug!(device_id = %self.id, ?reason, ticks = self.model.ticks(), "Vehicle loop ended");
        RunReport::new(&self.id, &stats, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::route::{DrivingProfile, GeoPoint, Route, Stage};

    fn vehicle() -> VehicleDevice {
        let route = Route::new(
            "short",
            vec![Stage {
                start: GeoPoint::new(40.0, -75.0),
                end: GeoPoint::new(40.001, -75.0),
                km: 0.05,
                throttle: Some(60.0),
            }],
            DrivingProfile::Normal,
        );
        let spec = MessageSpec {
            interval: 1000,
            duration: 3_600_000,
            topic: "fleet/${vin}/telemetry".to_string(),
            payload: None,
            route: Some("short".to_string()),
        };
        VehicleDevice::new("car-1", "u1", spec, DynamicsModel::with_route(route, 7).unwrap(), 7)
    }

    #[test]
    fn test_vin_shape() {
        let mut rng = StdRng::seed_from_u64(1);
        let vin = random_vin(&mut rng);
        assert_eq!(vin.len(), 17);
        assert!(!vin.contains(['I', 'O', 'Q']));
    }

    #[test]
    fn test_telemetry_topic_and_fields() {
        let mut car = vehicle();
        car.start(0);
        car.tick_physics(0);
        let m = car.telemetry(0);
        assert_eq!(m.topic, format!("fleet/{}/telemetry", car.vin()));
        assert_eq!(m.payload[DEVICE_ID_KEY], "car-1");
        assert_eq!(m.payload["tripId"], car.trip_id());
        assert!(m.payload.get("vehicleSpeed").is_some());
        assert_eq!(m.payload["routeInfo"]["routeName"], "short");
    }

    #[test]
    fn test_trip_summary_after_route_end() {
        let mut car = vehicle();
        car.start(0);
        let mut now = 0;
        while !car.model().route_ended() && now < 600_000 {
            car.tick_physics(now);
            now += 500;
        }
        assert!(car.model().route_ended());
        let m = car.trip_summary(now);
        assert!(m.topic.ends_with("/telemetry/trip"));
        assert!(m.payload["distance"].as_f64().unwrap() >= 0.05);
        assert!(m.payload["routeDuration"].as_u64().is_some());
        assert_eq!(m.payload["latitude"], 40.001);
    }

    #[test]
    fn test_restored_vehicle_reports_trip_distance() {
        let mut car = vehicle();
        let metadata = serde_json::json!({"odometer": 1234.5, "fuelConsumedSinceRestart": 2.0});
        assert_eq!(car.restore_state(&metadata), 2);
        car.start(0);
        let mut now = 0;
        while !car.model().route_ended() && now < 600_000 {
            car.tick_physics(now);
            now += 500;
        }

        let m = car.trip_summary(now);
        let distance = m.payload["distance"].as_f64().unwrap();
        assert!((0.05..1.0).contains(&distance));
        assert!(m.payload["odometer"].as_f64().unwrap() >= 1234.55);
        assert!(m.payload["fuelConsumed"].as_f64().unwrap() < 1.0);

        let state = car.state_metadata();
        assert_eq!(state["vin"], car.vin());
        assert!(state["odometer"].as_f64().unwrap() > 1234.5);
    }

    #[test]
    fn test_duration_elapsed() {
        let mut car = vehicle();
        assert!(!car.duration_elapsed(10_000_000));
        car.start(1_000);
        assert!(!car.duration_elapsed(3_601_000));
        assert!(car.duration_elapsed(3_601_001));
    }
}
