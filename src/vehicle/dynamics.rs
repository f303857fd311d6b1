// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Vehicle dynamics model
//!
//! Owns the ordered calculator pipeline and the current snapshot. A tick
//! folds the pipeline over a copy of the current snapshot and replaces the
//! snapshot with the result.

use rand::prelude::*;
use rand::rngs::StdRng;
use serde_json::{Map, Value};
use tracing::debug;

use super::calculators::*;
use super::route::{Route, RouteCalc, RouteSource};
use super::snapshot::{SnapshotValue, VehicleSnapshot};
use crate::error::RouteError;

/// Default physics tick period
pub const POLLER_DELAY_MS: u64 = 500;

/// Snapshot fields carried over between runs of the same vehicle
pub const PERSISTED_FIELDS: [&str; 2] = ["odometer", "fuelConsumedSinceRestart"];

/// Lifecycle of a dynamics model
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicsState {
    Running,
    RouteEnded,
}

/// Physics simulation of one vehicle
pub struct DynamicsModel {
    calculators: Vec<Box<dyn DataCalculator>>,
    snapshot: VehicleSnapshot,
    state: DynamicsState,
    route_driven: bool,
    ticks: u64,
}

impl std::fmt::Debug for DynamicsModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamicsModel")
            .field("calculators", &self.calculator_names())
            .field("state", &self.state)
            .field("ticks", &self.ticks)
            .finish()
    }
}

fn physics_pipeline(seed: u64) -> Vec<Box<dyn DataCalculator>> {
    vec![
        Box::new(SpeedCalc::default()),
        Box::new(AccelerationCalc::default()),
        Box::new(GearCalc),
        Box::new(GearIntCalc),
        Box::new(TorqueCalc),
        Box::new(EngineSpeedCalc),
        Box::new(FuelConsumedCalc::default()),
        Box::new(OdometerCalc::default()),
        Box::new(FuelLevelCalc),
        Box::new(OilTempCalc::new(seed)),
    ]
}

impl DynamicsModel {
    /// Free-driving model controlled only through the input setters
    pub fn new(seed: u64) -> Self {
        Self {
            calculators: physics_pipeline(seed),
            snapshot: VehicleSnapshot::default(),
            state: DynamicsState::Running,
            route_driven: false,
            ticks: 0,
        }
    }

    /// Model that follows `route`; a route without stages is rejected
    pub fn with_route(route: Route, seed: u64) -> Result<Self, RouteError> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut calculators = physics_pipeline(rng.gen());
        calculators.push(Box::new(RouteCalc::new(route, rng.gen())?));
        Ok(Self {
            calculators,
            snapshot: VehicleSnapshot::default(),
            state: DynamicsState::Running,
            route_driven: true,
            ticks: 0,
        })
    }

    /// Load a route by name and build a model that follows it.
    ///
    /// A load failure is returned as is; the vehicle cannot run without it.
    pub async fn from_source(
        source: &dyn RouteSource,
        route_name: &str,
        seed: u64,
    ) -> Result<Self, RouteError> {
        let route = source.load_route(route_name).await?;
        debug!(route = route_name, stages = route.stages.len(), "Route loaded");
        Self::with_route(route, seed)
    }

    /// Current snapshot
    pub fn snapshot(&self) -> &VehicleSnapshot {
        &self.snapshot
    }

    /// Persisted fields of the current snapshot, keyed by field name
    pub fn persisted_state(&self) -> Map<String, Value> {
        let mut state = Map::new();
        let persisted = self
            .calculators
            .iter()
            .filter(|c| PERSISTED_FIELDS.contains(&c.name()));
        for calc in persisted {
            if let Some(SnapshotValue::Number(v)) = calc.get(&self.snapshot) {
                state.insert(calc.name().to_string(), Value::from(v));
            }
        }
        state
    }

    /// Restore persisted fields from device metadata.
    ///
    /// Missing, negative or non-numeric entries are ignored. Returns the
    /// number of fields applied.
    pub fn restore_state(&mut self, metadata: &Value) -> usize {
        let mut restored = 0;
        let persisted = self
            .calculators
            .iter()
            .filter(|c| PERSISTED_FIELDS.contains(&c.name()));
        for calc in persisted {
            let value = metadata
                .get(calc.name())
                .and_then(Value::as_f64)
                .filter(|v| v.is_finite() && *v >= 0.0);
            if let Some(v) = value {
                if calc.put(&mut self.snapshot, SnapshotValue::Number(v)) {
                    restored += 1;
                }
            }
        }
        if restored > 0 {
            debug!(fields = restored, "Vehicle state restored");
        }
        restored
    }

    pub fn state(&self) -> DynamicsState {
        self.state
    }

    pub fn route_ended(&self) -> bool {
        self.state == DynamicsState::RouteEnded
    }

    /// Ticks run so far
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Calculator names in pipeline order
    pub fn calculator_names(&self) -> Vec<&'static str> {
        self.calculators.iter().map(|c| c.name()).collect()
    }

    pub fn set_accelerator(&mut self, position: f64) {
        self.snapshot.accelerator_pedal_position = position.clamp(0.0, 100.0);
    }

    pub fn set_brake(&mut self, position: f64) {
        self.snapshot.brake_pedal_position = position.clamp(0.0, 100.0);
    }

    pub fn set_ignition(&mut self, on: bool) {
        self.snapshot.ignition_status = on;
    }

    pub fn set_parking_brake(&mut self, engaged: bool) {
        self.snapshot.parking_brake_status = engaged;
    }

    pub fn set_manual_transmission(&mut self, manual: bool) {
        self.snapshot.manual_transmission = manual;
    }

    /// Requested gear, used in manual mode
    pub fn set_gear(&mut self, gear: u8) {
        self.snapshot.requested_gear = gear.clamp(MIN_GEAR, MAX_GEAR);
    }

    /// Run the pipeline once.
    ///
    /// Does nothing after the route has ended.
    pub fn tick(&mut self, now_ms: u64) -> &VehicleSnapshot {
        if self.state == DynamicsState::RouteEnded {
            return &self.snapshot;
        }

        let prev = &self.snapshot;
        let mut next = prev.clone();
        for calc in self.calculators.iter_mut() {
            calc.iterate(prev, &mut next, now_ms);
        }

        if self.route_driven {
            if let Some(ref info) = next.route_info {
                next.accelerator_pedal_position = info.throttle_position;
                next.brake_pedal_position = info.brake_position;
            }
        }
        if next.route_ended {
            self.state = DynamicsState::RouteEnded;
        }

        self.snapshot = next;
        self.ticks += 1;
        &self.snapshot
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicle::route::{GeoPoint, Stage};

    #[test]
    fn test_pipeline_order() {
        let stage = Stage {
            start: GeoPoint::new(0.0, 0.0),
            end: GeoPoint::new(0.1, 0.0),
            km: 11.0,
            throttle: None,
        };
        let model =
            DynamicsModel::with_route(Route::new("r", vec![stage], Default::default()), 1)
                .unwrap();
        assert_eq!(
            model.calculator_names(),
            vec![
                "vehicleSpeed",
                "acceleration",
                "transmissionGearPosition",
                "transmissionGearInt",
                "torqueAtTransmission",
                "engineSpeed",
                "fuelConsumedSinceRestart",
                "odometer",
                "fuelLevel",
                "oilTemp",
                "routeInfo",
            ]
        );
    }

    #[test]
    fn test_route_without_stages_rejected() {
        let route = Route::new("r", Vec::new(), Default::default());
        assert!(matches!(
            DynamicsModel::with_route(route, 1),
            Err(RouteError::Empty(_))
        ));
    }

    #[test]
    fn test_restore_persisted_state() {
        let mut model = DynamicsModel::new(1);
        let metadata = serde_json::json!({
            "odometer": 1234.5,
            "fuelConsumedSinceRestart": 3.25,
            "oilTemp": 400.0,
            "vin": "1FTFW1ET5DFC10312"
        });
        assert_eq!(model.restore_state(&metadata), 2);
        assert_eq!(model.snapshot().odometer, 1234.5);
        assert_eq!(model.snapshot().fuel_consumed_since_restart, 3.25);
        assert_eq!(model.snapshot().oil_temp, VehicleSnapshot::default().oil_temp);

        let state = model.persisted_state();
        assert_eq!(state["odometer"], 1234.5);
        assert_eq!(state["fuelConsumedSinceRestart"], 3.25);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_restore_ignores_bad_values() {
        let mut model = DynamicsModel::new(1);
        let metadata = serde_json::json!({"odometer": "far", "fuelConsumedSinceRestart": -1.0});
        assert_eq!(model.restore_state(&metadata), 0);
        assert_eq!(model.snapshot().odometer, 0.0);
    }

    #[test]
    fn test_free_driving_accelerates() {
        let mut model = DynamicsModel::new(1);
        model.set_accelerator(60.0);
        for i in 0..40 {
            model.tick(i * POLLER_DELAY_MS);
        }
        let s = model.snapshot();
        assert!(s.vehicle_speed > 10.0);
        assert!(s.odometer > 0.0);
        assert!(s.fuel_level < 100.0);
        assert!(s.engine_speed > 0.0);
    }

    #[test]
    fn test_ignition_off_coasts_to_stop() {
        let mut model = DynamicsModel::new(1);
        model.set_accelerator(80.0);
        for i in 0..20 {
            model.tick(i * POLLER_DELAY_MS);
        }
        model.set_ignition(false);
        for i in 20..2000 {
            model.tick(i * POLLER_DELAY_MS);
        }
        assert_eq!(model.snapshot().vehicle_speed, 0.0);
    }

    #[test]
    fn test_manual_gear() {
        let mut model = DynamicsModel::new(1);
        model.set_manual_transmission(true);
        model.set_gear(4);
        model.tick(0);
        assert_eq!(model.snapshot().transmission_gear_int, 4);
        model.tick(500);
        assert_eq!(model.snapshot().transmission_gear_position, "fourth");
    }

    #[test]
    fn test_setters_clamp() {
        let mut model = DynamicsModel::new(1);
        model.set_accelerator(250.0);
        model.set_brake(-3.0);
        model.set_gear(0);
        let s = model.snapshot();
        assert_eq!(s.accelerator_pedal_position, 100.0);
        assert_eq!(s.brake_pedal_position, 0.0);
        assert_eq!(s.requested_gear, 1);
    }
}
