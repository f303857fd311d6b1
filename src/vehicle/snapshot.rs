// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Vehicle state at one tick

use serde::{Deserialize, Serialize};

/// Route progress as reported in the snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteInfo {
    pub route_name: String,
    pub current_stage: usize,
    pub stage_count: usize,
    /// Odometer reading at which each entered stage began
    pub odometer_start: Vec<f64>,
    pub throttle_position: f64,
    pub brake_position: f64,
    pub burndown: bool,
    pub route_ended: bool,
}

/// One-shot fault flags raised by the route
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Triggers {
    pub high_oil_temp: bool,
}

/// Complete vehicle state
///
/// Units: speed in km/h, acceleration in km/h per second, distances in km,
/// fuel in liters, fuel level in percent, temperatures in °F, angles in
/// degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleSnapshot {
    // Driver inputs
    pub accelerator_pedal_position: f64,
    pub brake_pedal_position: f64,
    pub ignition_status: bool,
    pub parking_brake_status: bool,
    pub manual_transmission: bool,
    /// Gear requested in manual mode
    pub requested_gear: u8,

    // Calculated state
    pub vehicle_speed: f64,
    pub acceleration: f64,
    pub transmission_gear_position: String,
    pub transmission_gear_int: u8,
    pub torque_at_transmission: f64,
    pub engine_speed: f64,
    pub fuel_consumed_since_restart: f64,
    pub odometer: f64,
    pub fuel_level: f64,
    pub oil_temp: f64,
    pub latitude: f64,
    pub longitude: f64,
    pub heading: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_info: Option<RouteInfo>,
    pub triggers: Triggers,
    pub route_ended: bool,
    /// Milliseconds from route start to route end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_duration: Option<u64>,
}

impl Default for VehicleSnapshot {
    fn default() -> Self {
        Self {
            accelerator_pedal_position: 0.0,
            brake_pedal_position: 0.0,
            ignition_status: true,
            parking_brake_status: false,
            manual_transmission: false,
            requested_gear: 1,
            vehicle_speed: 0.0,
            acceleration: 0.0,
            transmission_gear_position: "first".to_string(),
            transmission_gear_int: 1,
            torque_at_transmission: 0.0,
            engine_speed: 0.0,
            fuel_consumed_since_restart: 0.0,
            odometer: 0.0,
            fuel_level: 100.0,
            oil_temp: 0.0,
            latitude: 0.0,
            longitude: 0.0,
            heading: 0.0,
            route_info: None,
            triggers: Triggers::default(),
            route_ended: false,
            route_duration: None,
        }
    }
}

/// A single snapshot field, as read or written by name
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotValue {
    Number(f64),
    Gear(u8),
    Text(String),
    Route(Option<RouteInfo>),
}

impl VehicleSnapshot {
    /// Read a calculated field by its JSON name
    pub fn field(&self, name: &str) -> Option<SnapshotValue> {
        use SnapshotValue::*;
        let value = match name {
            "vehicleSpeed" => Number(self.vehicle_speed),
            "acceleration" => Number(self.acceleration),
            "transmissionGearPosition" => Text(self.transmission_gear_position.clone()),
            "transmissionGearInt" => Gear(self.transmission_gear_int),
            "torqueAtTransmission" => Number(self.torque_at_transmission),
            "engineSpeed" => Number(self.engine_speed),
            "fuelConsumedSinceRestart" => Number(self.fuel_consumed_since_restart),
            "odometer" => Number(self.odometer),
            "fuelLevel" => Number(self.fuel_level),
            "oilTemp" => Number(self.oil_temp),
            "latitude" => Number(self.latitude),
            "longitude" => Number(self.longitude),
            "heading" => Number(self.heading),
            "routeInfo" => Route(self.route_info.clone()),
            _ => return None,
        };
        Some(value)
    }

    /// Write a calculated field by its JSON name.
    ///
    /// Returns `false` for an unknown name or a value of the wrong shape.
    pub fn set_field(&mut self, name: &str, value: SnapshotValue) -> bool {
        use SnapshotValue::*;
        match (name, value) {
            ("vehicleSpeed", Number(v)) => self.vehicle_speed = v,
            ("acceleration", Number(v)) => self.acceleration = v,
            ("transmissionGearPosition", Text(v)) => self.transmission_gear_position = v,
            ("transmissionGearInt", Gear(v)) => self.transmission_gear_int = v,
            ("torqueAtTransmission", Number(v)) => self.torque_at_transmission = v,
            ("engineSpeed", Number(v)) => self.engine_speed = v,
            ("fuelConsumedSinceRestart", Number(v)) => self.fuel_consumed_since_restart = v,
            ("odometer", Number(v)) => self.odometer = v,
            ("fuelLevel", Number(v)) => self.fuel_level = v,
            ("oilTemp", Number(v)) => self.oil_temp = v,
            ("latitude", Number(v)) => self.latitude = v,
            ("longitude", Number(v)) => self.longitude = v,
            ("heading", Number(v)) => self.heading = v,
            ("routeInfo", Route(v)) => self.route_info = v,
            _ => return false,
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_round_trip() {
        let mut snapshot = VehicleSnapshot::default();
        assert!(snapshot.set_field("odometer", SnapshotValue::Number(12.5)));
        assert_eq!(snapshot.field("odometer"), Some(SnapshotValue::Number(12.5)));
    }

    #[test]
    fn test_field_shape_mismatch() {
        let mut snapshot = VehicleSnapshot::default();
        assert!(!snapshot.set_field("odometer", SnapshotValue::Gear(3)));
        assert!(!snapshot.set_field("warpFactor", SnapshotValue::Number(9.0)));
        assert_eq!(snapshot.field("warpFactor"), None);
    }

    #[test]
    fn test_serializes_camel_case() {
        let json = serde_json::to_value(VehicleSnapshot::default()).unwrap();
        assert_eq!(json["transmissionGearPosition"], "first");
        assert!(json.get("routeInfo").is_none());
        assert_eq!(json["triggers"]["highOilTemp"], false);
    }
}
