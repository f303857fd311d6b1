// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Physical calculators of the dynamics pipeline
//!
//! Each calculator owns one named snapshot field. `iterate` receives the
//! previous tick's snapshot and the snapshot being built; `next` starts as a
//! copy of `prev`, so reading a field from `next` yields this tick's value
//! when an earlier calculator already wrote it, and the carried-over value
//! otherwise.

use rand::prelude::*;
use rand::rngs::StdRng;

use super::snapshot::{SnapshotValue, VehicleSnapshot};

/// Speed bands per gear: `[lower, upper]` in km/h
pub const GEAR_SPEEDS: [[f64; 2]; 7] = [
    [0.0, 0.0],
    [0.0, 25.0],
    [20.0, 50.0],
    [45.0, 75.0],
    [70.0, 100.0],
    [95.0, 125.0],
    [120.0, 500.0],
];

/// Gear names indexed by gear number
pub const GEAR_NAMES: [&str; 7] = [
    "neutral", "first", "second", "third", "fourth", "fifth", "sixth",
];

pub const MIN_GEAR: u8 = 1;
pub const MAX_GEAR: u8 = 6;

/// Engine speed constant (rpm per km/h per gear, scaled by 100)
pub const ENGINE_SPEED_FACTOR: f64 = 16382.0;
/// Fuel tank capacity in liters
pub const TANK_SIZE_L: f64 = 40.0;
/// Fuel burned at full throttle, liters per second
pub const MAX_FUEL_LPS: f64 = 0.0015;
/// Fuel burned at idle, liters per second
pub const IDLE_FUEL_LPS: f64 = 0.000015;

const AIR_DRAG_COEFF: f64 = 8e-7;
const ENGINE_DRAG_COEFF: f64 = 0.0004;
const ROLLING_RESISTANCE: f64 = 0.1;
const BRAKE_COEFF: f64 = 0.1;
const PARKING_BRAKE_FORCE: f64 = 5.0;
const ENGINE_FORCE_DIVISOR: f64 = 5.0;
const TORQUE_POWER_COEFF: f64 = 15.0;
const TORQUE_DRAG_COEFF: f64 = 500.0 / ENGINE_SPEED_FACTOR;
const ACCELERATION_WINDOW_MS: u64 = 1000;

const AMBIENT_OIL_TEMP: f64 = 70.0;
const OIL_WARMUP_MS: u64 = 120_000;
const OIL_JITTER: f64 = 5.0;

/// Calculator capability: one named field, advanced once per tick.
pub trait DataCalculator: Send {
    /// JSON name of the snapshot field this calculator owns
    fn name(&self) -> &'static str;

    /// Advance the owned field from `prev` into `next`
    fn iterate(&mut self, prev: &VehicleSnapshot, next: &mut VehicleSnapshot, now_ms: u64);

    /// Read the owned field
    fn get(&self, snapshot: &VehicleSnapshot) -> Option<SnapshotValue> {
        snapshot.field(self.name())
    }

    /// Overwrite the owned field
    fn put(&self, snapshot: &mut VehicleSnapshot, value: SnapshotValue) -> bool {
        snapshot.set_field(self.name(), value)
    }
}

/// Seconds elapsed since the last call, zero on the first.
#[derive(Debug, Clone, Copy, Default)]
struct StepTimer {
    last_ms: Option<u64>,
}

impl StepTimer {
    fn step(&mut self, now_ms: u64) -> f64 {
        let dt = match self.last_ms {
            Some(last) => now_ms.saturating_sub(last) as f64 / 1000.0,
            None => 0.0,
        };
        self.last_ms = Some(now_ms);
        dt
    }
}

/// Integrates vehicle speed from pedal inputs and drag
#[derive(Debug, Default)]
pub struct SpeedCalc {
    timer: StepTimer,
}

impl SpeedCalc {
    /// Net acceleration in km/h per second for the given state
    pub fn net_acceleration(s: &VehicleSnapshot) -> f64 {
        let gear = s.transmission_gear_int.max(MIN_GEAR) as f64;
        let engine_force = if s.ignition_status {
            s.accelerator_pedal_position / (ENGINE_FORCE_DIVISOR * gear)
        } else {
            0.0
        };
        let air_drag = s.vehicle_speed.powi(3) * AIR_DRAG_COEFF;
        let engine_drag = s.engine_speed * ENGINE_DRAG_COEFF;
        let brake_force = s.brake_pedal_position * BRAKE_COEFF;
        let parking = if s.parking_brake_status {
            PARKING_BRAKE_FORCE
        } else {
            0.0
        };
        engine_force - air_drag - engine_drag - ROLLING_RESISTANCE - brake_force - parking
    }
}

impl DataCalculator for SpeedCalc {
    fn name(&self) -> &'static str {
        "vehicleSpeed"
    }

    fn iterate(&mut self, prev: &VehicleSnapshot, next: &mut VehicleSnapshot, now_ms: u64) {
        let dt = self.timer.step(now_ms);
        let mut impulse = Self::net_acceleration(prev) * dt;
        if prev.vehicle_speed + impulse < 0.0 {
            impulse = -prev.vehicle_speed;
        }
        next.vehicle_speed = prev.vehicle_speed + impulse;
    }
}

/// Speed change over the last full one-second window
#[derive(Debug, Default)]
pub struct AccelerationCalc {
    window_start_ms: Option<u64>,
    window_start_speed: f64,
}

impl DataCalculator for AccelerationCalc {
    fn name(&self) -> &'static str {
        "acceleration"
    }

    fn iterate(&mut self, _prev: &VehicleSnapshot, next: &mut VehicleSnapshot, now_ms: u64) {
        let start = match self.window_start_ms {
            Some(start) => start,
            None => {
                self.window_start_ms = Some(now_ms);
                self.window_start_speed = next.vehicle_speed;
                return;
            }
        };

        let elapsed = now_ms.saturating_sub(start);
        if elapsed >= ACCELERATION_WINDOW_MS {
            next.acceleration =
                (next.vehicle_speed - self.window_start_speed) / (elapsed as f64 / 1000.0);
            self.window_start_ms = Some(now_ms);
            self.window_start_speed = next.vehicle_speed;
        }
    }
}

/// Gear name for the current gear number
#[derive(Debug, Default)]
pub struct GearCalc;

impl DataCalculator for GearCalc {
    fn name(&self) -> &'static str {
        "transmissionGearPosition"
    }

    fn iterate(&mut self, _prev: &VehicleSnapshot, next: &mut VehicleSnapshot, _now_ms: u64) {
        let index = (next.transmission_gear_int as usize).min(GEAR_NAMES.len() - 1);
        next.transmission_gear_position = GEAR_NAMES[index].to_string();
    }
}

/// Automatic shifting by speed band; manual mode follows the requested gear
#[derive(Debug, Default)]
pub struct GearIntCalc;

impl GearIntCalc {
    /// Gear after one shift decision at `speed`
    pub fn shift(gear: u8, speed: f64) -> u8 {
        let gear = gear.clamp(MIN_GEAR, MAX_GEAR);
        let [lower, upper] = GEAR_SPEEDS[gear as usize];
        let shifted = if speed > upper {
            gear + 1
        } else if speed < lower {
            gear - 1
        } else {
            gear
        };
        shifted.clamp(MIN_GEAR, MAX_GEAR)
    }
}

impl DataCalculator for GearIntCalc {
    fn name(&self) -> &'static str {
        "transmissionGearInt"
    }

    fn iterate(&mut self, prev: &VehicleSnapshot, next: &mut VehicleSnapshot, _now_ms: u64) {
        next.transmission_gear_int = if prev.manual_transmission {
            prev.requested_gear.clamp(MIN_GEAR, MAX_GEAR)
        } else {
            Self::shift(prev.transmission_gear_int, next.vehicle_speed)
        };
    }
}

/// Torque at the transmission
#[derive(Debug, Default)]
pub struct TorqueCalc;

impl DataCalculator for TorqueCalc {
    fn name(&self) -> &'static str {
        "torqueAtTransmission"
    }

    fn iterate(&mut self, prev: &VehicleSnapshot, next: &mut VehicleSnapshot, _now_ms: u64) {
        let gear = next.transmission_gear_int.max(MIN_GEAR) as f64;
        let gear_ratio = 1.0 - 0.1 * (gear - 1.0);
        let drag = prev.engine_speed * TORQUE_DRAG_COEFF;
        next.torque_at_transmission = if prev.ignition_status {
            prev.accelerator_pedal_position * TORQUE_POWER_COEFF * gear_ratio - drag
        } else {
            -drag
        };
    }
}

/// Engine rpm from speed and gear
#[derive(Debug, Default)]
pub struct EngineSpeedCalc;

impl DataCalculator for EngineSpeedCalc {
    fn name(&self) -> &'static str {
        "engineSpeed"
    }

    fn iterate(&mut self, _prev: &VehicleSnapshot, next: &mut VehicleSnapshot, _now_ms: u64) {
        let gear = next.transmission_gear_int.max(MIN_GEAR) as f64;
        next.engine_speed = ENGINE_SPEED_FACTOR * next.vehicle_speed / (100.0 * gear);
    }
}

/// Cumulative fuel burned, stepped by wall-clock delta
#[derive(Debug, Default)]
pub struct FuelConsumedCalc {
    timer: StepTimer,
}

impl DataCalculator for FuelConsumedCalc {
    fn name(&self) -> &'static str {
        "fuelConsumedSinceRestart"
    }

    fn iterate(&mut self, prev: &VehicleSnapshot, next: &mut VehicleSnapshot, now_ms: u64) {
        let dt = self.timer.step(now_ms);
        if !prev.ignition_status {
            return;
        }
        let throttle = (prev.accelerator_pedal_position / 100.0).clamp(0.0, 1.0);
        let rate = IDLE_FUEL_LPS + (MAX_FUEL_LPS - IDLE_FUEL_LPS) * throttle;
        next.fuel_consumed_since_restart = prev.fuel_consumed_since_restart + rate * dt;
    }
}

/// Cumulative distance in km
#[derive(Debug, Default)]
pub struct OdometerCalc {
    timer: StepTimer,
}

impl DataCalculator for OdometerCalc {
    fn name(&self) -> &'static str {
        "odometer"
    }

    fn iterate(&mut self, prev: &VehicleSnapshot, next: &mut VehicleSnapshot, now_ms: u64) {
        let dt = self.timer.step(now_ms);
        next.odometer = prev.odometer + next.vehicle_speed * dt / 3600.0;
    }
}

/// Fuel level percentage derived from fuel consumed
#[derive(Debug, Default)]
pub struct FuelLevelCalc;

impl DataCalculator for FuelLevelCalc {
    fn name(&self) -> &'static str {
        "fuelLevel"
    }

    fn iterate(&mut self, _prev: &VehicleSnapshot, next: &mut VehicleSnapshot, _now_ms: u64) {
        let level = 100.0 * (TANK_SIZE_L - next.fuel_consumed_since_restart) / TANK_SIZE_L;
        next.fuel_level = level.max(0.0);
    }
}

/// Oil temperature warm-up, operating jitter and the high-temp fault
#[derive(Debug)]
pub struct OilTempCalc {
    rng: StdRng,
    started_ms: Option<u64>,
    operating_zone: f64,
    trigger_tripped: bool,
}

impl OilTempCalc {
    pub fn new(seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let operating_zone = rng.gen_range(200.0..=220.0);
        Self {
            rng,
            started_ms: None,
            operating_zone,
            trigger_tripped: false,
        }
    }

    /// Current target temperature
    pub fn operating_zone(&self) -> f64 {
        self.operating_zone
    }
}

impl DataCalculator for OilTempCalc {
    fn name(&self) -> &'static str {
        "oilTemp"
    }

    fn iterate(&mut self, prev: &VehicleSnapshot, next: &mut VehicleSnapshot, now_ms: u64) {
        if prev.triggers.high_oil_temp && !self.trigger_tripped {
            self.operating_zone = self.rng.gen_range(275.0..=320.0);
            self.trigger_tripped = true;
        }

        let started = *self.started_ms.get_or_insert(now_ms);
        let elapsed = now_ms.saturating_sub(started);
        next.oil_temp = if elapsed < OIL_WARMUP_MS {
            let progress = elapsed as f64 / OIL_WARMUP_MS as f64;
            AMBIENT_OIL_TEMP + (self.operating_zone - AMBIENT_OIL_TEMP) * progress
        } else {
            self.operating_zone + self.rng.gen_range(-OIL_JITTER..=OIL_JITTER)
        };
    }
}
