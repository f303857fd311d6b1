// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Connected vehicle simulation
//!
//! - [`snapshot`]: vehicle state at one tick
//! - [`calculators`]: the physical calculators and their capability trait
//! - [`route`]: routes, route sources and the route-following calculator
//! - [`dynamics`]: the ordered pipeline driving one vehicle
//! - [`device`]: the publishing vehicle device

pub mod calculators;
pub mod device;
pub mod dynamics;
pub mod route;
pub mod snapshot;

pub use calculators::DataCalculator;
pub use device::VehicleDevice;
pub use dynamics::{DynamicsModel, DynamicsState};
pub use route::{
    DrivingProfile, FileRouteSource, GeoPoint, MemoryRouteSource, Route, RouteCalc, RouteSource,
    Stage, TriggerKind,
};
pub use snapshot::{RouteInfo, SnapshotValue, VehicleSnapshot};
