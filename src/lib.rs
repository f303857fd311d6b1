// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! # FleetSim - IoT device fleet simulator
//!
//! Generates synthetic telemetry for fleets of virtual devices and publishes
//! it to a message sink.
//!
//! ## Key Features
//!
//! - **Widgets**: generic devices whose payload is described by a JSON
//!   attribute schema (ranges, picks, locations, waves, nested objects)
//! - **Vehicles**: a small physics model (speed, gears, torque, fuel, oil
//!   temperature) driving along routes with random fault events
//! - **Device records**: create, update and page through stored devices
//! - **Fault tolerance**: malformed schemas degrade to defaults, failed
//!   publishes are logged and skipped
//!
//! ## Quick Start
//!
//! ```rust
//! use fleetsim::{AttributeGenerator, AttributeKind, AttributeSpec, MessageSpec, Widget};
//!
//! let spec = MessageSpec::new(
//!     "sim/${room}/climate",
//!     1000,
//!     60_000,
//!     vec![
//!         AttributeSpec::new("room", AttributeKind::pick_one(vec!["lab".into()])).fixed(),
//!         AttributeSpec::new("temp", AttributeKind::float(18, 24, 0, 99, 1)),
//!     ],
//! );
//! let mut widget = Widget::with_generator("dev-1", "user-1", spec, AttributeGenerator::with_seed(7));
//! widget.start(0);
//!
//! let message = widget.build_message(1000).unwrap();
//! assert_eq!(message.topic, "sim/lab/climate");
//! assert_eq!(message.payload["_id_"], "dev-1");
//! ```
//!
//! ## Modules
//!
//! - [`generator`]: attribute value generation
//! - [`spec`]: device type and payload schemas
//! - [`widget`]: generic device lifecycle
//! - [`vehicle`]: vehicle dynamics and routes
//! - [`devices`]: device records and boundary operations
//! - [`paginator`]: page collation over store cursors
//! - [`fleet`]: running devices
//! - [`store`] / [`sink`]: external collaborators

// Modules
pub mod config;
pub mod devices;
pub mod error;
pub mod fleet;
pub mod generator;
pub mod paginator;
pub mod presets;
pub mod runtime;
pub mod sink;
pub mod spec;
pub mod store;
pub mod vehicle;
pub mod widget;

// Re-exports for convenient access
pub use config::{MemoryStoreConfig, SimulatorConfig};
pub use devices::{
    CreateDeviceRequest, DeviceFilter, DeviceManager, DevicePatch, DeviceRecord, DeviceStage,
    Ticket,
};
pub use error::{Failure, PublishError, Result, RouteError, SimError, StoreError};
pub use fleet::{Fleet, FleetStats, HydrateParams, ProvisionParams, SimDevice};
pub use generator::AttributeGenerator;
pub use paginator::{collate_page, PageCollation, PageQuery, PAGE_SIZE};
pub use runtime::{RunReport, RunStats, StopReason};
pub use sink::{LossySink, MemorySink, MessageSink, PublishedMessage, SinkMetrics};
pub use spec::{AttributeKind, AttributeSpec, DeviceCategory, DeviceTypeSpec, MessageSpec, Visibility};
pub use store::{Document, Filter, Key, KeyCondition, MemoryStore, Store, StorePage, TableSchema};
pub use vehicle::{
    DataCalculator, DynamicsModel, FileRouteSource, MemoryRouteSource, Route, RouteSource,
    VehicleDevice, VehicleSnapshot,
};
pub use widget::{GenerationState, Message, TickOutcome, Widget, WidgetStatus};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_failure_from_error() {
        let failure = Failure::from(SimError::LimitExceeded {
            requested: 150,
            max: 100,
        });
        assert_eq!(failure.code, 400);
        assert_eq!(failure.error, "DeviceCreateLimitExceeded");
    }
}
