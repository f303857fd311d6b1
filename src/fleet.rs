// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Fleet of running simulated devices
//!
//! Devices are built by [`Fleet::provision`] (a fresh device of a type) or
//! [`Fleet::hydrate`] (an existing device record), then handed to
//! [`Fleet::start`], which runs each one on its own tokio task. Nothing is
//! shared between device tasks except the sink and the live counters.

use std::collections::HashMap;
use std::sync::Arc;

use rand::prelude::*;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::SimulatorConfig;
use crate::devices::DeviceRecord;
use crate::error::{Result, SimError};
use crate::generator::AttributeGenerator;
use crate::runtime::{RunReport, RunStats, StopReason};
use crate::sink::MessageSink;
use crate::spec::{DeviceCategory, DeviceTypeSpec};
use crate::vehicle::{DynamicsModel, RouteSource, VehicleDevice};
use crate::widget::Widget;

/// A device ready to start
#[derive(Debug)]
pub enum SimDevice {
    Widget(Widget),
    Vehicle(VehicleDevice),
}

impl SimDevice {
    pub fn id(&self) -> &str {
        match self {
            SimDevice::Widget(w) => w.id(),
            SimDevice::Vehicle(v) => v.id(),
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            SimDevice::Widget(w) => w.user_id(),
            SimDevice::Vehicle(v) => v.user_id(),
        }
    }

    pub fn category(&self) -> DeviceCategory {
        match self {
            SimDevice::Widget(_) => DeviceCategory::Widget,
            SimDevice::Vehicle(_) => DeviceCategory::Automotive,
        }
    }
}

/// Parameters for a fresh device
#[derive(Debug, Clone)]
pub struct ProvisionParams {
    pub user_id: String,
    pub device_type: DeviceTypeSpec,
    /// Fixed seed for reproducible generation
    pub seed: Option<u64>,
}

impl ProvisionParams {
    pub fn new(user_id: impl Into<String>, device_type: DeviceTypeSpec) -> Self {
        Self {
            user_id: user_id.into(),
            device_type,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Parameters for an existing device
#[derive(Debug, Clone)]
pub struct HydrateParams {
    pub record: DeviceRecord,
    pub device_type: DeviceTypeSpec,
    pub seed: Option<u64>,
}

impl HydrateParams {
    pub fn new(record: DeviceRecord, device_type: DeviceTypeSpec) -> Self {
        Self {
            record,
            device_type,
            seed: None,
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Fleet-wide counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetStats {
    pub active_devices: usize,
    pub finished_devices: usize,
    pub messages_published: u64,
    pub publish_failures: u64,
}

struct ActiveDevice {
    user_id: String,
    category: DeviceCategory,
    stats: Arc<RunStats>,
    stop: watch::Sender<bool>,
    handle: JoinHandle<RunReport>,
}

/// Totals over every device that has finished, including dropped reports
#[derive(Debug, Clone, Copy, Default)]
struct FinishedTotals {
    devices: usize,
    published: u64,
    failed: u64,
}

/// Owner of all running devices
pub struct Fleet {
    config: SimulatorConfig,
    sink: Arc<dyn MessageSink>,
    routes: Arc<dyn RouteSource>,
    active: HashMap<String, ActiveDevice>,
    finished: Vec<RunReport>,
    totals: FinishedTotals,
}

impl Fleet {
    pub fn new(
        config: SimulatorConfig,
        sink: Arc<dyn MessageSink>,
        routes: Arc<dyn RouteSource>,
    ) -> Self {
        Self {
            config,
            sink,
            routes,
            active: HashMap::new(),
            finished: Vec::new(),
            totals: FinishedTotals::default(),
        }
    }

    /// Build a new device of a type
    pub async fn provision(&self, params: ProvisionParams) -> Result<SimDevice> {
        let id = uuid::Uuid::new_v4().to_string();
        self.build(id, params.user_id, &params.device_type, params.seed)
            .await
    }

    /// Build the simulator instance of a stored device.
    ///
    /// A vehicle keeps the VIN, odometer and fuel consumed found in the
    /// record's metadata.
    pub async fn hydrate(&self, params: HydrateParams) -> Result<SimDevice> {
        let HydrateParams {
            record,
            device_type,
            seed,
        } = params;
        if record.type_id != device_type.type_id {
            return Err(SimError::Validation(format!(
                "device {} has type {}, not {}",
                record.id, record.type_id, device_type.type_id
            )));
        }
        let mut device = self
            .build(record.id.clone(), record.user_id, &device_type, seed)
            .await?;
        if let SimDevice::Vehicle(ref mut vehicle) = device {
            if let Some(vin) = record.metadata.get("vin").and_then(|v| v.as_str()) {
                vehicle.set_vin(vin);
            }
            vehicle.restore_state(&record.metadata);
        }
        Ok(device)
    }

    async fn build(
        &self,
        id: String,
        user_id: String,
        device_type: &DeviceTypeSpec,
        seed: Option<u64>,
    ) -> Result<SimDevice> {
        let spec = device_type.spec.clone();
        spec.validate()?;
        let seed = seed.unwrap_or_else(rand::random);

        match device_type.category {
            DeviceCategory::Widget => Ok(SimDevice::Widget(Widget::with_generator(
                id,
                user_id,
                spec,
                AttributeGenerator::with_seed(seed),
            ))),
            DeviceCategory::Automotive => {
                let route_name = match spec.route {
                    Some(ref name) => name.clone(),
                    None => self.random_route(seed).await?,
                };
                let model =
                    DynamicsModel::from_source(self.routes.as_ref(), &route_name, seed).await?;
                Ok(SimDevice::Vehicle(
                    VehicleDevice::new(id, user_id, spec, model, seed)
                        .with_physics_interval_ms(self.config.physics_interval_ms),
                ))
            }
        }
    }

    async fn random_route(&self, seed: u64) -> Result<String> {
        let names = self.routes.route_names().await?;
        let mut rng = StdRng::seed_from_u64(seed);
        names
            .choose(&mut rng)
            .cloned()
            .ok_or_else(|| SimError::NotFound {
                kind: "route",
                id: "*".to_string(),
            })
    }

    /// Start a device on its own task; returns its id.
    ///
    /// A device already running under the same id is stopped first.
    pub async fn start(&mut self, device: SimDevice) -> String {
        let id = device.id().to_string();
        if self.active.contains_key(&id) {
            warn!(device_id = %id, "Device already running, restarting");
            self.stop(&id).await;
        }

        let user_id = device.user_id().to_string();
        let category = device.category();
        let stats = Arc::new(RunStats::new());
        let (stop_tx, stop_rx) = watch::channel(false);
        let sink = Arc::clone(&self.sink);
        let task_stats = Arc::clone(&stats);

        let handle = match device {
            SimDevice::Widget(w) => tokio::spawn(w.run(sink, task_stats, stop_rx)),
            SimDevice::Vehicle(v) => tokio::spawn(v.run(sink, task_stats, stop_rx)),
        };

        info!(device_id = %id, user_id = %user_id, ?category, "Device started");
        self.active.insert(
            id.clone(),
            ActiveDevice {
                user_id,
                category,
                stats,
                stop: stop_tx,
                handle,
            },
        );
        id
    }

    /// Stop a running device and wait for its current tick to finish
    pub async fn stop(&mut self, id: &str) -> Option<RunReport> {
        let device = self.active.remove(id)?;
        let _ = device.stop.send(true);
        let report = join_report(id, device).await;
        self.record_finished(report.clone());
        Some(report)
    }

    /// Stop every running device
    pub async fn stop_all(&mut self) -> Vec<RunReport> {
        let ids: Vec<String> = self.active.keys().cloned().collect();
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(report) = self.stop(&id).await {
                reports.push(report);
            }
        }
        reports
    }

    /// Remove devices whose loops have ended on their own
    pub async fn reap(&mut self) -> Vec<RunReport> {
        let done: Vec<String> = self
            .active
            .iter()
            .filter(|(_, d)| d.handle.is_finished())
            .map(|(id, _)| id.clone())
            .collect();

        let mut reports = Vec::with_capacity(done.len());
        for id in done {
            if let Some(device) = self.active.remove(&id) {
                let report = join_report(&id, device).await;
                info!(device_id = %id, reason = ?report.reason, "Device finished");
                self.record_finished(report.clone());
                reports.push(report);
            }
        }
        reports
    }

    fn record_finished(&mut self, report: RunReport) {
        self.totals.devices += 1;
        self.totals.published += report.published;
        self.totals.failed += report.failed;
        self.finished.push(report);

        let keep = self.config.finished_history;
        if self.finished.len() > keep {
            let excess = self.finished.len() - keep;
            self.finished.drain(..excess);
        }
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.active.contains_key(id)
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.active.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Running devices owned by a user
    pub fn active_for_user(&self, user_id: &str) -> usize {
        self.active.values().filter(|d| d.user_id == user_id).count()
    }

    /// Running devices of a category
    pub fn active_in_category(&self, category: DeviceCategory) -> usize {
        self.active
            .values()
            .filter(|d| d.category == category)
            .count()
    }

    /// Most recent reports of devices that have finished, oldest first
    pub fn finished(&self) -> &[RunReport] {
        &self.finished
    }

    pub fn stats(&self) -> FleetStats {
        let live = self.active.values().map(|d| &d.stats);
        let (live_ok, live_failed) = live.fold((0, 0), |(ok, failed), s| {
            (ok + s.published(), failed + s.failed())
        });
        FleetStats {
            active_devices: self.active.len(),
            finished_devices: self.totals.devices,
            messages_published: live_ok + self.totals.published,
            publish_failures: live_failed + self.totals.failed,
        }
    }
}

async fn join_report(id: &str, device: ActiveDevice) -> RunReport {
    match device.handle.await {
        Ok(report) => report,
        Err(e) => {
            warn!(device_id = %id, error = %e, "Device task failed");
            RunReport {
                device_id: id.to_string(),
                published: device.stats.published(),
                failed: device.stats.failed(),
                reason: StopReason::Stopped,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::MemorySink;
    use crate::spec::{AttributeKind, AttributeSpec, MessageSpec, Visibility};
    use crate::vehicle::MemoryRouteSource;

    fn widget_type() -> DeviceTypeSpec {
        DeviceTypeSpec {
            type_id: "t-1".to_string(),
            name: "counter".to_string(),
            custom: true,
            visibility: Visibility::Private,
            category: DeviceCategory::Widget,
            user_id: None,
            spec: MessageSpec::new(
                "sim/counter",
                1000,
                60_000,
                vec![AttributeSpec::new("n", AttributeKind::int(0, 9))],
            ),
        }
    }

    fn fleet() -> Fleet {
        Fleet::new(
            SimulatorConfig::default(),
            Arc::new(MemorySink::new()),
            Arc::new(MemoryRouteSource::new()),
        )
    }

    #[tokio::test]
    async fn test_provision_widget() {
        let fleet = fleet();
        let device = fleet
            .provision(ProvisionParams::new("u1", widget_type()).with_seed(1))
            .await
            .unwrap();
        assert!(matches!(device, SimDevice::Widget(_)));
        assert_eq!(device.user_id(), "u1");
        assert_eq!(device.id().len(), 36);
    }

    #[tokio::test]
    async fn test_vehicle_without_routes_fails() {
        let fleet = fleet();
        let mut vehicle_type = widget_type();
        vehicle_type.category = DeviceCategory::Automotive;
        let err = fleet
            .provision(ProvisionParams::new("u1", vehicle_type))
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::NotFound { kind: "route", .. }));
    }

    #[tokio::test]
    async fn test_invalid_spec_rejected() {
        let fleet = fleet();
        let mut bad = widget_type();
        bad.spec.interval = 0;
        assert!(matches!(
            fleet.provision(ProvisionParams::new("u1", bad)).await,
            Err(SimError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_stop_unknown_device() {
        let mut fleet = fleet();
        assert!(fleet.stop("nope").await.is_none());
        assert_eq!(fleet.stats(), FleetStats::default());
    }
}
