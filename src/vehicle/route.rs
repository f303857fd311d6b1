// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Routes and route following
//!
//! A route is a list of stages between waypoints. [`RouteCalc`] advances
//! through the stages as the odometer grows, steers the throttle with a
//! profile-weighted random walk, fires pre-sampled fault triggers, and
//! finally brakes the vehicle to a stop (burndown) before reporting the
//! route as ended.
//!
//! Position is not integrated: latitude/longitude jump to the waypoints at
//! stage boundaries.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use rand::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::calculators::DataCalculator;
use super::snapshot::{RouteInfo, VehicleSnapshot};
use crate::error::RouteError;

/// Burndown length before the route is reported as ended
pub const BURNDOWN_MS: u64 = 20_000;
/// Throttle readjustment period bounds
pub const ADJUST_MIN_MS: u64 = 30_000;
pub const ADJUST_MAX_MS: u64 = 60_000;
/// Cruise jitter period
pub const JITTER_MS: u64 = 7_000;
/// Earliest route distance a trigger may fire at
pub const TRIGGER_MIN_KM: f64 = 0.2;

const JITTER_RANGE: i32 = 4;

/// A geographic point
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

impl GeoPoint {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Initial great-circle bearing towards `to`, in degrees `[0, 360)`
    pub fn bearing_to(&self, to: &GeoPoint) -> f64 {
        let (lat1, lat2) = (self.latitude.to_radians(), to.latitude.to_radians());
        let d_lon = (to.longitude - self.longitude).to_radians();
        let y = d_lon.sin() * lat2.cos();
        let x = lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * d_lon.cos();
        (y.atan2(x).to_degrees() + 360.0) % 360.0
    }
}

/// One leg of a route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub start: GeoPoint,
    pub end: GeoPoint,
    pub km: f64,
    /// Throttle to apply on entering the stage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub throttle: Option<f64>,
}

/// Driving style; selects the throttle adjustment table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrivingProfile {
    #[default]
    Normal,
    Aggressive,
}

impl DrivingProfile {
    /// Throttle deltas drawn uniformly at each readjustment
    pub fn adjustments(&self) -> &'static [i32] {
        match self {
            DrivingProfile::Normal => &[-10, -5, -5, 0, 0, 0, 5, 5, 10],
            DrivingProfile::Aggressive => &[-25, -15, -10, 0, 10, 15, 25, 30],
        }
    }

    /// Throttle used when a stage does not set one
    pub fn base_throttle(&self) -> f64 {
        match self {
            DrivingProfile::Normal => 35.0,
            DrivingProfile::Aggressive => 55.0,
        }
    }
}

/// Kind of random fault
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerKind {
    /// Full brake, zero throttle until the next readjustment
    Brake,
    /// Raise the oil temperature operating zone
    OilTemp,
}

/// How many faults of one kind a route carries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(rename = "type")]
    pub kind: TriggerKind,
    #[serde(alias = "occurances")]
    pub occurrences: u32,
}

/// A drivable route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    #[serde(default)]
    pub name: String,
    pub stages: Vec<Stage>,
    /// Total length; derived from the stages when zero
    #[serde(default)]
    pub km: f64,
    #[serde(default)]
    pub profile: DrivingProfile,
    #[serde(default)]
    pub triggers: Vec<TriggerSpec>,
}

impl Route {
    /// Build a route from stages, summing the length
    pub fn new(name: &str, stages: Vec<Stage>, profile: DrivingProfile) -> Self {
        let km = stages.iter().map(|s| s.km).sum();
        Self {
            name: name.to_string(),
            stages,
            km,
            profile,
            triggers: Vec::new(),
        }
    }

    /// Add a trigger spec
    pub fn with_trigger(mut self, kind: TriggerKind, occurrences: u32) -> Self {
        self.triggers.push(TriggerSpec { kind, occurrences });
        self
    }

    /// Reject routes that cannot be driven; fill in a missing total length
    pub fn validated(mut self) -> Result<Self, RouteError> {
        if self.stages.is_empty() {
            return Err(RouteError::Empty(self.name));
        }
        if self.km <= 0.0 {
            self.km = self.stages.iter().map(|s| s.km).sum();
        }
        Ok(self)
    }
}

/// Source of route definitions
#[async_trait]
pub trait RouteSource: Send + Sync {
    /// Load one route by name
    async fn load_route(&self, name: &str) -> Result<Route, RouteError>;

    /// Names of all available routes
    async fn route_names(&self) -> Result<Vec<String>, RouteError>;
}

/// Routes held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryRouteSource {
    routes: HashMap<String, Route>,
}

impl MemoryRouteSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a route under its own name
    pub fn with_route(mut self, route: Route) -> Self {
        self.routes.insert(route.name.clone(), route);
        self
    }
}

#[async_trait]
impl RouteSource for MemoryRouteSource {
    async fn load_route(&self, name: &str) -> Result<Route, RouteError> {
        self.routes
            .get(name)
            .cloned()
            .ok_or_else(|| RouteError::NotFound(name.to_string()))?
            .validated()
    }

    async fn route_names(&self) -> Result<Vec<String>, RouteError> {
        let mut names: Vec<_> = self.routes.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Routes stored as `<name>.json` files in a directory
#[derive(Debug, Clone)]
pub struct FileRouteSource {
    dir: PathBuf,
}

impl FileRouteSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl RouteSource for FileRouteSource {
    async fn load_route(&self, name: &str) -> Result<Route, RouteError> {
        let path = self.dir.join(format!("{}.json", name));
        let raw = match tokio::fs::read(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(RouteError::NotFound(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let mut route: Route = serde_json::from_slice(&raw)?;
        if route.name.is_empty() {
            route.name = name.to_string();
        }
        route.validated()
    }

    async fn route_names(&self) -> Result<Vec<String>, RouteError> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    names.push(stem.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }
}

/// A pre-sampled fault
#[derive(Debug, Clone, PartialEq)]
pub struct RandomTrigger {
    pub kind: TriggerKind,
    /// Distance into the route (km) at which the trigger fires
    pub threshold_km: f64,
    pub fired: bool,
}

/// Route-following calculator
#[derive(Debug)]
pub struct RouteCalc {
    route: Route,
    rng: StdRng,
    current_stage: usize,
    odometer_start: Vec<f64>,
    throttle_position: f64,
    brake_position: f64,
    cruise_throttle: f64,
    burndown: bool,
    burndown_started_ms: Option<u64>,
    random_triggers: Vec<RandomTrigger>,
    route_ended: bool,
    started_ms: Option<u64>,
    next_adjust_ms: u64,
    next_jitter_ms: u64,
}

impl RouteCalc {
    /// Prepare a route; trigger thresholds are sampled here.
    ///
    /// Routes without stages are rejected.
    pub fn new(route: Route, seed: u64) -> Result<Self, RouteError> {
        let route = route.validated()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let upper = route.km.max(TRIGGER_MIN_KM);
        let random_triggers = route
            .triggers
            .iter()
            .flat_map(|spec| std::iter::repeat(spec.kind).take(spec.occurrences as usize))
            .map(|kind| RandomTrigger {
                kind,
                threshold_km: rng.gen_range(TRIGGER_MIN_KM..=upper),
                fired: false,
            })
            .collect();

        Ok(Self {
            route,
            rng,
            current_stage: 0,
            odometer_start: Vec::new(),
            throttle_position: 0.0,
            brake_position: 0.0,
            cruise_throttle: 0.0,
            burndown: false,
            burndown_started_ms: None,
            random_triggers,
            route_ended: false,
            started_ms: None,
            next_adjust_ms: 0,
            next_jitter_ms: 0,
        })
    }

    pub fn route(&self) -> &Route {
        &self.route
    }

    pub fn current_stage(&self) -> usize {
        self.current_stage
    }

    pub fn odometer_start(&self) -> &[f64] {
        &self.odometer_start
    }

    pub fn throttle_position(&self) -> f64 {
        self.throttle_position
    }

    pub fn brake_position(&self) -> f64 {
        self.brake_position
    }

    pub fn in_burndown(&self) -> bool {
        self.burndown
    }

    pub fn route_ended(&self) -> bool {
        self.route_ended
    }

    pub fn random_triggers(&self) -> &[RandomTrigger] {
        &self.random_triggers
    }

    fn info(&self) -> RouteInfo {
        RouteInfo {
            route_name: self.route.name.clone(),
            current_stage: self.current_stage,
            stage_count: self.route.stages.len(),
            odometer_start: self.odometer_start.clone(),
            throttle_position: self.throttle_position,
            brake_position: self.brake_position,
            burndown: self.burndown,
            route_ended: self.route_ended,
        }
    }

    fn clamp_throttle(value: f64) -> f64 {
        if value >= 100.0 {
            99.0
        } else if value < 0.0 {
            5.0
        } else {
            value
        }
    }

    fn schedule_adjust(&mut self, now_ms: u64) {
        self.next_adjust_ms = now_ms + self.rng.gen_range(ADJUST_MIN_MS..=ADJUST_MAX_MS);
    }

    fn enter_stage(&mut self, index: usize, start_km: f64, next: &mut VehicleSnapshot) {
        let stage = &self.route.stages[index];
        self.odometer_start.push(start_km);
        next.latitude = stage.start.latitude;
        next.longitude = stage.start.longitude;
        next.heading = stage.start.bearing_to(&stage.end);
        if let Some(throttle) = stage.throttle {
            self.cruise_throttle = Self::clamp_throttle(throttle);
            if self.brake_position == 0.0 {
                self.throttle_position = self.cruise_throttle;
            }
        }
    }

    fn begin(&mut self, now_ms: u64, next: &mut VehicleSnapshot) {
        self.started_ms = Some(now_ms);
        self.cruise_throttle = self.route.profile.base_throttle();
        self.throttle_position = self.cruise_throttle;
        let start_km = next.odometer;
        self.enter_stage(0, start_km, next);
        self.schedule_adjust(now_ms);
        self.next_jitter_ms = now_ms + JITTER_MS;
        info!(route = %self.route.name, stages = self.route.stages.len(), km = self.route.km, "Route started");
    }

    fn advance_stages(&mut self, now_ms: u64, next: &mut VehicleSnapshot) {
        while !self.burndown {
            let index = self.current_stage;
            let stage_end_km = self.odometer_start[index] + self.route.stages[index].km;
            if stage_end_km > next.odometer {
                break;
            }

            let end = self.route.stages[index].end;
            next.latitude = end.latitude;
            next.longitude = end.longitude;
            self.current_stage += 1;

            if self.current_stage < self.route.stages.len() {
                debug!(route = %self.route.name, stage = self.current_stage, "Stage advanced");
                self.enter_stage(self.current_stage, stage_end_km, next);
            } else {
                debug!(route = %self.route.name, "Route stages exhausted, burning down");
                self.burndown = true;
                self.burndown_started_ms = Some(now_ms);
                self.throttle_position = 0.0;
                self.brake_position = 100.0;
            }
        }
    }

    fn fire_triggers(&mut self, next: &mut VehicleSnapshot) {
        let trip_km = next.odometer - self.odometer_start.first().copied().unwrap_or(0.0);
        for trigger in self.random_triggers.iter_mut() {
            if trigger.fired || trigger.threshold_km > trip_km {
                continue;
            }
            trigger.fired = true;
            match trigger.kind {
                TriggerKind::Brake => {
                    self.brake_position = 100.0;
                    self.throttle_position = 0.0;
                }
                TriggerKind::OilTemp => next.triggers.high_oil_temp = true,
            }
            debug!(route = %self.route.name, kind = ?trigger.kind, km = trip_km, "Trigger fired");
        }
    }

    fn steer(&mut self, now_ms: u64) {
        if now_ms >= self.next_adjust_ms {
            let table = self.route.profile.adjustments();
            let delta = table[self.rng.gen_range(0..table.len())] as f64;
            self.cruise_throttle = Self::clamp_throttle(self.cruise_throttle + delta);
            self.throttle_position = self.cruise_throttle;
            self.brake_position = 0.0;
            self.schedule_adjust(now_ms);
        }

        if now_ms >= self.next_jitter_ms {
            let cruising = self.throttle_position != 0.0
                && self.throttle_position != 100.0
                && self.brake_position == 0.0;
            if cruising {
                let jitter = self.rng.gen_range(-JITTER_RANGE..=JITTER_RANGE) as f64;
                self.throttle_position = Self::clamp_throttle(self.throttle_position + jitter);
            }
            self.next_jitter_ms = now_ms + JITTER_MS;
        }
    }
}

impl DataCalculator for RouteCalc {
    fn name(&self) -> &'static str {
        "routeInfo"
    }

    fn iterate(&mut self, _prev: &VehicleSnapshot, next: &mut VehicleSnapshot, now_ms: u64) {
        if self.route_ended {
            next.route_info = Some(self.info());
            return;
        }

        if self.started_ms.is_none() {
            self.begin(now_ms, next);
        }

        if self.burndown {
            let since = now_ms.saturating_sub(self.burndown_started_ms.unwrap_or(now_ms));
            if since >= BURNDOWN_MS {
                self.route_ended = true;
                if let Some(last) = self.route.stages.last() {
                    next.latitude = last.end.latitude;
                    next.longitude = last.end.longitude;
                }
                next.route_ended = true;
                next.route_duration =
                    Some(now_ms.saturating_sub(self.started_ms.unwrap_or(now_ms)));
                info!(route = %self.route.name, duration_ms = ?next.route_duration, "Route ended");
            }
        } else {
            self.advance_stages(now_ms, next);
            if !self.burndown {
                self.fire_triggers(next);
                self.steer(now_ms);
            }
        }

        next.route_info = Some(self.info());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn two_stage() -> Route {
        Route::new(
            "commute",
            vec![
                Stage {
                    start: GeoPoint::new(47.60, -122.33),
                    end: GeoPoint::new(47.65, -122.33),
                    km: 5.0,
                    throttle: None,
                },
                Stage {
                    start: GeoPoint::new(47.65, -122.33),
                    end: GeoPoint::new(47.65, -122.29),
                    km: 3.0,
                    throttle: Some(150.0),
                },
            ],
            DrivingProfile::Normal,
        )
    }

    fn drive(calc: &mut RouteCalc, odometer: f64, now_ms: u64) -> VehicleSnapshot {
        let prev = VehicleSnapshot {
            odometer,
            ..Default::default()
        };
        let mut next = prev.clone();
        calc.iterate(&prev, &mut next, now_ms);
        next
    }

    #[test]
    fn test_bearing() {
        let a = GeoPoint::new(0.0, 0.0);
        assert_relative_eq!(a.bearing_to(&GeoPoint::new(1.0, 0.0)), 0.0, epsilon = 1e-9);
        assert_relative_eq!(a.bearing_to(&GeoPoint::new(0.0, 1.0)), 90.0, epsilon = 1e-9);
        assert_relative_eq!(a.bearing_to(&GeoPoint::new(-1.0, 0.0)), 180.0, epsilon = 1e-9);
    }

    #[test]
    fn test_parse_route_with_legacy_trigger_field() {
        let json = r#"{
            "stages": [{"start": {"latitude": 1, "longitude": 2}, "end": {"latitude": 1.1, "longitude": 2}, "km": 11}],
            "profile": "aggressive",
            "triggers": [{"type": "oiltemp", "occurances": 2}]
        }"#;
        let route: Route = serde_json::from_str(json).unwrap();
        let route = route.validated().unwrap();
        assert_eq!(route.km, 11.0);
        assert_eq!(route.profile, DrivingProfile::Aggressive);
        assert_eq!(route.triggers[0].occurrences, 2);
    }

    #[test]
    fn test_empty_route_rejected() {
        let route = Route::new("nowhere", vec![], DrivingProfile::Normal);
        assert!(matches!(route.clone().validated(), Err(RouteError::Empty(_))));
        assert!(matches!(RouteCalc::new(route, 1), Err(RouteError::Empty(_))));
    }

    #[test]
    fn test_first_tick_places_vehicle() {
        let mut calc = RouteCalc::new(two_stage(), 1).unwrap();
        let next = drive(&mut calc, 0.0, 0);
        assert_eq!(next.latitude, 47.60);
        assert_relative_eq!(next.heading, 0.0, epsilon = 1e-9);
        assert_eq!(calc.throttle_position(), 35.0);
        assert_eq!(calc.odometer_start(), &[0.0]);
    }

    #[test]
    fn test_stage_throttle_clamped() {
        let mut calc = RouteCalc::new(two_stage(), 1).unwrap();
        drive(&mut calc, 0.0, 0);
        let next = drive(&mut calc, 5.2, 1_000);
        assert_eq!(calc.current_stage(), 1);
        assert_eq!(calc.odometer_start(), &[0.0, 5.0]);
        assert_eq!(calc.throttle_position(), 99.0);
        assert_relative_eq!(next.heading, 90.0, epsilon = 0.1);
    }

    #[test]
    fn test_skips_several_stages_in_one_tick() {
        let mut calc = RouteCalc::new(two_stage(), 1).unwrap();
        drive(&mut calc, 0.0, 0);
        let next = drive(&mut calc, 9.0, 1_000);
        assert!(calc.in_burndown());
        assert_eq!(calc.current_stage(), 2);
        assert_eq!(next.longitude, -122.29);
    }

    #[test]
    fn test_triggers_sampled_in_range() {
        let route = two_stage()
            .with_trigger(TriggerKind::Brake, 3)
            .with_trigger(TriggerKind::OilTemp, 2);
        let calc = RouteCalc::new(route, 9).unwrap();
        assert_eq!(calc.random_triggers().len(), 5);
        assert!(calc
            .random_triggers()
            .iter()
            .all(|t| (0.2..=8.0).contains(&t.threshold_km)));
    }

    #[test]
    fn test_brake_trigger_fires_once_and_releases() {
        let route = two_stage().with_trigger(TriggerKind::Brake, 1);
        let mut calc = RouteCalc::new(route, 5).unwrap();
        drive(&mut calc, 0.0, 0);
        let threshold = calc.random_triggers()[0].threshold_km;

        drive(&mut calc, threshold, 1_000);
        assert!(calc.random_triggers()[0].fired);
        assert_eq!(calc.brake_position(), 100.0);
        assert_eq!(calc.throttle_position(), 0.0);

        drive(&mut calc, threshold, ADJUST_MAX_MS + 1_000);
        assert_eq!(calc.brake_position(), 0.0);
        assert!(calc.throttle_position() > 0.0);
    }

    #[test]
    fn test_triggers_count_from_route_start() {
        let route = two_stage().with_trigger(TriggerKind::Brake, 1);
        let mut calc = RouteCalc::new(route, 5).unwrap();
        drive(&mut calc, 1_000.0, 0);
        assert_eq!(calc.odometer_start(), &[1_000.0]);
        assert!(!calc.random_triggers()[0].fired);

        let threshold = calc.random_triggers()[0].threshold_km;
        drive(&mut calc, 1_000.0 + threshold, 1_000);
        assert!(calc.random_triggers()[0].fired);
    }

    #[test]
    fn test_oil_trigger_sets_flag() {
        let route = two_stage().with_trigger(TriggerKind::OilTemp, 1);
        let mut calc = RouteCalc::new(route, 5).unwrap();
        drive(&mut calc, 0.0, 0);
        let threshold = calc.random_triggers()[0].threshold_km;
        let next = drive(&mut calc, threshold, 1_000);
        assert!(next.triggers.high_oil_temp);
    }

    #[tokio::test]
    async fn test_memory_route_source() {
        let source = MemoryRouteSource::new().with_route(two_stage());
        assert_eq!(source.route_names().await.unwrap(), vec!["commute"]);
        assert_eq!(source.load_route("commute").await.unwrap().km, 8.0);
        assert!(matches!(
            source.load_route("missing").await,
            Err(RouteError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_file_route_source() {
        let dir = tempfile::tempdir().unwrap();
        let json = serde_json::to_vec(&two_stage()).unwrap();
        std::fs::write(dir.path().join("commute.json"), json).unwrap();
        std::fs::write(dir.path().join("broken.json"), b"{not json").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();

        let source = FileRouteSource::new(dir.path());
        assert_eq!(
            source.route_names().await.unwrap(),
            vec!["broken".to_string(), "commute".to_string()]
        );
        assert_eq!(source.load_route("commute").await.unwrap().stages.len(), 2);
        assert!(matches!(
            source.load_route("broken").await,
            Err(RouteError::Malformed(_))
        ));
        assert!(matches!(
            source.load_route("absent").await,
            Err(RouteError::NotFound(_))
        ));
    }
}
