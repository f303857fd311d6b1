// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Configuration types for FleetSim

use serde::{Deserialize, Serialize};

/// Simulator-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Vehicle physics tick period in milliseconds
    pub physics_interval_ms: u64,

    /// Devices per page returned by `get_device_page`
    pub page_size: usize,

    /// Maximum devices a single create request may ask for
    pub max_devices_per_request: usize,

    /// Devices written per store batch while creating
    pub create_batch_size: usize,

    /// Ticket group whose members see every user's devices
    pub admin_group: String,

    /// Table holding device records
    pub device_table: String,

    /// Table holding device types
    pub type_table: String,

    /// Finished-device reports a fleet keeps; older ones are dropped
    pub finished_history: usize,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            physics_interval_ms: 500,
            page_size: 100,
            max_devices_per_request: 100,
            create_batch_size: 25,
            admin_group: "Administrators".to_string(),
            device_table: "devices".to_string(),
            type_table: "device-types".to_string(),
            finished_history: 256,
        }
    }
}

impl SimulatorConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the physics tick period
    pub fn with_physics_interval_ms(mut self, ms: u64) -> Self {
        self.physics_interval_ms = ms;
        self
    }

    /// Set the device page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the per-request device cap
    pub fn with_max_devices_per_request(mut self, max: usize) -> Self {
        self.max_devices_per_request = max;
        self
    }

    /// Set the store batch size used while creating devices
    pub fn with_create_batch_size(mut self, size: usize) -> Self {
        self.create_batch_size = size;
        self
    }

    /// Set the administrator group name
    pub fn with_admin_group(mut self, group: impl Into<String>) -> Self {
        self.admin_group = group.into();
        self
    }

    /// Set how many finished-device reports a fleet keeps
    pub fn with_finished_history(mut self, reports: usize) -> Self {
        self.finished_history = reports;
        self
    }

    /// Parse a configuration from JSON; missing fields keep their defaults
    pub fn from_json(json: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Configuration of the in-memory store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStoreConfig {
    /// Items examined per query/scan round-trip (before filtering)
    pub page_limit: usize,

    /// Largest batch accepted by `batch_put`
    pub max_batch_size: usize,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            page_limit: 100,
            max_batch_size: 25,
        }
    }
}

impl MemoryStoreConfig {
    /// Create a configuration with a custom page limit
    pub fn with_page_limit(page_limit: usize) -> Self {
        Self {
            page_limit,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulator_config_default() {
        let config = SimulatorConfig::default();
        assert_eq!(config.physics_interval_ms, 500);
        assert_eq!(config.page_size, 100);
        assert_eq!(config.max_devices_per_request, 100);
        assert_eq!(config.create_batch_size, 25);
        assert_eq!(config.admin_group, "Administrators");
        assert_eq!(config.finished_history, 256);
    }

    #[test]
    fn test_simulator_config_builders() {
        let config = SimulatorConfig::new()
            .with_page_size(10)
            .with_create_batch_size(5)
            .with_admin_group("ops");
        assert_eq!(config.page_size, 10);
        assert_eq!(config.create_batch_size, 5);
        assert_eq!(config.admin_group, "ops");
    }

    #[test]
    fn test_simulator_config_partial_json() {
        let config = SimulatorConfig::from_json(r#"{"page_size": 20}"#).unwrap();
        assert_eq!(config.page_size, 20);
        assert_eq!(config.create_batch_size, 25);
    }

    #[test]
    fn test_memory_store_config_with_page_limit() {
        let config = MemoryStoreConfig::with_page_limit(7);
        assert_eq!(config.page_limit, 7);
        assert_eq!(config.max_batch_size, 25);
    }
}
