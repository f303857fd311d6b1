// FleetSim Runner - Type and configuration loading
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Loading device types and simulator configuration from disk.

use std::path::{Path, PathBuf};

use fleetsim::{DeviceTypeSpec, SimError, SimulatorConfig};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors while preparing a run
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid device type in {path}: {source}")]
    InvalidType {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid configuration: {0}")]
    Config(#[from] SimError),

    #[error("No device types to run")]
    NoTypes,
}

/// Read a simulator configuration file
pub async fn load_config(path: &Path) -> Result<SimulatorConfig, RunnerError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| RunnerError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(SimulatorConfig::from_json(&raw)?)
}

/// Read every `*.json` device type in a directory, in file name order.
///
/// Types that fail validation are skipped with a warning; unreadable or
/// unparseable files are errors.
pub async fn load_types(dir: &Path) -> Result<Vec<DeviceTypeSpec>, RunnerError> {
    let io_err = |source: std::io::Error| RunnerError::Io {
        path: dir.to_path_buf(),
        source,
    };

    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut types = Vec::with_capacity(paths.len());
    for path in paths {
        let raw = tokio::fs::read(&path)
            .await
            .map_err(|source| RunnerError::Io {
                path: path.clone(),
                source,
            })?;
        let spec: DeviceTypeSpec =
            serde_json::from_slice(&raw).map_err(|source| RunnerError::InvalidType {
                path: path.clone(),
                source,
            })?;
        match spec.spec.validate() {
            Ok(()) => {
                debug!(type_id = %spec.type_id, path = %path.display(), "Device type loaded");
                types.push(spec);
            }
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping invalid device type"),
        }
    }

    if types.is_empty() {
        return Err(RunnerError::NoTypes);
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetsim::presets;

    #[tokio::test]
    async fn test_load_types_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        for spec in presets::device_types() {
            let path = dir.path().join(format!("{}.json", spec.type_id));
            std::fs::write(path, serde_json::to_vec(&spec).unwrap()).unwrap();
        }
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let types = load_types(dir.path()).await.unwrap();
        let ids: Vec<&str> = types.iter().map(|t| t.type_id.as_str()).collect();
        assert_eq!(ids, vec![presets::CONNECTED_VEHICLE, presets::ENVIRONMENT_SENSOR]);
    }

    #[tokio::test]
    async fn test_invalid_type_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = presets::environment_sensor();
        spec.spec.interval = 0;
        std::fs::write(dir.path().join("bad.json"), serde_json::to_vec(&spec).unwrap()).unwrap();

        assert!(matches!(
            load_types(dir.path()).await,
            Err(RunnerError::NoTypes)
        ));
    }

    #[tokio::test]
    async fn test_load_config_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"physics_interval_ms": 250}"#).unwrap();

        let config = load_config(&path).await.unwrap();
        assert_eq!(config.physics_interval_ms, 250);
        assert_eq!(config.page_size, 100);
    }
}
