// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Device type and message specifications.
//!
//! These are the user-authored schemas read from the store. Constraint
//! fields are kept as raw JSON values: a malformed bound (a string where a
//! number belongs, a negative length) is not a parse error but is corrected
//! by the generator at generation time.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, SimError};

/// Who may provision devices of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    #[default]
    Private,
    Shared,
}

/// Which simulation engine drives devices of a type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    /// Attribute-driven generic device
    #[default]
    Widget,
    /// Connected vehicle driven by the dynamics model
    Automotive,
}

/// A device type as stored in the type table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceTypeSpec {
    pub type_id: String,
    pub name: String,
    #[serde(default)]
    pub custom: bool,
    #[serde(default)]
    pub visibility: Visibility,
    #[serde(default)]
    pub category: DeviceCategory,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub spec: MessageSpec,
}

/// Topic, cadence and payload schema of a device's messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageSpec {
    /// Publish period in milliseconds
    pub interval: u64,
    /// Total run time in milliseconds
    pub duration: u64,
    /// Topic template; `${name}` placeholders are filled from the payload
    pub topic: String,
    /// Payload schema. A widget without one stops on its first tick.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<AttributeSpec>>,
    /// Route to drive (automotive types only; random when absent)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
}

impl MessageSpec {
    /// Create a message spec with a payload
    pub fn new(topic: &str, interval: u64, duration: u64, payload: Vec<AttributeSpec>) -> Self {
        Self {
            interval,
            duration,
            topic: topic.to_string(),
            payload: Some(payload),
            route: None,
        }
    }

    /// Check that attribute names are unique within every sibling list.
    pub fn validate(&self) -> Result<()> {
        if self.interval == 0 {
            return Err(SimError::Validation(
                "interval must be greater than zero".to_string(),
            ));
        }
        match self.payload {
            Some(ref payload) => validate_siblings(payload, "payload"),
            None => Ok(()),
        }
    }
}

fn validate_siblings(attributes: &[AttributeSpec], path: &str) -> Result<()> {
    let mut seen = HashSet::new();
    for attr in attributes {
        if !seen.insert(attr.name.as_str()) {
            return Err(SimError::Validation(format!(
                "duplicate attribute '{}' in {}",
                attr.name, path
            )));
        }
        if let AttributeKind::Object { ref payload } = attr.kind {
            validate_siblings(payload, &format!("{}.{}", path, attr.name))?;
        }
    }
    Ok(())
}

/// One payload attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeSpec {
    pub name: String,
    /// Generated once and reused for the device's lifetime
    #[serde(default, rename = "static")]
    pub is_static: bool,
    /// Value used in place of generation for static attributes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(flatten)]
    pub kind: AttributeKind,
}

impl AttributeSpec {
    /// Create a non-static attribute
    pub fn new(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            is_static: false,
            default: None,
            kind,
        }
    }

    /// Mark the attribute static
    pub fn fixed(mut self) -> Self {
        self.is_static = true;
        self
    }

    /// Set a default value
    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Type-specific constraints, tagged by the JSON `type` field.
///
/// Bounds are raw JSON; `Value::Null` means "not given".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum AttributeKind {
    Id {
        #[serde(default, rename = "charSet")]
        char_set: Value,
        #[serde(default)]
        length: Value,
    },
    String {
        #[serde(default)]
        min: Value,
        #[serde(default)]
        max: Value,
    },
    Int {
        #[serde(default)]
        min: Value,
        #[serde(default)]
        max: Value,
    },
    Timestamp {
        #[serde(default)]
        tsformat: Value,
    },
    Bool {
        #[serde(default)]
        min: Value,
        #[serde(default)]
        max: Value,
        #[serde(default)]
        seed: Value,
    },
    Range {
        #[serde(default)]
        start: Value,
        #[serde(default)]
        stop: Value,
        #[serde(default)]
        step: Value,
    },
    Float {
        #[serde(default)]
        imin: Value,
        #[serde(default)]
        imax: Value,
        #[serde(default)]
        dmin: Value,
        #[serde(default)]
        dmax: Value,
        #[serde(default)]
        precision: Value,
    },
    PickSome {
        #[serde(default)]
        arr: Value,
        #[serde(default)]
        count: Value,
        #[serde(default)]
        shuffle: Value,
    },
    PickOne {
        #[serde(default)]
        arr: Value,
    },
    Uuid,
    Shortid,
    Location {
        #[serde(default)]
        lat: Value,
        #[serde(default)]
        long: Value,
        #[serde(default)]
        radius: Value,
    },
    Sinusoidal {
        #[serde(default)]
        min: Value,
        #[serde(default)]
        max: Value,
    },
    Decay {
        #[serde(default)]
        min: Value,
        #[serde(default)]
        max: Value,
    },
    Object {
        #[serde(default)]
        payload: Vec<AttributeSpec>,
    },
    /// Any `type` this version does not know; generates `null`.
    #[serde(other)]
    Unsupported,
}

impl AttributeKind {
    /// Integer attribute with bounds
    pub fn int(min: i64, max: i64) -> Self {
        AttributeKind::Int {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Float attribute with integer/decimal bounds and precision
    pub fn float(imin: i64, imax: i64, dmin: i64, dmax: i64, precision: i64) -> Self {
        AttributeKind::Float {
            imin: imin.into(),
            imax: imax.into(),
            dmin: dmin.into(),
            dmax: dmax.into(),
            precision: precision.into(),
        }
    }

    /// String attribute with length bounds
    pub fn string(min: i64, max: i64) -> Self {
        AttributeKind::String {
            min: min.into(),
            max: max.into(),
        }
    }

    /// Pick-one attribute over the given choices
    pub fn pick_one(arr: Vec<Value>) -> Self {
        AttributeKind::PickOne {
            arr: Value::Array(arr),
        }
    }

    /// Nested object attribute
    pub fn object(payload: Vec<AttributeSpec>) -> Self {
        AttributeKind::Object { payload }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_device_type() {
        let raw = json!({
            "typeId": "t-100",
            "name": "thermostat",
            "custom": true,
            "visibility": "shared",
            "spec": {
                "interval": 2000,
                "duration": 60000,
                "topic": "sim/thermostat/${sensor}",
                "payload": [
                    {"name": "sensor", "type": "id", "static": true, "length": 8},
                    {"name": "temp", "type": "float", "imin": 10, "imax": 30, "dmin": 0, "dmax": 99, "precision": 2},
                    {"name": "loc", "type": "location", "lat": 47.6, "long": -122.3, "radius": 500},
                    {"name": "env", "type": "object", "payload": [
                        {"name": "humidity", "type": "int", "min": 20, "max": 80}
                    ]}
                ]
            }
        });
        let spec: DeviceTypeSpec = serde_json::from_value(raw).unwrap();
        assert_eq!(spec.visibility, Visibility::Shared);
        assert_eq!(spec.category, DeviceCategory::Widget);
        let payload = spec.spec.payload.unwrap();
        assert_eq!(payload.len(), 4);
        assert!(payload[0].is_static);
        assert!(matches!(payload[1].kind, AttributeKind::Float { .. }));
        match &payload[3].kind {
            AttributeKind::Object { payload } => assert_eq!(payload[0].name, "humidity"),
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_bounds_still_parse() {
        let attr: AttributeSpec =
            serde_json::from_value(json!({"name": "n", "type": "int", "min": "low", "max": null}))
                .unwrap();
        assert_eq!(
            attr.kind,
            AttributeKind::Int {
                min: json!("low"),
                max: Value::Null
            }
        );
    }

    #[test]
    fn test_unknown_type_is_unsupported() {
        let attr: AttributeSpec =
            serde_json::from_value(json!({"name": "x", "type": "hologram"})).unwrap();
        assert_eq!(attr.kind, AttributeKind::Unsupported);
    }

    #[test]
    fn test_validate_duplicate_names() {
        let spec = MessageSpec::new(
            "t",
            1000,
            5000,
            vec![
                AttributeSpec::new("a", AttributeKind::int(0, 1)),
                AttributeSpec::new(
                    "b",
                    AttributeKind::object(vec![
                        AttributeSpec::new("c", AttributeKind::Uuid),
                        AttributeSpec::new("c", AttributeKind::Shortid),
                    ]),
                ),
            ],
        );
        let err = spec.validate().unwrap_err();
        assert!(err.to_string().contains("payload.b"));
    }

    #[test]
    fn test_validate_same_name_in_different_lists() {
        let spec = MessageSpec::new(
            "t",
            1000,
            5000,
            vec![
                AttributeSpec::new("a", AttributeKind::int(0, 1)),
                AttributeSpec::new(
                    "obj",
                    AttributeKind::object(vec![AttributeSpec::new("a", AttributeKind::Uuid)]),
                ),
            ],
        );
        assert!(spec.validate().is_ok());
    }
}
