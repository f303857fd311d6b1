// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Device records and their boundary operations
//!
//! The CRUD layer calls into [`DeviceManager`] with a [`Ticket`] it has
//! already authenticated. Records live in the device table keyed by
//! `(userId, id)`; device types live in the type table keyed by
//! `(userId, typeId)`.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::SimulatorConfig;
use crate::error::{Result, SimError};
use crate::paginator::{collate_page, PageQuery};
use crate::spec::{DeviceCategory, DeviceTypeSpec};
use crate::store::{Document, Filter, Key, KeyCondition, Store, TableSchema};

/// Authenticated caller, as asserted by the auth layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ticket {
    pub userid: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Ticket {
    pub fn new(userid: impl Into<String>) -> Self {
        Self {
            userid: userid.into(),
            groups: Vec::new(),
        }
    }

    /// Add a group membership
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn is_member(&self, group: &str) -> bool {
        self.groups.iter().any(|g| g == group)
    }
}

/// Whether a device is idle or loaded into the simulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStage {
    #[default]
    Sleeping,
    Hydrated,
}

impl DeviceStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStage::Sleeping => "sleeping",
            DeviceStage::Hydrated => "hydrated",
        }
    }
}

/// A device as stored in the device table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRecord {
    pub id: String,
    pub user_id: String,
    pub type_id: String,
    #[serde(default)]
    pub category: DeviceCategory,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub stage: DeviceStage,
    /// Times the device has been hydrated
    #[serde(default)]
    pub runs: u32,
    pub created_at: String,
    pub updated_at: String,
}

/// `create_device` request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDeviceRequest {
    pub type_id: String,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    1
}

impl CreateDeviceRequest {
    pub fn new(type_id: impl Into<String>, count: usize) -> Self {
        Self {
            type_id: type_id.into(),
            metadata: Value::Null,
            count,
        }
    }
}

/// Fields `update_device` may change; anything else in the body is ignored
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DevicePatch {
    #[serde(default)]
    pub metadata: Option<Value>,
    #[serde(default)]
    pub stage: Option<DeviceStage>,
}

/// Optional equality filters for device listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceFilter {
    #[serde(default)]
    pub type_id: Option<String>,
    #[serde(default)]
    pub stage: Option<DeviceStage>,
    #[serde(default)]
    pub category: Option<DeviceCategory>,
}

impl DeviceFilter {
    fn to_store_filter(&self) -> Result<Option<Filter>> {
        let mut filter = Filter::new();
        if let Some(ref type_id) = self.type_id {
            filter = filter.eq("typeId", type_id.as_str());
        }
        if let Some(stage) = self.stage {
            filter = filter.eq("stage", stage.as_str());
        }
        if let Some(category) = self.category {
            filter = filter.eq("category", serde_json::to_value(category)?);
        }
        Ok((!filter.is_empty()).then_some(filter))
    }
}

/// Key schema of the device table
pub fn device_table_schema() -> TableSchema {
    TableSchema::composite("userId", "id")
}

/// Key schema of the device type table
pub fn type_table_schema() -> TableSchema {
    TableSchema::composite("userId", "typeId")
}

fn timestamp() -> String {
    Utc::now().to_rfc3339()
}

/// Device management operations over a store
pub struct DeviceManager {
    store: Arc<dyn Store>,
    config: SimulatorConfig,
}

impl DeviceManager {
    pub fn new(store: Arc<dyn Store>, config: SimulatorConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &SimulatorConfig {
        &self.config
    }

    /// Store a device type owned by the caller
    pub async fn save_type(&self, ticket: &Ticket, mut spec: DeviceTypeSpec) -> Result<()> {
        spec.spec.validate()?;
        spec.user_id = Some(ticket.userid.clone());
        let doc = serde_json::to_value(&spec)?;
        self.store.put(&self.config.type_table, doc).await?;
        Ok(())
    }

    /// Resolve a device type: the caller's own first, then shared types.
    ///
    /// A type that does not exist (or is private to someone else) is
    /// `Ok(None)`.
    pub async fn get_device_type(
        &self,
        ticket: &Ticket,
        type_id: &str,
    ) -> Result<Option<DeviceTypeSpec>> {
        let table = &self.config.type_table;
        let own = self
            .store
            .get(table, &Key::new(ticket.userid.as_str(), type_id))
            .await?;
        if let Some(doc) = own {
            return Ok(Some(serde_json::from_value(doc)?));
        }

        let shared = Filter::new()
            .eq("typeId", type_id)
            .eq("visibility", "shared");
        let mut cursor = None;
        loop {
            let page = self.store.scan(table, Some(&shared), cursor.as_ref()).await?;
            if let Some(doc) = page.items.into_iter().next() {
                return Ok(Some(serde_json::from_value(doc)?));
            }
            match page.last_evaluated_key {
                Some(key) => cursor = Some(key),
                None => return Ok(None),
            }
        }
    }

    /// Fetch one of the caller's devices
    pub async fn get_device(&self, ticket: &Ticket, id: &str) -> Result<Option<DeviceRecord>> {
        let doc = self
            .store
            .get(&self.config.device_table, &Key::new(ticket.userid.as_str(), id))
            .await?;
        Ok(doc.map(serde_json::from_value).transpose()?)
    }

    /// Create `count` devices of a type.
    ///
    /// Requests above the per-request cap are refused. Records are written
    /// in sequential batches no larger than the configured batch size.
    pub async fn create_device(
        &self,
        ticket: &Ticket,
        request: CreateDeviceRequest,
    ) -> Result<Vec<DeviceRecord>> {
        if request.count == 0 {
            return Err(SimError::Validation(
                "count must be at least 1".to_string(),
            ));
        }
        if request.count > self.config.max_devices_per_request {
            return Err(SimError::LimitExceeded {
                requested: request.count,
                max: self.config.max_devices_per_request,
            });
        }

        let device_type = self
            .get_device_type(ticket, &request.type_id)
            .await?
            .ok_or_else(|| SimError::NotFound {
                kind: "device type",
                id: request.type_id.clone(),
            })?;

        let now = timestamp();
        let metadata = match request.metadata {
            Value::Null => Value::Object(Default::default()),
            other => other,
        };
        let records: Vec<DeviceRecord> = (0..request.count)
            .map(|_| DeviceRecord {
                id: uuid::Uuid::new_v4().to_string(),
                user_id: ticket.userid.clone(),
                type_id: device_type.type_id.clone(),
                category: device_type.category,
                metadata: metadata.clone(),
                stage: DeviceStage::Sleeping,
                runs: 0,
                created_at: now.clone(),
                updated_at: now.clone(),
            })
            .collect();

        for (i, batch) in records
            .chunks(self.config.create_batch_size.max(1))
            .enumerate()
        {
            let docs = batch
                .iter()
                .map(serde_json::to_value)
                .collect::<std::result::Result<Vec<Document>, _>>()?;
            self.store.batch_put(&self.config.device_table, docs).await?;
            debug!(batch = i, size = batch.len(), "Device batch written");
        }

        info!(
            user_id = %ticket.userid,
            type_id = %request.type_id,
            count = records.len(),
            "Devices created"
        );
        Ok(records)
    }

    /// Apply a metadata/stage patch to one of the caller's devices
    pub async fn update_device(
        &self,
        ticket: &Ticket,
        id: &str,
        patch: DevicePatch,
    ) -> Result<DeviceRecord> {
        let mut record = self
            .get_device(ticket, id)
            .await?
            .ok_or_else(|| SimError::NotFound {
                kind: "device",
                id: id.to_string(),
            })?;

        if let Some(metadata) = patch.metadata {
            record.metadata = metadata;
        }
        if let Some(stage) = patch.stage {
            if stage == DeviceStage::Hydrated && record.stage != DeviceStage::Hydrated {
                record.runs += 1;
            }
            record.stage = stage;
        }
        record.updated_at = timestamp();

        self.store
            .put(&self.config.device_table, serde_json::to_value(&record)?)
            .await?;
        debug!(device_id = id, stage = record.stage.as_str(), "Device updated");
        Ok(record)
    }

    /// One page of devices.
    ///
    /// Administrators page over every user's devices; everyone else over
    /// their own.
    pub async fn get_device_page(
        &self,
        ticket: &Ticket,
        filter: &DeviceFilter,
        page: usize,
    ) -> Result<Vec<DeviceRecord>> {
        let filter = filter.to_store_filter()?;
        let query = if ticket.is_member(&self.config.admin_group) {
            PageQuery::Scan { filter }
        } else {
            PageQuery::Query {
                condition: KeyCondition::partition(ticket.userid.as_str()),
                filter,
            }
        };

        let docs = collate_page(
            self.store.as_ref(),
            &self.config.device_table,
            &query,
            page,
            self.config.page_size,
        )
        .await?;

        docs.into_iter()
            .map(|doc| serde_json::from_value(doc).map_err(SimError::from))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_ticket_groups() {
        let ticket = Ticket::new("u1").with_group("Administrators");
        assert!(ticket.is_member("Administrators"));
        assert!(!ticket.is_member("Operators"));
    }

    #[test]
    fn test_patch_ignores_other_fields() {
        let patch: DevicePatch = serde_json::from_value(json!({
            "metadata": {"site": "A"},
            "stage": "hydrated",
            "userId": "someone-else"
        }))
        .unwrap();
        assert_eq!(patch.stage, Some(DeviceStage::Hydrated));
        assert_eq!(patch.metadata, Some(json!({"site": "A"})));
    }

    #[test]
    fn test_request_defaults() {
        let req: CreateDeviceRequest = serde_json::from_value(json!({"typeId": "t"})).unwrap();
        assert_eq!(req.count, 1);
        assert_eq!(req.metadata, Value::Null);
    }

    #[test]
    fn test_filter_conversion() {
        let filter = DeviceFilter {
            stage: Some(DeviceStage::Hydrated),
            ..Default::default()
        };
        let store_filter = filter.to_store_filter().unwrap().unwrap();
        assert!(store_filter.matches(&json!({"stage": "hydrated"})));
        assert!(DeviceFilter::default().to_store_filter().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_zero_rejected() {
        let store = MemoryStore::new().with_table("devices", device_table_schema());
        let manager = DeviceManager::new(Arc::new(store), SimulatorConfig::default());
        let err = manager
            .create_device(&Ticket::new("u1"), CreateDeviceRequest::new("t", 0))
            .await
            .unwrap_err();
        assert!(matches!(err, SimError::Validation(_)));
    }
}
