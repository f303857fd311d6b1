// FleetSim - IoT device fleet simulator
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Key-value document store abstraction
//!
//! The simulator reads device types and device records through a [`Store`]
//! with get/put/delete/query/scan semantics. `query` and `scan` are
//! cursor-paginated: each call examines at most one store page of items,
//! applies the filter to what it examined, and returns the key to resume
//! from when more items remain.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::MemoryStoreConfig;
use crate::error::StoreError;

/// A stored JSON document (always an object)
pub type Document = Value;

/// Primary key of a document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub partition: String,
    pub sort: Option<String>,
}

impl Key {
    /// Key with partition and sort components
    pub fn new(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: Some(sort.into()),
        }
    }

    /// Key with a partition component only
    pub fn partition(partition: impl Into<String>) -> Self {
        Self {
            partition: partition.into(),
            sort: None,
        }
    }
}

/// Key attribute names of a table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl TableSchema {
    /// Schema with a composite key
    pub fn composite(partition_key: &str, sort_key: &str) -> Self {
        Self {
            partition_key: partition_key.to_string(),
            sort_key: Some(sort_key.to_string()),
        }
    }

    /// Extract the primary key of a document
    pub fn key_of(&self, item: &Document) -> Result<Key, StoreError> {
        let partition = key_attribute(item, &self.partition_key)?;
        let sort = match self.sort_key {
            Some(ref name) => Some(key_attribute(item, name)?),
            None => None,
        };
        Ok(Key { partition, sort })
    }
}

fn key_attribute(item: &Document, name: &str) -> Result<String, StoreError> {
    match item.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        _ => Err(StoreError::MissingKey {
            attribute: name.to_string(),
        }),
    }
}

/// Partition-key equality condition for `query`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyCondition {
    pub partition: String,
}

impl KeyCondition {
    /// Match every item in a partition
    pub fn partition(value: impl Into<String>) -> Self {
        Self {
            partition: value.into(),
        }
    }
}

/// Attribute equality filter applied after the key condition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    /// Empty filter (matches everything)
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `attribute == value`
    pub fn eq(mut self, attribute: &str, value: impl Into<Value>) -> Self {
        self.conditions.push((attribute.to_string(), value.into()));
        self
    }

    /// Check whether a document passes every condition
    pub fn matches(&self, item: &Document) -> bool {
        self.conditions
            .iter()
            .all(|(attr, expected)| item.get(attr) == Some(expected))
    }

    /// Check if the filter has no conditions
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// One round-trip's worth of query/scan results
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StorePage {
    pub items: Vec<Document>,
    /// Resume point; `None` once the result set is exhausted
    pub last_evaluated_key: Option<Key>,
}

/// Trait for document stores
#[async_trait]
pub trait Store: Send + Sync {
    /// Fetch one item; a missing item is `Ok(None)`
    async fn get(&self, table: &str, key: &Key) -> Result<Option<Document>, StoreError>;

    /// Insert or replace one item
    async fn put(&self, table: &str, item: Document) -> Result<(), StoreError>;

    /// Insert or replace several items in one request
    async fn batch_put(&self, table: &str, items: Vec<Document>) -> Result<(), StoreError>;

    /// Remove one item (absent items are not an error)
    async fn delete(&self, table: &str, key: &Key) -> Result<(), StoreError>;

    /// Items of one partition, in sort-key order
    async fn query(
        &self,
        table: &str,
        condition: &KeyCondition,
        filter: Option<&Filter>,
        exclusive_start_key: Option<&Key>,
    ) -> Result<StorePage, StoreError>;

    /// Items of the whole table, in key order
    async fn scan(
        &self,
        table: &str,
        filter: Option<&Filter>,
        exclusive_start_key: Option<&Key>,
    ) -> Result<StorePage, StoreError>;
}

#[derive(Debug)]
struct Table {
    schema: TableSchema,
    items: BTreeMap<Key, Document>,
}

/// In-memory store with store-native paging, for tests and local runs
#[derive(Debug)]
pub struct MemoryStore {
    config: MemoryStoreConfig,
    tables: Mutex<HashMap<String, Table>>,
    reads: Mutex<usize>,
    fail_reads_after: Mutex<Option<usize>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    /// Create an empty store with default paging
    pub fn new() -> Self {
        Self::with_config(MemoryStoreConfig::default())
    }

    /// Create an empty store with custom paging
    pub fn with_config(config: MemoryStoreConfig) -> Self {
        Self {
            config,
            tables: Mutex::new(HashMap::new()),
            reads: Mutex::new(0),
            fail_reads_after: Mutex::new(None),
        }
    }

    /// Declare a table
    pub fn with_table(self, name: &str, schema: TableSchema) -> Self {
        lock(&self.tables).insert(
            name.to_string(),
            Table {
                schema,
                items: BTreeMap::new(),
            },
        );
        self
    }

    /// Number of query/scan round-trips served so far
    pub fn read_count(&self) -> usize {
        *lock(&self.reads)
    }

    /// Make every query/scan after the first `n` fail
    pub fn fail_reads_after(&self, n: usize) {
        *lock(&self.fail_reads_after) = Some(n);
    }

    /// Number of items in a table
    pub fn count(&self, table: &str) -> usize {
        lock(&self.tables)
            .get(table)
            .map(|t| t.items.len())
            .unwrap_or(0)
    }

    fn begin_read(&self) -> Result<(), StoreError> {
        let mut reads = lock(&self.reads);
        if let Some(limit) = *lock(&self.fail_reads_after) {
            if *reads >= limit {
                return Err(StoreError::Unavailable {
                    reason: "injected read failure".to_string(),
                });
            }
        }
        *reads += 1;
        Ok(())
    }

    fn with_table_mut<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = lock(&self.tables);
        let table = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::UnknownTable(table.to_string()))?;
        f(table)
    }

    /// Examine one store page of `candidates`, then filter.
    fn page<'a>(
        &self,
        mut candidates: impl Iterator<Item = (&'a Key, &'a Document)>,
        filter: Option<&Filter>,
    ) -> StorePage {
        let mut items = Vec::new();
        let mut last = None;
        for _ in 0..self.config.page_limit.max(1) {
            match candidates.next() {
                Some((key, item)) => {
                    last = Some(key.clone());
                    if filter.map_or(true, |f| f.matches(item)) {
                        items.push(item.clone());
                    }
                }
                None => {
                    last = None;
                    break;
                }
            }
        }
        let last_evaluated_key = match last {
            Some(key) if candidates.next().is_some() => Some(key),
            _ => None,
        };
        StorePage {
            items,
            last_evaluated_key,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn after(start: Option<&Key>) -> Bound<Key> {
    match start {
        Some(key) => Bound::Excluded(key.clone()),
        None => Bound::Unbounded,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, table: &str, key: &Key) -> Result<Option<Document>, StoreError> {
        self.with_table_mut(table, |t| Ok(t.items.get(key).cloned()))
    }

    async fn put(&self, table: &str, item: Document) -> Result<(), StoreError> {
        self.with_table_mut(table, |t| {
            let key = t.schema.key_of(&item)?;
            t.items.insert(key, item);
            Ok(())
        })
    }

    async fn batch_put(&self, table: &str, items: Vec<Document>) -> Result<(), StoreError> {
        if items.len() > self.config.max_batch_size {
            return Err(StoreError::BatchTooLarge {
                size: items.len(),
                max: self.config.max_batch_size,
            });
        }
        self.with_table_mut(table, |t| {
            let keyed = items
                .into_iter()
                .map(|item| t.schema.key_of(&item).map(|key| (key, item)))
                .collect::<Result<Vec<_>, _>>()?;
            t.items.extend(keyed);
            Ok(())
        })
    }

    async fn delete(&self, table: &str, key: &Key) -> Result<(), StoreError> {
        self.with_table_mut(table, |t| {
            t.items.remove(key);
            Ok(())
        })
    }

    async fn query(
        &self,
        table: &str,
        condition: &KeyCondition,
        filter: Option<&Filter>,
        exclusive_start_key: Option<&Key>,
    ) -> Result<StorePage, StoreError> {
        self.begin_read()?;
        self.with_table_mut(table, |t| {
            let candidates = t
                .items
                .range((after(exclusive_start_key), Bound::Unbounded))
                .skip_while(|(k, _)| k.partition < condition.partition)
                .take_while(|(k, _)| k.partition == condition.partition);
            Ok(self.page(candidates, filter))
        })
    }

    async fn scan(
        &self,
        table: &str,
        filter: Option<&Filter>,
        exclusive_start_key: Option<&Key>,
    ) -> Result<StorePage, StoreError> {
        self.begin_read()?;
        self.with_table_mut(table, |t| {
            let candidates = t
                .items
                .range((after(exclusive_start_key), Bound::Unbounded));
            Ok(self.page(candidates, filter))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store(page_limit: usize) -> MemoryStore {
        MemoryStore::with_config(MemoryStoreConfig::with_page_limit(page_limit))
            .with_table("devices", TableSchema::composite("userId", "id"))
    }

    fn device(user: &str, id: usize, color: &str) -> Document {
        json!({"userId": user, "id": format!("d{:03}", id), "color": color})
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = store(10);
        store.put("devices", device("u1", 1, "red")).await.unwrap();

        let key = Key::new("u1", "d001");
        let item = store.get("devices", &key).await.unwrap().unwrap();
        assert_eq!(item["color"], "red");

        store.delete("devices", &key).await.unwrap();
        assert!(store.get("devices", &key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_put_missing_key() {
        let store = store(10);
        let result = store.put("devices", json!({"userId": "u1"})).await;
        assert_eq!(
            result,
            Err(StoreError::MissingKey {
                attribute: "id".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = store(10);
        let result = store.get("nope", &Key::partition("x")).await;
        assert!(matches!(result, Err(StoreError::UnknownTable(_))));
    }

    #[tokio::test]
    async fn test_batch_limit() {
        let store = store(10);
        let items: Vec<_> = (0..26).map(|i| device("u1", i, "red")).collect();
        let result = store.batch_put("devices", items).await;
        assert_eq!(result, Err(StoreError::BatchTooLarge { size: 26, max: 25 }));
        assert_eq!(store.count("devices"), 0);
    }

    #[tokio::test]
    async fn test_query_pages_follow_cursor() {
        let store = store(4);
        let items: Vec<_> = (0..10).map(|i| device("u1", i, "red")).collect();
        store.batch_put("devices", items).await.unwrap();
        store.put("devices", device("u0", 0, "red")).await.unwrap();
        store.put("devices", device("u2", 0, "red")).await.unwrap();

        let cond = KeyCondition::partition("u1");
        let mut cursor = None;
        let mut seen = Vec::new();
        loop {
            let page = store
                .query("devices", &cond, None, cursor.as_ref())
                .await
                .unwrap();
            assert!(page.items.len() <= 4);
            seen.extend(page.items);
            match page.last_evaluated_key {
                Some(k) => cursor = Some(k),
                None => break,
            }
        }
        assert_eq!(seen.len(), 10);
        assert!(seen.iter().all(|d| d["userId"] == "u1"));
        assert_eq!(store.read_count(), 3);
    }

    #[tokio::test]
    async fn test_filter_applies_after_limit() {
        let store = store(5);
        for i in 0..10 {
            let color = if i % 2 == 0 { "red" } else { "blue" };
            store.put("devices", device("u1", i, color)).await.unwrap();
        }
        let filter = Filter::new().eq("color", "red");
        let page = store.scan("devices", Some(&filter), None).await.unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.last_evaluated_key.is_some());
    }

    #[tokio::test]
    async fn test_injected_read_failure() {
        let store = store(5);
        store.fail_reads_after(1);
        assert!(store.scan("devices", None, None).await.is_ok());
        assert!(matches!(
            store.scan("devices", None, None).await,
            Err(StoreError::Unavailable { .. })
        ));
    }
}
