//! In-memory source usable both as a local default set and as a remote
//! source in tests.

use super::{ConfigurationSource, LocalSource, RemoteSource};
use crate::types::{ConfigurationItem, DataSource, PropertyValue};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Key/value source held in memory.
///
/// Every read or poll returns all known items, tombstones included.
pub struct MemorySource {
    label: String,
    values: RwLock<BTreeMap<String, ConfigurationItem>>,
    available: AtomicBool,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::with_label("memory")
    }

    pub fn with_label(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            values: RwLock::new(BTreeMap::new()),
            available: AtomicBool::new(true),
        }
    }

    /// Set or update a property.
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.insert(ConfigurationItem::new(name, value));
    }

    /// Set a property whose value is cipher text.
    pub fn set_encrypted(&self, name: impl Into<String>, cipher_text: impl Into<String>) {
        self.insert(ConfigurationItem::encrypted(name, cipher_text));
    }

    /// Replace a property with a tombstone delivered by subsequent polls.
    pub fn remove(&self, name: impl Into<String>) {
        self.insert(ConfigurationItem::tombstone(name));
    }

    pub fn insert(&self, item: ConfigurationItem) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.insert(item.key.clone(), item);
    }

    /// When unavailable, reads and polls return `None`.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    fn snapshot(&self) -> Option<DataSource> {
        if !self.is_available() {
            return None;
        }
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        Some(values.values().cloned().collect())
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationSource for MemorySource {
    fn get(&self, name: &str) -> PropertyValue {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values
            .get(name)
            .map(PropertyValue::from)
            .unwrap_or(PropertyValue::UNDEFINED)
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

#[async_trait]
impl LocalSource for MemorySource {
    async fn read_properties(&self, _timeout: Duration) -> Option<DataSource> {
        self.snapshot()
    }
}

#[async_trait]
impl RemoteSource for MemorySource {
    async fn poll_properties(&self, _timeout: Duration) -> Option<DataSource> {
        self.snapshot()
    }
}
