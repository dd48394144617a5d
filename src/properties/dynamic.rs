//! Typed view over a registry cell.

use super::cell::PropertyCell;
use crate::events::PropertyChanged;
use crate::types::coerce;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// Types a property can be requested as.
pub trait PropertyType: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> PropertyType for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// A named, live configuration value.
///
/// Handles are cheap to clone; every handle for the same name shares the
/// same registry entry. After [`crate::PropertyManager::reset`] a handle
/// keeps answering with its last state but no longer receives updates.
pub struct DynamicProperty<T> {
    cell: Arc<PropertyCell>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: PropertyType> DynamicProperty<T> {
    pub(crate) fn new(cell: Arc<PropertyCell>) -> Self {
        Self {
            cell,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        self.cell.name()
    }

    /// Current value, or the default when the property is undefined or its
    /// value cannot be decoded as `T`.
    pub fn value(&self) -> Option<T> {
        self.cell
            .current()
            .as_ref()
            .and_then(coerce::<T>)
            .or_else(|| self.cell.default_value().as_ref().and_then(coerce::<T>))
    }

    pub fn value_or(&self, fallback: T) -> T {
        self.value().unwrap_or(fallback)
    }

    /// Raw JSON value, before decoding.
    pub fn raw_value(&self) -> Option<serde_json::Value> {
        self.cell.current()
    }

    /// Whether the property holds its own value, set locally or delivered by
    /// a source. Defaults and chained fallbacks do not count.
    pub fn is_defined(&self) -> bool {
        self.cell.is_defined()
    }

    /// Whether the current value was decrypted from an encrypted source
    /// item, either the own value or the active fallback's.
    pub fn is_encrypted(&self) -> bool {
        self.cell.is_encrypted()
    }

    /// Override the value locally until a source delivers a new one.
    ///
    /// Setting the current value again sends no notification.
    pub fn set(&self, value: T) -> bool {
        match serde_json::to_value(&value) {
            Ok(value) => self.cell.set(value),
            Err(e) => {
                warn!(property = %self.name(), "Cannot store property value: {}", e);
                false
            }
        }
    }

    /// Changes of this property only.
    pub fn subscribe(&self) -> broadcast::Receiver<PropertyChanged> {
        self.cell.subscribe()
    }

    pub fn is_chained(&self) -> bool {
        self.cell.is_chained()
    }

    /// Name of the fallback currently providing the value of a chained
    /// property.
    pub fn active_source(&self) -> Option<String> {
        self.cell.active_source()
    }

    /// Fallback names in resolution order, own name first. Empty for a
    /// plain property.
    pub fn fallback_names(&self) -> &[String] {
        self.cell.fallback_names()
    }
}

impl<T> Clone for DynamicProperty<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: PropertyType> fmt::Display for DynamicProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name(), self.cell.masked())
    }
}

impl<T: PropertyType> fmt::Debug for DynamicProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicProperty")
            .field("name", &self.name())
            .field("type", &std::any::type_name::<T>())
            .field("defined", &self.is_defined())
            .field("value", &self.cell.masked())
            .field("fallbacks", &self.fallback_names())
            .finish()
    }
}
