//! Core value types shared by sources, the priority chain and properties.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Placeholder printed instead of encrypted values.
pub const MASK: &str = "********";

/// Result of a point lookup: either undefined or a raw JSON value.
///
/// A present `null`, `false` or `0` is defined; only [`PropertyValue::UNDEFINED`]
/// means "no value found".
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PropertyValue {
    raw: Option<Value>,
    encrypted: bool,
}

impl PropertyValue {
    pub const UNDEFINED: PropertyValue = PropertyValue {
        raw: None,
        encrypted: false,
    };

    pub fn new(raw: impl Into<Value>) -> Self {
        Self {
            raw: Some(raw.into()),
            encrypted: false,
        }
    }

    /// A defined value still holding its cipher text.
    pub fn encrypted(raw: impl Into<Value>) -> Self {
        Self {
            raw: Some(raw.into()),
            encrypted: true,
        }
    }

    pub fn is_defined(&self) -> bool {
        self.raw.is_some()
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    pub fn raw(&self) -> Option<&Value> {
        self.raw.as_ref()
    }

    pub fn into_raw(self) -> Option<Value> {
        self.raw
    }

    /// Decode the raw value into `T`. See [`coerce`].
    pub fn get<T: DeserializeOwned>(&self) -> Option<T> {
        self.raw.as_ref().and_then(coerce)
    }

    /// Printable form with encrypted values masked.
    pub fn masked(&self) -> String {
        match &self.raw {
            None => "<undefined>".to_string(),
            Some(_) if self.encrypted => MASK.to_string(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

impl From<&ConfigurationItem> for PropertyValue {
    fn from(item: &ConfigurationItem) -> Self {
        if item.deleted {
            return PropertyValue::UNDEFINED;
        }
        PropertyValue {
            raw: Some(item.value.clone()),
            encrypted: item.encrypted,
        }
    }
}

/// Decode a JSON value into `T`.
///
/// Strings are also tried as JSON literals, so an environment value `"42"`
/// satisfies a `u32` property and `"true"` a `bool` one.
pub fn coerce<T: DeserializeOwned>(value: &Value) -> Option<T> {
    if let Ok(decoded) = serde_json::from_value::<T>(value.clone()) {
        return Some(decoded);
    }
    match value {
        Value::String(s) => serde_json::from_str::<T>(s.trim()).ok(),
        _ => None,
    }
}

/// A single key delivered by a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigurationItem {
    pub key: String,
    #[serde(default)]
    pub value: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update: Option<String>,
    #[serde(default)]
    pub encrypted: bool,
    /// Tombstone: the key should be treated as undefined from now on.
    #[serde(default)]
    pub deleted: bool,
}

impl ConfigurationItem {
    pub fn new(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            last_update: None,
            encrypted: false,
            deleted: false,
        }
    }

    pub fn encrypted(key: impl Into<String>, cipher_text: impl Into<String>) -> Self {
        Self {
            encrypted: true,
            ..Self::new(key, Value::String(cipher_text.into()))
        }
    }

    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            deleted: true,
            ..Self::new(key, Value::Null)
        }
    }

    pub fn with_last_update(mut self, last_update: impl Into<String>) -> Self {
        self.last_update = Some(last_update.into());
        self
    }

    /// Printable value with encrypted values masked.
    pub fn masked_value(&self) -> String {
        PropertyValue::from(self).masked()
    }
}

/// Result of a successful read or poll of a source.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DataSource {
    items: Vec<ConfigurationItem>,
}

impl DataSource {
    pub fn new(items: Vec<ConfigurationItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[ConfigurationItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<ConfigurationItem> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<ConfigurationItem> for DataSource {
    fn from_iter<I: IntoIterator<Item = ConfigurationItem>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
