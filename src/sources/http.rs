//! Remote source polling a JSON endpoint over HTTP.
//!
//! Expected payloads:
//! - `{"value": {"db.url": "postgres://...", "db.password": {"value": "...", "encrypted": true}}}`
//! - `{"value": [{"key": "db.url", "value": "postgres://..."}]}`
//! - `{"error": {"message": "..."}}` reports a failure
//!
//! After the first successful poll every request carries
//! `lastUpdate=<rfc3339>` so the endpoint can answer with a delta.

use super::flatten::flatten_items;
use super::{ConfigurationSource, RemoteSource};
use crate::error::SourceError;
use crate::types::{ConfigurationItem, DataSource, PropertyValue};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct HttpSource {
    uri: String,
    client: reqwest::Client,
    api_key: Option<String>,
    last_update: Mutex<Option<String>>,
    values: RwLock<HashMap<String, ConfigurationItem>>,
}

impl HttpSource {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            client: reqwest::Client::new(),
            api_key: None,
            last_update: Mutex::new(None),
            values: RwLock::new(HashMap::new()),
        }
    }

    /// Send `Authorization: ApiKey <token>` with every request.
    pub fn with_api_key(mut self, token: impl Into<String>) -> Self {
        self.api_key = Some(token.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Timestamp of the last successful poll, if any.
    pub fn last_update(&self) -> Option<String> {
        self.last_update
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn request_url(&self) -> String {
        match self.last_update() {
            Some(stamp) => {
                let separator = if self.uri.contains('?') { '&' } else { '?' };
                format!(
                    "{}{}lastUpdate={}",
                    self.uri,
                    separator,
                    urlencoding::encode(&stamp)
                )
            }
            None => self.uri.clone(),
        }
    }

    async fn fetch(&self, timeout: Duration) -> Result<Vec<ConfigurationItem>, SourceError> {
        let url = self.request_url();
        let started = chrono::Utc::now().to_rfc3339();

        let mut request = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .timeout(timeout);
        if let Some(ref key) = self.api_key {
            request = request.header(AUTHORIZATION, format!("ApiKey {}", key));
        }

        let response = request.send().await?;
        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(_) if !status.is_success() => {
                return Err(SourceError::Remote(format!("HTTP {}", status)));
            }
            Err(e) => return Err(SourceError::malformed(e.to_string())),
        };

        let (items, skipped) = parse_payload(&body)?;
        if !status.is_success() {
            return Err(SourceError::Remote(format!("HTTP {}", status)));
        }
        for reason in &skipped {
            warn!(source = %self.uri, "Skipping malformed item {}", reason);
        }

        self.merge_changes(&items);
        *self.last_update.lock().unwrap_or_else(|e| e.into_inner()) = Some(started);
        Ok(items)
    }

    fn merge_changes(&self, items: &[ConfigurationItem]) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        for item in items {
            if item.deleted {
                values.remove(&item.key);
            } else {
                values.insert(item.key.clone(), item.clone());
            }
        }
    }
}

/// Decode a response body into items and descriptions of skipped entries.
pub(crate) fn parse_payload(
    body: &Value,
) -> Result<(Vec<ConfigurationItem>, Vec<String>), SourceError> {
    if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(SourceError::Remote(message));
    }

    match body.get("value") {
        None | Some(Value::Null) => Ok((Vec::new(), Vec::new())),
        Some(map @ Value::Object(_)) => Ok(flatten_items(map)),
        Some(Value::Array(entries)) => {
            let mut items = Vec::with_capacity(entries.len());
            let mut skipped = Vec::new();
            for (index, entry) in entries.iter().enumerate() {
                match serde_json::from_value::<ConfigurationItem>(entry.clone()) {
                    Ok(item) if item.encrypted && !item.value.is_string() => {
                        skipped.push(format!("{}: encrypted values must be strings", item.key));
                    }
                    Ok(item) => items.push(item),
                    Err(e) => skipped.push(format!("entry {}: {}", index, e)),
                }
            }
            Ok((items, skipped))
        }
        Some(other) => Err(SourceError::malformed(format!(
            "'value' must be an object or an array, got {}",
            other
        ))),
    }
}

impl ConfigurationSource for HttpSource {
    fn get(&self, name: &str) -> PropertyValue {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values
            .get(name)
            .map(PropertyValue::from)
            .unwrap_or(PropertyValue::UNDEFINED)
    }

    fn label(&self) -> String {
        self.uri.clone()
    }
}

#[async_trait]
impl RemoteSource for HttpSource {
    async fn poll_properties(&self, timeout: Duration) -> Option<DataSource> {
        match self.fetch(timeout).await {
            Ok(items) => {
                debug!(source = %self.uri, count = items.len(), "Polled remote properties");
                Some(DataSource::new(items))
            }
            Err(e) => {
                info!(source = %self.uri, code = ?e.code(), "Error when polling properties: {}", e);
                None
            }
        }
    }
}
