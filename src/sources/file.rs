//! Local configuration file source.

use super::flatten::flatten_items;
use super::{ConfigurationSource, LocalSource};
use crate::error::SourceError;
use crate::types::{ConfigurationItem, DataSource, PropertyValue};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::{debug, info, warn};

const KEY_VALUE_PATTERN: &str = r"^\s*([\w$][\w.\-$]*)\s*=\s*(.*)$";

/// On-disk layout of a configuration file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileFormat {
    /// JSON object, nested objects flattened with `.`.
    #[default]
    Json,
    /// JSON document whose properties live under a top-level `config` object.
    Manifest,
    /// YAML, same rules as JSON.
    Yaml,
    /// `name = value` lines.
    KeyValue,
}

impl FileFormat {
    /// Infer the format from the file name.
    pub fn from_path(path: &Path) -> Self {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if file_name.ends_with(".manifest.json") || file_name == "manifest.json" {
            return FileFormat::Manifest;
        }
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml" | "yml") => FileFormat::Yaml,
            Some("ini" | "properties" | "env" | "conf" | "cfg") => FileFormat::KeyValue,
            _ => FileFormat::Json,
        }
    }

    /// Parse `content` into items plus descriptions of skipped entries.
    pub fn parse(&self, content: &str) -> Result<(Vec<ConfigurationItem>, Vec<String>), SourceError> {
        match self {
            FileFormat::Json => {
                let doc: Value = serde_json::from_str(content)
                    .map_err(|e| SourceError::malformed(e.to_string()))?;
                object_items(&doc)
            }
            FileFormat::Manifest => {
                let doc: Value = serde_json::from_str(content)
                    .map_err(|e| SourceError::malformed(e.to_string()))?;
                match doc.get("config") {
                    Some(config) => object_items(config),
                    None => Ok((Vec::new(), Vec::new())),
                }
            }
            FileFormat::Yaml => {
                let doc: Value = serde_yaml::from_str(content)
                    .map_err(|e| SourceError::malformed(e.to_string()))?;
                // An empty YAML file deserializes to null
                if doc.is_null() {
                    return Ok((Vec::new(), Vec::new()));
                }
                object_items(&doc)
            }
            FileFormat::KeyValue => parse_key_values(content),
        }
    }
}

fn object_items(doc: &Value) -> Result<(Vec<ConfigurationItem>, Vec<String>), SourceError> {
    if !doc.is_object() {
        return Err(SourceError::malformed("top-level value must be an object"));
    }
    Ok(flatten_items(doc))
}

fn parse_key_values(content: &str) -> Result<(Vec<ConfigurationItem>, Vec<String>), SourceError> {
    let re = regex_lite::Regex::new(KEY_VALUE_PATTERN)
        .map_err(|e| SourceError::malformed(e.to_string()))?;

    let mut items = Vec::new();
    let mut skipped = Vec::new();
    for (index, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            continue;
        }
        let Some(caps) = re.captures(line) else {
            skipped.push(format!("line {}: expected 'name = value'", index + 1));
            continue;
        };

        let key = caps[1].to_string();
        let mut value = caps[2].trim();
        let encrypted = value.starts_with('!');
        if encrypted {
            value = value[1..].trim_start();
        }
        if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
            value = &value[1..value.len() - 1];
        }

        items.push(if encrypted {
            ConfigurationItem::encrypted(key, value)
        } else {
            ConfigurationItem::new(key, value)
        });
    }
    Ok((items, skipped))
}

/// Configuration file read once at startup.
///
/// A path that does not exist disables the source: reads succeed with no
/// items and every lookup is undefined.
pub struct FileSource {
    path: PathBuf,
    format: FileFormat,
    values: RwLock<HashMap<String, ConfigurationItem>>,
}

impl FileSource {
    /// File source with the format inferred from the extension.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = FileFormat::from_path(&path);
        Self::with_format(path, format)
    }

    pub fn with_format(path: impl Into<PathBuf>, format: FileFormat) -> Self {
        Self {
            path: path.into(),
            format,
            values: RwLock::new(HashMap::new()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn format(&self) -> FileFormat {
        self.format
    }

    async fn load(&self, timeout: Duration) -> Result<Option<DataSource>, SourceError> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "Configuration file not found, source disabled");
            return Ok(Some(DataSource::default()));
        }

        let content = tokio::time::timeout(timeout, tokio::fs::read_to_string(&self.path))
            .await
            .map_err(|_| SourceError::Timeout(timeout))?
            .map_err(|source| SourceError::Io {
                path: self.path.clone(),
                source,
            })?;

        let (items, skipped) = self.format.parse(&content)?;
        for reason in &skipped {
            warn!(path = %self.path.display(), "Skipping malformed entry {}", reason);
        }

        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        values.clear();
        for item in &items {
            values.insert(item.key.clone(), item.clone());
        }
        debug!(path = %self.path.display(), count = items.len(), "Loaded configuration file");
        Ok(Some(DataSource::new(items)))
    }
}

impl ConfigurationSource for FileSource {
    fn get(&self, name: &str) -> PropertyValue {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values
            .get(name)
            .map(PropertyValue::from)
            .unwrap_or(PropertyValue::UNDEFINED)
    }

    fn label(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

#[async_trait]
impl LocalSource for FileSource {
    async fn read_properties(&self, timeout: Duration) -> Option<DataSource> {
        match self.load(timeout).await {
            Ok(data) => data,
            Err(e) => {
                warn!(path = %self.path.display(), code = ?e.code(), "Cannot read configuration file: {}", e);
                None
            }
        }
    }
}
