//! Environment variable source with name mangling.
//!
//! A property name is looked up, in order, as:
//! 1. the exact name (`db.maxPool`)
//! 2. dots replaced by underscores (`db_maxPool`)
//! 3. upper-cased with underscores (`DB_MAXPOOL`)
//! 4. camelCase split into upper snake case (`DB_MAX_POOL`)
//! 5. a secret file `<secrets_dir>/<name>`

use super::{ConfigurationSource, LocalSource};
use crate::types::{DataSource, PropertyValue};
use async_trait::async_trait;
use heck::ToShoutySnakeCase;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

pub struct EnvironmentSource {
    lookup: Lookup,
    secrets_dir: Option<PathBuf>,
    cache: Mutex<HashMap<String, PropertyValue>>,
}

impl EnvironmentSource {
    /// Source backed by the process environment and `/run/secrets`.
    pub fn new() -> Self {
        Self::with_lookup(|name| std::env::var(name).ok())
            .with_secrets_dir(Some(PathBuf::from("/run/secrets")))
    }

    /// Source backed by an arbitrary lookup function and no secrets directory.
    pub fn with_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        Self {
            lookup: Box::new(lookup),
            secrets_dir: None,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Source backed by a fixed set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        Self::with_lookup(move |name| vars.get(name).cloned())
    }

    pub fn with_secrets_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.secrets_dir = dir;
        self
    }

    /// Variable names tried for `name`, in order, without duplicates.
    pub fn candidate_names(name: &str) -> Vec<String> {
        let mut names: Vec<String> = Vec::with_capacity(4);
        for candidate in [
            name.to_string(),
            name.replace('.', "_"),
            name.to_uppercase().replace('.', "_"),
            name.to_shouty_snake_case(),
        ] {
            if !candidate.is_empty() && !names.contains(&candidate) {
                names.push(candidate);
            }
        }
        names
    }

    fn resolve(&self, name: &str) -> Option<String> {
        for candidate in Self::candidate_names(name) {
            if let Some(value) = (self.lookup)(&candidate) {
                debug!(property = %name, variable = %candidate, "Resolved property from environment");
                return Some(value);
            }
        }
        self.read_secret(name)
    }

    fn read_secret(&self, name: &str) -> Option<String> {
        let dir = self.secrets_dir.as_ref()?;
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return None;
        }
        let content = std::fs::read_to_string(dir.join(name)).ok()?;
        debug!(property = %name, "Resolved property from secret file");
        Some(content.trim_end_matches(['\r', '\n']).to_string())
    }
}

impl Default for EnvironmentSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigurationSource for EnvironmentSource {
    fn get(&self, name: &str) -> PropertyValue {
        let mut cache = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = cache.get(name) {
            return value.clone();
        }
        let value = self
            .resolve(name)
            .map(PropertyValue::new)
            .unwrap_or(PropertyValue::UNDEFINED);
        cache.insert(name.to_string(), value.clone());
        value
    }

    fn label(&self) -> String {
        "environment".to_string()
    }
}

#[async_trait]
impl LocalSource for EnvironmentSource {
    /// The environment cannot be enumerated by property name; values are
    /// only available through point lookups.
    async fn read_properties(&self, _timeout: Duration) -> Option<DataSource> {
        Some(DataSource::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_candidate_names() {
        assert_eq!(
            EnvironmentSource::candidate_names("db.maxPool"),
            vec!["db.maxPool", "db_maxPool", "DB_MAXPOOL", "DB_MAX_POOL"]
        );
        assert_eq!(
            EnvironmentSource::candidate_names("PORT"),
            vec!["PORT"]
        );
    }

    #[test]
    fn test_lookup_order() {
        let source = EnvironmentSource::from_vars([("db_host", "exact-ish"), ("DB_HOST", "upper")]);
        assert_eq!(source.get("db.host").raw(), Some(&json!("exact-ish")));
    }

    #[test]
    fn test_camel_case_to_upper_snake() {
        let source = EnvironmentSource::from_vars([("SERVICE_MAX_RETRIES", "5")]);
        let value = source.get("service.maxRetries");
        assert_eq!(value.get::<u32>(), Some(5));
    }

    #[test]
    fn test_missing_is_undefined() {
        let source = EnvironmentSource::from_vars(Vec::<(String, String)>::new());
        assert!(!source.get("nothing.here").is_defined());
    }

    #[test]
    fn test_secret_file_fallback() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("db.password"), "s3cret\n").unwrap();

        let source = EnvironmentSource::from_vars(Vec::<(String, String)>::new())
            .with_secrets_dir(Some(dir.path().to_path_buf()));
        assert_eq!(source.get("db.password").raw(), Some(&json!("s3cret")));
        assert!(!source.get("../db.password").is_defined());
    }
}
