//! Settings for the property manager.
//!
//! ## Environment Variables
//! - `DYNPROPS_SETTINGS_PATH` - Explicit settings file (YAML)
//! - `DYNPROPS_MODE` - `production`, `development` or `test`
//! - `DYNPROPS_POLLING_INTERVAL_MS` - Interval between poll cycles
//! - `DYNPROPS_SOURCE_TIMEOUT_MS` - Per-source timeout of a poll cycle
//! - `DYNPROPS_CONFIG_FILE` - Local configuration file read at startup
//! - `DYNPROPS_SECRETS_DIR` - Directory holding secret files

use crate::error::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Local configuration file added to every `start_polling` call.
    #[serde(default)]
    pub config_file: Option<PathBuf>,

    #[serde(default = "default_secrets_dir")]
    pub secrets_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            polling: PollingConfig::default(),
            mode: ExecutionMode::default(),
            config_file: None,
            secrets_dir: default_secrets_dir(),
        }
    }
}

/// Polling and timeout configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Delay between the end of one poll cycle and the start of the next.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// Timeout granted to each remote source during a steady-state cycle.
    #[serde(default = "default_source_timeout_ms")]
    pub source_timeout_ms: u64,

    /// Timeout granted to each remote source during startup attempts.
    #[serde(default = "default_startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    #[serde(default = "default_startup_attempts")]
    pub startup_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            source_timeout_ms: default_source_timeout_ms(),
            startup_timeout_ms: default_startup_timeout_ms(),
            startup_attempts: default_startup_attempts(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

fn default_interval_ms() -> u64 {
    60_000
}

fn default_source_timeout_ms() -> u64 {
    1_500
}

fn default_startup_timeout_ms() -> u64 {
    3_000
}

fn default_startup_attempts() -> u32 {
    2
}

fn default_secrets_dir() -> PathBuf {
    PathBuf::from("/run/secrets")
}

/// Execution mode of the hosting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Unreachable sources at startup are fatal.
    #[default]
    Production,
    /// Unreachable sources at startup degrade to cached values.
    Development,
    Test,
}

impl ExecutionMode {
    pub fn is_development(&self) -> bool {
        matches!(self, ExecutionMode::Development)
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "production" | "prod" => Some(ExecutionMode::Production),
            "development" | "dev" | "local" => Some(ExecutionMode::Development),
            "test" => Some(ExecutionMode::Test),
            _ => None,
        }
    }
}

impl Settings {
    /// Load settings from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::invalid_settings(path, e))?;
        serde_yaml::from_str(&content).map_err(|e| ConfigError::invalid_settings(path, e))
    }

    /// Load from `DYNPROPS_SETTINGS_PATH` when set, otherwise defaults, then
    /// apply environment overrides.
    pub fn load_or_default() -> ConfigResult<Self> {
        let mut settings = match std::env::var("DYNPROPS_SETTINGS_PATH") {
            Ok(path) => Self::load(path)?,
            Err(_) => Self::default(),
        };
        settings.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(settings)
    }

    /// Apply `DYNPROPS_*` overrides read through `lookup`.
    ///
    /// Unparseable numbers are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(mode) = lookup("DYNPROPS_MODE").and_then(|m| ExecutionMode::parse(&m)) {
            self.mode = mode;
        }

        if let Some(interval) = lookup("DYNPROPS_POLLING_INTERVAL_MS") {
            if let Ok(interval) = interval.parse() {
                self.polling.interval_ms = interval;
            }
        }

        if let Some(timeout) = lookup("DYNPROPS_SOURCE_TIMEOUT_MS") {
            if let Ok(timeout) = timeout.parse() {
                self.polling.source_timeout_ms = timeout;
            }
        }

        if let Some(path) = lookup("DYNPROPS_CONFIG_FILE") {
            self.config_file = Some(PathBuf::from(path));
        }

        if let Some(dir) = lookup("DYNPROPS_SECRETS_DIR") {
            self.secrets_dir = PathBuf::from(dir);
        }
    }

    /// The local configuration file to read at startup, if one exists.
    ///
    /// Checks `config_file`, then `./dynprops.json`, then
    /// `~/.dynprops/config.json`.
    pub fn resolve_config_file(&self) -> Option<PathBuf> {
        if let Some(ref path) = self.config_file {
            return path.exists().then(|| path.clone());
        }

        let local = PathBuf::from("dynprops.json");
        if local.exists() {
            return Some(local);
        }

        dirs::home_dir()
            .map(|home| home.join(".dynprops").join("config.json"))
            .filter(|path| path.exists())
    }
}
