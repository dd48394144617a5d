//! Integration tests for property resolution through the manager.
//!
//! These tests verify source priority, notifications, chained fallback,
//! tombstones, typed lookups and encrypted values.

use dynprops::logging::{LogLevel, LogLevelFilter, Logger};
use dynprops::sources::{EnvironmentSource, MemorySource};
use dynprops::{
    ChangeKind, ConfigError, DecryptError, ErrorCode, ExecutionMode, MASK, PollingConfig,
    PropertyManager, ServiceIdentity, Settings, Source,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Helper to build settings that never pick up a configuration file from
/// the machine running the tests.
fn test_settings() -> Settings {
    Settings {
        mode: ExecutionMode::Test,
        config_file: Some(PathBuf::from("/nonexistent/dynprops.json")),
        polling: PollingConfig {
            interval_ms: 50,
            source_timeout_ms: 200,
            startup_timeout_ms: 200,
            startup_attempts: 2,
        },
        ..Settings::default()
    }
}

/// Helper to create a manager isolated from the process environment.
fn setup_manager() -> PropertyManager {
    PropertyManager::builder()
        .settings(test_settings())
        .environment(EnvironmentSource::from_vars(Vec::<(String, String)>::new()))
        .build()
}

fn reverse(cipher: &str) -> Result<String, DecryptError> {
    Ok(cipher.chars().rev().collect())
}

#[tokio::test]
async fn remote_source_overrides_local_source() {
    let manager = setup_manager();
    let local = MemorySource::with_label("local");
    local.set("db.host", "localhost");
    local.set("db.port", 5432);
    let remote = MemorySource::with_label("remote");
    remote.set("db.host", "db.internal");

    manager
        .start_polling(vec![Source::local(local), Source::remote(remote)], false)
        .await
        .unwrap();

    assert_eq!(manager.source_labels(), vec!["remote", "local"]);
    let host = manager.get_property::<String>("db.host", None).unwrap();
    assert_eq!(host.value().as_deref(), Some("db.internal"));
    let port = manager.get_property::<u16>("db.port", None).unwrap();
    assert_eq!(port.value(), Some(5432));
    assert!(manager.is_running());
}

#[tokio::test]
async fn set_same_value_does_not_notify() {
    let manager = setup_manager();
    let prop = manager.get_property::<u32>("retries", None).unwrap();
    prop.set(3);

    let mut own = prop.subscribe();
    let mut global = manager.property_changed();

    assert!(!prop.set(3));
    assert!(own.try_recv().is_err());
    assert!(global.try_recv().is_err());

    assert!(prop.set(4));
    let event = own.try_recv().unwrap();
    assert_eq!(event.name, "retries");
    assert_eq!(event.kind, ChangeKind::Updated);
    assert!(own.try_recv().is_err());
    assert_eq!(global.try_recv().unwrap().name, "retries");
    assert!(global.try_recv().is_err());
}

#[tokio::test]
async fn chained_property_follows_first_defined_fallback() {
    let manager = setup_manager();
    let remote = Arc::new(MemorySource::with_label("remote"));
    remote.set("b", "from-b");
    remote.set("c", "from-c");
    manager
        .start_polling(vec![Source::Remote(remote.clone())], false)
        .await
        .unwrap();

    let chained = manager
        .get_chained_property::<String, _, _>("svc.mode", "default".to_string(), ["a", "b", "c"])
        .unwrap();
    assert!(chained.is_chained());
    assert_eq!(chained.fallback_names(), ["svc.mode", "a", "b", "c"]);
    assert_eq!(chained.value().as_deref(), Some("from-b"));
    assert_eq!(chained.active_source().as_deref(), Some("b"));
    assert!(!chained.is_defined());

    let mut changes = chained.subscribe();
    remote.set("a", "from-a");
    let report = manager.poll_now().await.unwrap();
    assert!(report.ok);

    assert_eq!(chained.value().as_deref(), Some("from-a"));
    assert_eq!(chained.active_source().as_deref(), Some("a"));
    assert_eq!(changes.try_recv().unwrap().kind, ChangeKind::Updated);
    assert!(changes.try_recv().is_err());
}

#[tokio::test]
async fn chained_property_prefers_own_override_then_default() {
    let manager = setup_manager();
    let fallback = manager.get_property::<u32>("global.limit", None).unwrap();
    let chained = manager
        .get_chained_property::<u32, _, _>("svc.limit", 10, ["global.limit"])
        .unwrap();
    assert_eq!(chained.value(), Some(10));

    fallback.set(20);
    assert_eq!(chained.value(), Some(20));

    chained.set(30);
    assert_eq!(chained.value(), Some(30));
    assert_eq!(chained.active_source().as_deref(), Some("svc.limit"));

    // Changing a shadowed fallback does not notify the chained property
    let mut changes = chained.subscribe();
    fallback.set(21);
    assert!(changes.try_recv().is_err());
}

#[tokio::test]
async fn chained_property_without_fallbacks_is_rejected() {
    let manager = setup_manager();
    let err = manager
        .get_chained_property::<u32, _, _>("a", None, Vec::<String>::new())
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidChainConfiguration);

    // Its own name alone is not a fallback
    let err = manager
        .get_chained_property::<u32, _, _>("a", None, ["a", " "])
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidChainConfiguration);
    assert!(manager.property_names().is_empty());
}

#[tokio::test]
async fn tombstone_falls_back_to_default() {
    let manager = setup_manager();
    let remote = Arc::new(MemorySource::with_label("remote"));
    remote.set("feature.enabled", true);
    manager
        .start_polling(vec![Source::Remote(remote.clone())], false)
        .await
        .unwrap();

    let feature = manager.get_property::<bool>("feature.enabled", false).unwrap();
    assert!(feature.is_defined());
    assert_eq!(feature.value(), Some(true));

    let mut changes = feature.subscribe();
    remote.remove("feature.enabled");
    manager.poll_now().await.unwrap();

    assert!(!feature.is_defined());
    assert_eq!(feature.value(), Some(false));
    assert_eq!(changes.try_recv().unwrap().kind, ChangeKind::Removed);
    assert_eq!(manager.property_names(), vec!["feature.enabled"]);
}

#[tokio::test]
async fn type_mismatch_is_reported() {
    let manager = setup_manager();
    manager.get_property::<u32>("port", 80).unwrap();

    match manager.get_property::<String>("port", None) {
        Err(ConfigError::TypeMismatch {
            name,
            registered,
            requested,
        }) => {
            assert_eq!(name, "port");
            assert_eq!(registered, "u32");
            assert!(requested.contains("String"));
        }
        other => panic!("expected a type mismatch, got {:?}", other.map(|p| p.name().to_string())),
    }
}

#[tokio::test]
async fn service_property_walks_identity_chain() {
    let manager = setup_manager();
    let remote = Arc::new(MemorySource::with_label("remote"));
    remote.set("timeout", 10);
    remote.set("shop.timeout", 30);
    manager
        .start_polling(vec![Source::Remote(remote.clone())], false)
        .await
        .unwrap();

    let identity = ServiceIdentity::new("orders", "1.0").with_domain("shop");
    let timeout = manager
        .get_service_property::<u32>(&identity, "timeout", 5, Some("create"))
        .unwrap();
    assert_eq!(timeout.name(), "orders.1.0.create.timeout");
    assert_eq!(timeout.value(), Some(30));

    remote.set("orders.create.timeout", 45);
    manager.poll_now().await.unwrap();
    assert_eq!(timeout.value(), Some(45));
    assert_eq!(timeout.active_source().as_deref(), Some("orders.create.timeout"));
}

#[tokio::test]
async fn properties_discovered_by_polling_are_untyped() {
    let manager = setup_manager();
    let remote = Arc::new(MemorySource::with_label("remote"));
    manager
        .start_polling(vec![Source::Remote(remote.clone())], false)
        .await
        .unwrap();

    let mut changes = manager.property_changed();
    remote.set("new.key", "42");
    let report = manager.poll_now().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(changes.try_recv().unwrap().name, "new.key");

    // Strings are decoded as JSON literals for typed requests
    let prop = manager.get_property::<u32>("new.key", None).unwrap();
    assert_eq!(prop.value(), Some(42));
    assert_eq!(manager.property_value::<String>("new.key").as_deref(), Some("42"));
}

#[tokio::test]
async fn reset_disposes_properties_and_sources() {
    let manager = setup_manager();
    let remote = MemorySource::with_label("remote");
    remote.set("a", 1);
    manager
        .start_polling(vec![Source::remote(remote)], false)
        .await
        .unwrap();
    let prop = manager.get_property::<i32>("a", None).unwrap();
    let mut changes = prop.subscribe();

    manager.reset();

    assert_eq!(changes.try_recv().unwrap().kind, ChangeKind::Disposed);
    assert!(manager.property_names().is_empty());
    assert!(manager.source_labels().is_empty());
    assert!(!manager.is_running());
    assert!(!manager.value_in_sources("a").is_defined());

    // The manager stays usable after a reset
    let again = manager.get_property::<i32>("a", 7).unwrap();
    assert_eq!(again.value(), Some(7));
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
    }
}

#[tokio::test]
async fn encrypted_values_are_decrypted_and_masked_in_logs() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let manager = PropertyManager::builder()
        .settings(test_settings())
        .environment(EnvironmentSource::from_vars(Vec::<(String, String)>::new()))
        .decryptor(reverse)
        .build();
    let remote = MemorySource::with_label("remote");
    remote.set_encrypted("db.password", "nialp-2retnuh");
    manager
        .start_polling(vec![Source::remote(remote)], false)
        .await
        .unwrap();

    let password = manager.get_property::<String>("db.password", None).unwrap();
    assert_eq!(password.value().as_deref(), Some("hunter2-plain"));
    assert!(password.is_encrypted());
    assert_eq!(password.to_string(), format!("db.password={}", MASK));
    assert!(manager.value_in_sources("db.password").is_encrypted());

    let output = logs.contents();
    assert!(output.contains("db.password"));
    assert!(output.contains(MASK));
    assert!(!output.contains("hunter2-plain"));
}

#[tokio::test]
async fn startup_retry_messages_respect_logger_level() {
    let logs = LogBuffer::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let logger = Logger::new()
        .with_name("config")
        .with_level_filter(Arc::new(LogLevelFilter::new(LogLevel::Warning)));
    let manager = PropertyManager::builder()
        .settings(Settings {
            mode: ExecutionMode::Development,
            ..test_settings()
        })
        .environment(EnvironmentSource::from_vars(Vec::<(String, String)>::new()))
        .logger(logger)
        .build();
    let remote = MemorySource::with_label("offline");
    remote.set_available(false);

    let outcome = manager
        .start_polling(vec![Source::remote(remote)], false)
        .await
        .unwrap();

    assert!(outcome.is_degraded());
    let output = logs.contents();
    assert!(output.contains("Some dynamic properties sources failed (offline), retry polling"));
    assert!(output.contains("Continuing with cached values"));
    assert!(!output.contains("Startup attempt 1 of 2 failed"));
}

#[tokio::test]
async fn chained_property_masks_encrypted_fallback() {
    let manager = PropertyManager::builder()
        .settings(test_settings())
        .environment(EnvironmentSource::from_vars(Vec::<(String, String)>::new()))
        .decryptor(reverse)
        .build();
    let remote = Arc::new(MemorySource::with_label("remote"));
    remote.set_encrypted("db.password", "terces-nialp");
    manager
        .start_polling(vec![Source::Remote(remote.clone())], false)
        .await
        .unwrap();

    let chained = manager
        .get_chained_property::<String, _, _>("svc.db.password", None, ["db.password"])
        .unwrap();
    assert_eq!(chained.value().as_deref(), Some("plain-secret"));
    assert!(chained.is_encrypted());
    assert_eq!(chained.to_string(), format!("svc.db.password={}", MASK));
    assert!(!format!("{:?}", chained).contains("plain-secret"));

    // A plain own override is shown again
    chained.set("visible".to_string());
    assert!(!chained.is_encrypted());
    assert_eq!(chained.to_string(), "svc.db.password=visible");
}

#[tokio::test]
async fn failed_decryption_keeps_property_undefined() {
    let manager = PropertyManager::builder()
        .settings(test_settings())
        .environment(EnvironmentSource::from_vars(Vec::<(String, String)>::new()))
        .decryptor(|_: &str| -> Result<String, DecryptError> { Err(DecryptError::new("wrong key")) })
        .build();
    let remote = MemorySource::with_label("remote");
    remote.set_encrypted("api.token", "garbage");
    remote.set("api.url", "https://api");
    let outcome = manager
        .start_polling(vec![Source::remote(remote)], false)
        .await
        .unwrap();

    assert_eq!(outcome.report().applied, 1);
    let token = manager.get_property::<String>("api.token", None).unwrap();
    assert!(!token.is_defined());
    let url = manager.get_property::<String>("api.url", None).unwrap();
    assert_eq!(url.value().as_deref(), Some("https://api"));
}

#[tokio::test]
async fn environment_value_becomes_default() {
    let manager = PropertyManager::builder()
        .settings(test_settings())
        .environment(EnvironmentSource::from_vars([("CACHE_MAX_ENTRIES", "512")]))
        .build();

    let entries = manager.get_property::<u32>("cache.maxEntries", 100).unwrap();
    assert_eq!(entries.value(), Some(512));
    assert!(!entries.is_defined());
}
