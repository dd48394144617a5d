//! Property manager: registry, priority chain, change bus and polling.
//!
//! ```no_run
//! use dynprops::{PropertyManager, Source};
//! use dynprops::sources::HttpSource;
//!
//! # async fn run() -> dynprops::ConfigResult<()> {
//! let manager = PropertyManager::new();
//! manager
//!     .start_polling(vec![Source::remote(HttpSource::new("http://config.local/props"))], true)
//!     .await?;
//!
//! let timeout = manager.get_property::<u64>("http.timeoutMs", 500)?;
//! println!("timeout = {:?}", timeout.value());
//! # Ok(())
//! # }
//! ```

mod polling;

pub use polling::PollReport;

use crate::chain::PriorityChain;
use crate::config::Settings;
use crate::crypto::Decryptor;
use crate::error::{ConfigError, ConfigResult};
use crate::events::{ChangeBus, ChangeKind, ChangeListener, PropertyChanged};
use crate::identity::ServiceIdentity;
use crate::logging::Logger;
use crate::properties::{
    ChainLink, DynamicProperty, PropertyCell, PropertyResolver, PropertyType, fallback_chain,
};
use crate::sources::{
    ConfigurationSource, EnvironmentSource, FileSource, RemoteSource, Source,
};
use crate::types::{ConfigurationItem, PropertyValue, coerce};
use arc_swap::ArcSwap;
use polling::PollerHandle;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const BUS_CAPACITY: usize = 1024;

/// Result of [`PropertyManager::start_polling`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "report", rename_all = "snake_case")]
pub enum StartupOutcome {
    /// Every remote source answered during startup.
    Synchronized(PollReport),
    /// Development mode only: some remote sources never answered. Cached and
    /// local values are served and no repeating poll is armed.
    Degraded(PollReport),
}

impl StartupOutcome {
    pub fn report(&self) -> &PollReport {
        match self {
            StartupOutcome::Synchronized(report) | StartupOutcome::Degraded(report) => report,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, StartupOutcome::Degraded(_))
    }
}

/// Builder for [`PropertyManager`].
#[derive(Default)]
pub struct PropertyManagerBuilder {
    settings: Option<Settings>,
    decryptor: Option<Arc<dyn Decryptor>>,
    environment: Option<Arc<dyn ConfigurationSource>>,
    logger: Option<Logger>,
}

impl PropertyManagerBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn decryptor(mut self, decryptor: impl Decryptor + 'static) -> Self {
        self.decryptor = Some(Arc::new(decryptor));
        self
    }

    /// Source consulted for the default of a newly requested property.
    /// Defaults to the process environment.
    pub fn environment(mut self, environment: impl ConfigurationSource + 'static) -> Self {
        self.environment = Some(Arc::new(environment));
        self
    }

    pub fn logger(mut self, logger: Logger) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn build(self) -> PropertyManager {
        let settings = self.settings.unwrap_or_default();
        let environment = self.environment.unwrap_or_else(|| {
            Arc::new(
                EnvironmentSource::new().with_secrets_dir(Some(settings.secrets_dir.clone())),
            )
        });
        PropertyManager {
            inner: Arc::new(ManagerInner {
                settings: RwLock::new(settings),
                registry: RwLock::new(HashMap::new()),
                chain: ArcSwap::from_pointee(PriorityChain::new()),
                bus: Arc::new(ChangeBus::new(BUS_CAPACITY)),
                environment,
                decryptor: self.decryptor,
                logger: self.logger.unwrap_or_else(|| Logger::new().with_name("config")),
                poller: Mutex::new(None),
                poll_lock: tokio::sync::Mutex::new(()),
                running: AtomicBool::new(false),
                disposed: AtomicBool::new(false),
            }),
        }
    }
}

/// Owner of all dynamic properties.
///
/// Cloning is cheap and every clone shares the same state.
#[derive(Clone)]
pub struct PropertyManager {
    inner: Arc<ManagerInner>,
}

pub(crate) struct ManagerInner {
    settings: RwLock<Settings>,
    registry: RwLock<HashMap<String, Arc<PropertyCell>>>,
    chain: ArcSwap<PriorityChain>,
    bus: Arc<ChangeBus>,
    environment: Arc<dyn ConfigurationSource>,
    decryptor: Option<Arc<dyn Decryptor>>,
    logger: Logger,
    poller: Mutex<Option<PollerHandle>>,
    /// Serializes poll cycles.
    poll_lock: tokio::sync::Mutex<()>,
    running: AtomicBool,
    disposed: AtomicBool,
}

impl PropertyManager {
    /// Manager with default settings reading defaults from the process
    /// environment.
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn with_settings(settings: Settings) -> Self {
        Self::builder().settings(settings).build()
    }

    pub fn builder() -> PropertyManagerBuilder {
        PropertyManagerBuilder::default()
    }

    pub fn settings(&self) -> Settings {
        self.inner.settings()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    /// Every change published by any property.
    pub fn property_changed(&self) -> broadcast::Receiver<PropertyChanged> {
        self.inner.bus.subscribe()
    }

    /// Property `name`, created on first request.
    ///
    /// A new property takes its default from the environment when a variable
    /// matches the name, otherwise from `default`, and is seeded from the
    /// priority chain. Requesting the same name again returns the same
    /// property; requesting it as another type fails with
    /// [`ConfigError::TypeMismatch`].
    pub fn get_property<T: PropertyType>(
        &self,
        name: &str,
        default: impl Into<Option<T>>,
    ) -> ConfigResult<DynamicProperty<T>> {
        self.inner.ensure_live()?;
        let cell = self.inner.obtain::<T>(name, to_json(name, default.into()))?;
        Ok(DynamicProperty::new(cell))
    }

    /// Property `name` falling back to `fallbacks` in order.
    ///
    /// Its value is its own value when defined, otherwise the value of the
    /// first fallback property that is defined, otherwise `default`.
    ///
    /// At least one fallback other than `name` itself is required: a blank
    /// name, or fallbacks that are all blank or equal to `name`, fail with
    /// [`ConfigError::InvalidChain`]. Use [`get_property`](Self::get_property)
    /// for a property without fallbacks.
    pub fn get_chained_property<T, I, S>(
        &self,
        name: &str,
        default: impl Into<Option<T>>,
        fallbacks: I,
    ) -> ConfigResult<DynamicProperty<T>>
    where
        T: PropertyType,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.inner.ensure_live()?;
        let names = fallback_chain(name, fallbacks);
        if name.trim().is_empty() || names.len() < 2 {
            return Err(ConfigError::invalid_chain(name));
        }

        let cell = self.inner.obtain::<T>(name, to_json(name, default.into()))?;
        let resolver: Weak<dyn PropertyResolver> = Arc::downgrade(&self.inner) as Weak<dyn PropertyResolver>;
        if cell.attach_chain(ChainLink::new(names, resolver)) {
            let listener: Weak<dyn ChangeListener> = Arc::downgrade(&cell) as Weak<dyn ChangeListener>;
            self.inner.bus.register(listener);
            cell.recompute(false);
        } else {
            debug!(property = %name, fallbacks = ?cell.fallback_names(), "Chained property already registered, keeping its fallbacks");
        }
        Ok(DynamicProperty::new(cell))
    }

    /// Property resolved through the service name chain, most specific
    /// first. See [`ServiceIdentity::property_chain`].
    pub fn get_service_property<T: PropertyType>(
        &self,
        identity: &ServiceIdentity,
        name: &str,
        default: impl Into<Option<T>>,
        command: Option<&str>,
    ) -> ConfigResult<DynamicProperty<T>> {
        let mut names = identity.property_chain(name, command).into_iter();
        let Some(primary) = names.next() else {
            return Err(ConfigError::invalid_chain(name));
        };
        self.get_chained_property(&primary, default, names)
    }

    /// Current value of `name` without registering a typed property.
    pub fn property_value<T: DeserializeOwned>(&self, name: &str) -> Option<T> {
        if let Some(cell) = self.inner.lookup(name) {
            return cell.current().as_ref().and_then(coerce::<T>);
        }
        let value = self.inner.chain.load().get(name);
        let cell = PropertyCell::new(name, None, self.inner.bus.clone());
        cell.apply(&value, self.inner.decryptor.as_deref());
        cell.current().as_ref().and_then(coerce::<T>)
    }

    /// Raw lookup in the priority chain. Encrypted values stay encrypted.
    pub fn value_in_sources(&self, name: &str) -> PropertyValue {
        self.inner.chain.load().get(name)
    }

    /// Names of all registered properties, sorted.
    pub fn property_names(&self) -> Vec<String> {
        let registry = self.inner.registry.read().unwrap_or_else(|e| e.into_inner());
        let mut names: Vec<String> = registry.keys().cloned().collect();
        names.sort();
        names
    }

    /// Labels of the sources in the priority chain, in lookup order.
    pub fn source_labels(&self) -> Vec<String> {
        self.inner.chain.load().labels()
    }

    /// Read local sources, build the priority chain and synchronize with
    /// every remote source.
    ///
    /// Startup makes `startup_attempts` sequential attempts. When a remote
    /// source still fails after the last attempt the call fails with
    /// [`ConfigError::AllSourcesFailedAtStartup`], except in development mode
    /// where it returns [`StartupOutcome::Degraded`].
    pub async fn start_polling(
        &self,
        mut sources: Vec<Source>,
        auto_repoll: bool,
    ) -> ConfigResult<StartupOutcome> {
        self.inner.ensure_live()?;
        self.inner.stop_poller();
        let settings = self.settings();
        let timeout = settings.polling.startup_timeout();

        if let Some(path) = settings.resolve_config_file() {
            debug!(path = %path.display(), "Adding local configuration file");
            sources.push(Source::local(FileSource::new(path)));
        }

        // Local sources gate startup
        for source in &sources {
            if let Source::Local(local) = source {
                let label = local.label();
                match tokio::time::timeout(timeout, local.read_properties(timeout)).await {
                    Ok(Some(data)) => debug!(source = %label, count = data.len(), "Local source read"),
                    Ok(None) => warn!(source = %label, "Local source returned no data"),
                    Err(_) => warn!(source = %label, "Local source timed out"),
                }
            }
        }

        let chain = PriorityChain::from_sources(sources);
        let remote_count = chain.remote_count();
        self.inner.chain.store(Arc::new(chain));
        self.inner.seed_registered();

        let attempts = settings.polling.startup_attempts.max(1);
        let mut report = PollReport::default();
        for attempt in 1..=attempts {
            report = self.inner.poll_cycle(timeout).await;
            if self.inner.is_disposed() {
                return Err(ConfigError::Disposed);
            }
            if report.ok {
                if auto_repoll && remote_count > 0 {
                    self.inner.arm_poller();
                }
                self.inner.running.store(true, Ordering::SeqCst);
                self.inner.logger.info(|| {
                    format!(
                        "Properties synchronized from {} remote source(s), {} update(s)",
                        report.sources, report.applied
                    )
                });
                return Ok(StartupOutcome::Synchronized(report));
            }
            if attempt < attempts {
                self.inner
                    .logger
                    .debug(|| format!("Startup attempt {} of {} failed", attempt, attempts));
                self.inner.logger.warning(|| {
                    format!(
                        "Some dynamic properties sources failed ({}), retry polling",
                        report.failed.join(", ")
                    )
                });
            }
        }

        let error = ConfigError::AllSourcesFailedAtStartup {
            attempts,
            unreachable: report.failed.clone(),
        };
        if settings.mode.is_development() {
            self.inner
                .logger
                .error(&error, || "Continuing with cached values".to_string());
            return Ok(StartupOutcome::Degraded(report));
        }
        Err(error)
    }

    /// Run one poll cycle now with the steady-state source timeout.
    pub async fn poll_now(&self) -> ConfigResult<PollReport> {
        self.inner.ensure_live()?;
        let timeout = self.settings().polling.source_timeout();
        Ok(self.inner.poll_cycle(timeout).await)
    }

    /// Append `source` to the remote sources, if given, and poll once.
    pub async fn force_polling(
        &self,
        source: Option<Arc<dyn RemoteSource>>,
    ) -> ConfigResult<PollReport> {
        self.inner.ensure_live()?;
        if let Some(source) = source {
            let chain = self.inner.chain.load().with_remote(source);
            self.inner.chain.store(Arc::new(chain));
        }
        let timeout = self.settings().polling.startup_timeout();
        Ok(self.inner.poll_cycle(timeout).await)
    }

    /// Stop polling and drop every property and source.
    ///
    /// Previously returned properties must not be used afterwards; their own
    /// change channel receives [`ChangeKind::Disposed`].
    pub fn reset(&self) {
        self.inner.reset();
    }

    /// [`reset`](Self::reset), then replace the polling interval and source
    /// timeout when given.
    pub fn reset_with(&self, polling_interval: Option<Duration>, source_timeout: Option<Duration>) {
        {
            let mut settings = self.inner.settings.write().unwrap_or_else(|e| e.into_inner());
            if let Some(interval) = polling_interval.filter(|d| !d.is_zero()) {
                settings.polling.interval_ms = interval.as_millis() as u64;
            }
            if let Some(timeout) = source_timeout.filter(|d| !d.is_zero()) {
                settings.polling.source_timeout_ms = timeout.as_millis() as u64;
            }
        }
        self.inner.reset();
    }

    /// Reset and refuse any further use.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.reset();
    }
}

impl Default for PropertyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerInner {
    pub(crate) fn settings(&self) -> Settings {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_live(&self) -> ConfigResult<()> {
        if self.is_disposed() {
            return Err(ConfigError::Disposed);
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Option<Arc<PropertyCell>> {
        self.registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
    }

    /// Insert `cell` unless another one won the race. Returns the registered
    /// cell and whether `cell` was inserted.
    fn insert(&self, cell: Arc<PropertyCell>) -> (Arc<PropertyCell>, bool) {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        match registry.get(cell.name()) {
            Some(existing) => (existing.clone(), false),
            None => {
                registry.insert(cell.name().to_string(), cell.clone());
                (cell, true)
            }
        }
    }

    /// Registered cell for `name` claimed for `T`, created and seeded when
    /// missing.
    fn obtain<T: PropertyType>(
        &self,
        name: &str,
        default: Option<Value>,
    ) -> ConfigResult<Arc<PropertyCell>> {
        if let Some(cell) = self.lookup(name) {
            cell.claim::<T>()?;
            if let Some(default) = default {
                cell.adopt_default(default);
            }
            return Ok(cell);
        }

        let from_environment = self.environment.get(name);
        let default = if from_environment.is_defined() {
            from_environment.into_raw()
        } else {
            default
        };

        let cell = Arc::new(PropertyCell::new(name, default.clone(), self.bus.clone()));
        cell.claim::<T>()?;
        let seed = self.chain.load().get(name);
        cell.apply(&seed, self.decryptor.as_deref());

        let (cell, inserted) = self.insert(cell);
        if inserted {
            debug!(property = %name, value = %cell.masked(), "Property registered");
            if cell.is_defined() {
                cell.notify(ChangeKind::Updated);
            }
        } else {
            cell.claim::<T>()?;
            if let Some(default) = default {
                cell.adopt_default(default);
            }
        }
        Ok(cell)
    }

    /// Apply one polled item. Returns whether a property changed.
    pub(crate) fn apply_item(&self, item: ConfigurationItem) -> bool {
        let decryptor = self.decryptor.as_deref();
        if let Some(cell) = self.lookup(&item.key) {
            return cell.update(&item, decryptor);
        }
        if item.deleted {
            return false;
        }

        let cell = Arc::new(PropertyCell::new(item.key.clone(), None, self.bus.clone()));
        if !cell.apply(&PropertyValue::from(&item), decryptor) {
            return false;
        }
        let (cell, inserted) = self.insert(cell);
        if !inserted {
            return cell.update(&item, decryptor);
        }
        debug!(property = %item.key, value = %item.masked_value(), "Property discovered by polling");
        cell.notify(ChangeKind::Updated);
        true
    }

    /// Seed undefined properties from a freshly built chain and let chained
    /// properties rescan.
    fn seed_registered(&self) {
        let cells: Vec<Arc<PropertyCell>> = self
            .registry
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect();
        let chain = self.chain.load_full();
        for cell in &cells {
            if cell.is_defined() {
                continue;
            }
            let value = chain.get(cell.name());
            if cell.apply(&value, self.decryptor.as_deref()) {
                cell.notify(ChangeKind::Updated);
            }
        }
        for cell in cells.iter().filter(|c| c.is_chained()) {
            cell.recompute(true);
        }
    }

    fn arm_poller(self: &Arc<Self>) {
        let handle = PollerHandle::spawn(Arc::downgrade(self));
        let previous = self
            .poller
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .replace(handle);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    fn stop_poller(&self) {
        let handle = self.poller.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    fn reset(&self) {
        self.stop_poller();
        self.running.store(false, Ordering::SeqCst);
        self.bus.clear_listeners();

        let cells: Vec<Arc<PropertyCell>> = self
            .registry
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .map(|(_, cell)| cell)
            .collect();
        for cell in &cells {
            cell.dispose();
        }
        self.chain.store(Arc::new(PriorityChain::new()));
        debug!(properties = cells.len(), "Property manager reset");
    }
}

impl PropertyResolver for ManagerInner {
    fn resolve(&self, name: &str) -> Option<Arc<PropertyCell>> {
        if let Some(cell) = self.lookup(name) {
            return Some(cell);
        }
        let value = self.chain.load().get(name);
        if !value.is_defined() {
            return None;
        }
        // Created silently: the caller is scanning under its own lock
        let cell = Arc::new(PropertyCell::new(name, None, self.bus.clone()));
        cell.apply(&value, self.decryptor.as_deref());
        Some(self.insert(cell).0)
    }
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let handle = self.poller.get_mut().ok().and_then(Option::take);
        if let Some(handle) = handle {
            handle.stop();
        }
    }
}

fn to_json<T: Serialize>(name: &str, value: Option<T>) -> Option<Value> {
    let value = value?;
    match serde_json::to_value(value) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(property = %name, "Ignoring default that cannot be stored: {}", e);
            None
        }
    }
}
