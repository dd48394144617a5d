//! Registry entry shared by every typed view of a property.

use crate::crypto::Decryptor;
use crate::error::{ConfigError, ConfigResult, DecryptError};
use crate::events::{ChangeBus, ChangeKind, ChangeListener, PropertyChanged};
use crate::types::{ConfigurationItem, MASK, PropertyValue};
use serde_json::Value;
use std::any::TypeId;
use std::sync::{Arc, Mutex, OnceLock, RwLock, Weak};
use tokio::sync::broadcast;
use tracing::{debug, error};

const CHANNEL_CAPACITY: usize = 64;

/// Rust type a property was first requested as.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TypeTag {
    id: TypeId,
    name: &'static str,
}

impl TypeTag {
    pub(crate) fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }
}

/// Looks up properties by name for chained resolution.
pub(crate) trait PropertyResolver: Send + Sync {
    /// The registered cell for `name`, creating it without notification when
    /// the priority chain defines the name.
    fn resolve(&self, name: &str) -> Option<Arc<PropertyCell>>;
}

#[derive(Debug, Default)]
struct CellState {
    /// Own value, decrypted.
    value: Option<Value>,
    /// Cipher text behind `value` when it came from an encrypted item.
    cipher: Option<Value>,
    removed: bool,
    default: Option<Value>,
}

/// Fallback resolution attached to a chained property.
pub(crate) struct ChainLink {
    fallback_names: Vec<String>,
    resolver: Weak<dyn PropertyResolver>,
    /// Held for the whole recompute.
    resolution: Mutex<Resolution>,
}

#[derive(Debug, Default)]
struct Resolution {
    active: Option<String>,
    resolved: Option<Value>,
}

impl ChainLink {
    pub(crate) fn new(fallback_names: Vec<String>, resolver: Weak<dyn PropertyResolver>) -> Self {
        Self {
            fallback_names,
            resolver,
            resolution: Mutex::new(Resolution::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Resolution> {
        self.resolution.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) struct PropertyCell {
    name: String,
    type_tag: OnceLock<TypeTag>,
    state: RwLock<CellState>,
    chain: OnceLock<ChainLink>,
    changes: broadcast::Sender<PropertyChanged>,
    bus: Arc<ChangeBus>,
}

impl PropertyCell {
    pub(crate) fn new(name: impl Into<String>, default: Option<Value>, bus: Arc<ChangeBus>) -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            name: name.into(),
            type_tag: OnceLock::new(),
            state: RwLock::new(CellState {
                default,
                ..CellState::default()
            }),
            chain: OnceLock::new(),
            changes,
            bus,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Claim the property for `T`. `serde_json::Value` is the untyped view
    /// and never claims.
    pub(crate) fn claim<T: 'static>(&self) -> ConfigResult<()> {
        let requested = TypeTag::of::<T>();
        if requested.id == TypeId::of::<Value>() {
            return Ok(());
        }
        let registered = self.type_tag.get_or_init(|| requested);
        if registered.id != requested.id {
            return Err(ConfigError::TypeMismatch {
                name: self.name.clone(),
                registered: registered.name,
                requested: requested.name,
            });
        }
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CellState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CellState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether the property holds its own value (set or delivered).
    pub(crate) fn is_defined(&self) -> bool {
        let state = self.read();
        !state.removed && state.value.is_some()
    }

    /// Whether the current value was decrypted. A chained property without
    /// its own value reports the state of its active fallback.
    pub(crate) fn is_encrypted(&self) -> bool {
        if self.is_defined() {
            return self.own_encrypted();
        }
        let Some(link) = self.chain.get() else {
            return false;
        };
        let active = link.lock().active.clone();
        match active.as_deref() {
            Some(name) if name != self.name => link
                .resolver
                .upgrade()
                .and_then(|r| r.resolve(name))
                .is_some_and(|cell| cell.own_encrypted()),
            _ => false,
        }
    }

    fn own_encrypted(&self) -> bool {
        let state = self.read();
        !state.removed && state.cipher.is_some()
    }

    pub(crate) fn own_value(&self) -> Option<Value> {
        let state = self.read();
        if state.removed {
            return None;
        }
        state.value.clone()
    }

    pub(crate) fn default_value(&self) -> Option<Value> {
        self.read().default.clone()
    }

    /// Install `default` when the property was created without one.
    pub(crate) fn adopt_default(&self, default: Value) {
        let mut state = self.write();
        if state.default.is_none() {
            state.default = Some(default);
        }
    }

    /// Current value: own value, then the active fallback for chained
    /// properties, then the default.
    pub(crate) fn current(&self) -> Option<Value> {
        if let Some(value) = self.own_value() {
            return Some(value);
        }
        if let Some(link) = self.chain.get() {
            let active = link.lock().active.clone();
            if let Some(value) = self.active_value(link, active.as_deref()) {
                return Some(value);
            }
        }
        self.default_value()
    }

    /// Printable current value with encrypted values masked.
    pub(crate) fn masked(&self) -> String {
        if self.is_encrypted() {
            return MASK.to_string();
        }
        match self.current() {
            Some(value) => PropertyValue::new(value).masked(),
            None => PropertyValue::UNDEFINED.masked(),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<PropertyChanged> {
        self.changes.subscribe()
    }

    /// Explicit local override. Returns whether the value changed.
    pub(crate) fn set(&self, value: Value) -> bool {
        {
            let mut state = self.write();
            if !state.removed && state.value.as_ref() == Some(&value) {
                return false;
            }
            state.value = Some(value);
            state.cipher = None;
            state.removed = false;
        }
        debug!(property = %self.name, value = %self.masked(), "Property set");
        self.changed(ChangeKind::Updated);
        true
    }

    /// Apply an item delivered by a source. Returns whether a notification
    /// was sent.
    pub(crate) fn update(&self, item: &ConfigurationItem, decryptor: Option<&dyn Decryptor>) -> bool {
        if item.deleted {
            self.mark_removed();
            return true;
        }
        let changed = self.apply(
            &PropertyValue::from(item),
            decryptor,
        );
        if changed {
            debug!(property = %self.name, value = %item.masked_value(), "Property updated from source");
            self.changed(ChangeKind::Updated);
        }
        changed
    }

    /// Store a source value without notifying. Returns whether the stored
    /// value changed.
    ///
    /// Encrypted values are compared by cipher text and decrypted only when
    /// they differ. A failed decryption leaves the property untouched.
    pub(crate) fn apply(&self, value: &PropertyValue, decryptor: Option<&dyn Decryptor>) -> bool {
        let Some(raw) = value.raw() else {
            return false;
        };

        if value.is_encrypted() {
            {
                let state = self.read();
                if !state.removed && state.cipher.as_ref() == Some(raw) {
                    return false;
                }
            }
            let plain = match decrypt(raw, decryptor) {
                Ok(plain) => plain,
                Err(e) => {
                    error!(property = %self.name, code = ?e.code(), "Cannot decrypt property value, update skipped: {}", e);
                    return false;
                }
            };
            let mut state = self.write();
            state.value = Some(Value::String(plain));
            state.cipher = Some(raw.clone());
            state.removed = false;
            return true;
        }

        let mut state = self.write();
        if !state.removed && state.cipher.is_none() && state.value.as_ref() == Some(raw) {
            return false;
        }
        state.value = Some(raw.clone());
        state.cipher = None;
        state.removed = false;
        true
    }

    fn mark_removed(&self) {
        {
            let mut state = self.write();
            state.removed = true;
            state.value = None;
            state.cipher = None;
        }
        debug!(property = %self.name, "Property removed by source");
        self.changed(ChangeKind::Removed);
    }

    /// Publish `kind` on the property's own channel and on the bus.
    pub(crate) fn notify(&self, kind: ChangeKind) {
        let event = PropertyChanged::new(self.name.clone(), kind);
        let _ = self.changes.send(event.clone());
        self.bus.publish(event);
    }

    /// Notify after the own value changed, refreshing the resolved value of
    /// a chained property first so its own recompute sees no difference.
    fn changed(&self, kind: ChangeKind) {
        if let Some(link) = self.chain.get() {
            let mut resolution = link.lock();
            resolution.resolved = self.resolve_with(link, resolution.active.as_deref());
        }
        self.notify(kind);
    }

    /// Invalidate the property on manager reset. Only the own channel is told.
    pub(crate) fn dispose(&self) {
        let _ = self
            .changes
            .send(PropertyChanged::new(self.name.clone(), ChangeKind::Disposed));
    }

    // Chained resolution

    /// Attach fallback resolution. Returns `false` when the cell was
    /// already chained.
    pub(crate) fn attach_chain(&self, link: ChainLink) -> bool {
        self.chain.set(link).is_ok()
    }

    pub(crate) fn is_chained(&self) -> bool {
        self.chain.get().is_some()
    }

    pub(crate) fn fallback_names(&self) -> &[String] {
        self.chain
            .get()
            .map(|link| link.fallback_names.as_slice())
            .unwrap_or(&[])
    }

    pub(crate) fn active_source(&self) -> Option<String> {
        self.chain.get().and_then(|link| link.lock().active.clone())
    }

    /// Rescan the fallback names. When `notify` is set and the resolved
    /// value changed, publish an update once the scan lock is released.
    pub(crate) fn recompute(&self, notify: bool) {
        let Some(link) = self.chain.get() else {
            return;
        };
        let changed = {
            let mut resolution = link.lock();
            let active = self.scan(link);
            let resolved = self.resolve_with(link, active.as_deref());
            resolution.active = active;
            if resolution.resolved == resolved {
                false
            } else {
                resolution.resolved = resolved;
                true
            }
        };
        if changed && notify {
            debug!(property = %self.name, active = ?self.active_source(), "Chained property resolved to a new value");
            self.notify(ChangeKind::Updated);
        }
    }

    /// First fallback name whose property holds its own value.
    fn scan(&self, link: &ChainLink) -> Option<String> {
        let resolver = link.resolver.upgrade();
        for name in &link.fallback_names {
            let defined = if *name == self.name {
                self.is_defined()
            } else {
                resolver
                    .as_ref()
                    .and_then(|r| r.resolve(name))
                    .is_some_and(|cell| cell.is_defined())
            };
            if defined {
                return Some(name.clone());
            }
        }
        None
    }

    fn active_value(&self, link: &ChainLink, active: Option<&str>) -> Option<Value> {
        let active = active?;
        if active == self.name {
            return self.own_value();
        }
        link.resolver.upgrade()?.resolve(active)?.own_value()
    }

    fn resolve_with(&self, link: &ChainLink, active: Option<&str>) -> Option<Value> {
        self.own_value()
            .or_else(|| self.active_value(link, active))
            .or_else(|| self.default_value())
    }
}

impl ChangeListener for PropertyCell {
    fn on_change(&self, event: &PropertyChanged) {
        if event.kind == ChangeKind::Disposed {
            return;
        }
        if self.fallback_names().iter().any(|n| *n == event.name) {
            self.recompute(true);
        }
    }
}

fn decrypt(raw: &Value, decryptor: Option<&dyn Decryptor>) -> Result<String, DecryptError> {
    let cipher = raw
        .as_str()
        .ok_or_else(|| DecryptError::new("encrypted value is not a string"))?;
    let decryptor = decryptor.ok_or_else(|| DecryptError::new("no decryptor configured"))?;
    decryptor.decrypt(cipher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cell(name: &str) -> PropertyCell {
        PropertyCell::new(name, None, Arc::new(ChangeBus::default()))
    }

    fn upper(c: &str) -> Result<String, DecryptError> {
        Ok(c.to_uppercase())
    }

    #[test]
    fn test_claim_rejects_other_types() {
        let cell = cell("port");
        cell.claim::<u16>().unwrap();
        cell.claim::<u16>().unwrap();
        cell.claim::<Value>().unwrap();

        let err = cell.claim::<String>().unwrap_err();
        assert!(matches!(err, ConfigError::TypeMismatch { ref name, .. } if name == "port"));
    }

    #[test]
    fn test_set_short_circuits_equal_values() {
        let cell = cell("a");
        let mut rx = cell.subscribe();

        assert!(cell.set(json!(1)));
        assert!(!cell.set(json!(1)));
        assert!(cell.set(json!(2)));

        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Updated);
        assert_eq!(rx.try_recv().unwrap().kind, ChangeKind::Updated);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_tombstone_falls_back_to_default() {
        let cell = PropertyCell::new("a", Some(json!("default")), Arc::new(ChangeBus::default()));
        cell.update(&ConfigurationItem::new("a", "remote"), None);
        assert_eq!(cell.current(), Some(json!("remote")));

        cell.update(&ConfigurationItem::tombstone("a"), None);
        assert!(!cell.is_defined());
        assert_eq!(cell.current(), Some(json!("default")));

        // A later delivery revives it
        cell.update(&ConfigurationItem::new("a", "back"), None);
        assert_eq!(cell.current(), Some(json!("back")));
    }

    #[test]
    fn test_encrypted_compared_by_cipher_text() {
        let cell = cell("pwd");
        let item = ConfigurationItem::encrypted("pwd", "abc");

        assert!(cell.update(&item, Some(&upper)));
        assert_eq!(cell.current(), Some(json!("ABC")));
        assert_eq!(cell.masked(), MASK);
        assert!(!cell.update(&item, Some(&upper)));
    }

    #[test]
    fn test_decrypt_failure_keeps_previous_value() {
        let cell = cell("pwd");
        cell.update(&ConfigurationItem::new("pwd", "plain"), None);

        let failing = |_: &str| -> Result<String, DecryptError> { Err(DecryptError::new("bad key")) };
        assert!(!cell.update(&ConfigurationItem::encrypted("pwd", "xyz"), Some(&failing)));
        assert!(!cell.update(&ConfigurationItem::encrypted("pwd", "xyz"), None));
        assert_eq!(cell.current(), Some(json!("plain")));
    }

    #[test]
    fn test_adopt_default_only_once() {
        let cell = cell("a");
        cell.adopt_default(json!(1));
        cell.adopt_default(json!(2));
        assert_eq!(cell.current(), Some(json!(1)));
    }
}
