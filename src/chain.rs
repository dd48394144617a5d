//! Priority chain: remote sources first, then local sources.

use crate::sources::{RemoteSource, Source};
use crate::types::PropertyValue;
use std::sync::Arc;

/// Ordered sources consulted on lookup.
///
/// Remote sources always come before local sources; within each group the
/// registration order is kept. A chain is immutable once built: the manager
/// swaps in a new chain when a remote source is appended.
#[derive(Debug, Clone, Default)]
pub struct PriorityChain {
    sources: Vec<Source>,
}

impl PriorityChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain from sources in registration order.
    ///
    /// Remote sources are moved in front of local ones and a remote instance
    /// registered twice is kept once.
    pub fn from_sources<I>(sources: I) -> Self
    where
        I: IntoIterator<Item = Source>,
    {
        let mut remotes: Vec<Source> = Vec::new();
        let mut locals: Vec<Source> = Vec::new();
        for source in sources {
            if source.is_remote() {
                if !remotes.iter().any(|r| r.same_instance(&source)) {
                    remotes.push(source);
                }
            } else {
                locals.push(source);
            }
        }
        remotes.extend(locals);
        Self { sources: remotes }
    }

    /// First defined value for `name`, scanning in priority order.
    pub fn get(&self, name: &str) -> PropertyValue {
        for source in &self.sources {
            let value = source.get(name);
            if value.is_defined() {
                return value;
            }
        }
        PropertyValue::UNDEFINED
    }

    /// Remote sources in priority order.
    pub fn remote_sources(&self) -> Vec<Arc<dyn RemoteSource>> {
        self.sources
            .iter()
            .filter_map(|source| match source {
                Source::Remote(remote) => Some(remote.clone()),
                Source::Local(_) => None,
            })
            .collect()
    }

    pub fn remote_count(&self) -> usize {
        self.sources.iter().filter(|s| s.is_remote()).count()
    }

    /// A copy of this chain with `remote` appended after the existing
    /// remote sources. Already registered instances are not added twice.
    pub fn with_remote(&self, remote: Arc<dyn RemoteSource>) -> Self {
        let remote = Source::Remote(remote);
        if self.sources.iter().any(|s| s.same_instance(&remote)) {
            return self.clone();
        }
        let position = self.remote_count();
        let mut sources = self.sources.clone();
        sources.insert(position, remote);
        Self { sources }
    }

    /// Whether a remote source ranked before `remote_index` currently
    /// defines `key`.
    pub fn shadowed_by_higher_remote(&self, remote_index: usize, key: &str) -> bool {
        self.sources
            .iter()
            .filter(|s| s.is_remote())
            .take(remote_index)
            .any(|s| s.get(key).is_defined())
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn labels(&self) -> Vec<String> {
        self.sources.iter().map(Source::label).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::MemorySource;
    use serde_json::json;

    fn memory(label: &str, pairs: &[(&str, i64)]) -> MemorySource {
        let source = MemorySource::with_label(label);
        for (key, value) in pairs {
            source.set(*key, *value);
        }
        source
    }

    #[test]
    fn test_remote_wins_over_local() {
        let local = Source::local(memory("local", &[("k", 1), ("only.local", 3)]));
        let remote = Source::remote(memory("remote", &[("k", 2)]));

        // Registration order does not matter: remotes always come first
        let chain = PriorityChain::from_sources([local, remote]);
        assert_eq!(chain.labels(), vec!["remote", "local"]);
        assert_eq!(chain.get("k").raw(), Some(&json!(2)));
        assert_eq!(chain.get("only.local").raw(), Some(&json!(3)));
        assert!(!chain.get("missing").is_defined());
    }

    #[test]
    fn test_locals_keep_registration_order() {
        let first = Source::local(memory("first", &[("k", 1)]));
        let second = Source::local(memory("second", &[("k", 2)]));
        let chain = PriorityChain::from_sources([first, second]);
        assert_eq!(chain.get("k").raw(), Some(&json!(1)));
    }

    #[test]
    fn test_duplicate_remote_registered_once() {
        let remote: Arc<dyn RemoteSource> = Arc::new(MemorySource::new());
        let chain = PriorityChain::from_sources([
            Source::Remote(remote.clone()),
            Source::Remote(remote.clone()),
        ]);
        assert_eq!(chain.remote_count(), 1);
        assert_eq!(chain.with_remote(remote).remote_count(), 1);
    }

    #[test]
    fn test_with_remote_keeps_remotes_before_locals() {
        let chain = PriorityChain::from_sources([
            Source::local(memory("local", &[("k", 1)])),
            Source::remote(memory("r1", &[])),
        ]);
        let appended = chain.with_remote(Arc::new(memory("r2", &[("k", 5)])));

        assert_eq!(appended.labels(), vec!["r1", "r2", "local"]);
        assert_eq!(appended.get("k").raw(), Some(&json!(5)));
        assert_eq!(chain.len(), 2);
    }

    #[test]
    fn test_shadowed_by_higher_remote() {
        let chain = PriorityChain::from_sources([
            Source::remote(memory("r1", &[("a", 1)])),
            Source::remote(memory("r2", &[("a", 2), ("b", 2)])),
        ]);
        assert!(chain.shadowed_by_higher_remote(1, "a"));
        assert!(!chain.shadowed_by_higher_remote(1, "b"));
        assert!(!chain.shadowed_by_higher_remote(0, "a"));
    }
}
