//! Configuration sources.
//!
//! Every source answers synchronous point lookups through
//! [`ConfigurationSource::get`]. On top of that a source is either:
//! - **Local** ([`LocalSource`]): read once before the priority chain is
//!   built (files, environment, memory defaults).
//! - **Remote** ([`RemoteSource`]): polled on a fixed interval for the
//!   lifetime of the manager (HTTP endpoints).
//!
//! Neither read nor poll can fail: errors are logged inside the source and
//! reported as `None`.

mod environment;
mod file;
mod flatten;
mod http;
mod memory;

pub use environment::EnvironmentSource;
pub use file::{FileFormat, FileSource};
pub use flatten::flatten_items;
pub use http::HttpSource;
pub use memory::MemorySource;

use crate::types::{DataSource, PropertyValue};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Point lookup shared by all sources. Missing keys are `UNDEFINED`.
pub trait ConfigurationSource: Send + Sync {
    fn get(&self, name: &str) -> PropertyValue;

    /// Human-readable identification used in logs and error reports.
    fn label(&self) -> String {
        "anonymous source".to_string()
    }
}

/// A source read exactly once, before the priority chain is built.
#[async_trait]
pub trait LocalSource: ConfigurationSource {
    async fn read_properties(&self, timeout: Duration) -> Option<DataSource>;
}

/// A source polled repeatedly. Returns `None` when no update is available.
#[async_trait]
pub trait RemoteSource: ConfigurationSource {
    async fn poll_properties(&self, timeout: Duration) -> Option<DataSource>;
}

/// A source tagged with its capability.
#[derive(Clone)]
pub enum Source {
    Local(Arc<dyn LocalSource>),
    Remote(Arc<dyn RemoteSource>),
}

impl Source {
    pub fn local(source: impl LocalSource + 'static) -> Self {
        Source::Local(Arc::new(source))
    }

    pub fn remote(source: impl RemoteSource + 'static) -> Self {
        Source::Remote(Arc::new(source))
    }

    pub fn get(&self, name: &str) -> PropertyValue {
        match self {
            Source::Local(source) => source.get(name),
            Source::Remote(source) => source.get(name),
        }
    }

    pub fn label(&self) -> String {
        match self {
            Source::Local(source) => source.label(),
            Source::Remote(source) => source.label(),
        }
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, Source::Remote(_))
    }

    /// Whether both values wrap the same source instance.
    pub fn same_instance(&self, other: &Source) -> bool {
        match (self, other) {
            (Source::Local(a), Source::Local(b)) => same_arc(a, b),
            (Source::Remote(a), Source::Remote(b)) => same_arc(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local(_) => write!(f, "Local({})", self.label()),
            Source::Remote(_) => write!(f, "Remote({})", self.label()),
        }
    }
}

/// Pointer identity of two trait objects, ignoring vtables.
pub(crate) fn same_arc<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}
