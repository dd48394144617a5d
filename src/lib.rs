//! Live configuration properties.
//!
//! Properties are resolved by name from an ordered set of sources: remote
//! endpoints first, then local files and the environment. Remote sources are
//! polled on a fixed interval and every change is pushed into the matching
//! [`DynamicProperty`] and published on the manager's change stream.
//! Chained properties fall back through a list of other property names.

pub mod chain;
pub mod cli;
pub mod config;
pub mod crypto;
pub mod error;
pub mod events;
pub mod identity;
pub mod logging;
pub mod manager;
pub mod properties;
pub mod sources;
pub mod types;

pub use chain::PriorityChain;
pub use config::{ExecutionMode, PollingConfig, Settings};
pub use crypto::Decryptor;
pub use error::{ConfigError, ConfigResult, DecryptError, ErrorCode, SourceError};
pub use events::{ChangeKind, PropertyChanged};
pub use identity::ServiceIdentity;
pub use manager::{PollReport, PropertyManager, PropertyManagerBuilder, StartupOutcome};
pub use properties::{DynamicProperty, PropertyType};
pub use sources::Source;
pub use types::{ConfigurationItem, DataSource, MASK, PropertyValue};
