//! `watch` subcommand: print property changes as they are polled.

use clap::Args;

/// Arguments for the watch subcommand
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Only report changes of these properties (default: all)
    #[arg(value_name = "NAME")]
    pub names: Vec<String>,

    /// Polling interval in milliseconds (overrides settings)
    #[arg(long, value_name = "MS")]
    pub interval_ms: Option<u64>,
}
