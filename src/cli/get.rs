//! `get` subcommand: resolve properties once.

use clap::Args;

/// Arguments for the get subcommand
#[derive(Args, Debug)]
pub struct GetArgs {
    /// Property names to resolve
    #[arg(required = true, value_name = "NAME")]
    pub names: Vec<String>,

    /// Fallback names tried, in order, for every requested name
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    pub fallbacks: Vec<String>,
}
