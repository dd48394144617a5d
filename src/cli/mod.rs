//! CLI command definitions for dynprops
//!
//! This module defines the CLI structure using clap's derive macros.
//! The main entry point is the `Cli` struct which contains subcommands.

pub mod get;
pub mod watch;

use crate::config::{ExecutionMode, Settings};
use crate::error::ConfigResult;
use crate::sources::{FileSource, HttpSource, Source};
use clap::{Parser, Subcommand};
use get::GetArgs;
use std::path::PathBuf;
use watch::WatchArgs;

/// Resolve live configuration properties from files, the environment and
/// HTTP endpoints
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to settings file (YAML)
    #[arg(short, long, global = true)]
    pub settings: Option<PathBuf>,

    /// Local configuration file (repeatable, earlier files win)
    #[arg(short, long = "file", value_name = "PATH", global = true)]
    pub files: Vec<PathBuf>,

    /// Remote configuration endpoint (repeatable, earlier endpoints win)
    #[arg(long = "http", value_name = "URI", global = true)]
    pub endpoints: Vec<String>,

    /// API key sent to every remote endpoint
    #[arg(long, global = true, env = "DYNPROPS_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,

    /// Keep running with cached values when remote endpoints are unreachable
    #[arg(long, global = true)]
    pub development: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Logging output: 0/off, 1/stdout, 2/stderr (default), or filename
    #[arg(short, long, default_value = "2", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Resolve properties once and print them as JSON lines
    Get(GetArgs),

    /// Keep polling and print every change until interrupted
    Watch(WatchArgs),
}

impl Cli {
    /// Settings from `--settings` (or `DYNPROPS_SETTINGS_PATH`) with the
    /// command line applied on top.
    pub fn load_settings(&self) -> ConfigResult<Settings> {
        let mut settings = match self.settings {
            Some(ref path) => {
                let mut settings = Settings::load(path)?;
                settings.apply_env_overrides(|name| std::env::var(name).ok());
                settings
            }
            None => Settings::load_or_default()?,
        };
        if self.development {
            settings.mode = ExecutionMode::Development;
        }
        Ok(settings)
    }

    /// Sources named on the command line, in registration order.
    pub fn sources(&self) -> Vec<Source> {
        let mut sources: Vec<Source> = self
            .endpoints
            .iter()
            .map(|uri| {
                let mut source = HttpSource::new(uri);
                if let Some(ref key) = self.api_key {
                    source = source.with_api_key(key);
                }
                Source::remote(source)
            })
            .collect();
        sources.extend(self.files.iter().map(|path| Source::local(FileSource::new(path))));
        sources
    }
}
