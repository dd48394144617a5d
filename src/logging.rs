//! Logging collaborator.
//!
//! [`Logger`] forwards to `tracing` and takes lazily-evaluated message
//! producers so that formatting only happens when the level is enabled.
//! Logging is never required for correctness.

use std::fs::OpenOptions;
use std::sync::{
    Arc,
    atomic::{AtomicU8, Ordering},
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Log levels understood by the [`Logger`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Atomic level filter that can be adjusted at runtime.
///
/// Stored as a u8: 0=Debug, 1=Info, 2=Warning, 3=Error
pub struct LogLevelFilter(AtomicU8);

impl LogLevelFilter {
    pub fn new(level: LogLevel) -> Self {
        Self(AtomicU8::new(level_to_u8(level)))
    }

    pub fn get(&self) -> LogLevel {
        u8_to_level(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, level: LogLevel) {
        self.0.store(level_to_u8(level), Ordering::Relaxed);
    }

    pub fn should_log(&self, level: LogLevel) -> bool {
        level_to_u8(level) >= self.0.load(Ordering::Relaxed)
    }
}

impl Default for LogLevelFilter {
    fn default() -> Self {
        Self::new(LogLevel::Debug)
    }
}

fn level_to_u8(level: LogLevel) -> u8 {
    match level {
        LogLevel::Debug => 0,
        LogLevel::Info => 1,
        LogLevel::Warning => 2,
        LogLevel::Error => 3,
    }
}

fn u8_to_level(val: u8) -> LogLevel {
    match val {
        0 => LogLevel::Debug,
        1 => LogLevel::Info,
        2 => LogLevel::Warning,
        _ => LogLevel::Error,
    }
}

pub fn log_level_to_tracing(level: LogLevel) -> Level {
    match level {
        LogLevel::Debug => Level::DEBUG,
        LogLevel::Info => Level::INFO,
        LogLevel::Warning => Level::WARN,
        LogLevel::Error => Level::ERROR,
    }
}

/// Named logger with a shared level filter.
#[derive(Clone)]
pub struct Logger {
    level_filter: Arc<LogLevelFilter>,
    name: Option<String>,
}

impl Logger {
    pub fn new() -> Self {
        Self {
            level_filter: Arc::new(LogLevelFilter::default()),
            name: None,
        }
    }

    pub fn with_level_filter(mut self, filter: Arc<LogLevelFilter>) -> Self {
        self.level_filter = filter;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Log the message produced by `message` if `level` passes the filter.
    pub fn log<F>(&self, level: LogLevel, message: F)
    where
        F: FnOnce() -> String,
    {
        if !self.level_filter.should_log(level) {
            return;
        }
        let message = message();
        let logger = self.name.as_deref().unwrap_or("dynprops");
        match log_level_to_tracing(level) {
            Level::ERROR => tracing::error!(logger = %logger, "{}", message),
            Level::WARN => tracing::warn!(logger = %logger, "{}", message),
            Level::INFO => tracing::info!(logger = %logger, "{}", message),
            _ => tracing::debug!(logger = %logger, "{}", message),
        }
    }

    pub fn debug<F: FnOnce() -> String>(&self, message: F) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info<F: FnOnce() -> String>(&self, message: F) {
        self.log(LogLevel::Info, message);
    }

    pub fn warning<F: FnOnce() -> String>(&self, message: F) {
        self.log(LogLevel::Warning, message);
    }

    /// Log an error together with its cause.
    pub fn error<E, F>(&self, error: &E, message: F)
    where
        E: std::fmt::Display + ?Sized,
        F: FnOnce() -> String,
    {
        self.log(LogLevel::Error, || format!("{}: {}", message(), error));
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

/// Install the global tracing subscriber.
///
/// `output` is `0`/`off` (no logging), `1`/`stdout`, `2`/`stderr` or a file
/// name opened in append mode.
pub fn init_tracing(output: &str, verbose: bool) -> anyhow::Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    match output {
        "0" | "off" => {}
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_max_level(level)
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
