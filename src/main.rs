//! dynprops command line
//!
//! Resolves live configuration properties from local files, the environment
//! and remote HTTP endpoints.

use anyhow::Result;
use clap::Parser;
use dynprops::cli::get::GetArgs;
use dynprops::cli::watch::WatchArgs;
use dynprops::cli::{Cli, Command};
use dynprops::logging::{LogLevel, LogLevelFilter, Logger, init_tracing};
use dynprops::{DynamicProperty, MASK, PropertyManager, StartupOutcome};
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

/// JSON line describing a property, with encrypted values masked.
fn describe(property: &DynamicProperty<Value>) -> Value {
    let value = if property.is_encrypted() {
        json!(MASK)
    } else {
        property.value().unwrap_or(Value::Null)
    };
    json!({
        "name": property.name(),
        "value": value,
        "defined": property.is_defined(),
        "source": property.active_source(),
    })
}

fn report_startup(outcome: &StartupOutcome) {
    let report = outcome.report();
    if outcome.is_degraded() {
        warn!(failed = ?report.failed, "Running on cached and local values only");
    } else {
        info!(sources = report.sources, applied = report.applied, "Properties synchronized");
    }
}

async fn run_get(cli: &Cli, manager: &PropertyManager, args: &GetArgs) -> Result<()> {
    let outcome = manager.start_polling(cli.sources(), false).await?;
    report_startup(&outcome);

    for name in &args.names {
        let property = if args.fallbacks.is_empty() {
            manager.get_property::<Value>(name, None)?
        } else {
            manager.get_chained_property::<Value, _, _>(name, None, &args.fallbacks)?
        };
        println!("{}", describe(&property));
    }
    Ok(())
}

async fn run_watch(cli: &Cli, manager: &PropertyManager, args: &WatchArgs) -> Result<()> {
    let mut changes = manager.property_changed();
    let outcome = manager.start_polling(cli.sources(), true).await?;
    report_startup(&outcome);

    for name in &args.names {
        let property = manager.get_property::<Value>(name, None)?;
        println!("{}", describe(&property));
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            event = changes.recv() => match event {
                Ok(event) => {
                    if !args.names.is_empty() && !args.names.contains(&event.name) {
                        continue;
                    }
                    let property = manager.get_property::<Value>(&event.name, None)?;
                    let mut line = describe(&property);
                    line["change"] = json!(event.kind);
                    println!("{}", line);
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Change stream lagged, some events were dropped");
                }
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on --log option
    init_tracing(&cli.log, cli.verbose)?;

    let mut settings = cli.load_settings()?;
    if let Command::Watch(ref args) = cli.command
        && let Some(interval_ms) = args.interval_ms
    {
        settings.polling.interval_ms = interval_ms;
    }
    info!(mode = ?settings.mode, interval_ms = settings.polling.interval_ms, "Starting dynprops");

    let level = if cli.verbose { LogLevel::Debug } else { LogLevel::Info };
    let logger = Logger::new()
        .with_name("config")
        .with_level_filter(Arc::new(LogLevelFilter::new(level)));

    // The one process-wide manager
    let manager = PropertyManager::builder()
        .settings(settings)
        .logger(logger)
        .build();

    let result = match cli.command {
        Command::Get(ref args) => run_get(&cli, &manager, args).await,
        Command::Watch(ref args) => run_watch(&cli, &manager, args).await,
    };

    manager.dispose();
    result
}
