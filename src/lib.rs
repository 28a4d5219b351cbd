//! prodsync - product metadata cache reconciliation.
//!
//! Keeps a key/value cache of product records consistent with the
//! authoritative datastore: orphaned entries are removed, new records are
//! cached together with a content fingerprint of their backing file, and
//! entries whose file drifted on disk are rewritten.
//!
//! The library is organized bottom-up:
//!
//! - [`key`]: composite product keys
//! - [`reconcile::plan`]: set arithmetic over key snapshots
//! - [`fingerprint`]: BLAKE3 fingerprints of backing files
//! - [`reconcile::driver`]: runs a plan against the [`store`] collaborators

pub mod cli;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod key;
pub mod lock;
pub mod logging;
pub mod model;
pub mod output;
pub mod progress;
pub mod reconcile;
pub mod signal;
pub mod store;

use anyhow::Context;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use crate::cli::{Cli, Commands, KeyCommand, OutputFormat, PlanArgs, SyncArgs};
use crate::config::Config;
use crate::error::{ExitCode, SyncError};
use crate::lock::RunLock;
use crate::output::{JsonPlan, JsonReport, TextOutput};
use crate::progress::Progress;
use crate::reconcile::{DriverConfig, SyncDriver};
use crate::store::{JsonSerializer, SqliteCache, SqliteDatastore};

/// Run the command described by `cli`.
///
/// # Errors
///
/// Returns an error for anything that prevents the command from completing:
/// bad configuration, an unreachable datastore or cache, or a run already in
/// progress. Per-record failures during `sync` are not errors; they are
/// reported in the summary.
pub fn run_app(cli: Cli) -> anyhow::Result<ExitCode> {
    logging::init_logging(cli.verbose, cli.quiet, cli.no_color);

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    log::debug!("Effective configuration: {config:?}");

    match &cli.command {
        Commands::Sync(args) => {
            config.merge_sync_args(args);
            handle_sync(&cli, args, &config)
        }
        Commands::Plan(args) => {
            config.merge_store_args(&args.stores);
            handle_plan(&cli, args, &config)
        }
        Commands::Key(command) => handle_key(command),
        Commands::Dump(args) => {
            if let Some(ref cache) = args.cache {
                config.cache_path = Some(cache.clone());
            }
            handle_dump(&config)
        }
    }
}

fn open_datastore(config: &Config) -> anyhow::Result<SqliteDatastore> {
    let path = config.datastore_path()?;
    if !path.is_file() {
        return Err(SyncError::Connectivity(format!(
            "datastore {} does not exist",
            path.display()
        ))
        .into());
    }
    let datastore = SqliteDatastore::open(path, config.timeout()).map_err(SyncError::from)?;
    Ok(datastore)
}

fn open_cache(path: &Path, config: &Config) -> anyhow::Result<SqliteCache> {
    let cache = SqliteCache::open(path, config.timeout()).map_err(SyncError::from)?;
    Ok(cache)
}

fn handle_sync(cli: &Cli, args: &SyncArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let cache_path = config.cache_path()?;

    // Dry runs never write, so they may overlap a real run.
    let _lock = if args.dry_run {
        None
    } else {
        Some(RunLock::acquire(&cache_path)?)
    };

    let datastore = open_datastore(config)?;
    let cache = open_cache(&cache_path, config)?;
    log::info!(
        "Datastore: {}, cache: {}",
        config.datastore_path()?.display(),
        cache_path.display()
    );

    let handler = signal::install_handler().context("Failed to install Ctrl+C handler")?;

    let mut driver_config = DriverConfig::default()
        .with_workers(config.workers)
        .with_dry_run(args.dry_run)
        .with_fingerprint_builder(config.fingerprint_builder())
        .with_shutdown_flag(handler.get_flag());
    let show_progress = !(args.no_progress || cli.quiet || args.output == OutputFormat::Json);
    if show_progress {
        let progress = Progress::new(cli.no_color);
        driver_config = driver_config.with_progress_callback(Arc::new(progress));
    }

    let driver = SyncDriver::new(
        Arc::new(datastore),
        Arc::new(cache),
        Arc::new(JsonSerializer::new()),
        driver_config,
    );
    let summary = driver.run()?;

    let exit_code = if summary.interrupted {
        ExitCode::Interrupted
    } else {
        ExitCode::Success
    };

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match args.output {
        OutputFormat::Json => JsonReport::new(&summary, exit_code).write_to(&mut out, true)?,
        OutputFormat::Text => {
            if !cli.quiet {
                TextOutput::new(!cli.no_color).write_summary(&mut out, &summary)?;
            }
        }
    }
    out.flush()?;

    Ok(exit_code)
}

fn handle_plan(cli: &Cli, args: &PlanArgs, config: &Config) -> anyhow::Result<ExitCode> {
    let datastore = open_datastore(config)?;
    let cache = open_cache(&config.cache_path()?, config)?;

    let driver = SyncDriver::new(
        Arc::new(datastore),
        Arc::new(cache),
        Arc::new(JsonSerializer::new()),
        DriverConfig::default(),
    );
    let plan = driver.preview()?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    match args.output {
        OutputFormat::Json => JsonPlan::new(&plan).write_to(&mut out, true)?,
        OutputFormat::Text => TextOutput::new(!cli.no_color).write_plan(&mut out, &plan)?,
    }
    out.flush()?;
    Ok(ExitCode::Success)
}

fn handle_key(command: &KeyCommand) -> anyhow::Result<ExitCode> {
    match command {
        KeyCommand::Encode { primary, secondary } => {
            let key = key::encode(primary, secondary)?;
            println!("{key}");
        }
        KeyCommand::Decode { key } => {
            let (primary, secondary) = key::decode(key)?;
            println!("primary: {primary}");
            println!("secondary: {secondary}");
        }
    }
    Ok(ExitCode::Success)
}

fn handle_dump(config: &Config) -> anyhow::Result<ExitCode> {
    let cache_path = config.cache_path()?;
    if !cache_path.is_file() {
        return Err(SyncError::Connectivity(format!(
            "cache {} does not exist",
            cache_path.display()
        ))
        .into());
    }
    let cache = open_cache(&cache_path, config)?;

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (key, payload) in cache.entries().map_err(SyncError::from)? {
        let value = serde_json::from_str::<serde_json::Value>(&payload)
            .unwrap_or(serde_json::Value::String(payload));
        let line = serde_json::json!({ "key": key, "value": value });
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(ExitCode::Success)
}
