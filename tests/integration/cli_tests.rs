use clap::Parser;
use prodsync::cli::Cli;
use prodsync::error::{ExitCode, StructuredError, SyncError};
use prodsync::key::encode;
use prodsync::lock::RunLock;
use prodsync::model::Product;
use prodsync::run_app;
use prodsync::store::{CacheStore, SqliteCache, SqliteDatastore};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

struct Workspace {
    dir: TempDir,
    config: PathBuf,
    datastore: PathBuf,
    cache: PathBuf,
}

impl Workspace {
    /// Config file pointing at a seeded datastore with two products.
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let datastore = dir.path().join("products.db");
        let cache = dir.path().join("cache.db");
        let config = dir.path().join("config.toml");
        fs::write(
            &config,
            format!(
                "datastore_path = {:?}\ncache_path = {:?}\nworkers = 2\n",
                datastore.to_string_lossy(),
                cache.to_string_lossy()
            ),
        )
        .unwrap();

        let ds = SqliteDatastore::open(&datastore, Duration::from_secs(1)).unwrap();
        for name in ["A", "B"] {
            let file = dir.path().join(format!("{name}.bin"));
            fs::write(&file, name.repeat(10)).unwrap();
            ds.insert(&Product::new(name, "NSN", file.to_string_lossy()))
                .unwrap();
        }

        Self {
            dir,
            config,
            datastore,
            cache,
        }
    }

    fn run(&self, args: &[&str]) -> anyhow::Result<ExitCode> {
        let config = self.config.to_string_lossy().into_owned();
        let mut argv = vec!["prodsync", "-q", "--config", config.as_str()];
        argv.extend_from_slice(args);
        run_app(Cli::try_parse_from(argv).unwrap())
    }
}

#[test]
fn test_sync_populates_cache() {
    let ws = Workspace::new();
    let code = ws.run(&["sync", "--no-progress"]).unwrap();
    assert_eq!(code, ExitCode::Success);

    let cache = SqliteCache::open(&ws.cache, Duration::from_secs(1)).unwrap();
    assert_eq!(cache.len().unwrap(), 2);
    assert!(cache.get(&encode("A", "NSN").unwrap()).unwrap().is_some());
    // released when the run ended
    assert!(RunLock::acquire(&ws.cache).is_ok());
}

#[test]
fn test_sync_json_output_exit_success() {
    let ws = Workspace::new();
    let code = ws.run(&["sync", "--output", "json"]).unwrap();
    assert_eq!(code, ExitCode::Success);
}

#[test]
fn test_dry_run_leaves_cache_empty() {
    let ws = Workspace::new();
    ws.run(&["sync", "--dry-run", "--no-progress"]).unwrap();

    let cache = SqliteCache::open(&ws.cache, Duration::from_secs(1)).unwrap();
    assert!(cache.is_empty().unwrap());
}

#[test]
fn test_cli_flags_override_config() {
    let ws = Workspace::new();
    let other_cache = ws.dir.path().join("other.db");
    let other = other_cache.to_string_lossy().into_owned();

    ws.run(&["sync", "--cache", other.as_str(), "--no-progress"])
        .unwrap();

    assert!(other_cache.exists());
    assert!(!ws.cache.exists());
}

#[test]
fn test_missing_datastore_is_connectivity_failure() {
    let ws = Workspace::new();
    fs::remove_file(&ws.datastore).unwrap();

    let err = ws.run(&["sync", "--no-progress"]).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::ConnectivityFailure);
    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::Connectivity(_))
    ));
}

#[test]
fn test_held_lock_blocks_sync() {
    let ws = Workspace::new();
    let _held = RunLock::acquire(&ws.cache).unwrap();

    let err = ws.run(&["sync", "--no-progress"]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::AlreadyRunning(_))
    ));
    assert_eq!(ExitCode::for_error(&err), ExitCode::ConnectivityFailure);

    let structured = StructuredError::new(&err, ExitCode::for_error(&err));
    assert_eq!(structured.code, "PS002");
    assert_eq!(structured.kind, Some("already_running"));
}

#[test]
fn test_held_lock_does_not_block_dry_run() {
    let ws = Workspace::new();
    let _held = RunLock::acquire(&ws.cache).unwrap();
    assert_eq!(
        ws.run(&["sync", "--dry-run", "--no-progress"]).unwrap(),
        ExitCode::Success
    );
}

#[test]
fn test_plan_and_dump() {
    let ws = Workspace::new();
    assert_eq!(ws.run(&["plan"]).unwrap(), ExitCode::Success);
    assert_eq!(ws.run(&["plan", "--output", "json"]).unwrap(), ExitCode::Success);

    ws.run(&["sync", "--no-progress"]).unwrap();
    assert_eq!(ws.run(&["dump"]).unwrap(), ExitCode::Success);
}

#[test]
fn test_dump_missing_cache() {
    let ws = Workspace::new();
    let err = ws.run(&["dump"]).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::ConnectivityFailure);
}

#[test]
fn test_key_commands() {
    let ws = Workspace::new();
    assert_eq!(
        ws.run(&["key", "encode", "ABC 1", "7643"]).unwrap(),
        ExitCode::Success
    );
    assert_eq!(
        ws.run(&["key", "decode", "7643+ABC-1"]).unwrap(),
        ExitCode::Success
    );

    let err = ws.run(&["key", "decode", "no-separator"]).unwrap_err();
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
}

#[test]
fn test_missing_datastore_setting_is_general_error() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("config.toml");
    fs::write(&config, "workers = 1\n").unwrap();
    let config = config.to_string_lossy().into_owned();

    let err = run_app(
        Cli::try_parse_from(["prodsync", "-q", "--config", config.as_str(), "plan"]).unwrap(),
    )
    .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<SyncError>(),
        Some(SyncError::Config(_))
    ));
    assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
}
