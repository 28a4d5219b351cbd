use clap::Parser;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use prodsync::cli::{Cli, Commands};
use prodsync::config::{unknown_keys, Config};
use std::fs;
use std::path::PathBuf;
use tempfile::tempdir;

#[test]
fn test_config_load_defaults() {
    // figment directly, so the process environment cannot interfere
    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .extract()
        .unwrap();
    assert_eq!(config.workers, 4);
    assert_eq!(config.timeout_ms, 5000);
    assert!(config.mmap);
    assert!(config.cache_path.is_none());
}

#[test]
fn test_config_load_from_toml() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(
        &config_path,
        r#"
datastore_path = "/srv/products.db"
cache_path = "/var/cache/prodsync.db"
workers = 12
mmap_threshold = 1048576
buffer_size = 8192
"#,
    )
    .unwrap();

    let config: Config = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&config_path))
        .extract()
        .unwrap();

    assert_eq!(config.datastore_path, Some(PathBuf::from("/srv/products.db")));
    assert_eq!(config.cache_path, Some(PathBuf::from("/var/cache/prodsync.db")));
    assert_eq!(config.workers, 12);
    assert_eq!(config.mmap_threshold, 1_048_576);
    assert_eq!(config.buffer_size, 8192);
}

#[test]
fn test_hierarchy_defaults_file_env_cli() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "buffer_size = 16384\nmmap = false\n").unwrap();

    // 1. file overrides defaults
    let config = Config::load_from_path(Some(&config_path)).unwrap();
    assert_eq!(config.buffer_size, 16384);
    assert!(!config.mmap);

    // 2. environment overrides the file
    std::env::set_var("PRODSYNC_BUFFER_SIZE", "32768");
    let figment = Figment::from(Serialized::defaults(Config::default()))
        .merge(Toml::file(&config_path))
        .merge(Env::prefixed("PRODSYNC_"));
    let mut config: Config = figment.extract().unwrap();
    std::env::remove_var("PRODSYNC_BUFFER_SIZE");
    assert_eq!(config.buffer_size, 32768);
    assert!(!config.mmap);

    // 3. CLI flags override everything
    let cli = Cli::try_parse_from([
        "prodsync",
        "sync",
        "--datastore",
        "cli.db",
        "--workers",
        "3",
        "--mmap-threshold",
        "2MiB",
    ])
    .unwrap();
    if let Commands::Sync(args) = &cli.command {
        config.merge_sync_args(args);
    }
    assert_eq!(config.datastore_path, Some(PathBuf::from("cli.db")));
    assert_eq!(config.workers, 3);
    assert_eq!(config.mmap_threshold, 2 * 1024 * 1024);
    assert_eq!(config.buffer_size, 32768);
}

#[test]
fn test_config_invalid_toml_is_error() {
    let temp_dir = tempdir().unwrap();
    let config_path = temp_dir.path().join("config.toml");
    fs::write(&config_path, "workers = [1, 2").unwrap();
    assert!(Config::load_from_path(Some(&config_path)).is_err());
}

#[test]
fn test_unknown_keys_are_reported() {
    let found = unknown_keys("cache_pth = \"x\"\nworkers = 2\n");
    assert_eq!(found, vec![("cache_pth".to_string(), Some("cache_path"))]);
}

#[test]
fn test_fingerprint_builder_from_config() {
    let config = Config {
        mmap: false,
        buffer_size: 4096,
        ..Default::default()
    };
    let dir = tempdir().unwrap();
    let path = dir.path().join("f.bin");
    fs::write(&path, vec![7u8; 10_000]).unwrap();

    let fp = config.fingerprint_builder().build(&path).unwrap();
    assert_eq!(fp.size_bytes, 10_000);
    assert_eq!(
        fp.digest_hex,
        blake3::hash(&vec![7u8; 10_000]).to_hex().to_string()
    );
}
