//! Layered application configuration.
//!
//! Sources, lowest priority first:
//!
//! 1. built-in defaults
//! 2. a TOML file (`--config PATH`, or `config.toml` in the platform config
//!    directory)
//! 3. `PRODSYNC_*` environment variables (`PRODSYNC_WORKERS=8`)
//! 4. command-line flags, merged by the caller with [`Config::merge_sync_args`]
//!    and [`Config::merge_store_args`]
//!
//! ```toml
//! datastore_path = "/srv/products/products.db"
//! cache_path = "/var/cache/prodsync/cache.db"
//! workers = 8
//! timeout_ms = 5000
//! mmap = true
//! mmap_threshold = 67108864
//! buffer_size = 65536
//! ```

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::{StoreArgs, SyncArgs};
use crate::error::SyncError;
use crate::fingerprint::{FingerprintBuilder, DEFAULT_BUFFER_SIZE, DEFAULT_MMAP_THRESHOLD};

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "PRODSYNC_";

const KNOWN_KEYS: &[&str] = &[
    "datastore_path",
    "cache_path",
    "workers",
    "timeout_ms",
    "mmap",
    "mmap_threshold",
    "buffer_size",
];

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Datastore SQLite database. Required for `sync` and `plan`.
    pub datastore_path: Option<PathBuf>,
    /// Cache SQLite database. Defaults to `cache.db` in the platform data
    /// directory.
    pub cache_path: Option<PathBuf>,
    /// Worker threads for the add and update phases.
    pub workers: usize,
    /// Busy timeout for database connections, in milliseconds.
    pub timeout_ms: u64,
    /// Memory-map large backing files.
    pub mmap: bool,
    /// Files at least this many bytes are memory-mapped.
    pub mmap_threshold: u64,
    /// Read buffer for streamed hashing, in bytes.
    pub buffer_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            datastore_path: None,
            cache_path: None,
            workers: 4,
            timeout_ms: 5000,
            mmap: true,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl Config {
    /// Load configuration from `explicit`, or from the default config file
    /// if `None`, layered under the environment.
    ///
    /// A missing default file is not an error. A missing explicit file is.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the file cannot be parsed or a value
    /// has the wrong type.
    pub fn load(explicit: Option<&Path>) -> Result<Self, SyncError> {
        let path = match explicit {
            Some(path) => {
                if !path.is_file() {
                    return Err(SyncError::Config(format!(
                        "config file {} does not exist",
                        path.display()
                    )));
                }
                Some(path.to_path_buf())
            }
            None => Self::default_path().filter(|p| p.is_file()),
        };
        Self::load_from_path(path.as_deref())
    }

    /// Load defaults, then `path` (if any), then the environment.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if extraction fails.
    pub fn load_from_path(path: Option<&Path>) -> Result<Self, SyncError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));
        if let Some(path) = path {
            log::debug!("Loading configuration from {}", path.display());
            if let Ok(content) = std::fs::read_to_string(path) {
                for (key, suggestion) in unknown_keys(&content) {
                    match suggestion {
                        Some(s) => log::warn!(
                            "Unknown config key '{key}' in {} (did you mean '{s}'?)",
                            path.display()
                        ),
                        None => log::warn!("Unknown config key '{key}' in {}", path.display()),
                    }
                }
            }
            figment = figment.merge(Toml::file(path));
        }
        figment = figment.merge(Env::prefixed(ENV_PREFIX));

        let config: Self = figment
            .extract()
            .map_err(|e| SyncError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Default config file location (`<config dir>/prodsync/config.toml`).
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "prodsync", "prodsync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    fn default_cache_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "prodsync", "prodsync")
            .map(|dirs| dirs.data_dir().join("cache.db"))
    }

    fn validate(&self) -> Result<(), SyncError> {
        if self.workers == 0 {
            return Err(SyncError::Config("workers must be at least 1".to_string()));
        }
        Ok(())
    }

    /// Apply database flags from the command line.
    pub fn merge_store_args(&mut self, args: &StoreArgs) {
        if let Some(ref path) = args.datastore {
            self.datastore_path = Some(path.clone());
        }
        if let Some(ref path) = args.cache {
            self.cache_path = Some(path.clone());
        }
        if let Some(ms) = args.timeout_ms {
            self.timeout_ms = ms;
        }
    }

    /// Apply `sync` flags from the command line.
    pub fn merge_sync_args(&mut self, args: &SyncArgs) {
        self.merge_store_args(&args.stores);
        if let Some(workers) = args.workers {
            self.workers = workers.max(1);
        }
        if args.no_mmap {
            self.mmap = false;
        }
        if let Some(threshold) = args.mmap_threshold {
            self.mmap_threshold = threshold;
        }
    }

    /// Datastore path, which has no default.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if no datastore was configured.
    pub fn datastore_path(&self) -> Result<&Path, SyncError> {
        self.datastore_path.as_deref().ok_or_else(|| {
            SyncError::Config(
                "no datastore configured (set datastore_path, PRODSYNC_DATASTORE_PATH, or --datastore)"
                    .to_string(),
            )
        })
    }

    /// Cache path, falling back to the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if no path was configured and the
    /// platform has no data directory.
    pub fn cache_path(&self) -> Result<PathBuf, SyncError> {
        self.cache_path
            .clone()
            .or_else(Self::default_cache_path)
            .ok_or_else(|| {
                SyncError::Config(
                    "no cache configured and no platform data directory available".to_string(),
                )
            })
    }

    /// Connection busy timeout.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Fingerprint builder matching these settings.
    #[must_use]
    pub fn fingerprint_builder(&self) -> FingerprintBuilder {
        FingerprintBuilder::new()
            .with_buffer_size(self.buffer_size)
            .with_mmap(self.mmap)
            .with_mmap_threshold(self.mmap_threshold)
    }
}

/// Top-level keys in `content` that [`Config`] does not know, each with the
/// closest known key if one is similar enough.
///
/// Content that does not parse as TOML yields nothing; figment reports the
/// parse error itself.
#[must_use]
pub fn unknown_keys(content: &str) -> Vec<(String, Option<&'static str>)> {
    let Ok(table) = content.parse::<toml::Table>() else {
        return Vec::new();
    };
    table
        .keys()
        .filter(|key| !KNOWN_KEYS.contains(&key.as_str()))
        .map(|key| (key.clone(), suggest(key)))
        .collect()
}

fn suggest(key: &str) -> Option<&'static str> {
    KNOWN_KEYS
        .iter()
        .map(|known| (*known, strsim::jaro_winkler(key, known)))
        .filter(|(_, score)| *score > 0.8)
        .max_by(|a, b| a.1.total_cmp(&b.1))
        .map(|(known, _)| known)
}
