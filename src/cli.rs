//! Command-line interface definitions for prodsync.
//!
//! Global options (verbosity, color, config file) apply to every subcommand.
//! Every `sync` option has a configuration default, so a bare `prodsync sync`
//! is a complete run.
//!
//! # Example
//!
//! ```bash
//! # Reconcile the cache using the configured paths
//! prodsync sync
//!
//! # Point at explicit databases and report as JSON
//! prodsync sync --datastore products.db --cache cache.db --output json
//!
//! # Show what a run would do without hashing anything
//! prodsync plan
//!
//! # Build a key by hand
//! prodsync key encode "NRN 1" NSN-7
//! ```

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Keep a product-metadata cache in sync with its datastore.
///
/// prodsync removes cache entries whose datastore record is gone, caches new
/// records with a BLAKE3 fingerprint of their backing file, and rewrites
/// entries whose file has drifted.
#[derive(Debug, Parser)]
#[command(name = "prodsync")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR")]
    pub no_color: bool,

    /// Print fatal errors as a JSON object on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file (defaults to the platform config directory)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Reconcile the cache against the datastore
    Sync(SyncArgs),
    /// Show which keys would be removed, added, or checked
    Plan(PlanArgs),
    /// Encode or decode product keys
    #[command(subcommand)]
    Key(KeyCommand),
    /// Print every cache entry as JSON, one per line
    Dump(DumpArgs),
}

/// Database locations shared by every subcommand that opens them.
#[derive(Debug, Clone, Default, Args)]
pub struct StoreArgs {
    /// Datastore SQLite database
    #[arg(long, value_name = "PATH")]
    pub datastore: Option<PathBuf>,

    /// Cache SQLite database
    #[arg(long, value_name = "PATH")]
    pub cache: Option<PathBuf>,

    /// Busy timeout for database connections, in milliseconds
    #[arg(long, value_name = "MS")]
    pub timeout_ms: Option<u64>,
}

/// Arguments for the sync subcommand.
#[derive(Debug, Args)]
pub struct SyncArgs {
    #[command(flatten)]
    pub stores: StoreArgs,

    /// Worker threads for the add and update phases (default: 4)
    #[arg(long, value_name = "N")]
    pub workers: Option<usize>,

    /// Evaluate every record but leave the cache untouched
    #[arg(long)]
    pub dry_run: bool,

    /// Summary format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,

    /// Hide progress bars
    #[arg(long)]
    pub no_progress: bool,

    /// Never memory-map backing files
    #[arg(long)]
    pub no_mmap: bool,

    /// Files at least this large are memory-mapped (e.g. 64MiB)
    ///
    /// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub mmap_threshold: Option<u64>,
}

/// Arguments for the plan subcommand.
#[derive(Debug, Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub stores: StoreArgs,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub output: OutputFormat,
}

/// Arguments for the dump subcommand.
#[derive(Debug, Args)]
pub struct DumpArgs {
    /// Cache SQLite database
    #[arg(long, value_name = "PATH")]
    pub cache: Option<PathBuf>,
}

/// Key codec subcommands.
#[derive(Debug, Subcommand)]
pub enum KeyCommand {
    /// Build a key from a primary and secondary identifier
    Encode {
        /// Primary identifier (NRN)
        primary: String,
        /// Secondary identifier (NSN)
        secondary: String,
    },
    /// Split a key into its primary and secondary identifiers
    Decode {
        /// Key in `secondary+primary` form
        key: String,
    },
}

/// Output format for summaries and plans.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text
    #[default]
    Text,
    /// JSON for scripting
    Json,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

/// Parse a human-readable size string into bytes.
///
/// Supports suffixes: B, KB, KiB, MB, MiB, GB, GiB, TB, TiB
/// Case-insensitive. Numbers without suffix are treated as bytes.
///
/// # Examples
///
/// ```
/// use prodsync::cli::parse_size;
///
/// assert_eq!(parse_size("4096").unwrap(), 4096);
/// assert_eq!(parse_size("64MiB").unwrap(), 64 * 1024 * 1024);
/// assert_eq!(parse_size("1GB").unwrap(), 1_000_000_000);
/// ```
/// # Errors
///
/// Returns an error if the string is empty, contains an invalid number,
/// a negative number, or an unknown size suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Size cannot be empty".to_string());
    }
    if s.starts_with('-') {
        return Err("Size cannot be negative".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| !c.is_ascii_digit() && c != '.') {
        Some(idx) => (&s[..idx], s[idx..].trim().to_uppercase()),
        None => (s, String::new()),
    };

    let num: f64 = num_str
        .parse()
        .map_err(|_| format!("Invalid number: '{num_str}'"))?;

    let multiplier: u64 = match suffix.as_str() {
        "" | "B" => 1,
        "KB" | "K" => 1_000,
        "KIB" => 1_024,
        "MB" | "M" => 1_000_000,
        "MIB" => 1_048_576,
        "GB" | "G" => 1_000_000_000,
        "GIB" => 1_073_741_824,
        "TB" | "T" => 1_000_000_000_000,
        "TIB" => 1_099_511_627_776,
        _ => return Err(format!("Unknown size suffix: '{suffix}'")),
    };

    Ok((num * multiplier as f64) as u64)
}
