//! BLAKE3 fingerprint builder with streaming and memory-mapped paths.
//!
//! # Overview
//!
//! Small files are streamed through a fixed-size buffer. Files at or above
//! the mmap threshold are mapped read-only and hashed with blake3's
//! rayon-parallel update, which is considerably faster for multi-gigabyte
//! images. Both paths produce identical digests.

use chrono::{DateTime, Utc};
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use super::{ContentFingerprint, FingerprintError};

/// Default read buffer for streaming hashes (64 KiB).
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Default size at which hashing switches to a memory map (64 MiB).
pub const DEFAULT_MMAP_THRESHOLD: u64 = 64 * 1024 * 1024;

/// Builds [`ContentFingerprint`]s for files on disk.
///
/// Stateless apart from tuning knobs, so one builder can be shared across
/// worker threads.
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    buffer_size: usize,
    use_mmap: bool,
    mmap_threshold: u64,
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FingerprintBuilder {
    /// Create a builder with default buffer size and mmap threshold.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            use_mmap: true,
            mmap_threshold: DEFAULT_MMAP_THRESHOLD,
        }
    }

    /// Set the streaming buffer size (minimum 4 KiB).
    #[must_use]
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(4096);
        self
    }

    /// Enable or disable memory-mapped hashing.
    #[must_use]
    pub fn with_mmap(mut self, enabled: bool) -> Self {
        self.use_mmap = enabled;
        self
    }

    /// Set the file size at which memory-mapped hashing kicks in.
    #[must_use]
    pub fn with_mmap_threshold(mut self, threshold: u64) -> Self {
        self.mmap_threshold = threshold;
        self
    }

    /// Fingerprint the file at `path`.
    ///
    /// # Errors
    ///
    /// - [`FingerprintError::NotFound`] if `path` is empty or does not exist
    /// - [`FingerprintError::Access`] for any other I/O fault, including
    ///   `path` naming something other than a regular file
    pub fn build(&self, path: &Path) -> Result<ContentFingerprint, FingerprintError> {
        if path.as_os_str().is_empty() {
            return Err(FingerprintError::NotFound(path.to_path_buf()));
        }

        let metadata = std::fs::metadata(path).map_err(|e| classify(path, e))?;
        if !metadata.is_file() {
            return Err(FingerprintError::Access {
                path: path.to_path_buf(),
                source: io::Error::new(io::ErrorKind::InvalidInput, "not a regular file"),
            });
        }
        let modified_at: DateTime<Utc> = metadata
            .modified()
            .map_err(|e| classify(path, e))?
            .into();

        let (digest, size_bytes) = if self.use_mmap && metadata.len() >= self.mmap_threshold {
            self.hash_mmap(path)?
        } else {
            self.hash_streaming(path)?
        };

        log::trace!("Fingerprinted {} ({} bytes)", path.display(), size_bytes);

        Ok(ContentFingerprint {
            path: path.to_path_buf(),
            size_bytes,
            modified_at,
            digest_hex: digest.to_hex().to_string(),
        })
    }

    fn hash_streaming(&self, path: &Path) -> Result<(blake3::Hash, u64), FingerprintError> {
        let mut file = File::open(path).map_err(|e| classify(path, e))?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = vec![0u8; self.buffer_size];
        loop {
            match file.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    hasher.update(&buffer[..n]);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(classify(path, e)),
            }
        }
        Ok((hasher.finalize(), hasher.count()))
    }

    fn hash_mmap(&self, path: &Path) -> Result<(blake3::Hash, u64), FingerprintError> {
        let mut hasher = blake3::Hasher::new();
        match hasher.update_mmap_rayon(path) {
            Ok(_) => Ok((hasher.finalize(), hasher.count())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(classify(path, e)),
            Err(e) => {
                log::debug!(
                    "Memory-mapped hash failed for {} ({}), falling back to streaming",
                    path.display(),
                    e
                );
                self.hash_streaming(path)
            }
        }
    }
}

fn classify(path: &Path, err: io::Error) -> FingerprintError {
    if err.kind() == io::ErrorKind::NotFound {
        FingerprintError::NotFound(path.to_path_buf())
    } else {
        FingerprintError::Access {
            path: path.to_path_buf(),
            source: err,
        }
    }
}
