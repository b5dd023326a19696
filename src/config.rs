//! Configuration for segkv
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{Result, StoreError};

/// Main configuration for a segkv instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the backing files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── segments.dat     (transaction record + segment chain)
    ///     └── slots.tbl        (bucket slot table, bucket_count × 8 bytes)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // Hash Index Configuration
    // -------------------------------------------------------------------------
    /// Number of buckets. Fixed at creation; the index never resizes.
    pub bucket_count: usize,

    /// Reclaim BOUND segments no slot references when opening
    pub reclaim_orphans: bool,

    // -------------------------------------------------------------------------
    // Allocator Configuration
    // -------------------------------------------------------------------------
    /// A free segment larger than `split_factor × required` is split
    /// before reuse
    pub split_factor: u32,

    // -------------------------------------------------------------------------
    // Spill Configuration
    // -------------------------------------------------------------------------
    /// In-memory head size of a spill buffer (in bytes)
    pub spill_buffer_size: usize,

    /// Directory for spill overflow and spooled temp files.
    /// `None` uses the system temp directory.
    pub spill_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./segkv_data"),
            bucket_count: 1024,
            reclaim_orphans: true,
            split_factor: 2,
            spill_buffer_size: 64 * 1024, // 64 KB
            spill_dir: None,
        }
    }
}

impl Config {
    /// Name of the segment file inside `data_dir`
    pub const SEGMENT_FILENAME: &'static str = "segments.dat";

    /// Name of the slot table file inside `data_dir`
    pub const SLOT_FILENAME: &'static str = "slots.tbl";

    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bucket_count == 0 {
            return Err(StoreError::Config("bucket_count must be at least 1".to_string()));
        }
        if self.split_factor < 2 {
            return Err(StoreError::Config(format!(
                "split_factor must be at least 2, got {}",
                self.split_factor
            )));
        }
        if self.spill_buffer_size == 0 {
            return Err(StoreError::Config(
                "spill_buffer_size must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Path of the segment file
    pub fn segment_path(&self) -> PathBuf {
        self.data_dir.join(Self::SEGMENT_FILENAME)
    }

    /// Path of the slot table file
    pub fn slot_path(&self) -> PathBuf {
        self.data_dir.join(Self::SLOT_FILENAME)
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the number of hash buckets
    pub fn bucket_count(mut self, count: usize) -> Self {
        self.config.bucket_count = count;
        self
    }

    /// Enable or disable orphan reclamation on open
    pub fn reclaim_orphans(mut self, enabled: bool) -> Self {
        self.config.reclaim_orphans = enabled;
        self
    }

    /// Set the split threshold factor
    pub fn split_factor(mut self, factor: u32) -> Self {
        self.config.split_factor = factor;
        self
    }

    /// Set the in-memory spill buffer size (in bytes)
    pub fn spill_buffer_size(mut self, size: usize) -> Self {
        self.config.spill_buffer_size = size;
        self
    }

    /// Set the directory used for spill files
    pub fn spill_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.spill_dir = Some(path.into());
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
