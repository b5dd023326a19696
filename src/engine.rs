//! Engine Module
//!
//! Wires the backing files, the allocator and the hash index together.
//!
//! ## Responsibilities
//! - Create the data directory and both backing files
//! - Run crash recovery before serving any request
//! - Reclaim segments orphaned by an interrupted bucket rewrite
//! - Expose the key/value contract

use std::fs;
use std::io::Read;
use std::path::Path;

use tracing::{info, warn};

use crate::allocator::{AllocatorStats, RecoveryReport, SegmentAllocator};
use crate::config::Config;
use crate::error::{IoContext, Result};
use crate::index::{HashIndex, KeyHasher, PolynomialHash, SlotTable};
use crate::lock::LockStats;
use crate::spill::{SpillBuffer, SpooledValue};
use crate::value::{Value, ValueOptions};

/// The key/value contract shared by every engine flavour
///
/// Each call either completes or fails with a read or write failure; none
/// succeed partially.
pub trait KeyValueStore<V> {
    fn exists(&self, key: &[u8]) -> Result<bool>;
    fn get(&self, key: &[u8]) -> Result<Option<V>>;
    fn put(&self, key: &[u8], value: &V) -> Result<()>;
    /// Returns whether the key was present
    fn remove(&self, key: &[u8]) -> Result<bool>;
    fn clear(&self) -> Result<()>;
}

/// Values held fully in memory
pub type ByteEngine = Engine<Vec<u8>>;

/// Values held in a bounded memory head with a temp-file tail
pub type SpillEngine = Engine<SpillBuffer>;

/// Values held entirely in named temp files
pub type SpoolEngine = Engine<SpooledValue>;

/// The main storage engine
///
/// ## Concurrency Model
///
/// - **Reads** (get/exists): take the read lock of one bucket; reads of
///   different buckets run in parallel.
/// - **Writes** (put/remove): take the write lock of one bucket, which
///   also excludes every other writer and every new reader.
/// - **clear**: waits for the whole table to go idle.
pub struct Engine<V = Vec<u8>, H = PolynomialHash> {
    config: Config,
    index: HashIndex<V, H>,
}

impl<V: Value, H: KeyHasher + Default> Engine<V, H> {
    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Validate the config and create the data directory
    /// 2. Open the segment file and roll back any interrupted operation
    /// 3. Open the slot table (its size must match `bucket_count`)
    /// 4. Reclaim orphaned segments
    pub fn open(config: Config) -> Result<Self> {
        Self::open_with_hasher(config, H::default())
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        let config = Config {
            data_dir: path.to_path_buf(),
            ..Config::default()
        };
        Self::open(config)
    }
}

impl<V: Value, H: KeyHasher> Engine<V, H> {
    pub fn open_with_hasher(config: Config, hasher: H) -> Result<Self> {
        // Step 1: Validate before touching the filesystem
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        if let Some(spill_dir) = &config.spill_dir {
            fs::create_dir_all(spill_dir)?;
        }

        // Step 2: Segment file (recovery runs inside open)
        let allocator = SegmentAllocator::open(&config.segment_path(), config.split_factor)?;
        let report = allocator.recovery_report();
        if report.is_clean() {
            info!(path = %allocator.path().display(), "segment file opened");
        } else {
            warn!(
                rolled_back = ?report.rolled_back,
                torn_record = report.torn_record,
                "segment file recovered"
            );
        }

        // Step 3: Slot table
        let slots = SlotTable::open(&config.slot_path(), config.bucket_count)?;

        // Step 4: Index, then orphan sweep
        let index = HashIndex::new(allocator, slots, hasher, ValueOptions::from(&config))?;
        if config.reclaim_orphans {
            index.reclaim_orphans()?;
        }

        info!(
            data_dir = %config.data_dir.display(),
            bucket_count = config.bucket_count,
            "engine ready"
        );
        Ok(Self { config, index })
    }

    // =========================================================================
    // Key/Value Operations
    // =========================================================================

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        self.index.exists(key)
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<V>> {
        self.index.get(key)
    }

    pub fn put(&self, key: &[u8], value: &V) -> Result<()> {
        self.index.put(key, value)
    }

    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        self.index.remove(key)
    }

    pub fn clear(&self) -> Result<()> {
        self.index.clear()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn index(&self) -> &HashIndex<V, H> {
        &self.index
    }

    /// What crash recovery found when this engine was opened
    pub fn recovery_report(&self) -> &RecoveryReport {
        self.index.allocator().recovery_report()
    }

    pub fn allocator_stats(&self) -> Result<AllocatorStats> {
        self.index.allocator().stats()
    }

    pub fn lock_stats(&self) -> LockStats {
        self.index.lock_stats()
    }
}

// =============================================================================
// Streaming Puts
// =============================================================================

impl<H: KeyHasher> Engine<SpillBuffer, H> {
    /// Store a value of unknown length read from `src`; returns its length
    pub fn put_reader(&self, key: &[u8], src: &mut dyn Read) -> Result<u64> {
        let value = SpillBuffer::from_reader(src, self.index.value_options())
            .write_ctx("buffer value stream")?;
        self.index.put(key, &value)?;
        Ok(value.len())
    }
}

impl<H: KeyHasher> Engine<SpooledValue, H> {
    /// Store a value of unknown length read from `src`; returns its length
    pub fn put_reader(&self, key: &[u8], src: &mut dyn Read) -> Result<u64> {
        let spill_dir = self.index.value_options().spill_dir.as_deref();
        let value = SpooledValue::spool(src, spill_dir).write_ctx("spool value stream")?;
        self.index.put(key, &value)?;
        Ok(value.len())
    }
}

impl<V: Value, H: KeyHasher> KeyValueStore<V> for Engine<V, H> {
    fn exists(&self, key: &[u8]) -> Result<bool> {
        Engine::exists(self, key)
    }

    fn get(&self, key: &[u8]) -> Result<Option<V>> {
        Engine::get(self, key)
    }

    fn put(&self, key: &[u8], value: &V) -> Result<()> {
        Engine::put(self, key, value)
    }

    fn remove(&self, key: &[u8]) -> Result<bool> {
        Engine::remove(self, key)
    }

    fn clear(&self) -> Result<()> {
        Engine::clear(self)
    }
}
