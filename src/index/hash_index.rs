//! Fixed-bucket hash index over the segment allocator
//!
//! ## Write Path
//! ```text
//! put(k, v)
//!   │ write-lock bucket
//!   ▼
//! decode old bucket ──► drop equal key ──► push (k, v)
//!   │
//!   ▼
//! store new bucket (BOUND) ──► swap slot ──► free old segment
//! ```
//!
//! The slot only ever moves from one BOUND segment to another. A crash
//! before the swap leaves an unreferenced BOUND segment, which
//! [`HashIndex::reclaim_orphans`] returns to the free list.

use std::collections::HashSet;
use std::io::{self, Read, Write};
use std::marker::PhantomData;

use tracing::{debug, info, warn};

use crate::allocator::{Address, SegmentAllocator, SegmentState};
use crate::codec::{decode_bucket, find_in_bucket, BucketEncoder, Pair, MAX_PAIRS};
use crate::error::{Result, StoreError};
use crate::lock::{LockStats, LockTable};
use crate::value::{Value, ValueOptions};

use super::hasher::{KeyHasher, PolynomialHash};
use super::slots::SlotTable;

/// Stand-in value for lookups that only need keys; skips the value bytes
struct Present;

impl Value for Present {
    fn measure_len(&self) -> u64 {
        0
    }

    fn write_into(&self, _out: &mut dyn Write) -> io::Result<()> {
        Ok(())
    }

    fn materialize(src: &mut dyn Read, len: u64, _options: &ValueOptions) -> io::Result<Self> {
        let skipped = io::copy(&mut src.take(len), &mut io::sink())?;
        if skipped != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("value truncated: expected {} bytes, got {}", len, skipped),
            ));
        }
        Ok(Present)
    }
}

pub struct HashIndex<V, H = PolynomialHash> {
    allocator: SegmentAllocator,
    slots: SlotTable,
    locks: LockTable,
    hasher: H,
    options: ValueOptions,
    _value: PhantomData<fn() -> V>,
}

impl<V: Value, H: KeyHasher> HashIndex<V, H> {
    pub fn new(
        allocator: SegmentAllocator,
        slots: SlotTable,
        hasher: H,
        options: ValueOptions,
    ) -> Result<Self> {
        if slots.is_empty() {
            return Err(StoreError::Config(
                "hash index needs at least one bucket".to_string(),
            ));
        }

        let locks = LockTable::new(slots.len());
        Ok(Self {
            allocator,
            slots,
            locks,
            hasher,
            options,
            _value: PhantomData,
        })
    }

    /// Bucket `key` hashes to
    pub fn slot_for(&self, key: &[u8]) -> usize {
        self.hasher.slot(key, self.slots.len())
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn get(&self, key: &[u8]) -> Result<Option<V>> {
        let slot = self.slot_for(key);
        let _guard = self.locks.read(slot);
        self.find::<V>(slot, key)
    }

    pub fn exists(&self, key: &[u8]) -> Result<bool> {
        let slot = self.slot_for(key);
        let _guard = self.locks.read(slot);
        Ok(self.find::<Present>(slot, key)?.is_some())
    }

    /// Keys stored in bucket `slot`, in bucket order
    pub fn bucket_keys(&self, slot: usize) -> Result<Vec<Vec<u8>>> {
        let _guard = self.locks.read(slot);
        let pairs: Vec<Pair<Present>> = match self.slots.get(slot)? {
            Some(address) => self.load_bucket(address)?,
            None => Vec::new(),
        };
        Ok(pairs.into_iter().map(|pair| pair.key).collect())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    pub fn put(&self, key: &[u8], value: &V) -> Result<()> {
        let slot = self.slot_for(key);
        let _guard = self.locks.write(slot);

        let old = self.slots.get(slot).map_err(StoreError::into_write_failure)?;
        let mut pairs: Vec<Pair<V>> = match old {
            Some(address) => self
                .load_bucket(address)
                .map_err(StoreError::into_write_failure)?,
            None => Vec::new(),
        };
        pairs.retain(|pair| !self.hasher.equals(&pair.key, key));

        if pairs.len() >= MAX_PAIRS {
            return Err(StoreError::BucketOverflow {
                slot,
                count: pairs.len() + 1,
            });
        }

        let mut entries: Vec<(&[u8], &V)> = pairs
            .iter()
            .map(|pair| (pair.key.as_slice(), &pair.value))
            .collect();
        entries.push((key, value));

        self.replace_bucket(slot, old, entries)
    }

    /// Returns whether `key` was present
    pub fn remove(&self, key: &[u8]) -> Result<bool> {
        let slot = self.slot_for(key);
        let _guard = self.locks.write(slot);

        let Some(old) = self.slots.get(slot).map_err(StoreError::into_write_failure)? else {
            return Ok(false);
        };
        let mut pairs: Vec<Pair<V>> = self
            .load_bucket(old)
            .map_err(StoreError::into_write_failure)?;

        let before = pairs.len();
        pairs.retain(|pair| !self.hasher.equals(&pair.key, key));
        if pairs.len() == before {
            return Ok(false);
        }

        if pairs.is_empty() {
            self.slots.reset(slot)?;
            self.allocator.free(old)?;
            debug!(slot, address = %old, "bucket emptied");
        } else {
            let entries = pairs
                .iter()
                .map(|pair| (pair.key.as_slice(), &pair.value))
                .collect();
            self.replace_bucket(slot, Some(old), entries)?;
        }
        Ok(true)
    }

    /// Empty every bucket. If freeing a bucket fails, both backing files
    /// are reinitialised instead.
    pub fn clear(&self) -> Result<()> {
        let _guard = self.locks.write_all();

        if let Err(err) = self.erase_all() {
            warn!(error = %err, "clear failed, reinitialising backing files");
            self.allocator.clear()?;
            self.slots.reset_all()?;
        }
        Ok(())
    }

    /// Free every BOUND or TRANSITIONAL segment no slot references.
    /// Referenced segments are never freed, whatever their state.
    ///
    /// Returns the number of segments reclaimed.
    pub fn reclaim_orphans(&self) -> Result<usize> {
        let _guard = self.locks.write_all();

        let mut referenced = HashSet::new();
        for (slot, raw) in self.slots.occupied() {
            match self.slots.get(slot) {
                Ok(Some(address)) => {
                    referenced.insert(address);
                }
                Ok(None) => {}
                Err(_) => warn!(slot, raw, "slot holds an invalid address"),
            }
        }

        let mut reclaimed = 0;
        for (address, header) in self.allocator.segments()? {
            let in_use = referenced.remove(&address);
            match header.state {
                SegmentState::Bound if in_use => {}
                SegmentState::Transitional if in_use => {
                    warn!(address = %address, "slot references a TRANSITIONAL segment");
                }
                SegmentState::Bound | SegmentState::Transitional => {
                    self.allocator.free(address)?;
                    reclaimed += 1;
                }
                SegmentState::Free if in_use => {
                    warn!(address = %address, "slot references a FREE segment");
                }
                SegmentState::Free => {}
            }
        }
        for address in referenced {
            warn!(address = %address, "slot references no segment boundary");
        }

        if reclaimed > 0 {
            info!(reclaimed, "reclaimed orphaned segments");
        }
        Ok(reclaimed)
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn bucket_count(&self) -> usize {
        self.slots.len()
    }

    pub fn allocator(&self) -> &SegmentAllocator {
        &self.allocator
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    /// Bucket locks (exposed so callers can observe exclusion)
    pub fn locks(&self) -> &LockTable {
        &self.locks
    }

    pub fn lock_stats(&self) -> LockStats {
        self.locks.stats()
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    pub fn value_options(&self) -> &ValueOptions {
        &self.options
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn find<T: Value>(&self, slot: usize, key: &[u8]) -> Result<Option<T>> {
        let Some(address) = self.slots.get(slot)? else {
            return Ok(None);
        };
        let mut reader = self.allocator.open_segment(address)?;
        let fill = u64::from(reader.fill());
        find_in_bucket(
            &mut reader,
            fill,
            key,
            |a: &[u8], b: &[u8]| self.hasher.equals(a, b),
            &self.options,
        )
    }

    fn load_bucket<T: Value>(&self, address: Address) -> Result<Vec<Pair<T>>> {
        let mut reader = self.allocator.open_segment(address)?;
        let fill = u64::from(reader.fill());
        decode_bucket(&mut reader, fill, &self.options)
    }

    /// Write `entries` to a fresh segment, point `slot` at it, then free
    /// the segment it replaced
    fn replace_bucket(
        &self,
        slot: usize,
        old: Option<Address>,
        entries: Vec<(&[u8], &V)>,
    ) -> Result<()> {
        let encoder = BucketEncoder::new(entries)?;
        let pairs = encoder.pair_count();
        let address = self.allocator.store(&encoder)?;

        if let Err(err) = self.slots.set(slot, address) {
            if let Err(undo) = self.allocator.free(address) {
                warn!(address = %address, error = %undo, "could not free unreferenced bucket");
            }
            return Err(err);
        }

        if let Some(old) = old {
            self.allocator.free(old)?;
        }
        debug!(slot, address = %address, pairs, "bucket rewritten");
        Ok(())
    }

    fn erase_all(&self) -> Result<()> {
        for slot in 0..self.slots.len() {
            if let Some(address) = self.slots.get(slot)? {
                self.slots.reset(slot)?;
                self.allocator.free(address)?;
            }
        }
        Ok(())
    }
}
