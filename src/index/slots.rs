//! Slot table file
//!
//! ```text
//! ┌──────────────┬──────────────┬─────┬──────────────┐
//! │ Slot 0 (i64) │ Slot 1 (i64) │ ... │ Slot N-1     │
//! └──────────────┴──────────────┴─────┴──────────────┘
//! ```
//!
//! Each slot is a little-endian segment address or `-1` for an empty
//! bucket. A fresh table is filled with `0xFF` bytes. An in-memory mirror
//! serves lookups; every update hits the file before the mirror.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use bytes::Buf;
use parking_lot::Mutex;
use tracing::debug;

use crate::allocator::{Address, DATA_START};
use crate::error::{IoContext, Result, StoreError};

/// Marker for an empty slot
pub const EMPTY_SLOT: i64 = -1;

/// Bytes per slot
pub const SLOT_SIZE: u64 = 8;

pub struct SlotTable {
    path: PathBuf,
    file: Mutex<File>,
    slots: Vec<AtomicI64>,
}

impl SlotTable {
    /// Open the table at `path`, creating it with `bucket_count` empty
    /// slots if missing. An existing file of any other size is rejected.
    pub fn open(path: &Path, bucket_count: usize) -> Result<Self> {
        let expected = bucket_count as u64 * SLOT_SIZE;
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .write_ctx(format_args!("open slot table {}", path.display()))?;

        let len = file.metadata().read_ctx("stat slot table")?.len();
        if len == 0 {
            file.write_all(&vec![0xFF; expected as usize])
                .write_ctx("initialise slot table")?;
            debug!(path = %path.display(), bucket_count, "created slot table");
        } else if len != expected {
            return Err(StoreError::Config(format!(
                "slot table {} is {} bytes, expected {} for {} buckets",
                path.display(),
                len,
                expected,
                bucket_count
            )));
        }

        let mut raw = Vec::with_capacity(expected as usize);
        file.seek(SeekFrom::Start(0)).read_ctx("seek slot table")?;
        file.read_to_end(&mut raw).read_ctx("read slot table")?;

        let mut buf = &raw[..];
        let slots = (0..bucket_count)
            .map(|_| AtomicI64::new(buf.get_i64_le()))
            .collect();

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
            slots,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Address held by `slot`, or `None` when the bucket is empty
    pub fn get(&self, slot: usize) -> Result<Option<Address>> {
        let raw = self
            .slots
            .get(slot)
            .ok_or_else(|| StoreError::ReadFailure(format!("slot {} out of range", slot)))?
            .load(Ordering::Acquire);

        match raw {
            EMPTY_SLOT => Ok(None),
            raw if raw >= DATA_START as i64 => Ok(Some(Address::new(raw as u64))),
            raw => Err(StoreError::ReadFailure(format!(
                "slot {} holds invalid address {}",
                slot, raw
            ))),
        }
    }

    pub fn set(&self, slot: usize, address: Address) -> Result<()> {
        self.store(slot, address.get() as i64)
    }

    /// Mark `slot` empty
    pub fn reset(&self, slot: usize) -> Result<()> {
        self.store(slot, EMPTY_SLOT)
    }

    /// Mark every slot empty
    pub fn reset_all(&self) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(0)).write_ctx("seek slot table")?;
        file.write_all(&vec![0xFF; self.slots.len() * SLOT_SIZE as usize])
            .write_ctx("reset slot table")?;
        for slot in &self.slots {
            slot.store(EMPTY_SLOT, Ordering::Release);
        }
        Ok(())
    }

    /// Occupied slots and their addresses
    pub fn occupied(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.slots
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .enumerate()
            .filter(|&(_, raw)| raw != EMPTY_SLOT)
    }

    fn store(&self, slot: usize, raw: i64) -> Result<()> {
        let cell = self.slots.get(slot).ok_or_else(|| {
            StoreError::WriteFailure(format!(
                "slot {} is past the end of a {}-slot table",
                slot,
                self.slots.len()
            ))
        })?;

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(slot as u64 * SLOT_SIZE))
            .write_ctx(format_args!("seek slot {}", slot))?;
        file.write_all(&raw.to_le_bytes())
            .write_ctx(format_args!("write slot {}", slot))?;
        cell.store(raw, Ordering::Release);
        Ok(())
    }
}
