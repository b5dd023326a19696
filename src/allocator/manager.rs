//! Segment Allocator
//!
//! Owns the segment file, its free-space index and its transaction record.
//!
//! ## Concurrency
//! - Mutation (and anything that touches the free-space index or the
//!   transaction record) goes through `inner`, a single mutex.
//! - Segment reads bypass the mutex and use pooled read-only handles.
//!
//! Higher layers are expected to serialize writers themselves; the mutex
//! only keeps the allocator's own state coherent.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::{IoContext, Result, StoreError};

use super::free_index::{FreeSpaceIndex, SegmentMeta};
use super::pool::{HandlePool, SegmentReader};
use super::recovery::RecoveryReport;
use super::segment::{
    Address, SegmentHeader, SegmentSource, SegmentState, DATA_START, MAX_SEGMENT_CAPACITY,
    SEGMENT_HEADER_SIZE,
};
use super::transaction::{
    empty_region, seal, Transaction, TRANSACTION_PAYLOAD_LIMIT, TRANSACTION_REGION_SIZE,
};

/// Outcome of a free-segment lookup.
///
/// Only `Free` is directly usable; the other variants tell the caller how
/// to make room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// A FREE segment that fits without waste
    Free(Address),

    /// A FREE segment more than `split_factor` times too large
    NeedsSplit { address: Address, size: u32 },

    /// Adjacent FREE segments that fit once merged into one of `total` bytes
    SpaceFragmented { address: Address, total: u32 },

    /// Nothing reusable; append at the end
    OutOfSpace,
}

/// Snapshot of the segment chain
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocatorStats {
    pub segments: usize,
    pub free_segments: usize,
    pub bound_segments: usize,
    pub transitional_segments: usize,
    /// Sum of FREE capacities
    pub free_bytes: u64,
    pub file_len: u64,
}

/// Variable-length segment allocator over one file
pub struct SegmentAllocator {
    path: PathBuf,
    inner: Mutex<AllocatorInner>,
    handles: HandlePool,
    split_factor: u32,
    recovery: RecoveryReport,
}

pub(super) struct AllocatorInner {
    pub(super) file: File,
    pub(super) index: FreeSpaceIndex,
}

enum Search {
    Found(Allocation),
    Exhausted,
    Stale,
}

impl SegmentAllocator {
    /// Open or create a segment file
    ///
    /// A missing or empty file is initialised with a zeroed transaction
    /// record. An interrupted operation left in the record is rolled back
    /// before this returns.
    pub fn open(path: &Path, split_factor: u32) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)
            .write_ctx(format_args!("open segment file {}", path.display()))?;

        let len = file.metadata().read_ctx("stat segment file")?.len();
        if len == 0 {
            file.set_len(TRANSACTION_REGION_SIZE)
                .write_ctx("initialise transaction record")?;
            debug!(path = %path.display(), "created segment file");
        } else if len < TRANSACTION_REGION_SIZE {
            return Err(StoreError::Config(format!(
                "segment file {} is {} bytes, shorter than its {}-byte transaction record",
                path.display(),
                len,
                TRANSACTION_REGION_SIZE
            )));
        }

        let mut inner = AllocatorInner {
            file,
            index: FreeSpaceIndex::new(),
        };
        let recovery = inner.validate_data()?;

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(inner),
            handles: HandlePool::new(path),
            split_factor: split_factor.max(2),
            recovery,
        })
    }

    // =========================================================================
    // Segment Writes
    // =========================================================================

    /// Overwrite the payload of the segment at `address`.
    ///
    /// The segment is left TRANSITIONAL; the caller decides when it becomes
    /// BOUND.
    pub fn write<S: SegmentSource + ?Sized>(&self, address: Address, payload: &S) -> Result<()> {
        self.inner.lock().write(address, payload)
    }

    /// Update only the state byte of a segment
    pub fn write_state(&self, address: Address, state: SegmentState) -> Result<()> {
        self.inner.lock().write_state(address, state)
    }

    /// Rewrite the capacity field of a segment
    pub fn set_segment_size(&self, address: Address, size: u32) -> Result<()> {
        self.inner.lock().set_segment_size(address, size)
    }

    /// First address past the last segment
    pub fn find_end(&self) -> Result<Address> {
        self.inner.lock().find_end()
    }

    /// Append a TRANSITIONAL segment sized exactly to `payload`
    pub fn write_to_end<S: SegmentSource + ?Sized>(&self, payload: &S) -> Result<Address> {
        self.inner.lock().write_to_end(payload)
    }

    /// Look for reusable space for `required` bytes
    pub fn get_free_segment(&self, required: u32) -> Result<Allocation> {
        self.inner.lock().get_free_segment(required, self.split_factor)
    }

    /// Place `payload` in a new BOUND segment, reusing, splitting or merging
    /// free space before falling back to an append.
    pub fn store<S: SegmentSource + ?Sized>(&self, payload: &S) -> Result<Address> {
        self.inner.lock().store(payload, self.split_factor)
    }

    /// Mark a segment FREE
    pub fn free(&self, address: Address) -> Result<()> {
        self.inner.lock().write_state(address, SegmentState::Free)
    }

    /// Truncate the file to an empty chain and drop all caches
    pub fn clear(&self) -> Result<()> {
        self.inner.lock().clear()
    }

    // =========================================================================
    // Segment Reads
    // =========================================================================

    /// Stream the filled bytes of a BOUND segment
    pub fn open_segment(&self, address: Address) -> Result<SegmentReader<'_>> {
        if address.get() < DATA_START {
            return Err(StoreError::ReadFailure(format!(
                "address {} lies inside the transaction record",
                address
            )));
        }

        let mut handle = self.handles.checkout().read_ctx("open read handle")?;
        handle
            .seek(SeekFrom::Start(address.get()))
            .read_ctx(format_args!("seek to segment {}", address))?;

        let mut bytes = [0u8; SEGMENT_HEADER_SIZE as usize];
        handle
            .read_exact(&mut bytes)
            .read_ctx(format_args!("read segment header {}", address))?;
        let header = SegmentHeader::decode(&bytes).map_err(|e| {
            StoreError::ReadFailure(format!("corrupt segment header at {}: {}", address, e))
        })?;

        if header.state != SegmentState::Bound {
            return Err(StoreError::ReadFailure(format!(
                "segment {} is {:?}, not Bound",
                address, header.state
            )));
        }

        Ok(SegmentReader::new(address, header, handle))
    }

    /// Read the filled bytes of a BOUND segment into memory
    pub fn read_segment(&self, address: Address) -> Result<Vec<u8>> {
        let mut reader = self.open_segment(address)?;
        let fill = reader.fill() as usize;
        let mut payload = Vec::with_capacity(fill);
        reader
            .read_to_end(&mut payload)
            .read_ctx(format_args!("read segment {}", address))?;

        if payload.len() != fill {
            return Err(StoreError::ReadFailure(format!(
                "segment {} truncated: expected {} bytes, got {}",
                address,
                fill,
                payload.len()
            )));
        }
        Ok(payload)
    }

    /// Read a segment header regardless of its state
    pub fn read_header(&self, address: Address) -> Result<SegmentHeader> {
        self.inner.lock().read_header(address)
    }

    /// Walk the whole chain from disk
    pub fn segments(&self) -> Result<Vec<(Address, SegmentHeader)>> {
        let mut inner = self.inner.lock();
        inner.index.clear();
        let mut found = Vec::new();
        let end = inner.walk_from(Address::new(DATA_START), |address, header| {
            found.push((address, header))
        })?;
        inner.index.set_end(end);
        Ok(found)
    }

    // =========================================================================
    // Transaction Record
    // =========================================================================

    /// Write raw bytes into the transaction record
    pub fn write_transactional_bytes(&self, bytes: &[u8]) -> Result<()> {
        self.inner.lock().write_transactional_bytes(bytes)
    }

    /// Read the record area of the transaction region
    pub fn read_transactional_bytes(&self) -> Result<Vec<u8>> {
        let mut inner = self.inner.lock();
        let region = inner.read_region()?;
        Ok(region[..TRANSACTION_PAYLOAD_LIMIT].to_vec())
    }

    pub fn start_writing_transaction(&self, address: Address) -> Result<()> {
        self.inner.lock().begin(Transaction::Writing { address })
    }

    pub fn start_merge_transaction(&self, address: Address, size: u32) -> Result<()> {
        self.inner.lock().begin(Transaction::Merge { address, size })
    }

    /// Record an append of `length` bytes at the current end; returns the
    /// address the append will use
    pub fn start_add_transaction(&self, length: u32) -> Result<Address> {
        let mut inner = self.inner.lock();
        let address = inner.find_end()?;
        inner.begin(Transaction::AddEnd {
            size: length,
            address,
        })?;
        Ok(address)
    }

    pub fn end_transaction(&self) -> Result<()> {
        self.inner.lock().end_transaction()
    }

    /// Roll back whatever the transaction record describes, then clear it
    pub fn validate_data(&self) -> Result<RecoveryReport> {
        self.inner.lock().validate_data()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn split_factor(&self) -> u32 {
        self.split_factor
    }

    /// What the recovery pass at open found
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// Idle pooled read handles (for testing)
    pub fn idle_read_handles(&self) -> usize {
        self.handles.idle_count()
    }

    pub fn stats(&self) -> Result<AllocatorStats> {
        let mut inner = self.inner.lock();
        inner.find_end()?;

        let mut stats = AllocatorStats {
            file_len: inner.file_len()?,
            ..Default::default()
        };
        for (_, meta) in inner.index.iter() {
            stats.segments += 1;
            match meta.state {
                SegmentState::Free => {
                    stats.free_segments += 1;
                    stats.free_bytes += meta.capacity as u64;
                }
                SegmentState::Bound => stats.bound_segments += 1,
                SegmentState::Transitional => stats.transitional_segments += 1,
            }
        }
        Ok(stats)
    }
}

// =============================================================================
// Locked Implementation
// =============================================================================

impl AllocatorInner {
    pub(super) fn file_len(&self) -> Result<u64> {
        Ok(self.file.metadata().read_ctx("stat segment file")?.len())
    }

    pub(super) fn read_header(&mut self, address: Address) -> Result<SegmentHeader> {
        if address.get() < DATA_START {
            return Err(StoreError::ReadFailure(format!(
                "address {} lies inside the transaction record",
                address
            )));
        }

        let mut bytes = [0u8; SEGMENT_HEADER_SIZE as usize];
        self.file
            .seek(SeekFrom::Start(address.get()))
            .read_ctx(format_args!("seek to segment {}", address))?;
        self.file
            .read_exact(&mut bytes)
            .read_ctx(format_args!("read segment header {}", address))?;

        SegmentHeader::decode(&bytes).map_err(|e| {
            StoreError::ReadFailure(format!("corrupt segment header at {}: {}", address, e))
        })
    }

    pub(super) fn write_header(&mut self, address: Address, header: &SegmentHeader) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(address.get()))
            .write_ctx(format_args!("seek to segment {}", address))?;
        self.file
            .write_all(&header.encode())
            .write_ctx(format_args!("write segment header {}", address))
    }

    fn write<S: SegmentSource + ?Sized>(&mut self, address: Address, payload: &S) -> Result<()> {
        let header = self
            .read_header(address)
            .map_err(StoreError::into_write_failure)?;
        self.write_payload(address, header.capacity, payload)
    }

    /// Write header (TRANSITIONAL) and payload in one pass
    fn write_payload<S: SegmentSource + ?Sized>(
        &mut self,
        address: Address,
        capacity: u32,
        payload: &S,
    ) -> Result<()> {
        let len = payload.source_len();
        if len > capacity as u64 {
            return Err(StoreError::WriteFailure(format!(
                "payload of {} bytes exceeds capacity {} of segment {}",
                len, capacity, address
            )));
        }

        let header = SegmentHeader::new(capacity, SegmentState::Transitional, len as u32);
        self.file
            .seek(SeekFrom::Start(address.get()))
            .write_ctx(format_args!("seek to segment {}", address))?;

        let written = {
            let mut out = CountingWriter::new(BufWriter::new(&mut self.file));
            out.write_all(&header.encode())
                .write_ctx(format_args!("write segment header {}", address))?;
            payload
                .write_to(&mut out)
                .write_ctx(format_args!("write segment payload {}", address))?;
            out.flush()
                .write_ctx(format_args!("flush segment {}", address))?;
            out.count
        };

        if written != SEGMENT_HEADER_SIZE + len {
            return Err(StoreError::WriteFailure(format!(
                "segment {} payload produced {} bytes, declared {}",
                address,
                written.saturating_sub(SEGMENT_HEADER_SIZE),
                len
            )));
        }

        self.index.record(
            address,
            SegmentMeta {
                state: SegmentState::Transitional,
                capacity,
            },
        );
        Ok(())
    }

    pub(super) fn write_state(&mut self, address: Address, state: SegmentState) -> Result<()> {
        let header = self
            .read_header(address)
            .map_err(StoreError::into_write_failure)?;

        // State byte follows the 4-byte capacity.
        self.file
            .seek(SeekFrom::Start(address.get() + 4))
            .write_ctx(format_args!("seek to segment {}", address))?;
        self.file
            .write_all(&[state.as_i8() as u8])
            .write_ctx(format_args!("write state of segment {}", address))?;

        self.index.record(
            address,
            SegmentMeta {
                state,
                capacity: header.capacity,
            },
        );
        Ok(())
    }

    fn set_segment_size(&mut self, address: Address, size: u32) -> Result<()> {
        if size > MAX_SEGMENT_CAPACITY {
            return Err(StoreError::ValueTooLarge(size as u64));
        }
        let header = self
            .read_header(address)
            .map_err(StoreError::into_write_failure)?;

        self.file
            .seek(SeekFrom::Start(address.get()))
            .write_ctx(format_args!("seek to segment {}", address))?;
        self.file
            .write_all(&(size as i32).to_le_bytes())
            .write_ctx(format_args!("write capacity of segment {}", address))?;

        self.index.forget_range(address, address.next(size));
        self.index.record(
            address,
            SegmentMeta {
                state: header.state,
                capacity: size,
            },
        );
        Ok(())
    }

    /// Visit every complete segment from `start` on; returns the address
    /// after the last one
    pub(super) fn walk_from(
        &mut self,
        start: Address,
        mut visit: impl FnMut(Address, SegmentHeader),
    ) -> Result<Address> {
        let file_len = self.file_len()?;
        let mut cursor = start;

        while cursor.get() + SEGMENT_HEADER_SIZE <= file_len {
            let header = self.read_header(cursor)?;
            let next = cursor.next(header.capacity);
            if next.get() > file_len {
                break;
            }
            self.index.record(
                cursor,
                SegmentMeta {
                    state: header.state,
                    capacity: header.capacity,
                },
            );
            visit(cursor, header);
            cursor = next;
        }

        if cursor.get() != file_len {
            warn!(
                end = cursor.get(),
                file_len, "segment chain ends before end of file; trailing bytes will be overwritten"
            );
        }
        Ok(cursor)
    }

    pub(super) fn find_end(&mut self) -> Result<Address> {
        let start = match self.index.end() {
            Some(end) => end,
            None => {
                self.index.clear();
                Address::new(DATA_START)
            }
        };
        let end = self.walk_from(start, |_, _| {})?;
        self.index.set_end(end);
        Ok(end)
    }

    fn write_to_end<S: SegmentSource + ?Sized>(&mut self, payload: &S) -> Result<Address> {
        let len = checked_len(payload)?;
        let address = self.find_end()?;
        self.write_payload(address, len, payload)?;
        self.index.set_end(address.next(len));
        Ok(address)
    }

    // =========================================================================
    // Free Space Search
    // =========================================================================

    fn get_free_segment(&mut self, required: u32, split_factor: u32) -> Result<Allocation> {
        // A stale cache is dropped and rebuilt once; a second miss means
        // there is nothing to reuse.
        for _ in 0..2 {
            if !self.index.is_complete() {
                self.find_end()?;
            }
            match self.search(required, split_factor)? {
                Search::Found(allocation) => return Ok(allocation),
                Search::Exhausted => return Ok(Allocation::OutOfSpace),
                Search::Stale => {
                    debug!(required, "free-space index disagreed with disk; rescanning");
                }
            }
        }
        Ok(Allocation::OutOfSpace)
    }

    fn search(&mut self, required: u32, split_factor: u32) -> Result<Search> {
        let threshold = required.max(1) as u64 * split_factor as u64;

        if let Some((address, capacity)) = self.index.best_fit(required) {
            if !self.confirm_free(address, capacity)? {
                self.index.clear();
                return Ok(Search::Stale);
            }
            let remainder = capacity - capacity / 2;
            let allocation = if capacity as u64 > threshold && remainder as u64 > SEGMENT_HEADER_SIZE {
                Allocation::NeedsSplit {
                    address,
                    size: capacity,
                }
            } else {
                Allocation::Free(address)
            };
            return Ok(Search::Found(allocation));
        }

        if let Some(run) = self.index.find_run(required) {
            for &(address, capacity) in &run.members {
                if !self.confirm_free(address, capacity)? {
                    self.index.clear();
                    return Ok(Search::Stale);
                }
            }
            return Ok(Search::Found(Allocation::SpaceFragmented {
                address: run.first,
                total: run.total,
            }));
        }

        Ok(Search::Exhausted)
    }

    /// Check a cached FREE entry against the header on disk
    fn confirm_free(&mut self, address: Address, capacity: u32) -> Result<bool> {
        let header = self.read_header(address)?;
        Ok(header.state == SegmentState::Free && header.capacity == capacity)
    }

    // =========================================================================
    // Allocation Procedures
    // =========================================================================

    fn store<S: SegmentSource + ?Sized>(&mut self, payload: &S, split_factor: u32) -> Result<Address> {
        let len = checked_len(payload)?;

        match self.get_free_segment(len, split_factor)? {
            Allocation::Free(address) => {
                self.begin(Transaction::Writing { address })?;
                self.write(address, payload)?;
                self.write_state(address, SegmentState::Bound)?;
                self.end_transaction()?;
                debug!(%address, len, "reused free segment");
                Ok(address)
            }
            Allocation::NeedsSplit { address, size } => self.split_and_write(address, size, payload),
            Allocation::SpaceFragmented { address, total } => {
                self.merge_and_write(address, total, payload)
            }
            Allocation::OutOfSpace => self.append(payload, len),
        }
    }

    fn split_and_write<S: SegmentSource + ?Sized>(
        &mut self,
        address: Address,
        size: u32,
        payload: &S,
    ) -> Result<Address> {
        let first = size / 2;
        let second = size - first;
        let remainder = address.next(first);
        let remainder_capacity = second - SEGMENT_HEADER_SIZE as u32;

        self.begin(Transaction::Writing { address })?;
        // The remainder header must exist before the original shrinks onto it.
        self.write_header(remainder, &SegmentHeader::free(remainder_capacity))?;
        self.index.record(
            remainder,
            SegmentMeta {
                state: SegmentState::Free,
                capacity: remainder_capacity,
            },
        );
        self.set_segment_size(address, first)?;
        self.write_payload(address, first, payload)?;
        self.write_state(address, SegmentState::Bound)?;
        self.end_transaction()?;

        debug!(%address, size, first, %remainder, "split free segment");
        Ok(address)
    }

    fn merge_and_write<S: SegmentSource + ?Sized>(
        &mut self,
        address: Address,
        total: u32,
        payload: &S,
    ) -> Result<Address> {
        self.begin(Transaction::Merge {
            address,
            size: total,
        })?;
        self.set_segment_size(address, total)?;
        self.write_payload(address, total, payload)?;
        self.write_state(address, SegmentState::Bound)?;
        self.end_transaction()?;

        debug!(%address, total, "merged fragmented free run");
        Ok(address)
    }

    fn append<S: SegmentSource + ?Sized>(&mut self, payload: &S, len: u32) -> Result<Address> {
        let address = self.find_end()?;
        self.begin(Transaction::AddEnd { size: len, address })?;
        let written = self.write_to_end(payload)?;
        if written != address {
            return Err(StoreError::WriteFailure(format!(
                "append landed at {} instead of {}",
                written, address
            )));
        }
        self.write_state(address, SegmentState::Bound)?;
        self.end_transaction()?;

        debug!(%address, len, "appended segment");
        Ok(address)
    }

    fn clear(&mut self) -> Result<()> {
        self.file.set_len(0).write_ctx("truncate segment file")?;
        self.file
            .set_len(TRANSACTION_REGION_SIZE)
            .write_ctx("initialise transaction record")?;
        self.index.clear();
        Ok(())
    }

    // =========================================================================
    // Transaction Record
    // =========================================================================

    pub(super) fn read_region(&mut self) -> Result<Vec<u8>> {
        let mut region = vec![0u8; TRANSACTION_REGION_SIZE as usize];
        self.file
            .seek(SeekFrom::Start(0))
            .read_ctx("seek to transaction record")?;
        self.file
            .read_exact(&mut region)
            .read_ctx("read transaction record")?;
        Ok(region)
    }

    fn write_region(&mut self, region: &[u8]) -> Result<()> {
        self.file
            .seek(SeekFrom::Start(0))
            .write_ctx("seek to transaction record")?;
        self.file
            .write_all(region)
            .write_ctx("write transaction record")
    }

    fn write_transactional_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        if bytes.len() > TRANSACTION_PAYLOAD_LIMIT {
            return Err(StoreError::WriteFailure(format!(
                "transaction record of {} bytes exceeds {} bytes",
                bytes.len(),
                TRANSACTION_PAYLOAD_LIMIT
            )));
        }
        self.write_region(&seal(bytes))
    }

    pub(super) fn begin(&mut self, txn: Transaction) -> Result<()> {
        self.write_transactional_bytes(&txn.encode())
    }

    pub(super) fn end_transaction(&mut self) -> Result<()> {
        self.write_region(&empty_region())
    }
}

fn checked_len<S: SegmentSource + ?Sized>(payload: &S) -> Result<u32> {
    let len = payload.source_len();
    if len > MAX_SEGMENT_CAPACITY as u64 {
        return Err(StoreError::ValueTooLarge(len));
    }
    Ok(len as u32)
}

/// Counts bytes passed through so a source cannot lie about its length
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
