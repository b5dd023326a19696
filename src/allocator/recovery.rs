//! Allocator Recovery
//!
//! Rolls back the operation named by the transaction record. Runs once when
//! the allocator opens, before any other operation.
//!
//! | Record  | Rollback                                                  |
//! |---------|-----------------------------------------------------------|
//! | WRITING | mark the target FREE (a partial write or split)           |
//! | MERGE   | restore the merged capacity, zero it, mark it FREE        |
//! | ADD_END | leave a FREE segment of the recorded size at the address  |
//!
//! A record whose checksum does not match was torn while being written.
//! Records precede their mutation, so a torn one is simply discarded.

use std::io::{Read, Seek, SeekFrom, Write};

use tracing::{info, warn};

use crate::error::{IoContext, Result, StoreError};

use super::manager::AllocatorInner;
use super::segment::{Address, SegmentHeader};
use super::transaction::{unseal, RegionContents, Transaction};

/// Result of a recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// The interrupted operation that was undone, if any
    pub rolled_back: Option<Transaction>,

    /// Whether a torn transaction record was discarded
    pub torn_record: bool,
}

impl RecoveryReport {
    /// Nothing was pending
    pub fn is_clean(&self) -> bool {
        self.rolled_back.is_none() && !self.torn_record
    }
}

const ZERO_CHUNK: usize = 8 * 1024;

impl AllocatorInner {
    pub(super) fn validate_data(&mut self) -> Result<RecoveryReport> {
        let region = self.read_region()?;
        let mut report = RecoveryReport::default();

        match unseal(&region) {
            RegionContents::Empty => {
                self.index.clear();
                return Ok(report);
            }
            RegionContents::Torn => {
                warn!("discarding torn transaction record");
                report.torn_record = true;
            }
            RegionContents::Record(bytes) => {
                let pending = Transaction::decode(bytes).map_err(|e| {
                    StoreError::ReadFailure(format!("unreadable transaction record: {}", e))
                })?;
                if let Some(txn) = pending {
                    warn!(?txn, "rolling back interrupted operation");
                    self.roll_back(txn)?;
                    report.rolled_back = Some(txn);
                }
            }
        }

        self.end_transaction()?;
        self.index.clear();
        info!(?report, "segment file recovered");
        Ok(report)
    }

    fn roll_back(&mut self, txn: Transaction) -> Result<()> {
        match txn {
            Transaction::Writing { address } => {
                // A split may have shrunk the capacity below the old fill,
                // so only the capacity field is trusted.
                let capacity = self.read_capacity(address)?;
                self.write_header(address, &SegmentHeader::free(capacity))
            }
            Transaction::Merge { address, size } => {
                // The resize may not have happened yet, so restore it too.
                self.write_header(address, &SegmentHeader::free(size))?;
                self.zero_fill(address.payload_offset(), size as u64)
            }
            Transaction::AddEnd { size, address } => {
                let end = address.next(size).get();
                if self.file_len()? < end {
                    self.file
                        .set_len(end)
                        .write_ctx(format_args!("extend discarded append at {}", address))?;
                }
                self.write_header(address, &SegmentHeader::free(size))
            }
        }
    }

    fn read_capacity(&mut self, address: Address) -> Result<u32> {
        let mut bytes = [0u8; 4];
        self.file
            .seek(SeekFrom::Start(address.get()))
            .write_ctx(format_args!("seek to segment {}", address))?;
        self.file
            .read_exact(&mut bytes)
            .write_ctx(format_args!("read capacity of segment {}", address))?;

        let capacity = i32::from_le_bytes(bytes);
        if capacity < 0 {
            return Err(StoreError::WriteFailure(format!(
                "segment {} has negative capacity {}",
                address, capacity
            )));
        }
        Ok(capacity as u32)
    }

    fn zero_fill(&mut self, offset: u64, len: u64) -> Result<()> {
        let zeros = [0u8; ZERO_CHUNK];
        let at = Address::new(offset);
        self.file
            .seek(SeekFrom::Start(offset))
            .write_ctx(format_args!("seek to {}", at))?;

        let mut remaining = len;
        while remaining > 0 {
            let chunk = remaining.min(ZERO_CHUNK as u64) as usize;
            self.file
                .write_all(&zeros[..chunk])
                .write_ctx(format_args!("zero-fill at {}", at))?;
            remaining -= chunk as u64;
        }
        Ok(())
    }
}
