//! Transaction record
//!
//! A single fixed region at the start of the segment file describing at
//! most one in-flight multi-step mutation.
//!
//! ```text
//! ┌─────────┬──────────────────────────────┬─────────────┬───────────┐
//! │ Tag (1) │ Fields (tag dependent)       │ zero fill   │ CRC32 (4) │
//! └─────────┴──────────────────────────────┴─────────────┴───────────┘
//!   0         1                                            1020..1024
//! ```
//!
//! | Tag  | Meaning | Fields                               |
//! |------|---------|--------------------------------------|
//! | -125 | WRITING | address: i64                         |
//! | -124 | MERGE   | address: i64, size: i32              |
//! | -123 | ADD_END | size: i32, address: i64              |
//!
//! An all-zero region means no operation is in flight. The checksum covers
//! bytes `0..1020`.

use bytes::{Buf, BufMut};

use super::segment::Address;

/// Size of the reserved region at file offset 0
pub const TRANSACTION_REGION_SIZE: u64 = 1024;

/// Bytes of the region available to a record (the rest is the checksum)
pub const TRANSACTION_PAYLOAD_LIMIT: usize = TRANSACTION_REGION_SIZE as usize - 4;

pub(crate) const TAG_WRITING: i8 = -125;
pub(crate) const TAG_MERGE: i8 = -124;
pub(crate) const TAG_ADD_END: i8 = -123;

/// A pending operation, recorded before it starts and cleared after it ends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transaction {
    /// Overwriting (or splitting) the segment at `address`
    Writing { address: Address },

    /// Merging a run of free segments into one of `size` bytes at `address`
    Merge { address: Address, size: u32 },

    /// Appending a segment of `size` bytes at `address`, the end of the file
    AddEnd { size: u32, address: Address },
}

impl Transaction {
    /// Encode tag and fields (without padding or checksum)
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(13);
        match *self {
            Transaction::Writing { address } => {
                buf.put_i8(TAG_WRITING);
                buf.put_i64_le(address.get() as i64);
            }
            Transaction::Merge { address, size } => {
                buf.put_i8(TAG_MERGE);
                buf.put_i64_le(address.get() as i64);
                buf.put_i32_le(size as i32);
            }
            Transaction::AddEnd { size, address } => {
                buf.put_i8(TAG_ADD_END);
                buf.put_i32_le(size as i32);
                buf.put_i64_le(address.get() as i64);
            }
        }
        buf
    }

    /// Decode a record payload. A zero tag means "no transaction".
    pub fn decode(bytes: &[u8]) -> Result<Option<Self>, String> {
        let mut buf = bytes;
        if !buf.has_remaining() {
            return Ok(None);
        }

        let tag = buf.get_i8();
        let needed = match tag {
            0 => return Ok(None),
            TAG_WRITING => 8,
            TAG_MERGE | TAG_ADD_END => 12,
            other => return Err(format!("unknown transaction tag {}", other)),
        };
        if buf.remaining() < needed {
            return Err(format!(
                "transaction tag {} needs {} bytes, found {}",
                tag,
                needed,
                buf.remaining()
            ));
        }

        let txn = match tag {
            TAG_WRITING => Transaction::Writing {
                address: decode_address(buf.get_i64_le())?,
            },
            TAG_MERGE => {
                let address = decode_address(buf.get_i64_le())?;
                let size = decode_size(buf.get_i32_le())?;
                Transaction::Merge { address, size }
            }
            _ => {
                let size = decode_size(buf.get_i32_le())?;
                let address = decode_address(buf.get_i64_le())?;
                Transaction::AddEnd { size, address }
            }
        };
        Ok(Some(txn))
    }

    /// Address the rollback of this transaction touches
    pub fn address(&self) -> Address {
        match *self {
            Transaction::Writing { address }
            | Transaction::Merge { address, .. }
            | Transaction::AddEnd { address, .. } => address,
        }
    }
}

fn decode_address(raw: i64) -> Result<Address, String> {
    if raw < 0 {
        return Err(format!("negative transaction address {}", raw));
    }
    Ok(Address::new(raw as u64))
}

fn decode_size(raw: i32) -> Result<u32, String> {
    if raw < 0 {
        return Err(format!("negative transaction size {}", raw));
    }
    Ok(raw as u32)
}

// =============================================================================
// Region Sealing
// =============================================================================

/// What a transaction region currently holds
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum RegionContents<'a> {
    /// All zero
    Empty,
    /// Non-empty but the checksum does not match
    Torn,
    /// Checksummed record bytes
    Record(&'a [u8]),
}

/// Zero-pad `payload` to the record area and append its checksum
pub(crate) fn seal(payload: &[u8]) -> Vec<u8> {
    debug_assert!(payload.len() <= TRANSACTION_PAYLOAD_LIMIT);

    let mut region = vec![0u8; TRANSACTION_REGION_SIZE as usize];
    region[..payload.len()].copy_from_slice(payload);
    let crc = crc32fast::hash(&region[..TRANSACTION_PAYLOAD_LIMIT]);
    (&mut region[TRANSACTION_PAYLOAD_LIMIT..]).put_u32_le(crc);
    region
}

/// The all-zero region
pub(crate) fn empty_region() -> Vec<u8> {
    vec![0u8; TRANSACTION_REGION_SIZE as usize]
}

pub(crate) fn unseal(region: &[u8]) -> RegionContents<'_> {
    if region.iter().all(|&b| b == 0) {
        return RegionContents::Empty;
    }
    if region.len() != TRANSACTION_REGION_SIZE as usize {
        return RegionContents::Torn;
    }

    let (payload, mut trailer) = region.split_at(TRANSACTION_PAYLOAD_LIMIT);
    let stored = trailer.get_u32_le();
    if crc32fast::hash(payload) != stored {
        return RegionContents::Torn;
    }
    RegionContents::Record(payload)
}
