//! Segment header layout
//!
//! ```text
//! ┌──────────────┬───────────┬────────────┬──────────────────────┐
//! │ Capacity (4) │ State (1) │  Fill (4)  │  Payload (capacity)  │
//! └──────────────┴───────────┴────────────┴──────────────────────┘
//! ```
//!
//! Integers are little-endian. A segment's successor starts right after its
//! payload, so the file is an implicit forward list.

use std::fmt;
use std::io::{self, Write};

use bytes::{Buf, BufMut};

use super::transaction::TRANSACTION_REGION_SIZE;

/// Header size: Capacity (4) + State (1) + Fill (4) = 9 bytes
pub const SEGMENT_HEADER_SIZE: u64 = 9;

/// Address of the first segment (right after the transaction record)
pub const DATA_START: u64 = TRANSACTION_REGION_SIZE;

/// Largest payload a segment header can describe
pub const MAX_SEGMENT_CAPACITY: u32 = i32::MAX as u32;

// =============================================================================
// Address
// =============================================================================

/// Byte offset of a segment header within the segment file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u64);

impl Address {
    /// Wrap a raw file offset
    pub const fn new(offset: u64) -> Self {
        Self(offset)
    }

    /// Raw file offset of the header
    pub const fn get(self) -> u64 {
        self.0
    }

    /// File offset of the first payload byte
    pub const fn payload_offset(self) -> u64 {
        self.0 + SEGMENT_HEADER_SIZE
    }

    /// Address of the segment that follows one of `capacity` bytes here
    pub const fn next(self, capacity: u32) -> Address {
        Address(self.0 + SEGMENT_HEADER_SIZE + capacity as u64)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

// =============================================================================
// Segment State
// =============================================================================

/// Lifecycle state stored in the header's state byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i8)]
pub enum SegmentState {
    /// Reusable space
    Free = -128,
    /// Holds a live payload
    Bound = -127,
    /// Being written; never visible to readers
    Transitional = -126,
}

impl SegmentState {
    pub fn as_i8(self) -> i8 {
        self as i8
    }

    pub fn from_i8(byte: i8) -> Option<Self> {
        match byte {
            -128 => Some(SegmentState::Free),
            -127 => Some(SegmentState::Bound),
            -126 => Some(SegmentState::Transitional),
            _ => None,
        }
    }
}

// =============================================================================
// Segment Header
// =============================================================================

/// Decoded segment header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub capacity: u32,
    pub state: SegmentState,
    pub fill: u32,
}

impl SegmentHeader {
    pub fn new(capacity: u32, state: SegmentState, fill: u32) -> Self {
        Self { capacity, state, fill }
    }

    /// A FREE header with nothing filled
    pub fn free(capacity: u32) -> Self {
        Self::new(capacity, SegmentState::Free, 0)
    }

    pub fn encode(&self) -> [u8; SEGMENT_HEADER_SIZE as usize] {
        let mut bytes = [0u8; SEGMENT_HEADER_SIZE as usize];
        let mut buf = &mut bytes[..];
        buf.put_i32_le(self.capacity as i32);
        buf.put_i8(self.state.as_i8());
        buf.put_i32_le(self.fill as i32);
        bytes
    }

    /// Decode a header, rejecting negative lengths, unknown states and
    /// fills larger than the capacity
    pub fn decode(bytes: &[u8; SEGMENT_HEADER_SIZE as usize]) -> Result<Self, String> {
        let mut buf = &bytes[..];
        let capacity = buf.get_i32_le();
        let state_byte = buf.get_i8();
        let fill = buf.get_i32_le();

        if capacity < 0 {
            return Err(format!("negative capacity {}", capacity));
        }
        let state = SegmentState::from_i8(state_byte)
            .ok_or_else(|| format!("unknown state byte {}", state_byte))?;
        if fill < 0 || fill > capacity {
            return Err(format!("fill {} outside capacity {}", fill, capacity));
        }

        Ok(Self {
            capacity: capacity as u32,
            state,
            fill: fill as u32,
        })
    }
}

// =============================================================================
// Segment Sources
// =============================================================================

/// Something whose exact length is known up front and that can stream its
/// bytes into a segment
pub trait SegmentSource {
    /// Exact number of bytes `write_to` will produce
    fn source_len(&self) -> u64;

    /// Stream the payload
    fn write_to(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl SegmentSource for [u8] {
    fn source_len(&self) -> u64 {
        self.len() as u64
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self)
    }
}

impl SegmentSource for Vec<u8> {
    fn source_len(&self) -> u64 {
        self.len() as u64
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self)
    }
}

impl<T: SegmentSource + ?Sized> SegmentSource for &T {
    fn source_len(&self) -> u64 {
        (**self).source_len()
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        (**self).write_to(out)
    }
}
