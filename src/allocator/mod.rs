//! Segment Allocator Module
//!
//! Manages one file as a singly-linked chain of variable-length segments.
//!
//! ## Responsibilities
//! - Reuse FREE segments, splitting oversized ones and merging runs of
//!   undersized neighbours
//! - Append when nothing can be reused
//! - Record every multi-step mutation in the transaction record first, and
//!   roll back an interrupted one on open
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ Transaction Record (1024 bytes)              │
//! ├──────────────────────────────────────────────┤
//! │ Segment                                      │
//! │ ┌──────────┬─────────┬────────┬────────────┐ │
//! │ │ Cap (4)  │ State(1)│Fill (4)│  Payload   │ │
//! │ └──────────┴─────────┴────────┴────────────┘ │
//! ├──────────────────────────────────────────────┤
//! │ Segment ...                                  │
//! └──────────────────────────────────────────────┘
//! ```

mod free_index;
mod manager;
mod pool;
mod recovery;
mod segment;
mod transaction;

pub use manager::{Allocation, AllocatorStats, SegmentAllocator};
pub use pool::SegmentReader;
pub use recovery::RecoveryReport;
pub use segment::{
    Address, SegmentHeader, SegmentSource, SegmentState, DATA_START, MAX_SEGMENT_CAPACITY,
    SEGMENT_HEADER_SIZE,
};
pub use transaction::{Transaction, TRANSACTION_PAYLOAD_LIMIT, TRANSACTION_REGION_SIZE};
