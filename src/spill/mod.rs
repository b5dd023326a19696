//! Spill Module
//!
//! Measures values that arrive as unbounded streams. A segment can only be
//! reserved once its exact length is known, so stream values are first
//! drained into one of these holders.
//!
//! ## Strategies
//! - [`SpillBuffer`]: fixed memory head, tail forwarded to an
//!   [`OverflowStore`] (temp file by default). Peak memory is bounded by
//!   the head size whatever the value size.
//! - [`SpooledValue`]: the whole stream goes to a named temp file, removed
//!   on drop.

mod buffer;
mod overflow;
mod spool;

pub use buffer::{SpillBuffer, SpillReader};
pub use overflow::{OverflowStore, TempFileStore, VecStore};
pub use spool::SpooledValue;
