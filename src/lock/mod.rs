//! Concurrency Controller Module
//!
//! ## Locking Rules
//! - A reader of bucket `b` waits while `b` has a writer or any writer is
//!   active in the table.
//! - A writer of bucket `b` waits while `b` has readers, `b` has a writer,
//!   or any writer is active in the table.
//!
//! Net effect: readers of different buckets run in parallel, at most one
//! writer runs at a time, and a running writer keeps new readers out of
//! every bucket. Writers are serialized because they share the allocator's
//! free-space index and transaction record.

mod table;

pub use table::{ExclusiveGuard, LockStats, LockTable, ReadGuard, WriteGuard};
