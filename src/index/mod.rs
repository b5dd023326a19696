//! Hash Index Module
//!
//! A fixed array of bucket slots in `slots.tbl`, each pointing at one BOUND
//! segment holding a whole bucket. Collisions resolve by linear scan within
//! the bucket; the array is never resized.

mod hash_index;
mod hasher;
mod slots;

pub use hash_index::HashIndex;
pub use hasher::{Crc32Hash, KeyHasher, PolynomialHash};
pub use slots::{SlotTable, EMPTY_SLOT, SLOT_SIZE};
