//! Free-space index
//!
//! An in-memory cache of segment metadata keyed by address, plus a
//! capacity-ordered view of the FREE segments. It is advisory: callers
//! re-check headers on disk before trusting an entry and drop the whole
//! cache when the file disagrees.

use std::collections::{BTreeMap, BTreeSet};

use super::segment::{Address, SegmentState, SEGMENT_HEADER_SIZE};

/// Cached metadata for one segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentMeta {
    pub state: SegmentState,
    pub capacity: u32,
}

/// A contiguous run of FREE segments that together can hold a payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FreeRun {
    pub first: Address,
    /// Capacity of the merged segment (absorbed headers included)
    pub total: u32,
    pub members: Vec<(Address, u32)>,
}

#[derive(Debug, Default)]
pub struct FreeSpaceIndex {
    /// Every known segment, in file order
    segments: BTreeMap<Address, SegmentMeta>,

    /// capacity → FREE segments of that capacity
    free_by_size: BTreeMap<u32, BTreeSet<Address>>,

    /// FREE segments in file order
    free_addresses: BTreeSet<Address>,

    /// First address past the last segment, once the chain has been walked
    end: Option<Address>,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record (or replace) the metadata of a segment
    pub fn record(&mut self, address: Address, meta: SegmentMeta) {
        self.forget(address);
        if meta.state == SegmentState::Free {
            self.free_by_size.entry(meta.capacity).or_default().insert(address);
            self.free_addresses.insert(address);
        }
        self.segments.insert(address, meta);
    }

    /// Drop a segment from the cache
    pub fn forget(&mut self, address: Address) {
        if let Some(old) = self.segments.remove(&address) {
            if old.state == SegmentState::Free {
                self.unlink_free(address, old.capacity);
            }
        }
    }

    /// Drop every cached segment strictly inside `(start, end)`.
    /// Used when a segment grows over its successors.
    pub fn forget_range(&mut self, start: Address, end: Address) {
        if end <= start {
            return;
        }
        let swallowed: Vec<Address> = self
            .segments
            .range(Address::new(start.get() + 1)..end)
            .map(|(addr, _)| *addr)
            .collect();
        for address in swallowed {
            self.forget(address);
        }
    }

    /// Smallest FREE segment with capacity ≥ `required`; lowest address
    /// wins a tie
    pub fn best_fit(&self, required: u32) -> Option<(Address, u32)> {
        self.free_by_size
            .range(required..)
            .find_map(|(size, addrs)| addrs.iter().next().map(|addr| (*addr, *size)))
    }

    /// First run of adjacent FREE segments whose merged capacity reaches
    /// `required`. Single segments are not runs.
    pub fn find_run(&self, required: u32) -> Option<FreeRun> {
        let mut members: Vec<(Address, u32)> = Vec::new();
        let mut total: u64 = 0;

        for &address in &self.free_addresses {
            let capacity = match self.segments.get(&address) {
                Some(meta) => meta.capacity,
                None => continue,
            };

            let contiguous = members
                .last()
                .map(|&(prev, prev_cap)| prev.next(prev_cap) == address)
                .unwrap_or(false);

            if contiguous {
                total += SEGMENT_HEADER_SIZE + capacity as u64;
                members.push((address, capacity));
            } else {
                members.clear();
                members.push((address, capacity));
                total = capacity as u64;
            }

            if members.len() >= 2 && total >= required as u64 {
                if total > super::segment::MAX_SEGMENT_CAPACITY as u64 {
                    members.clear();
                    continue;
                }
                return Some(FreeRun {
                    first: members[0].0,
                    total: total as u32,
                    members,
                });
            }
        }
        None
    }

    pub fn end(&self) -> Option<Address> {
        self.end
    }

    pub fn set_end(&mut self, end: Address) {
        self.end = Some(end);
    }

    /// True once the whole chain has been walked into the cache
    pub fn is_complete(&self) -> bool {
        self.end.is_some()
    }

    /// Forget everything; the next lookup rescans the file
    pub fn clear(&mut self) {
        self.segments.clear();
        self.free_by_size.clear();
        self.free_addresses.clear();
        self.end = None;
    }

    pub fn iter(&self) -> impl Iterator<Item = (Address, SegmentMeta)> + '_ {
        self.segments.iter().map(|(addr, meta)| (*addr, *meta))
    }

    fn unlink_free(&mut self, address: Address, capacity: u32) {
        if let Some(set) = self.free_by_size.get_mut(&capacity) {
            set.remove(&address);
            if set.is_empty() {
                self.free_by_size.remove(&capacity);
            }
        }
        self.free_addresses.remove(&address);
    }
}
