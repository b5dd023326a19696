//! Bucket lock table
//!
//! One reader/writer lock per bucket plus a writer count shared by all of
//! them. All counters live under one mutex so a check of "this bucket" and
//! "any bucket" is a single atomic decision.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex, MutexGuard};

/// Counters for observability and tests
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    /// Readers currently holding any bucket
    pub active_readers: u32,
    /// Writers currently active anywhere in the table
    pub active_writers: u32,
    /// Highest `active_writers` ever observed
    pub peak_writers: u32,
}

#[derive(Debug)]
struct LockState {
    readers: Vec<u32>,
    writers: Vec<u8>,
    global_writers: u32,
    total_readers: u32,
    peak_writers: u32,
}

impl LockState {
    fn can_read(&self, bucket: usize) -> bool {
        self.writers[bucket] == 0 && self.global_writers == 0
    }

    fn can_write(&self, bucket: usize) -> bool {
        self.readers[bucket] == 0 && self.writers[bucket] == 0 && self.global_writers == 0
    }

    fn can_write_all(&self) -> bool {
        self.total_readers == 0 && self.global_writers == 0
    }

    fn enter_read(&mut self, bucket: usize) {
        self.readers[bucket] += 1;
        self.total_readers += 1;
    }

    fn enter_write(&mut self, bucket: Option<usize>) {
        if let Some(bucket) = bucket {
            self.writers[bucket] += 1;
        }
        self.global_writers += 1;
        self.peak_writers = self.peak_writers.max(self.global_writers);
    }
}

/// Per-bucket reader/writer locks sharing one write-exclusivity token
pub struct LockTable {
    state: Mutex<LockState>,
    changed: Condvar,
}

impl LockTable {
    pub fn new(bucket_count: usize) -> Self {
        Self {
            state: Mutex::new(LockState {
                readers: vec![0; bucket_count],
                writers: vec![0; bucket_count],
                global_writers: 0,
                total_readers: 0,
                peak_writers: 0,
            }),
            changed: Condvar::new(),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.state.lock().readers.len()
    }

    // =========================================================================
    // Blocking Acquisition
    // =========================================================================

    /// Share `bucket`; blocks while any writer is active in the table
    pub fn read(&self, bucket: usize) -> ReadGuard<'_> {
        let mut state = self.state.lock();
        self.check_bucket(&state, bucket);
        while !state.can_read(bucket) {
            self.changed.wait(&mut state);
        }
        state.enter_read(bucket);
        ReadGuard { table: self, bucket }
    }

    /// Own `bucket`; blocks while it has readers or any writer is active
    pub fn write(&self, bucket: usize) -> WriteGuard<'_> {
        let mut state = self.state.lock();
        self.check_bucket(&state, bucket);
        while !state.can_write(bucket) {
            self.changed.wait(&mut state);
        }
        state.enter_write(Some(bucket));
        WriteGuard { table: self, bucket }
    }

    /// Own every bucket at once; blocks until the table is idle
    pub fn write_all(&self) -> ExclusiveGuard<'_> {
        let mut state = self.state.lock();
        while !state.can_write_all() {
            self.changed.wait(&mut state);
        }
        state.enter_write(None);
        ExclusiveGuard { table: self }
    }

    // =========================================================================
    // Bounded Acquisition
    // =========================================================================

    pub fn try_read(&self, bucket: usize) -> Option<ReadGuard<'_>> {
        self.read_timeout(bucket, Duration::ZERO)
    }

    pub fn try_write(&self, bucket: usize) -> Option<WriteGuard<'_>> {
        self.write_timeout(bucket, Duration::ZERO)
    }

    /// Like [`read`](Self::read) but gives up after `timeout`
    pub fn read_timeout(&self, bucket: usize, timeout: Duration) -> Option<ReadGuard<'_>> {
        let mut state = self.state.lock();
        self.check_bucket(&state, bucket);
        if !self.wait_until(&mut state, timeout, |s| s.can_read(bucket)) {
            return None;
        }
        state.enter_read(bucket);
        Some(ReadGuard { table: self, bucket })
    }

    /// Like [`write`](Self::write) but gives up after `timeout`
    pub fn write_timeout(&self, bucket: usize, timeout: Duration) -> Option<WriteGuard<'_>> {
        let mut state = self.state.lock();
        self.check_bucket(&state, bucket);
        if !self.wait_until(&mut state, timeout, |s| s.can_write(bucket)) {
            return None;
        }
        state.enter_write(Some(bucket));
        Some(WriteGuard { table: self, bucket })
    }

    pub fn stats(&self) -> LockStats {
        let state = self.state.lock();
        LockStats {
            active_readers: state.total_readers,
            active_writers: state.global_writers,
            peak_writers: state.peak_writers,
        }
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn wait_until(
        &self,
        state: &mut MutexGuard<'_, LockState>,
        timeout: Duration,
        ready: impl Fn(&LockState) -> bool,
    ) -> bool {
        let deadline = Instant::now() + timeout;
        while !ready(state) {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            self.changed.wait_for(state, deadline - now);
        }
        true
    }

    fn check_bucket(&self, state: &LockState, bucket: usize) {
        assert!(
            bucket < state.readers.len(),
            "bucket {} out of range for {} buckets",
            bucket,
            state.readers.len()
        );
    }

    fn release_read(&self, bucket: usize) {
        let mut state = self.state.lock();
        state.readers[bucket] -= 1;
        state.total_readers -= 1;
        drop(state);
        self.changed.notify_all();
    }

    fn release_write(&self, bucket: Option<usize>) {
        let mut state = self.state.lock();
        if let Some(bucket) = bucket {
            state.writers[bucket] -= 1;
        }
        state.global_writers -= 1;
        drop(state);
        self.changed.notify_all();
    }
}

// =============================================================================
// Guards
// =============================================================================

/// Shared hold on one bucket; released on drop
pub struct ReadGuard<'a> {
    table: &'a LockTable,
    bucket: usize,
}

impl ReadGuard<'_> {
    pub fn bucket(&self) -> usize {
        self.bucket
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.table.release_read(self.bucket);
    }
}

/// Exclusive hold on one bucket (and the table-wide writer token)
pub struct WriteGuard<'a> {
    table: &'a LockTable,
    bucket: usize,
}

impl WriteGuard<'_> {
    pub fn bucket(&self) -> usize {
        self.bucket
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        self.table.release_write(Some(self.bucket));
    }
}

/// Exclusive hold on the whole table
pub struct ExclusiveGuard<'a> {
    table: &'a LockTable,
}

impl Drop for ExclusiveGuard<'_> {
    fn drop(&mut self) {
        self.table.release_write(None);
    }
}
