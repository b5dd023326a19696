//! Read handle pool
//!
//! Readers never share a file cursor: each read checks out its own handle
//! and returns it when done. Handles are opened lazily, so the pool grows to
//! the peak number of concurrent readers.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crossbeam::queue::SegQueue;

use super::segment::{Address, SegmentHeader};

pub(crate) struct HandlePool {
    path: PathBuf,
    idle: SegQueue<File>,
}

impl HandlePool {
    pub(crate) fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            idle: SegQueue::new(),
        }
    }

    /// Take an idle handle or open a new one
    pub(crate) fn checkout(&self) -> io::Result<PooledHandle<'_>> {
        let file = match self.idle.pop() {
            Some(file) => file,
            None => File::open(&self.path)?,
        };
        Ok(PooledHandle {
            pool: self,
            file: Some(file),
        })
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.idle.len()
    }
}

/// A handle on loan from the pool; returned on drop
pub(crate) struct PooledHandle<'a> {
    pool: &'a HandlePool,
    file: Option<File>,
}

impl PooledHandle<'_> {
    fn file(&mut self) -> io::Result<&mut File> {
        // Only `drop` takes the file out.
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "pooled handle already released"))
    }
}

impl Read for PooledHandle<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file()?.read(buf)
    }
}

impl Seek for PooledHandle<'_> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.file()?.seek(pos)
    }
}

impl Drop for PooledHandle<'_> {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            self.pool.idle.push(file);
        }
    }
}

// =============================================================================
// Segment Reader
// =============================================================================

/// Streaming reader over the filled bytes of one BOUND segment
pub struct SegmentReader<'a> {
    address: Address,
    header: SegmentHeader,
    inner: io::Take<BufReader<PooledHandle<'a>>>,
}

impl<'a> SegmentReader<'a> {
    pub(crate) fn new(
        address: Address,
        header: SegmentHeader,
        handle: PooledHandle<'a>,
    ) -> Self {
        Self {
            address,
            header,
            inner: BufReader::new(handle).take(header.fill as u64),
        }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn header(&self) -> SegmentHeader {
        self.header
    }

    /// Number of payload bytes this reader yields in total
    pub fn fill(&self) -> u32 {
        self.header.fill
    }

    /// Bytes not read yet
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }
}

impl Read for SegmentReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}
