//! Overflow stores
//!
//! Linear random-access byte stores that take the part of a spill buffer
//! that does not fit in memory.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

/// Random-access storage for spilled bytes
pub trait OverflowStore: Send + Sync {
    /// Write `buf` at `offset`, growing the store as needed
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()>;

    /// Read up to `buf.len()` bytes at `offset`; 0 at the end
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Highest offset written so far
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// =============================================================================
// Temp File Store
// =============================================================================

/// Anonymous temp file; removed by the OS when dropped
pub struct TempFileStore {
    file: Mutex<File>,
    len: u64,
}

impl TempFileStore {
    /// Create in the system temp directory, or in `dir` if given
    pub fn new(dir: Option<&Path>) -> io::Result<Self> {
        let file = match dir {
            Some(dir) => tempfile::tempfile_in(dir)?,
            None => tempfile::tempfile()?,
        };
        Ok(Self {
            file: Mutex::new(file),
            len: 0,
        })
    }
}

impl OverflowStore for TempFileStore {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(buf)?;
        self.len = self.len.max(offset + buf.len() as u64);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let wanted = (self.len - offset).min(buf.len() as u64) as usize;
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;
        file.read(&mut buf[..wanted])
    }

    fn len(&self) -> u64 {
        self.len
    }
}

// =============================================================================
// Memory Store
// =============================================================================

/// Heap-backed store, for callers that only want the bounded-head
/// bookkeeping
#[derive(Debug, Default)]
pub struct VecStore {
    bytes: Vec<u8>,
}

impl VecStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OverflowStore for VecStore {
    fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + buf.len();
        if self.bytes.len() < end {
            self.bytes.resize(end, 0);
        }
        self.bytes[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let start = offset as usize;
        if start >= self.bytes.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.bytes.len() - start);
        buf[..n].copy_from_slice(&self.bytes[start..start + n]);
        Ok(n)
    }

    fn len(&self) -> u64 {
        self.bytes.len() as u64
    }
}
