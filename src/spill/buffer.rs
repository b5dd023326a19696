//! Spill Buffer
//!
//! A byte buffer whose first `head_capacity` bytes live in memory and whose
//! tail is forwarded to an [`OverflowStore`]. Offsets are continuous across
//! the boundary, so readers never see where memory ends.

use std::fmt;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::allocator::SegmentSource;
use crate::value::{Value, ValueOptions};

use super::overflow::{OverflowStore, TempFileStore};

const COPY_CHUNK: usize = 8 * 1024;

pub struct SpillBuffer {
    head: Vec<u8>,
    head_capacity: usize,
    overflow: Option<Box<dyn OverflowStore>>,
    spill_dir: Option<PathBuf>,
    len: u64,
}

impl SpillBuffer {
    /// Buffer with a `head_capacity`-byte memory head and temp-file overflow
    pub fn new(head_capacity: usize) -> Self {
        Self {
            head: Vec::new(),
            head_capacity,
            overflow: None,
            spill_dir: None,
            len: 0,
        }
    }

    pub fn with_options(options: &ValueOptions) -> Self {
        let mut buffer = Self::new(options.spill_buffer_size);
        buffer.spill_dir = options.spill_dir.clone();
        buffer
    }

    /// Buffer that spills into a caller-supplied store
    pub fn with_overflow(head_capacity: usize, store: Box<dyn OverflowStore>) -> Self {
        let mut buffer = Self::new(head_capacity);
        buffer.overflow = Some(store);
        buffer
    }

    /// Drain `src` to its end, measuring it on the way
    pub fn from_reader(src: &mut dyn Read, options: &ValueOptions) -> io::Result<Self> {
        let mut buffer = Self::with_options(options);
        io::copy(src, &mut buffer)?;
        Ok(buffer)
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn head_capacity(&self) -> usize {
        self.head_capacity
    }

    /// Whether any byte lives outside memory
    pub fn is_spilled(&self) -> bool {
        self.len > self.head_capacity as u64
    }

    /// Bytes currently held in memory
    pub fn resident_bytes(&self) -> usize {
        self.head.len()
    }

    /// Write `buf` at `offset`. Writes may overwrite or extend, never leave
    /// a gap.
    pub fn write_at(&mut self, offset: u64, buf: &[u8]) -> io::Result<()> {
        if offset > self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("write at {} would leave a gap after {}", offset, self.len),
            ));
        }

        let mut written = 0usize;
        if offset < self.head_capacity as u64 {
            let start = offset as usize;
            let n = buf.len().min(self.head_capacity - start);
            if self.head.len() < start + n {
                self.head.resize(start + n, 0);
            }
            self.head[start..start + n].copy_from_slice(&buf[..n]);
            written = n;
        }

        if written < buf.len() {
            let tail_offset = offset + written as u64 - self.head_capacity as u64;
            self.overflow_store()?.write_at(tail_offset, &buf[written..])?;
        }

        self.len = self.len.max(offset + buf.len() as u64);
        Ok(())
    }

    /// Read up to `buf.len()` bytes at `offset`; 0 at the end
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len || buf.is_empty() {
            return Ok(0);
        }
        let wanted = (self.len - offset).min(buf.len() as u64) as usize;

        if offset < self.head.len() as u64 {
            let start = offset as usize;
            let n = wanted.min(self.head.len() - start);
            buf[..n].copy_from_slice(&self.head[start..start + n]);
            return Ok(n);
        }

        match &self.overflow {
            Some(store) => store.read_at(offset - self.head_capacity as u64, &mut buf[..wanted]),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "spill buffer lost its overflow store",
            )),
        }
    }

    /// Sequential reader from offset 0
    pub fn reader(&self) -> SpillReader<'_> {
        SpillReader {
            buffer: self,
            position: 0,
        }
    }

    /// Copy the whole buffer into memory
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.len as usize);
        self.reader().read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn overflow_store(&mut self) -> io::Result<&mut Box<dyn OverflowStore>> {
        let store: Box<dyn OverflowStore> = match self.overflow.take() {
            Some(store) => store,
            None => Box::new(TempFileStore::new(self.spill_dir.as_deref())?),
        };
        Ok(self.overflow.insert(store))
    }
}

impl Write for SpillBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_at(self.len, buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl fmt::Debug for SpillBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpillBuffer")
            .field("len", &self.len)
            .field("head_capacity", &self.head_capacity)
            .field("spilled", &self.is_spilled())
            .finish()
    }
}

/// Sequential reader over a [`SpillBuffer`]
pub struct SpillReader<'a> {
    buffer: &'a SpillBuffer,
    position: u64,
}

impl Read for SpillReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.buffer.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

// =============================================================================
// Value Integration
// =============================================================================

impl Value for SpillBuffer {
    fn measure_len(&self) -> u64 {
        self.len
    }

    fn write_into(&self, out: &mut dyn Write) -> io::Result<()> {
        let mut chunk = [0u8; COPY_CHUNK];
        let mut offset = 0u64;
        while offset < self.len {
            let n = self.read_at(offset, &mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("spill buffer ended at {} of {}", offset, self.len),
                ));
            }
            out.write_all(&chunk[..n])?;
            offset += n as u64;
        }
        Ok(())
    }

    fn materialize(src: &mut dyn Read, len: u64, options: &ValueOptions) -> io::Result<Self> {
        let mut buffer = SpillBuffer::with_options(options);
        let copied = io::copy(&mut src.take(len), &mut buffer)?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("value truncated: expected {} bytes, got {}", len, copied),
            ));
        }
        Ok(buffer)
    }
}

impl SegmentSource for SpillBuffer {
    fn source_len(&self) -> u64 {
        self.len
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        self.write_into(out)
    }
}
