//! Spooled values
//!
//! The unbuffered strategy: copy the whole stream into a uniquely named
//! temp file while counting bytes, then write the segment from that file.
//! The file is deleted when the value drops, on success and failure alike.

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::path::Path;

use tempfile::NamedTempFile;

use crate::allocator::SegmentSource;
use crate::value::{Value, ValueOptions};

const SPOOL_PREFIX: &str = "segkv-spool-";

pub struct SpooledValue {
    file: NamedTempFile,
    len: u64,
}

impl SpooledValue {
    /// Copy `src` to its end into a fresh temp file
    pub fn spool(src: &mut dyn Read, dir: Option<&Path>) -> io::Result<Self> {
        let mut file = Self::create(dir)?;
        let len = io::copy(src, file.as_file_mut())?;
        file.as_file_mut().flush()?;
        Ok(Self { file, len })
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Location of the spool file (gone once the value drops)
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Fresh reader from the start of the spooled bytes
    pub fn reader(&self) -> io::Result<BufReader<File>> {
        Ok(BufReader::new(self.file.reopen()?))
    }

    /// Copy the spooled bytes into memory
    pub fn to_vec(&self) -> io::Result<Vec<u8>> {
        let mut bytes = Vec::with_capacity(self.len as usize);
        self.reader()?.read_to_end(&mut bytes)?;
        Ok(bytes)
    }

    fn create(dir: Option<&Path>) -> io::Result<NamedTempFile> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(SPOOL_PREFIX);
        match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
    }
}

impl fmt::Debug for SpooledValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpooledValue")
            .field("path", &self.file.path())
            .field("len", &self.len)
            .finish()
    }
}

impl Value for SpooledValue {
    fn measure_len(&self) -> u64 {
        self.len
    }

    fn write_into(&self, out: &mut dyn Write) -> io::Result<()> {
        let copied = io::copy(&mut self.reader()?.take(self.len), out)?;
        if copied != self.len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("spool file shrank: expected {} bytes, got {}", self.len, copied),
            ));
        }
        Ok(())
    }

    fn materialize(src: &mut dyn Read, len: u64, options: &ValueOptions) -> io::Result<Self> {
        let mut file = Self::create(options.spill_dir.as_deref())?;
        let copied = io::copy(&mut src.take(len), file.as_file_mut())?;
        if copied != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("value truncated: expected {} bytes, got {}", len, copied),
            ));
        }
        file.as_file_mut().flush()?;
        Ok(Self { file, len })
    }
}

impl SegmentSource for SpooledValue {
    fn source_len(&self) -> u64 {
        self.len
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        self.write_into(out)
    }
}
