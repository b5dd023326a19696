//! Value representations
//!
//! The engine is generic over how a value lives in memory. A value must be
//! able to report its exact length before it is written, stream itself
//! into a segment, and rebuild itself from a bounded stream.
//!
//! | Type                          | Memory use                     |
//! |-------------------------------|--------------------------------|
//! | `Vec<u8>`                     | whole value                    |
//! | [`SpillBuffer`](crate::spill::SpillBuffer)   | bounded head, temp-file tail |
//! | [`SpooledValue`](crate::spill::SpooledValue) | none (named temp file)       |

use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::config::Config;

/// Settings a value may need when rebuilding itself from a stream
#[derive(Debug, Clone)]
pub struct ValueOptions {
    /// In-memory head of a spill buffer
    pub spill_buffer_size: usize,

    /// Where overflow and spool files go (`None` = system temp dir)
    pub spill_dir: Option<PathBuf>,
}

impl Default for ValueOptions {
    fn default() -> Self {
        Self {
            spill_buffer_size: 64 * 1024,
            spill_dir: None,
        }
    }
}

impl From<&Config> for ValueOptions {
    fn from(config: &Config) -> Self {
        Self {
            spill_buffer_size: config.spill_buffer_size,
            spill_dir: config.spill_dir.clone(),
        }
    }
}

/// A value the engine can store
pub trait Value: Sized + Send {
    /// Exact number of bytes `write_into` produces
    fn measure_len(&self) -> u64;

    /// Stream the value's bytes
    fn write_into(&self, out: &mut dyn Write) -> io::Result<()>;

    /// Rebuild a value from exactly `len` bytes of `src`
    fn materialize(src: &mut dyn Read, len: u64, options: &ValueOptions) -> io::Result<Self>;
}

impl Value for Vec<u8> {
    fn measure_len(&self) -> u64 {
        self.len() as u64
    }

    fn write_into(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self)
    }

    fn materialize(src: &mut dyn Read, len: u64, _options: &ValueOptions) -> io::Result<Self> {
        let mut value = Vec::with_capacity(len.min(1 << 20) as usize);
        src.take(len).read_to_end(&mut value)?;
        if value.len() as u64 != len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("value truncated: expected {} bytes, got {}", len, value.len()),
            ));
        }
        Ok(value)
    }
}
