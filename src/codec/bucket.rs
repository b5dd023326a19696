//! Bucket encoding and decoding
//!
//! ```text
//! ┌───────────┬──────────────────────────────────────────────────────┐
//! │ Count (2) │ Pair × Count                                         │
//! └───────────┴──────────────────────────────────────────────────────┘
//! Pair:
//! ┌─────────────┬────────────┬──────────────┬────────────────────────┐
//! │ PairLen (4) │ KeyLen (4) │ Key          │ Value (PairLen-KeyLen) │
//! └─────────────┴────────────┴──────────────┴────────────────────────┘
//! ```
//!
//! All integers little-endian; `PairLen` is key plus value length.

use std::io::{self, Read, Write};

use bytes::{Buf, BufMut};

use crate::allocator::SegmentSource;
use crate::error::{IoContext, Result, StoreError};
use crate::value::{Value, ValueOptions};

/// Size of the pair count prefix
pub const COUNT_SIZE: u64 = 2;

/// PairLen (4) + KeyLen (4)
pub const PAIR_HEADER_SIZE: u64 = 8;

/// Most pairs one bucket can hold
pub const MAX_PAIRS: usize = u16::MAX as usize;

/// One decoded key/value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pair<V> {
    pub key: Vec<u8>,
    pub value: V,
}

impl<V> Pair<V> {
    pub fn new(key: Vec<u8>, value: V) -> Self {
        Self { key, value }
    }
}

// =============================================================================
// Encoding
// =============================================================================

/// Streams a bucket into a segment without building it in memory first
pub struct BucketEncoder<'a, V> {
    pairs: Vec<(&'a [u8], &'a V)>,
    len: u64,
}

impl<'a, V: Value> BucketEncoder<'a, V> {
    pub fn new(pairs: Vec<(&'a [u8], &'a V)>) -> Result<Self> {
        if pairs.len() > MAX_PAIRS {
            return Err(StoreError::WriteFailure(format!(
                "bucket of {} pairs exceeds {}",
                pairs.len(),
                MAX_PAIRS
            )));
        }

        let mut len = COUNT_SIZE;
        for (key, value) in &pairs {
            let pair_len = key.len() as u64 + value.measure_len();
            if pair_len > i32::MAX as u64 {
                return Err(StoreError::ValueTooLarge(pair_len));
            }
            len += PAIR_HEADER_SIZE + pair_len;
        }
        Ok(Self { pairs, len })
    }

    pub fn pair_count(&self) -> usize {
        self.pairs.len()
    }
}

impl<V: Value> SegmentSource for BucketEncoder<'_, V> {
    fn source_len(&self) -> u64 {
        self.len
    }

    fn write_to(&self, out: &mut dyn Write) -> io::Result<()> {
        let mut count = [0u8; COUNT_SIZE as usize];
        (&mut count[..]).put_u16_le(self.pairs.len() as u16);
        out.write_all(&count)?;

        let mut header = [0u8; PAIR_HEADER_SIZE as usize];
        for (key, value) in &self.pairs {
            let pair_len = key.len() as u64 + value.measure_len();
            let mut buf = &mut header[..];
            buf.put_i32_le(pair_len as i32);
            buf.put_i32_le(key.len() as i32);
            out.write_all(&header)?;
            out.write_all(key)?;
            value.write_into(out)?;
        }
        Ok(())
    }
}

/// Encode byte-string pairs into one payload
pub fn encode_pairs(pairs: &[(Vec<u8>, Vec<u8>)]) -> Result<Vec<u8>> {
    let encoder = BucketEncoder::new(
        pairs
            .iter()
            .map(|(key, value)| (key.as_slice(), value))
            .collect(),
    )?;
    let mut payload = Vec::with_capacity(encoder.source_len() as usize);
    encoder
        .write_to(&mut payload)
        .write_ctx("encode bucket")?;
    Ok(payload)
}

// =============================================================================
// Decoding
// =============================================================================

/// Tracks how much of a `fill`-byte bucket has been consumed
struct BucketCursor<'r> {
    src: &'r mut dyn Read,
    remaining: u64,
}

impl<'r> BucketCursor<'r> {
    fn new(src: &'r mut dyn Read, fill: u64) -> Self {
        Self {
            src,
            remaining: fill,
        }
    }

    fn take(&mut self, n: u64, what: &str) -> Result<()> {
        if n > self.remaining {
            return Err(corrupt(format!(
                "{} needs {} bytes, {} left",
                what, n, self.remaining
            )));
        }
        self.remaining -= n;
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        self.take(buf.len() as u64, what)?;
        self.src
            .read_exact(buf)
            .read_ctx(format_args!("read bucket {}", what))
    }

    fn count(&mut self) -> Result<usize> {
        let mut bytes = [0u8; COUNT_SIZE as usize];
        self.read_exact(&mut bytes, "pair count")?;
        Ok((&bytes[..]).get_u16_le() as usize)
    }

    /// Returns (key length, value length)
    fn pair_header(&mut self) -> Result<(u64, u64)> {
        let mut bytes = [0u8; PAIR_HEADER_SIZE as usize];
        self.read_exact(&mut bytes, "pair header")?;
        let mut buf = &bytes[..];
        let pair_len = buf.get_i32_le();
        let key_len = buf.get_i32_le();

        if pair_len < 0 || key_len < 0 || key_len > pair_len {
            return Err(corrupt(format!(
                "pair length {} with key length {}",
                pair_len, key_len
            )));
        }
        Ok((key_len as u64, (pair_len - key_len) as u64))
    }

    fn key(&mut self, len: u64) -> Result<Vec<u8>> {
        let mut key = vec![0u8; len as usize];
        self.read_exact(&mut key, "key")?;
        Ok(key)
    }

    fn value<V: Value>(&mut self, len: u64, options: &ValueOptions) -> Result<V> {
        self.take(len, "value")?;
        V::materialize(&mut *self.src, len, options).read_ctx("read bucket value")
    }

    fn skip(&mut self, len: u64) -> Result<()> {
        self.take(len, "value")?;
        let skipped = io::copy(&mut (&mut *self.src).take(len), &mut io::sink())
            .read_ctx("skip bucket value")?;
        if skipped != len {
            return Err(corrupt(format!(
                "value ended after {} of {} bytes",
                skipped, len
            )));
        }
        Ok(())
    }

    fn finish(self) -> Result<()> {
        if self.remaining != 0 {
            return Err(corrupt(format!("{} trailing bytes", self.remaining)));
        }
        Ok(())
    }
}

/// Decode every pair of a bucket whose payload is `fill` bytes long
pub fn decode_bucket<V: Value>(
    src: &mut dyn Read,
    fill: u64,
    options: &ValueOptions,
) -> Result<Vec<Pair<V>>> {
    if fill == 0 {
        return Ok(Vec::new());
    }

    let mut cursor = BucketCursor::new(src, fill);
    let count = cursor.count()?;
    let mut pairs = Vec::with_capacity(count);
    for _ in 0..count {
        let (key_len, value_len) = cursor.pair_header()?;
        let key = cursor.key(key_len)?;
        let value = cursor.value(value_len, options)?;
        pairs.push(Pair::new(key, value));
    }
    cursor.finish()?;
    Ok(pairs)
}

/// Scan a bucket for `key`, materializing only the matching value
pub fn find_in_bucket<V: Value>(
    src: &mut dyn Read,
    fill: u64,
    key: &[u8],
    equals: impl Fn(&[u8], &[u8]) -> bool,
    options: &ValueOptions,
) -> Result<Option<V>> {
    if fill == 0 {
        return Ok(None);
    }

    let mut cursor = BucketCursor::new(src, fill);
    let count = cursor.count()?;
    for _ in 0..count {
        let (key_len, value_len) = cursor.pair_header()?;
        let candidate = cursor.key(key_len)?;
        if equals(&candidate, key) {
            return cursor.value(value_len, options).map(Some);
        }
        cursor.skip(value_len)?;
    }
    cursor.finish()?;
    Ok(None)
}

/// Decode a byte payload into byte-string pairs
pub fn decode_pairs(payload: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let mut src = payload;
    let pairs: Vec<Pair<Vec<u8>>> =
        decode_bucket(&mut src, payload.len() as u64, &ValueOptions::default())?;
    Ok(pairs.into_iter().map(|p| (p.key, p.value)).collect())
}

fn corrupt(detail: String) -> StoreError {
    StoreError::ReadFailure(format!("corrupt bucket: {}", detail))
}
