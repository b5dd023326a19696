//! Key hashing strategies

/// Maps keys to buckets and decides key equality within a bucket
pub trait KeyHasher: Send + Sync {
    fn hash(&self, key: &[u8]) -> i32;

    fn equals(&self, a: &[u8], b: &[u8]) -> bool {
        a == b
    }

    /// Bucket for `key` in a table of `bucket_count` slots: `|hash| mod N`
    fn slot(&self, key: &[u8], bucket_count: usize) -> usize {
        self.hash(key).unsigned_abs() as usize % bucket_count
    }
}

/// `h = 31·h + byte` over signed bytes, wrapping in `i32`
#[derive(Debug, Clone, Copy, Default)]
pub struct PolynomialHash;

impl KeyHasher for PolynomialHash {
    fn hash(&self, key: &[u8]) -> i32 {
        key.iter()
            .fold(1i32, |h, &b| h.wrapping_mul(31).wrapping_add(b as i8 as i32))
    }
}

/// CRC32 of the key bytes, reinterpreted as `i32`
#[derive(Debug, Clone, Copy, Default)]
pub struct Crc32Hash;

impl KeyHasher for Crc32Hash {
    fn hash(&self, key: &[u8]) -> i32 {
        crc32fast::hash(key) as i32
    }
}
