//! Pair Codec Module
//!
//! Serializes the key/value pairs of one hash bucket into a segment payload
//! and back. Pair order carries no meaning; an empty payload is an empty
//! bucket.

mod bucket;

pub use bucket::{
    decode_bucket, decode_pairs, encode_pairs, find_in_bucket, BucketEncoder, Pair, COUNT_SIZE,
    MAX_PAIRS, PAIR_HEADER_SIZE,
};
