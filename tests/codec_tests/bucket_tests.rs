//! Tests for the bucket codec
//!
//! These tests verify:
//! - Byte layout of an encoded bucket
//! - Encode/decode of mixed key and value sizes
//! - Lookup that skips non-matching values
//! - Corruption reported as read failures

use segkv::codec::{
    decode_bucket, decode_pairs, encode_pairs, find_in_bucket, BucketEncoder, Pair, COUNT_SIZE,
    PAIR_HEADER_SIZE,
};
use segkv::allocator::SegmentSource;
use segkv::spill::SpillBuffer;
use segkv::{FailureKind, StoreError, ValueOptions};

// =============================================================================
// Helper Functions
// =============================================================================

fn pairs(entries: &[(&[u8], &[u8])]) -> Vec<(Vec<u8>, Vec<u8>)> {
    entries
        .iter()
        .map(|(k, v)| (k.to_vec(), v.to_vec()))
        .collect()
}

fn find(payload: &[u8], key: &[u8]) -> Option<Vec<u8>> {
    let mut src = payload;
    find_in_bucket(
        &mut src,
        payload.len() as u64,
        key,
        |a: &[u8], b: &[u8]| a == b,
        &ValueOptions::default(),
    )
    .unwrap()
}

// =============================================================================
// Encoding Tests
// =============================================================================

#[test]
fn test_encoded_layout() {
    let payload = encode_pairs(&pairs(&[(b"ab", b"xyz")])).unwrap();

    let mut expected = vec![1, 0];
    expected.extend_from_slice(&5i32.to_le_bytes());
    expected.extend_from_slice(&2i32.to_le_bytes());
    expected.extend_from_slice(b"abxyz");
    assert_eq!(payload, expected);
}

#[test]
fn test_empty_bucket_encodes_count_only() {
    let payload = encode_pairs(&[]).unwrap();

    assert_eq!(payload, vec![0, 0]);
    assert!(decode_pairs(&payload).unwrap().is_empty());
}

#[test]
fn test_empty_payload_decodes_to_empty_bucket() {
    assert!(decode_pairs(&[]).unwrap().is_empty());
}

#[test]
fn test_round_trip_mixed_sizes() {
    let original = pairs(&[
        (b"", b"empty key"),
        (b"empty value", b""),
        (b"k", &[0xAB; 4096]),
        (&[0u8, 255, 1], b"binary key"),
    ]);

    let payload = encode_pairs(&original).unwrap();

    assert_eq!(decode_pairs(&payload).unwrap(), original);
}

#[test]
fn test_encoder_length_matches_output() {
    let value_a = b"first".to_vec();
    let value_b = vec![7u8; 300];
    let encoder =
        BucketEncoder::new(vec![(&b"a"[..], &value_a), (&b"bb"[..], &value_b)]).unwrap();

    let mut out = Vec::new();
    encoder.write_to(&mut out).unwrap();

    assert_eq!(encoder.pair_count(), 2);
    assert_eq!(
        encoder.source_len(),
        COUNT_SIZE + 2 * PAIR_HEADER_SIZE + 1 + 5 + 2 + 300
    );
    assert_eq!(out.len() as u64, encoder.source_len());
}

#[test]
fn test_spill_buffer_values_decode() {
    let original = pairs(&[(b"big", &[3u8; 5000]), (b"small", b"v")]);
    let payload = encode_pairs(&original).unwrap();
    let options = ValueOptions {
        spill_buffer_size: 1024,
        spill_dir: None,
    };

    let mut src = &payload[..];
    let decoded: Vec<Pair<SpillBuffer>> =
        decode_bucket(&mut src, payload.len() as u64, &options).unwrap();

    assert_eq!(decoded.len(), 2);
    assert!(decoded[0].value.is_spilled());
    assert_eq!(decoded[0].value.to_vec().unwrap(), vec![3u8; 5000]);
    assert_eq!(decoded[1].value.to_vec().unwrap(), b"v");
}

// =============================================================================
// Lookup Tests
// =============================================================================

#[test]
fn test_find_each_key() {
    let payload = encode_pairs(&pairs(&[(b"a", b"1"), (b"b", b"22"), (b"c", b"333")])).unwrap();

    assert_eq!(find(&payload, b"a"), Some(b"1".to_vec()));
    assert_eq!(find(&payload, b"b"), Some(b"22".to_vec()));
    assert_eq!(find(&payload, b"c"), Some(b"333".to_vec()));
    assert_eq!(find(&payload, b"d"), None);
}

#[test]
fn test_find_uses_supplied_equality() {
    let payload = encode_pairs(&pairs(&[(b"Key", b"v")])).unwrap();
    let mut src = &payload[..];

    let found: Option<Vec<u8>> = find_in_bucket(
        &mut src,
        payload.len() as u64,
        b"KEY",
        |a: &[u8], b: &[u8]| a.eq_ignore_ascii_case(b),
        &ValueOptions::default(),
    )
    .unwrap();

    assert_eq!(found, Some(b"v".to_vec()));
}

// =============================================================================
// Corruption Tests
// =============================================================================

#[test]
fn test_truncated_bucket_is_read_failure() {
    let payload = encode_pairs(&pairs(&[(b"key", b"value")])).unwrap();

    let err = decode_pairs(&payload[..payload.len() - 1]).unwrap_err();

    assert!(matches!(err, StoreError::ReadFailure(_)));
}

#[test]
fn test_key_longer_than_pair_is_read_failure() {
    let mut payload = vec![1, 0];
    payload.extend_from_slice(&2i32.to_le_bytes());
    payload.extend_from_slice(&5i32.to_le_bytes());
    payload.extend_from_slice(b"ab");

    assert_eq!(decode_pairs(&payload).unwrap_err().kind(), FailureKind::Read);
}

#[test]
fn test_trailing_bytes_are_read_failure() {
    let mut payload = encode_pairs(&pairs(&[(b"k", b"v")])).unwrap();
    payload.push(0);

    assert!(decode_pairs(&payload).is_err());
}

#[test]
fn test_missing_key_in_corrupt_bucket_is_not_none() {
    let mut payload = vec![2, 0];
    payload.extend_from_slice(&2i32.to_le_bytes());
    payload.extend_from_slice(&1i32.to_le_bytes());
    payload.extend_from_slice(b"kv");
    let mut src = &payload[..];

    let result: segkv::Result<Option<Vec<u8>>> = find_in_bucket(
        &mut src,
        payload.len() as u64,
        b"other",
        |a: &[u8], b: &[u8]| a == b,
        &ValueOptions::default(),
    );

    assert!(result.is_err());
}
