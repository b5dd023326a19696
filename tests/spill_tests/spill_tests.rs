//! Tests for stream measurement
//!
//! These tests verify:
//! - SpillBuffer reads and writes across the memory/overflow boundary
//! - Memory stays bounded by the head size
//! - Pluggable overflow stores
//! - SpooledValue counts bytes and deletes its file on drop

use std::io::{Cursor, Read};

use segkv::spill::{OverflowStore, SpillBuffer, SpooledValue, TempFileStore, VecStore};
use segkv::{Value, ValueOptions};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

// =============================================================================
// SpillBuffer Tests
// =============================================================================

#[test]
fn test_small_value_stays_in_memory() {
    let mut buffer = SpillBuffer::new(64);
    std::io::Write::write_all(&mut buffer, b"short").unwrap();

    assert_eq!(buffer.len(), 5);
    assert!(!buffer.is_spilled());
    assert_eq!(buffer.to_vec().unwrap(), b"short");
}

#[test]
fn test_large_value_spills_and_reads_back() {
    let data = pattern(10_000);
    let options = ValueOptions {
        spill_buffer_size: 1000,
        spill_dir: None,
    };

    let buffer = SpillBuffer::from_reader(&mut Cursor::new(&data), &options).unwrap();

    assert_eq!(buffer.len(), 10_000);
    assert!(buffer.is_spilled());
    assert_eq!(buffer.resident_bytes(), 1000);
    assert_eq!(buffer.to_vec().unwrap(), data);
}

#[test]
fn test_read_at_crosses_boundary() {
    let data = pattern(300);
    let mut buffer = SpillBuffer::with_overflow(100, Box::new(VecStore::new()));
    buffer.write_at(0, &data).unwrap();

    let mut window = [0u8; 50];
    let mut filled = 0;
    while filled < window.len() {
        let n = buffer
            .read_at(75 + filled as u64, &mut window[filled..])
            .unwrap();
        assert!(n > 0);
        filled += n;
    }

    assert_eq!(&window[..], &data[75..125]);
}

#[test]
fn test_write_at_overwrites_across_boundary() {
    let mut buffer = SpillBuffer::with_overflow(8, Box::new(VecStore::new()));
    buffer.write_at(0, &[0u8; 16]).unwrap();

    buffer.write_at(6, &[1u8; 4]).unwrap();

    let mut expected = vec![0u8; 16];
    expected[6..10].copy_from_slice(&[1u8; 4]);
    assert_eq!(buffer.len(), 16);
    assert_eq!(buffer.to_vec().unwrap(), expected);
}

#[test]
fn test_write_at_rejects_gap() {
    let mut buffer = SpillBuffer::new(8);
    buffer.write_at(0, b"abc").unwrap();

    assert!(buffer.write_at(10, b"x").is_err());
}

#[test]
fn test_spill_dir_is_used() {
    let temp_dir = TempDir::new().unwrap();
    let options = ValueOptions {
        spill_buffer_size: 4,
        spill_dir: Some(temp_dir.path().to_path_buf()),
    };
    let data = pattern(100);

    let buffer = SpillBuffer::from_reader(&mut &data[..], &options).unwrap();

    assert!(buffer.is_spilled());
    assert_eq!(buffer.to_vec().unwrap(), data);
}

#[test]
fn test_spill_goes_to_configured_dir_only() {
    let temp_dir = TempDir::new().unwrap();
    let options = ValueOptions {
        spill_buffer_size: 4,
        spill_dir: Some(temp_dir.path().join("missing")),
    };

    // Fits in the head, so the directory is never touched.
    let small = SpillBuffer::from_reader(&mut &b"abc"[..], &options).unwrap();
    assert_eq!(small.to_vec().unwrap(), b"abc");

    // Overflow must be created inside the missing directory, not elsewhere.
    let err = SpillBuffer::from_reader(&mut &pattern(100)[..], &options).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}

#[test]
fn test_spill_buffer_as_value() {
    let data = pattern(5000);
    let options = ValueOptions {
        spill_buffer_size: 512,
        spill_dir: None,
    };

    let buffer = SpillBuffer::materialize(&mut &data[..], 5000, &options).unwrap();
    let mut out = Vec::new();
    buffer.write_into(&mut out).unwrap();

    assert_eq!(buffer.measure_len(), 5000);
    assert_eq!(out, data);
}

#[test]
fn test_materialize_short_stream_fails() {
    let err = SpillBuffer::materialize(&mut &b"abc"[..], 10, &ValueOptions::default()).unwrap_err();

    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

// =============================================================================
// Overflow Store Tests
// =============================================================================

#[test]
fn test_temp_file_store_random_access() {
    let mut store = TempFileStore::new(None).unwrap();
    store.write_at(0, b"hello world").unwrap();
    store.write_at(6, b"WORLD").unwrap();

    let mut buf = [0u8; 11];
    let n = store.read_at(0, &mut buf).unwrap();

    assert_eq!(n, 11);
    assert_eq!(&buf, b"hello WORLD");
    assert_eq!(store.len(), 11);
    assert_eq!(store.read_at(11, &mut buf).unwrap(), 0);
}

// =============================================================================
// SpooledValue Tests
// =============================================================================

#[test]
fn test_spool_counts_bytes() {
    let data = pattern(20_000);

    let spooled = SpooledValue::spool(&mut &data[..], None).unwrap();

    assert_eq!(spooled.len(), 20_000);
    assert_eq!(spooled.to_vec().unwrap(), data);
}

#[test]
fn test_spool_file_removed_on_drop() {
    let temp_dir = TempDir::new().unwrap();
    let spooled = SpooledValue::spool(&mut &b"transient"[..], Some(temp_dir.path())).unwrap();
    let path = spooled.path().to_path_buf();
    assert!(path.exists());
    assert!(path.starts_with(temp_dir.path()));

    drop(spooled);

    assert!(!path.exists());
}

#[test]
fn test_spooled_value_round_trip() {
    let data = pattern(3000);
    let spooled = SpooledValue::materialize(&mut &data[..], 3000, &ValueOptions::default()).unwrap();

    let mut out = Vec::new();
    spooled.write_into(&mut out).unwrap();
    let mut reread = Vec::new();
    spooled.reader().unwrap().read_to_end(&mut reread).unwrap();

    assert_eq!(out, data);
    assert_eq!(reread, data);
}
