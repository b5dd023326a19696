//! Tests for Engine
//!
//! These tests verify:
//! - Engine lifecycle (open/reopen) and file creation
//! - Config validation and slot table size checks
//! - The KeyValueStore contract for every value flavour
//! - Streaming puts through spill buffers and spool files
//! - Recovery and orphan reclamation at open
//! - Concurrent access patterns

use std::fs;
use std::io::Cursor;
use std::sync::Arc;
use std::thread;

use segkv::allocator::{SegmentState, DATA_START};
use segkv::{
    ByteEngine, Config, Crc32Hash, Engine, FailureKind, KeyValueStore, SpillEngine, SpoolEngine,
    StoreError,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config(temp_dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp_dir.path())
        .bucket_count(64)
        .spill_buffer_size(256)
        .build()
}

fn setup_temp_engine() -> (TempDir, ByteEngine) {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let engine = ByteEngine::open(test_config(&temp_dir)).unwrap();
    (temp_dir, engine)
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 256) as u8).collect()
}

/// Exercise the contract through the trait only
fn exercise_store<S: KeyValueStore<Vec<u8>>>(store: &S) {
    assert!(!store.exists(b"k").unwrap());
    store.put(b"k", &b"v".to_vec()).unwrap();
    assert!(store.exists(b"k").unwrap());
    assert_eq!(store.get(b"k").unwrap(), Some(b"v".to_vec()));
    assert!(store.remove(b"k").unwrap());
    store.put(b"x", &b"y".to_vec()).unwrap();
    store.clear().unwrap();
    assert_eq!(store.get(b"x").unwrap(), None);
}

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_engine_open_creates_files() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");
    let config = Config::builder().data_dir(&data_dir).bucket_count(16).build();

    let _engine = ByteEngine::open(config).unwrap();

    assert!(data_dir.join("segments.dat").exists());
    assert_eq!(
        fs::metadata(data_dir.join("slots.tbl")).unwrap().len(),
        16 * 8
    );
    assert_eq!(
        fs::metadata(data_dir.join("segments.dat")).unwrap().len(),
        DATA_START
    );
}

#[test]
fn test_open_path_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();

    let engine = ByteEngine::open_path(temp_dir.path()).unwrap();

    assert_eq!(engine.config().bucket_count, 1024);
    assert_eq!(engine.index().bucket_count(), 1024);
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path().join("never"))
        .bucket_count(0)
        .build();

    let err = ByteEngine::open(config).err().unwrap();

    assert_eq!(err.kind(), FailureKind::Config);
    assert!(!temp_dir.path().join("never").exists());
}

#[test]
fn test_bucket_count_mismatch_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    drop(ByteEngine::open(test_config(&temp_dir)).unwrap());

    let config = Config::builder()
        .data_dir(temp_dir.path())
        .bucket_count(128)
        .build();
    let err = ByteEngine::open(config).err().unwrap();

    assert!(matches!(err, StoreError::Config(_)));
}

#[test]
fn test_data_persists_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = ByteEngine::open(test_config(&temp_dir)).unwrap();
        for i in 0..100u32 {
            engine
                .put(format!("key{}", i).as_bytes(), &pattern(i as usize))
                .unwrap();
        }
        engine.remove(b"key50").unwrap();
    }

    let engine = ByteEngine::open(test_config(&temp_dir)).unwrap();

    assert!(engine.recovery_report().is_clean());
    for i in 0..100u32 {
        let expected = if i == 50 { None } else { Some(pattern(i as usize)) };
        assert_eq!(engine.get(format!("key{}", i).as_bytes()).unwrap(), expected);
    }
}

// =============================================================================
// Key/Value Contract Tests
// =============================================================================

#[test]
fn test_byte_engine_contract() {
    let (_temp, engine) = setup_temp_engine();
    exercise_store(&engine);
}

#[test]
fn test_crc_hasher_engine_contract() {
    let temp_dir = TempDir::new().unwrap();
    let engine: Engine<Vec<u8>, Crc32Hash> = Engine::open(test_config(&temp_dir)).unwrap();
    exercise_store(&engine);
}

#[test]
fn test_many_keys_few_buckets() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .bucket_count(4)
        .build();
    let engine = ByteEngine::open(config).unwrap();

    for i in 0..200u32 {
        engine.put(&i.to_be_bytes(), &i.to_le_bytes().to_vec()).unwrap();
    }
    for i in (0..200u32).step_by(2) {
        assert!(engine.remove(&i.to_be_bytes()).unwrap());
    }

    for i in 0..200u32 {
        let expected = (i % 2 == 1).then(|| i.to_le_bytes().to_vec());
        assert_eq!(engine.get(&i.to_be_bytes()).unwrap(), expected);
    }
}

#[test]
fn test_overwrite_reuses_space() {
    let (_temp, engine) = setup_temp_engine();

    for round in 0..20u8 {
        engine.put(b"hot", &vec![round; 100]).unwrap();
    }

    let stats = engine.allocator_stats().unwrap();
    assert_eq!(stats.bound_segments, 1);
    assert!(stats.segments <= 2);
    assert_eq!(engine.get(b"hot").unwrap(), Some(vec![19u8; 100]));
}

// =============================================================================
// Streaming Tests
// =============================================================================

#[test]
fn test_spill_engine_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let engine = SpillEngine::open(test_config(&temp_dir)).unwrap();
    let data = pattern(10_000);

    let len = engine.put_reader(b"stream", &mut Cursor::new(&data)).unwrap();
    assert_eq!(len, 10_000);

    let value = engine.get(b"stream").unwrap().unwrap();
    assert!(value.is_spilled());
    assert_eq!(value.to_vec().unwrap(), data);
    assert!(engine.exists(b"stream").unwrap());
}

#[test]
fn test_spool_engine_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let spill_dir = temp_dir.path().join("spill");
    let config = Config::builder()
        .data_dir(temp_dir.path().join("data"))
        .bucket_count(8)
        .spill_dir(&spill_dir)
        .build();
    let engine = SpoolEngine::open(config).unwrap();
    let data = pattern(50_000);

    engine.put_reader(b"a", &mut &data[..]).unwrap();
    engine.put_reader(b"b", &mut &b"small"[..]).unwrap();

    // Spool files from the puts are gone once the puts return.
    assert_eq!(fs::read_dir(&spill_dir).unwrap().count(), 0);

    let value = engine.get(b"a").unwrap().unwrap();
    assert_eq!(value.len(), 50_000);
    assert_eq!(value.to_vec().unwrap(), data);
    assert_eq!(engine.get(b"b").unwrap().unwrap().to_vec().unwrap(), b"small");

    drop(value);
    assert_eq!(fs::read_dir(&spill_dir).unwrap().count(), 0);
}

#[test]
fn test_stream_and_bytes_share_format() {
    let temp_dir = TempDir::new().unwrap();
    let data = pattern(4000);
    {
        let engine = SpillEngine::open(test_config(&temp_dir)).unwrap();
        engine.put_reader(b"k", &mut &data[..]).unwrap();
    }

    let engine = ByteEngine::open(test_config(&temp_dir)).unwrap();

    assert_eq!(engine.get(b"k").unwrap(), Some(data));
}

// =============================================================================
// Recovery Tests
// =============================================================================

#[test]
fn test_orphan_reclaimed_on_open() {
    let temp_dir = TempDir::new().unwrap();
    let orphan = {
        let engine = ByteEngine::open(test_config(&temp_dir)).unwrap();
        engine.put(b"key", &b"value".to_vec()).unwrap();
        // A bucket written but never linked to a slot.
        engine.index().allocator().store(&vec![1u8; 40]).unwrap()
    };

    let engine = ByteEngine::open(test_config(&temp_dir)).unwrap();

    assert_eq!(
        engine.index().allocator().read_header(orphan).unwrap().state,
        SegmentState::Free
    );
    assert_eq!(engine.allocator_stats().unwrap().bound_segments, 1);
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
}

#[test]
fn test_orphans_kept_when_reclaim_disabled() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .bucket_count(8)
        .reclaim_orphans(false)
        .build();
    let orphan = {
        let engine = ByteEngine::open(config.clone()).unwrap();
        engine.index().allocator().store(&vec![1u8; 40]).unwrap()
    };

    let engine = ByteEngine::open(config).unwrap();

    assert_eq!(
        engine.index().allocator().read_header(orphan).unwrap().state,
        SegmentState::Bound
    );
}

#[test]
fn test_referenced_segment_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .bucket_count(2)
        .build();
    let (slot, address) = {
        let engine = ByteEngine::open(config.clone()).unwrap();
        engine.put(b"a", &b"1".to_vec()).unwrap();
        let slot = engine.index().slot_for(b"a");
        let address = engine.index().slots().get(slot).unwrap().unwrap();
        engine
            .index()
            .allocator()
            .write_state(address, SegmentState::Transitional)
            .unwrap();
        (slot, address)
    };

    let engine = ByteEngine::open(config).unwrap();

    assert_eq!(engine.index().slots().get(slot).unwrap(), Some(address));
    assert_ne!(
        engine.index().allocator().read_header(address).unwrap().state,
        SegmentState::Free
    );
    assert_eq!(engine.allocator_stats().unwrap().free_segments, 0);
}

#[test]
fn test_interrupted_write_rolled_back_on_open() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = ByteEngine::open(test_config(&temp_dir)).unwrap();
        engine.put(b"key", &b"value".to_vec()).unwrap();

        let allocator = engine.index().allocator();
        let spare = allocator.store(&vec![0u8; 64]).unwrap();
        allocator.start_writing_transaction(spare).unwrap();
        allocator.write(spare, &vec![9u8; 64]).unwrap();
    }

    let engine = ByteEngine::open(test_config(&temp_dir)).unwrap();

    assert!(engine.recovery_report().rolled_back.is_some());
    assert_eq!(engine.allocator_stats().unwrap().bound_segments, 1);
    assert_eq!(engine.get(b"key").unwrap(), Some(b"value".to_vec()));
}

// =============================================================================
// Concurrent Access Tests
// =============================================================================

#[test]
fn test_concurrent_readers_and_writers() {
    let temp_dir = TempDir::new().unwrap();
    let engine = Arc::new(ByteEngine::open(test_config(&temp_dir)).unwrap());
    for i in 0..32u32 {
        engine.put(format!("shared{}", i).as_bytes(), &b"init".to_vec()).unwrap();
    }

    let mut handles = Vec::new();
    for t in 0..4u32 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for i in 0..50u32 {
                let key = format!("writer{}-{}", t, i);
                engine.put(key.as_bytes(), &i.to_le_bytes().to_vec()).unwrap();
            }
        }));
    }
    for _ in 0..4 {
        let engine = Arc::clone(&engine);
        handles.push(thread::spawn(move || {
            for round in 0..50u32 {
                let key = format!("shared{}", round % 32);
                assert_eq!(engine.get(key.as_bytes()).unwrap(), Some(b"init".to_vec()));
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4u32 {
        for i in 0..50u32 {
            let key = format!("writer{}-{}", t, i);
            assert_eq!(
                engine.get(key.as_bytes()).unwrap(),
                Some(i.to_le_bytes().to_vec())
            );
        }
    }
    assert_eq!(engine.lock_stats().peak_writers, 1);
}
