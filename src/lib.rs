//! # segkv
//!
//! An embedded, file-backed key-value store with:
//! - A variable-length segment allocator with free-space reuse, splitting
//!   and merging
//! - A one-entry transaction record for power-loss rollback
//! - A fixed-bucket hash index
//! - Per-bucket reader/writer locking with a single active writer
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Engine (KeyValueStore)                      │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                     Hash Index                              │
//! │        (LockTable: per-bucket readers, one writer)          │
//! └──────────┬──────────────────────────────┬───────────────────┘
//!            │                              │
//!            ▼                              ▼
//!   ┌─────────────────┐           ┌──────────────────┐
//!   │   Slot Table    │           │    Pair Codec    │
//!   │   (slots.tbl)   │           │ (bucket payload) │
//!   └─────────────────┘           └────────┬─────────┘
//!                                          │
//!                                          ▼
//!                               ┌──────────────────────┐
//!                               │  Segment Allocator   │
//!                               │ (segments.dat + txn) │
//!                               └──────────────────────┘
//! ```
//!
//! Streamed values of unknown length pass through the [`spill`] module
//! before they reach the allocator.

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod allocator;
pub mod codec;
pub mod engine;
pub mod index;
pub mod lock;
pub mod spill;
pub mod value;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, ConfigBuilder};
pub use engine::{ByteEngine, Engine, KeyValueStore, SpillEngine, SpoolEngine};
pub use error::{FailureKind, Result, StoreError};
pub use index::{Crc32Hash, KeyHasher, PolynomialHash};
pub use value::{Value, ValueOptions};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of segkv
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
