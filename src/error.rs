//! Error types for segkv
//!
//! Every public operation fails with one of three kinds: a read failure,
//! a write failure, or a configuration error. Allocation outcomes such as
//! "out of space" are not errors; see [`crate::allocator::Allocation`].

use thiserror::Error;

/// Result type alias using StoreError
pub type Result<T> = std::result::Result<T, StoreError>;

/// Unified error type for segkv operations
#[derive(Debug, Error)]
pub enum StoreError {
    // -------------------------------------------------------------------------
    // Read Errors
    // -------------------------------------------------------------------------
    /// I/O error while reading, or structural corruption detected on read
    #[error("Read failure: {0}")]
    ReadFailure(String),

    // -------------------------------------------------------------------------
    // Write Errors
    // -------------------------------------------------------------------------
    /// I/O error while writing, or an on-disk invariant violation
    #[error("Write failure: {0}")]
    WriteFailure(String),

    #[error("Bucket {slot} would hold {count} pairs (max {max})", max = u16::MAX)]
    BucketOverflow { slot: usize, count: usize },

    #[error("Value too large: {0} bytes does not fit a segment")]
    ValueTooLarge(u64),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of a [`StoreError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Read,
    Write,
    Config,
}

impl StoreError {
    /// Classify this error as a read, write or configuration failure
    pub fn kind(&self) -> FailureKind {
        match self {
            StoreError::ReadFailure(_) => FailureKind::Read,
            StoreError::WriteFailure(_)
            | StoreError::BucketOverflow { .. }
            | StoreError::ValueTooLarge(_) => FailureKind::Write,
            StoreError::Config(_) | StoreError::Io(_) => FailureKind::Config,
        }
    }

    /// Reclassify a read failure hit while preparing a write
    pub(crate) fn into_write_failure(self) -> Self {
        match self {
            StoreError::ReadFailure(msg) => StoreError::WriteFailure(msg),
            other => other,
        }
    }

    pub(crate) fn read(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        StoreError::ReadFailure(format!("{}: {}", context, err))
    }

    pub(crate) fn write(context: impl std::fmt::Display, err: std::io::Error) -> Self {
        StoreError::WriteFailure(format!("{}: {}", context, err))
    }
}

/// Attach read/write context to raw I/O results
pub(crate) trait IoContext<T> {
    fn read_ctx<C: std::fmt::Display>(self, context: C) -> Result<T>;
    fn write_ctx<C: std::fmt::Display>(self, context: C) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn read_ctx<C: std::fmt::Display>(self, context: C) -> Result<T> {
        self.map_err(|e| StoreError::read(context, e))
    }

    fn write_ctx<C: std::fmt::Display>(self, context: C) -> Result<T> {
        self.map_err(|e| StoreError::write(context, e))
    }
}
