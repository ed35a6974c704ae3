//! Crate-wide error type for the BUCKETS container.
//!
//! Mirrors the shape of the per-subsystem error enums this crate grew out
//! of (`MemtableError`, `WalError`, `SSTableError`, `ManifestError`): a
//! single `#[derive(Debug, Error)]` enum with `#[from]` conversions for the
//! lower layers it wraps, and a catch-all `Internal` variant for poisoned
//! locks and "this should never happen" states.

use std::io;

use thiserror::Error;

use crate::encoding::EncodingError;

/// Errors returned by [`crate::bucket::Bucket`] and
/// [`crate::bucket_set::BucketSet`] operations.
#[derive(Debug, Error)]
pub enum BucketError {
    /// The allocator could not grow a bucket's record buffer or the
    /// directory. The failed operation is a no-op; the container remains
    /// consistent.
    #[error("out of memory")]
    OutOfMemory,

    /// A mutating operation was attempted while `writable == false`
    /// (typically because a snapshot is in progress).
    #[error("bucket set is not writable")]
    NotWritable,

    /// A loaded snapshot's header disagrees with the configured
    /// `key_size` or `fixed_data_size`.
    #[error("snapshot header mismatch: {0}")]
    ConfigMismatch(String),

    /// A loaded snapshot failed a structural check: a declared bucket
    /// exceeds `bucket_capacity`, or the post-load sort invariant fails.
    #[error("corrupt snapshot image: {0}")]
    CorruptImage(String),

    /// The caller's yield hook requested cancellation during a long
    /// operation. Any partial results already appended to the caller's
    /// buffer remain valid.
    #[error("operation cancelled")]
    Cancelled,

    /// A runtime invariant check failed. In debug builds the caller
    /// SHOULD treat this as fatal; in release builds
    /// [`crate::bucket_set::BucketSet::repair`] may be invoked to recover.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Underlying snapshot file I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot header/record encoding failure.
    #[error("encoding error: {0}")]
    Encoding(#[from] EncodingError),

    /// Internal invariant violation or poisoned lock.
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, BucketError>;
