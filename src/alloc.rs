//! The allocator seam consumed by the core (§6 "Consumed by the core").
//!
//! `RdbBuckets.h`'s `set()` takes an `allocName` tag that is threaded
//! through every allocation for accounting purposes. This module keeps
//! that contract as a trait so callers embedding BUCKETS in a larger
//! allocator-tracking system can plug in their own accounting, while a
//! [`SystemAllocator`] default covers everything else.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Raw byte-region allocator consumed by [`crate::bucket::Bucket`] and
/// [`crate::bucket_set::BucketSet`] for record buffers and the directory.
///
/// Implementations MUST be thread-safe: the spec assumes the allocator is
/// shared and may be called from a background snapshot thread while a
/// writer is (momentarily) blocked.
pub trait BucketAllocator: Send + Sync {
    /// Allocate `len` zeroed bytes tagged with `tag` for accounting.
    /// Returns `None` on allocation failure (surfaced by the caller as
    /// [`crate::error::BucketError::OutOfMemory`]).
    fn alloc(&self, len: usize, tag: &str) -> Option<Vec<u8>>;

    /// Release `len` bytes previously returned under `tag`. Since this
    /// trait hands out owned `Vec<u8>` buffers (dropped normally by Rust's
    /// allocator), `free` exists purely to keep the tag's accounting
    /// balanced; implementations that don't track usage may no-op.
    fn free(&self, len: usize, tag: &str);

    /// Bytes currently outstanding under `tag` (for introspection /
    /// `getMemAlloced`-style reporting). Default implementation reports
    /// zero for allocators that don't track usage.
    fn outstanding(&self, _tag: &str) -> usize {
        0
    }
}

/// Default allocator: plain heap allocation via `Vec<u8>`, with a single
/// process-wide tagged byte counter for introspection.
#[derive(Debug, Default)]
pub struct SystemAllocator {
    outstanding: AtomicUsize,
}

impl SystemAllocator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BucketAllocator for SystemAllocator {
    fn alloc(&self, len: usize, _tag: &str) -> Option<Vec<u8>> {
        // `Vec::with_capacity` doesn't report OOM on stable Rust (it
        // aborts instead); `try_reserve` gives us a recoverable path.
        let mut buf = Vec::new();
        buf.try_reserve_exact(len).ok()?;
        buf.resize(len, 0);
        self.outstanding.fetch_add(len, Ordering::Relaxed);
        Some(buf)
    }

    fn free(&self, len: usize, _tag: &str) {
        self.outstanding.fetch_sub(len, Ordering::Relaxed);
    }

    fn outstanding(&self, _tag: &str) -> usize {
        self.outstanding.load(Ordering::Relaxed)
    }
}
