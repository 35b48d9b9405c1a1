//! Per-operator memory accounting.
//!
//! Operators report the bytes they currently retain through a
//! [`LocalMemoryContext`]. A context only records the *latest* value; it is a
//! "set current usage" sink, not an allocator. Contexts created from a
//! [`MemoryPool`] forward every change to the pool so the pool always holds
//! the sum of its live children, which the surrounding engine uses for
//! resource governance.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Sink for the number of bytes an operator currently retains.
///
/// Implementations should order `set_bytes`/`bytes` sequentially
/// consistently: callers pair them with a `SeqCst` closed flag to make a
/// reset-to-zero win over a racing update.
pub trait LocalMemoryContext: Send + Sync {
    /// Replace the accounted usage with `bytes`.
    fn set_bytes(&self, bytes: u64);

    /// Currently accounted usage.
    fn bytes(&self) -> u64;
}

/// Standalone context backed by a single atomic counter.
#[derive(Debug, Default)]
pub struct SimpleLocalMemoryContext {
    bytes: AtomicU64,
}

impl SimpleLocalMemoryContext {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl LocalMemoryContext for SimpleLocalMemoryContext {
    fn set_bytes(&self, bytes: u64) {
        self.bytes.store(bytes, Ordering::SeqCst);
    }

    fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

/// Shared aggregate of the usage reported by its child contexts.
#[derive(Debug, Default)]
pub struct MemoryPool {
    reserved_bytes: AtomicI64,
    peak_bytes: AtomicU64,
}

impl MemoryPool {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a child context whose usage is charged to this pool.
    #[must_use]
    pub fn new_local_context(self: &Arc<Self>, tag: impl Into<String>) -> TrackedMemoryContext {
        TrackedMemoryContext {
            pool: Arc::clone(self),
            tag: tag.into(),
            bytes: AtomicU64::new(0),
        }
    }

    /// Sum of the usage of all live child contexts.
    #[must_use]
    pub fn reserved_bytes(&self) -> u64 {
        self.reserved_bytes.load(Ordering::Acquire).max(0) as u64
    }

    /// Highest value [`MemoryPool::reserved_bytes`] has reached.
    #[must_use]
    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes.load(Ordering::Acquire)
    }

    fn apply_delta(&self, old: u64, new: u64) {
        // Signed so that deltas from concurrent writers of one child commute
        // even when a release is applied before the matching charge.
        let delta = new as i64 - old as i64;
        let after = self.reserved_bytes.fetch_add(delta, Ordering::AcqRel) + delta;
        if delta > 0 && after > 0 {
            self.peak_bytes.fetch_max(after as u64, Ordering::AcqRel);
        }
    }
}

/// Child of a [`MemoryPool`]. Dropping it releases whatever it still holds.
#[derive(Debug)]
pub struct TrackedMemoryContext {
    pool: Arc<MemoryPool>,
    tag: String,
    bytes: AtomicU64,
}

impl TrackedMemoryContext {
    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl LocalMemoryContext for TrackedMemoryContext {
    fn set_bytes(&self, bytes: u64) {
        let old = self.bytes.swap(bytes, Ordering::SeqCst);
        if old != bytes {
            self.pool.apply_delta(old, bytes);
        }
    }

    fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::SeqCst)
    }
}

impl Drop for TrackedMemoryContext {
    fn drop(&mut self) {
        let old = self.bytes.swap(0, Ordering::SeqCst);
        if old > 0 {
            self.pool.apply_delta(old, 0);
        }
    }
}
