//! Bounded, size-bucketed frame buffer pool.
//!
//! Sizes are rounded up to the next power of two (with a configurable floor)
//! and recycled through per-size buckets. The pool caps the number of buffers
//! alive at once; `acquire` fails instead of growing without bound.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::warn;

use crate::common::{MediaError, MediaResult};

/// Buffers kept per bucket once released.
const MAX_BUCKET_ENTRIES: usize = 8;

// ── Inner state ──────────────────────────────────────────────────────────────

struct PoolInner {
    buckets: HashMap<usize, Vec<Vec<u8>>>,
    min_size: usize,
    max_outstanding: usize,
    outstanding: usize,
}

impl PoolInner {
    fn aligned_size(&self, size: usize) -> usize {
        size.max(self.min_size).next_power_of_two()
    }

    fn acquire(&mut self, size: usize) -> Option<Vec<u8>> {
        if self.outstanding >= self.max_outstanding {
            return None;
        }
        self.outstanding += 1;

        let aligned = self.aligned_size(size);
        if let Some(mut buf) = self.buckets.get_mut(&aligned).and_then(|b| b.pop()) {
            buf.clear();
            return Some(buf);
        }
        Some(Vec::with_capacity(aligned))
    }

    fn release(&mut self, mut buf: Vec<u8>) {
        self.outstanding = self.outstanding.saturating_sub(1);

        let size = buf.capacity();
        if size < self.min_size || !size.is_power_of_two() {
            return;
        }

        let bucket = self.buckets.entry(size).or_default();
        if bucket.len() >= MAX_BUCKET_ENTRIES {
            return;
        }

        buf.clear();
        bucket.push(buf);
    }
}

// ── Public API ───────────────────────────────────────────────────────────────

/// Shared handle to a frame buffer pool. Cloning shares the same pool.
#[derive(Clone)]
pub struct FramePool {
    inner: Arc<Mutex<PoolInner>>,
}

impl FramePool {
    pub fn new(max_outstanding: usize, min_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                buckets: HashMap::new(),
                min_size: min_size.max(1),
                max_outstanding,
                outstanding: 0,
            })),
        }
    }

    /// Acquires an empty buffer with capacity for at least `size` bytes.
    pub fn acquire(&self, size: usize) -> MediaResult<PoolBuf> {
        let buf = self.inner.lock().acquire(size);
        match buf {
            Some(buf) => Ok(PoolBuf {
                buf,
                pool: Arc::downgrade(&self.inner),
            }),
            None => {
                warn!("Frame pool exhausted while acquiring {} bytes", size);
                Err(MediaError::ResourceExhausted("frame buffer pool"))
            }
        }
    }

    /// Acquires a buffer and copies `data` into it.
    pub fn acquire_from(&self, data: &[u8]) -> MediaResult<PoolBuf> {
        let mut buf = self.acquire(data.len())?;
        buf.extend_from_slice(data);
        Ok(buf)
    }

    pub fn stats(&self) -> PoolStats {
        let g = self.inner.lock();
        PoolStats {
            outstanding: g.outstanding,
            max_outstanding: g.max_outstanding,
            pooled: g.buckets.values().map(|b| b.len()).sum(),
        }
    }
}

/// Snapshot of pool health.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub outstanding: usize,
    pub max_outstanding: usize,
    pub pooled: usize,
}

/// A buffer on loan from a [`FramePool`]. Returned to the pool on drop, so
/// frames freed by a flush or an eviction give their buffer back as well.
pub struct PoolBuf {
    buf: Vec<u8>,
    pool: Weak<Mutex<PoolInner>>,
}

impl Deref for PoolBuf {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PoolBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl std::fmt::Debug for PoolBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBuf").field("len", &self.buf.len()).finish()
    }
}

impl Drop for PoolBuf {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.upgrade() {
            pool.lock().release(std::mem::take(&mut self.buf));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_reported_and_recovers_on_drop() {
        let pool = FramePool::new(2, 64);
        let a = pool.acquire(10).unwrap();
        let _b = pool.acquire(10).unwrap();
        assert!(matches!(
            pool.acquire(10),
            Err(MediaError::ResourceExhausted(_))
        ));

        drop(a);
        assert_eq!(pool.stats().outstanding, 1);
        assert!(pool.acquire(10).is_ok());
    }

    #[test]
    fn released_buffers_are_reused() {
        let pool = FramePool::new(4, 64);
        let buf = pool.acquire_from(&[1, 2, 3]).unwrap();
        assert_eq!(&buf[..], &[1, 2, 3]);
        assert_eq!(buf.capacity(), 64);
        drop(buf);
        assert_eq!(pool.stats().pooled, 1);

        let again = pool.acquire(40).unwrap();
        assert!(again.is_empty());
        assert_eq!(pool.stats().pooled, 0);
    }

    #[test]
    fn buffer_outliving_pool_is_simply_freed() {
        let pool = FramePool::new(1, 16);
        let buf = pool.acquire(8).unwrap();
        drop(pool);
        drop(buf);
    }
}
