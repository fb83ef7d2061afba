//! Fixed-Capacity Pooled Allocator
//!
//! Five size classes sized for the traffic the device actually carries:
//! small classes for encoded voice packets (real sizes run 60-200 bytes),
//! the 2 KB class for typical downlink batches, and the 4 KB class for
//! worst-case reassembled batches and DMA'd capture buffers.
//!
//! Blocks are handed out as [`PoolBlock`] values with linear ownership: the
//! block returns to its class when dropped, so double free and cross-class
//! free cannot be expressed. Acquire and release hold a per-class lock for an
//! O(1) push/pop only.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

/// Block sizes of the five classes, in bytes.
pub const CLASS_SIZES: [usize; 5] = [64, 128, 256, 2048, 4096];

/// Default per-class capacity. 32x256 covers the outbound queue of small
/// codec frames; 24x4096 covers worst-case reassembled batches plus capture
/// buffers in flight.
pub const CLASS_CAPACITY: [usize; 5] = [32, 32, 32, 16, 24];

/// Per-class capacity override for non-default deployments.
#[derive(Debug, Clone, Copy)]
pub struct PoolLayout {
    pub capacity: [usize; 5],
}

impl Default for PoolLayout {
    fn default() -> Self {
        Self {
            capacity: CLASS_CAPACITY,
        }
    }
}

/// Counters for one size class.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClassStats {
    pub block_size: usize,
    pub capacity: usize,
    pub acquires: u64,
    pub releases: u64,
    pub in_use: usize,
    pub peak: usize,
}

impl ClassStats {
    /// Outstanding blocks. Non-zero after all work has drained means a leak.
    pub fn leaked(&self) -> u64 {
        self.acquires - self.releases
    }
}

/// Snapshot of all five classes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PoolStats {
    pub classes: [ClassStats; 5],
}

impl PoolStats {
    pub fn total_in_use(&self) -> usize {
        self.classes.iter().map(|c| c.in_use).sum()
    }
}

struct PoolClass {
    block_size: usize,
    capacity: usize,
    free: Mutex<Vec<Box<[u8]>>>,
    acquires: AtomicU64,
    releases: AtomicU64,
    in_use: AtomicUsize,
    peak: AtomicUsize,
}

impl PoolClass {
    fn new(block_size: usize, capacity: usize) -> Self {
        let mut free = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            free.push(vec![0u8; block_size].into_boxed_slice());
        }
        Self {
            block_size,
            capacity,
            free: Mutex::new(free),
            acquires: AtomicU64::new(0),
            releases: AtomicU64::new(0),
            in_use: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn stats(&self) -> ClassStats {
        ClassStats {
            block_size: self.block_size,
            capacity: self.capacity,
            acquires: self.acquires.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
            peak: self.peak.load(Ordering::Relaxed),
        }
    }
}

/// The pooled allocator. All backing memory is allocated once at
/// construction; acquire and release only recycle it.
pub struct BlockPool {
    classes: [PoolClass; 5],
}

impl BlockPool {
    /// Create a pool with the default layout.
    pub fn new() -> Arc<Self> {
        Self::with_layout(PoolLayout::default())
    }

    pub fn with_layout(layout: PoolLayout) -> Arc<Self> {
        let classes = std::array::from_fn(|i| PoolClass::new(CLASS_SIZES[i], layout.capacity[i]));
        Arc::new(Self { classes })
    }

    /// Acquire a block from an explicit class index, or `None` when the
    /// class is exhausted. The caller must drop the work unit on `None`,
    /// never spin.
    pub fn acquire(self: &Arc<Self>, class: usize) -> Option<PoolBlock> {
        let c = &self.classes[class];
        let buf = c.free.lock().pop()?;
        c.acquires.fetch_add(1, Ordering::Relaxed);
        let now = c.in_use.fetch_add(1, Ordering::Relaxed) + 1;
        c.peak.fetch_max(now, Ordering::Relaxed);
        Some(PoolBlock {
            buf: Some(buf),
            len: 0,
            class,
            pool: Arc::clone(self),
        })
    }

    /// Acquire from the smallest class whose blocks hold `len` bytes.
    /// Call sites that only know the payload length use this; the matching
    /// release is implicit in [`PoolBlock`]'s drop.
    pub fn acquire_for(self: &Arc<Self>, len: usize) -> Option<PoolBlock> {
        let class = Self::class_for(len)?;
        self.acquire(class)
    }

    /// Acquire a block and fill it with `data`.
    pub fn copy_from(self: &Arc<Self>, data: &[u8]) -> Option<PoolBlock> {
        let mut block = self.acquire_for(data.len())?;
        block.buf_mut()[..data.len()].copy_from_slice(data);
        block.set_len(data.len());
        Some(block)
    }

    /// Smallest class index holding `len` bytes, or `None` when `len`
    /// exceeds the largest class.
    pub fn class_for(len: usize) -> Option<usize> {
        CLASS_SIZES.iter().position(|&s| s >= len)
    }

    /// Largest payload the pool can hold (the reassembly bound).
    pub const fn max_block_size() -> usize {
        CLASS_SIZES[4]
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            classes: std::array::from_fn(|i| self.classes[i].stats()),
        }
    }

    fn release(&self, class: usize, buf: Box<[u8]>) {
        let c = &self.classes[class];
        c.free.lock().push(buf);
        c.releases.fetch_add(1, Ordering::Relaxed);
        c.in_use.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An owned block. Dereferences to the `len`-byte payload; the full class
/// capacity is reachable through [`PoolBlock::buf_mut`]. Returns to its pool
/// on drop.
pub struct PoolBlock {
    buf: Option<Box<[u8]>>,
    len: usize,
    class: usize,
    pool: Arc<BlockPool>,
}

impl PoolBlock {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        CLASS_SIZES[self.class]
    }

    /// Set the valid payload length. Lengths beyond the class capacity are a
    /// programmer error.
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.capacity(), "payload exceeds class capacity");
        self.len = len;
    }

    /// Full backing storage, regardless of the current payload length.
    pub fn buf_mut(&mut self) -> &mut [u8] {
        self.buf.as_mut().map(|b| &mut b[..]).unwrap_or(&mut [])
    }

    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_ref().map(|b| &b[..self.len]).unwrap_or(&[])
    }
}

impl std::ops::Deref for PoolBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.as_slice()
    }
}

impl std::fmt::Debug for PoolBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolBlock")
            .field("class", &self.class)
            .field("len", &self.len)
            .finish()
    }
}

impl Drop for PoolBlock {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(self.class, buf);
        }
    }
}
