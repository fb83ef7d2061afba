//! SPSC PCM Ring Buffer
//!
//! A wait-free ring of `i16` samples for exactly one producer and one
//! consumer. Data stores are published with a `Release` store of the write
//! cursor and observed with an `Acquire` load, so the consumer can never see
//! an advanced cursor before the samples behind it. The symmetric pair of
//! orderings protects the read side.
//!
//! One slot is reserved to distinguish empty from full: a ring created with
//! capacity `n` allocates `n + 1` slots and accepts at most `n` samples.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct PcmRing {
    buf: Box<[UnsafeCell<i16>]>,
    /// Slot count (requested capacity + 1 reserved slot).
    slots: usize,
    write_pos: AtomicUsize,
    read_pos: AtomicUsize,
}

// SAFETY: the SPSC contract. The producer only writes slots in
// [write_pos, read_pos) (mod slots) and the consumer only reads slots in
// [read_pos, write_pos); cursor publication with Release/Acquire ordering
// keeps those ranges disjoint between threads.
unsafe impl Send for PcmRing {}
unsafe impl Sync for PcmRing {}

impl PcmRing {
    /// Create a ring holding up to `capacity` samples.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        let slots = capacity + 1;
        let buf = (0..slots).map(|_| UnsafeCell::new(0i16)).collect();
        Self {
            buf,
            slots,
            write_pos: AtomicUsize::new(0),
            read_pos: AtomicUsize::new(0),
        }
    }

    /// Maximum number of samples the ring can hold.
    pub fn capacity(&self) -> usize {
        self.slots - 1
    }

    /// Samples currently readable.
    pub fn available(&self) -> usize {
        let w = self.write_pos.load(Ordering::Acquire);
        let r = self.read_pos.load(Ordering::Acquire);
        (w + self.slots - r) % self.slots
    }

    /// Space left for the producer.
    pub fn free(&self) -> usize {
        self.capacity() - self.available()
    }

    /// Store up to `samples.len()` samples; returns the count actually
    /// stored. On insufficient space the write is truncated, never blocked;
    /// the caller accounts for the dropped remainder.
    pub fn write(&self, samples: &[i16]) -> usize {
        let w = self.write_pos.load(Ordering::Relaxed);
        let r = self.read_pos.load(Ordering::Acquire);
        let free = (r + self.slots - w - 1) % self.slots;
        let n = samples.len().min(free);
        if n == 0 {
            return 0;
        }

        let first = n.min(self.slots - w);
        // SAFETY: [w, w + first) and [0, n - first) are free slots owned by
        // the producer until the Release store below.
        unsafe {
            let base = self.buf.as_ptr() as *mut i16;
            std::ptr::copy_nonoverlapping(samples.as_ptr(), base.add(w), first);
            if n > first {
                std::ptr::copy_nonoverlapping(samples.as_ptr().add(first), base, n - first);
            }
        }

        self.write_pos.store((w + n) % self.slots, Ordering::Release);
        n
    }

    /// Copy up to `out.len()` samples into `out`; returns the count copied.
    pub fn read(&self, out: &mut [i16]) -> usize {
        let r = self.read_pos.load(Ordering::Relaxed);
        let w = self.write_pos.load(Ordering::Acquire);
        let avail = (w + self.slots - r) % self.slots;
        let n = out.len().min(avail);
        if n == 0 {
            return 0;
        }

        let first = n.min(self.slots - r);
        // SAFETY: [r, r + first) and [0, n - first) hold published samples
        // owned by the consumer until the Release store below.
        unsafe {
            let base = self.buf.as_ptr() as *const i16;
            std::ptr::copy_nonoverlapping(base.add(r), out.as_mut_ptr(), first);
            if n > first {
                std::ptr::copy_nonoverlapping(base, out.as_mut_ptr().add(first), n - first);
            }
        }

        self.read_pos.store((r + n) % self.slots, Ordering::Release);
        n
    }

    /// Drop all buffered samples. Only the owner may call this, during a
    /// mode transition when neither side is concurrently accessing the ring.
    pub fn reset(&self) {
        self.read_pos.store(0, Ordering::SeqCst);
        self.write_pos.store(0, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PcmRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PcmRing")
            .field("capacity", &self.capacity())
            .field("available", &self.available())
            .finish()
    }
}
