//! Hi Tony RT - Real-Time Primitives
//!
//! This crate provides the two building blocks every hot path in the device
//! core is built on:
//!
//! - [`BlockPool`]: a fixed-capacity pooled allocator with five size classes.
//!   Every per-packet allocation (encoded uplink frames, reassembled downlink
//!   batches, split playback packets) comes from here, never from the global
//!   heap, so a long session cannot fragment memory.
//! - [`PcmRing`]: a lock-free single-producer/single-consumer ring of `i16`
//!   samples with a publication barrier between data stores and cursor
//!   updates. One ring per microphone channel plus one for the playback
//!   reference signal.
//!
//! Neither primitive ever blocks the caller: the pool returns `None` on
//! exhaustion and the ring returns a partial count on overflow. The caller
//! drops the unit of work and counts it.

mod pool;
mod ring;

pub use pool::{BlockPool, ClassStats, PoolBlock, PoolLayout, PoolStats};
pub use ring::PcmRing;
