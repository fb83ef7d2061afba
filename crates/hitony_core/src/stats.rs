//! Session Counters
//!
//! Written by whichever worker owns the path; read for logging and by the
//! test suite. Drops are split by cause so a loss is always attributable:
//! state gating, pool exhaustion, and queue backpressure each have their
//! own counter.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct CoreStats {
    /// Inbound audio packets accepted into the playback queue.
    pub packets_received: AtomicU64,
    /// Inbound packets dropped because the session state refused them.
    pub packets_dropped_state: AtomicU64,
    /// Inbound packets dropped because the pool class was exhausted.
    pub packets_dropped_pool: AtomicU64,
    /// Inbound packets dropped because the playback queue was full.
    pub packets_dropped_queue: AtomicU64,
    /// Packets decoded and written to the speaker.
    pub packets_decoded: AtomicU64,
    pub decode_errors: AtomicU64,

    /// Uplink codec frames encoded.
    pub frames_encoded: AtomicU64,
    pub encode_errors: AtomicU64,
    /// Encoded packets dropped on a full uplink queue.
    pub uplink_dropped_queue: AtomicU64,
    /// Encoded packets dropped because the pool class was exhausted.
    pub uplink_dropped_pool: AtomicU64,
    /// Encoded packets arriving at the session outside Recording.
    pub uplink_dropped_state: AtomicU64,

    /// Playback dequeue timeouts while Playing.
    pub playback_underruns: AtomicU64,
    /// Capture samples lost to full mic rings.
    pub ring_samples_dropped: AtomicU64,
    /// Recordings cancelled for being shorter than the minimum utterance.
    pub short_cancels: AtomicU64,
    /// Acoustic wake events suppressed by playback gating or the
    /// AEC-convergence window.
    pub wake_suppressed: AtomicU64,
}

impl CoreStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Reset the counters scoped to one playback session. Called on each
    /// `tts_start` / `music_start`.
    pub fn reset_session_scoped(&self) {
        self.packets_received.store(0, Ordering::Relaxed);
        self.packets_dropped_state.store(0, Ordering::Relaxed);
        self.packets_dropped_pool.store(0, Ordering::Relaxed);
        self.packets_dropped_queue.store(0, Ordering::Relaxed);
        self.packets_decoded.store(0, Ordering::Relaxed);
        self.frames_encoded.store(0, Ordering::Relaxed);
        self.playback_underruns.store(0, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}
