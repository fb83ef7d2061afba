//! Hi Tony Front-End - Microphone Signal Processing
//!
//! Consumes interleaved multi-channel capture blocks and produces
//! single-channel processed blocks plus per-block metadata (wake verdict,
//! voice activity, level). The chain is AEC -> noise gate -> AGC -> VAD ->
//! wake detection, with each stage individually switchable from the
//! configuration and AEC/wake additionally togglable at run time.
//!
//! # Architecture
//!
//! ```text
//! pipeline thread                 front-end thread
//!   feed(block) ──bounded──▶ de-interleave ─▶ AEC ─▶ gate ─▶ AGC
//!                                                        │
//!   fetch() ◀───bounded─── block + {wake, vad, volume} ◀─┘
//! ```
//!
//! Feed and fetch never block; the caller drains the output queue each pass
//! so the worker's bounded channel cannot fill and stall it.

mod aec;
mod agc;
mod block;
mod config;
mod error;
mod gate;
mod vad;
mod wake;
mod worker;

pub use block::{FrontBlock, FrontMeta, VadState, WakeState};
pub use config::{AgcConfig, ChannelLayout, FrontConfig, VadSensitivity};
pub use error::{FrontError, FrontResult};
pub use wake::{LoudnessWake, NoWake, WakeDetector};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};

use worker::{FrontShared, FrontWorker};

/// Queue depth between the caller and the worker, in blocks.
const QUEUE_DEPTH: usize = 16;

/// Handle to the front-end processing chain. Dropping it stops the worker.
pub struct FrontEnd {
    input_tx: Sender<Vec<i16>>,
    output_rx: Receiver<FrontBlock>,
    shared: Arc<FrontShared>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
    config: FrontConfig,
}

impl FrontEnd {
    /// Create a front-end with no wake model loaded (acoustic wake never
    /// fires).
    pub fn new(config: FrontConfig) -> FrontResult<Self> {
        Self::with_detector(config, Box::new(NoWake))
    }

    /// Create a front-end with an explicit wake detector.
    pub fn with_detector(
        config: FrontConfig,
        detector: Box<dyn WakeDetector>,
    ) -> FrontResult<Self> {
        config.validate()?;

        let (input_tx, input_rx) = bounded::<Vec<i16>>(QUEUE_DEPTH);
        let (output_tx, output_rx) = bounded::<FrontBlock>(QUEUE_DEPTH);
        let shared = Arc::new(FrontShared::new(&config));
        let shutdown = Arc::new(AtomicBool::new(false));

        let worker_shared = Arc::clone(&shared);
        let worker_shutdown = Arc::clone(&shutdown);
        let worker_config = config.clone();
        let worker = std::thread::Builder::new()
            .name("tony-front".into())
            .spawn(move || {
                FrontWorker::new(worker_config, worker_shared, output_tx, detector)
                    .run(input_rx, worker_shutdown);
            })
            .map_err(|e| FrontError::InvalidConfig(format!("worker spawn failed: {}", e)))?;

        Ok(Self {
            input_tx,
            output_rx,
            shared,
            shutdown,
            worker: Some(worker),
            config,
        })
    }

    /// Hand one interleaved input block to the worker. Non-blocking; a full
    /// queue is reported as [`FrontError::QueueFull`] and the block is
    /// dropped (the caller counts it).
    pub fn feed(&self, block: &[i16]) -> FrontResult<()> {
        match self.input_tx.try_send(block.to_vec()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.shared.input_dropped.fetch_add(1, Ordering::Relaxed);
                Err(FrontError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => Err(FrontError::WorkerGone),
        }
    }

    /// Fetch zero or one processed block. Non-blocking.
    pub fn fetch(&self) -> Option<FrontBlock> {
        self.output_rx.try_recv().ok()
    }

    pub fn set_aec_enabled(&self, enabled: bool) {
        self.shared.aec_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn aec_enabled(&self) -> bool {
        self.shared.aec_enabled.load(Ordering::Relaxed)
    }

    pub fn set_wake_enabled(&self, enabled: bool) {
        self.shared.wake_enabled.store(enabled, Ordering::Relaxed);
    }

    /// Samples per channel per feed call.
    pub fn chunk_samples(&self) -> usize {
        self.config.chunk_samples
    }

    /// Effective input channel count (2 or 3).
    pub fn channels(&self) -> usize {
        self.config.layout.channels()
    }

    pub fn config(&self) -> &FrontConfig {
        &self.config
    }

    /// Blocks dropped on the input and output queues since creation.
    pub fn dropped(&self) -> (u64, u64) {
        (
            self.shared.input_dropped.load(Ordering::Relaxed),
            self.shared.output_dropped.load(Ordering::Relaxed),
        )
    }
}

impl Drop for FrontEnd {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn fetch_blocking(front: &FrontEnd) -> FrontBlock {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            if let Some(block) = front.fetch() {
                return block;
            }
            assert!(Instant::now() < deadline, "front-end produced no output");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn interleave3(mic: &[i16], reference: &[i16]) -> Vec<i16> {
        mic.iter()
            .zip(reference)
            .flat_map(|(&m, &r)| [m, m, r])
            .collect()
    }

    #[test]
    fn test_feed_fetch_round_trip() {
        let front = FrontEnd::new(FrontConfig::default()).unwrap();
        let block = vec![0i16; front.chunk_samples() * front.channels()];
        front.feed(&block).unwrap();

        let out = fetch_blocking(&front);
        assert_eq!(out.pcm.len(), front.chunk_samples());
        assert_eq!(out.meta.vad, VadState::Silence);
        assert_eq!(out.meta.wake, WakeState::Idle);
    }

    #[test]
    fn test_malformed_block_is_dropped() {
        let front = FrontEnd::new(FrontConfig::default()).unwrap();
        front.feed(&[0i16; 7]).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        assert!(front.fetch().is_none());
    }

    #[test]
    fn test_speech_drives_vad() {
        let config = FrontConfig {
            aec: false,
            noise_suppression: false,
            agc: false,
            layout: ChannelLayout::DualMic,
            ..FrontConfig::default()
        };
        let front = FrontEnd::new(config).unwrap();

        let mic: Vec<i16> = (0..front.chunk_samples())
            .map(|i| ((i as f32 * 0.25).sin() * 9000.0) as i16)
            .collect();
        let block: Vec<i16> = mic.iter().flat_map(|&m| [m, m]).collect();
        front.feed(&block).unwrap();

        assert_eq!(fetch_blocking(&front).meta.vad, VadState::Speech);
    }

    #[test]
    fn test_wake_detector_fires_with_index() {
        let config = FrontConfig {
            aec: false,
            noise_suppression: false,
            agc: false,
            layout: ChannelLayout::DualMic,
            ..FrontConfig::default()
        };
        let front =
            FrontEnd::with_detector(config, Box::new(LoudnessWake::new(5_000, 1))).unwrap();

        let block = vec![9_000i16; front.chunk_samples() * 2];
        front.feed(&block).unwrap();

        let out = fetch_blocking(&front);
        assert_eq!(out.meta.wake, WakeState::Detected);
        assert_eq!(out.meta.wake_index, Some(0));
    }

    #[test]
    fn test_wake_toggle_mutes_detector() {
        let config = FrontConfig {
            aec: false,
            noise_suppression: false,
            agc: false,
            layout: ChannelLayout::DualMic,
            ..FrontConfig::default()
        };
        let front =
            FrontEnd::with_detector(config, Box::new(LoudnessWake::new(5_000, 1))).unwrap();
        front.set_wake_enabled(false);

        let block = vec![9_000i16; front.chunk_samples() * 2];
        front.feed(&block).unwrap();

        assert_eq!(fetch_blocking(&front).meta.wake, WakeState::Idle);
    }

    #[test]
    fn test_aec_attenuates_speaker_echo() {
        let config = FrontConfig {
            noise_suppression: false,
            agc: false,
            wake: false,
            ..FrontConfig::default()
        };
        let front = FrontEnd::new(config).unwrap();
        front.set_aec_enabled(true);

        let chunk = front.chunk_samples();
        let mut quiet_tail = 0.0f32;
        for block_idx in 0..80 {
            let start = block_idx * chunk;
            let echo: Vec<i16> = (start..start + chunk)
                .map(|i| ((i as f32 * 0.12).sin() * 8000.0) as i16)
                .collect();
            // Mic hears exactly what the speaker plays
            front.feed(&interleave3(&echo, &echo)).unwrap();
            let out = fetch_blocking(&front);
            if block_idx >= 60 {
                quiet_tail = quiet_tail.max(out.meta.volume);
            }
        }
        assert!(quiet_tail < 0.05, "echo residual too loud: {}", quiet_tail);
    }

    #[test]
    fn test_backpressure_reports_queue_full() {
        let front = FrontEnd::new(FrontConfig::default()).unwrap();
        let block = vec![0i16; front.chunk_samples() * front.channels()];
        // The worker drains at its own pace; pushing far more than the queue
        // depth without fetching must eventually report QueueFull.
        let mut saw_full = false;
        for _ in 0..10_000 {
            if matches!(front.feed(&block), Err(FrontError::QueueFull)) {
                saw_full = true;
                break;
            }
        }
        assert!(saw_full);
        assert!(front.dropped().0 > 0);
    }
}
