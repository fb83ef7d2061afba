//! Front-End Worker
//!
//! The processing chain runs on its own thread so feed and fetch stay
//! non-blocking for the pipeline. One input block in, zero or one processed
//! block out, per iteration.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use tracing::warn;

use crate::agc::Agc;
use crate::aec::EchoCanceller;
use crate::block::{rms_level, FrontBlock, FrontMeta, VadState, WakeState};
use crate::config::FrontConfig;
use crate::gate::NoiseGate;
use crate::vad::VoiceDetector;
use crate::wake::WakeDetector;

/// State shared between the handle and the worker thread.
pub(crate) struct FrontShared {
    pub aec_enabled: AtomicBool,
    pub wake_enabled: AtomicBool,
    pub input_dropped: AtomicU64,
    pub output_dropped: AtomicU64,
}

impl FrontShared {
    pub fn new(config: &FrontConfig) -> Self {
        Self {
            aec_enabled: AtomicBool::new(false),
            wake_enabled: AtomicBool::new(config.wake),
            input_dropped: AtomicU64::new(0),
            output_dropped: AtomicU64::new(0),
        }
    }
}

pub(crate) struct FrontWorker {
    config: FrontConfig,
    shared: Arc<FrontShared>,
    output_tx: Sender<FrontBlock>,
    detector: Box<dyn WakeDetector>,

    aec: EchoCanceller,
    gate: NoiseGate,
    agc: Agc,
    vad: VoiceDetector,
    aec_was_enabled: bool,

    // Scratch buffers reused across blocks
    mixed: Vec<i16>,
    reference: Vec<i16>,
}

impl FrontWorker {
    pub fn new(
        config: FrontConfig,
        shared: Arc<FrontShared>,
        output_tx: Sender<FrontBlock>,
        detector: Box<dyn WakeDetector>,
    ) -> Self {
        let chunk = config.chunk_samples;
        Self {
            agc: Agc::new(config.agc_config),
            vad: VoiceDetector::new(config.vad_sensitivity),
            config,
            shared,
            output_tx,
            detector,
            aec: EchoCanceller::new(),
            gate: NoiseGate::new(),
            aec_was_enabled: false,
            mixed: vec![0i16; chunk],
            reference: vec![0i16; chunk],
        }
    }

    pub fn run(mut self, input_rx: Receiver<Vec<i16>>, shutdown: Arc<AtomicBool>) {
        while !shutdown.load(Ordering::SeqCst) {
            match input_rx.recv_timeout(Duration::from_millis(20)) {
                Ok(block) => {
                    if let Some(out) = self.process(&block) {
                        match self.output_tx.try_send(out) {
                            Ok(()) => {}
                            Err(TrySendError::Full(_)) => {
                                self.shared.output_dropped.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(TrySendError::Disconnected(_)) => return,
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
    }

    fn process(&mut self, block: &[i16]) -> Option<FrontBlock> {
        let channels = self.config.layout.channels();
        let chunk = self.config.chunk_samples;
        if block.len() != chunk * channels {
            warn!(
                got = block.len(),
                want = chunk * channels,
                "malformed front-end input block"
            );
            return None;
        }

        // De-interleave: the two mics are averaged into the primary channel,
        // the trailing channel (when present) is the playback reference.
        for i in 0..chunk {
            let base = i * channels;
            let m0 = block[base] as i32;
            let m1 = block[base + 1] as i32;
            self.mixed[i] = ((m0 + m1) / 2) as i16;
            self.reference[i] = if channels == 3 { block[base + 2] } else { 0 };
        }

        let aec_on = self.config.aec && self.shared.aec_enabled.load(Ordering::Relaxed);
        if aec_on {
            if !self.aec_was_enabled {
                self.aec.reset();
            }
            self.aec.process(&mut self.mixed, &self.reference);
        }
        self.aec_was_enabled = aec_on;

        if self.config.noise_suppression {
            self.gate.process(&mut self.mixed);
        }
        if self.config.agc {
            self.agc.process(&mut self.mixed);
        }

        let vad = if self.config.vad {
            self.vad.classify(&self.mixed)
        } else {
            VadState::Speech
        };

        let wake_index = if self.config.wake && self.shared.wake_enabled.load(Ordering::Relaxed) {
            self.detector.process(&self.mixed)
        } else {
            None
        };

        Some(FrontBlock {
            pcm: self.mixed.clone(),
            meta: FrontMeta {
                wake: if wake_index.is_some() {
                    WakeState::Detected
                } else {
                    WakeState::Idle
                },
                wake_index,
                vad,
                volume: rms_level(&self.mixed),
            },
        })
    }
}
