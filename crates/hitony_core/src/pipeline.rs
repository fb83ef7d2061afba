//! Capture & Pipeline Worker
//!
//! Owns the microphone-to-uplink and downlink-to-speaker paths plus the
//! front-end handle. One pass of the main loop: playback dispatch, capture
//! read, command poll, front-end feed, front-end fetch, thinking timeout,
//! periodic stats. Playback dispatch falls through into capture so the wake
//! detector keeps running while the speaker plays.
//!
//! All failures here are local: a bad packet drops one packet, a failed
//! encode drops one frame, an exhausted pool drops one unit of work. The
//! encoder and decoder instances survive every drop because they hold state
//! across frames.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use hitony_front::{FrontBlock, FrontEnd, VadState, WakeState};
use hitony_rt::{BlockPool, PcmRing, PoolBlock};
use tracing::{debug, error, info, warn};

use crate::codec::{apply_preamp, PacketDecoder, PacketEncoder};
use crate::config::CoreConfig;
use crate::io::AudioIo;
use crate::message::{PipelineCmd, PipelineEvent, WakeSource};
use crate::stats::CoreStats;

/// Pipeline sub-mode, independent of the session state owned by the
/// control worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipeMode {
    Idle,
    Recording,
    Thinking,
    Playing,
}

/// Queue endpoints wired up by the engine.
pub(crate) struct PipelineChannels {
    pub cmd_rx: Receiver<PipelineCmd>,
    pub event_tx: Sender<PipelineEvent>,
    pub uplink_tx: Sender<PoolBlock>,
    pub playback_rx: Receiver<PoolBlock>,
}

pub(crate) struct Pipeline {
    config: CoreConfig,
    io: Box<dyn AudioIo>,
    front: FrontEnd,
    encoder: Box<dyn PacketEncoder>,
    decoder: Box<dyn PacketDecoder>,
    pool: Arc<BlockPool>,
    stats: Arc<CoreStats>,
    channels: PipelineChannels,

    mic0: PcmRing,
    mic1: PcmRing,
    reference: PcmRing,

    mode: PipeMode,
    recording_started: Option<Instant>,
    vad_end_posted: bool,
    silence_since: Option<Instant>,
    vad_cooldown_until: Option<Instant>,
    aec_converge_until: Option<Instant>,
    thinking_since: Option<Instant>,
    zero_blocks: u32,
    aec_fallback: bool,

    /// Codec frame accumulator.
    acc: Vec<i16>,
    acc_len: usize,

    // Scratch buffers, sized once
    capture_buf: Vec<i16>,
    chunk_mic0: Vec<i16>,
    chunk_mic1: Vec<i16>,
    chunk_ref: Vec<i16>,
    feed_buf: Vec<i16>,
    decode_buf: Vec<i16>,

    last_volume: f32,
    last_capture_rms: f32,
    samples_captured: u64,
    last_stats: Instant,
    underruns_since_log: u64,
    last_underrun_log: Instant,
}

impl Pipeline {
    pub fn new(
        config: CoreConfig,
        io: Box<dyn AudioIo>,
        front: FrontEnd,
        encoder: Box<dyn PacketEncoder>,
        decoder: Box<dyn PacketDecoder>,
        pool: Arc<BlockPool>,
        stats: Arc<CoreStats>,
        channels: PipelineChannels,
    ) -> Self {
        let chunk = front.chunk_samples();
        let frame = config.audio.uplink_frame_samples();
        Self {
            mic0: PcmRing::with_capacity(config.audio.mic_ring_capacity),
            mic1: PcmRing::with_capacity(config.audio.mic_ring_capacity),
            reference: PcmRing::with_capacity(config.audio.ref_ring_capacity),
            acc: vec![0i16; frame],
            acc_len: 0,
            capture_buf: vec![0i16; config.audio.capture_samples()],
            chunk_mic0: vec![0i16; chunk],
            chunk_mic1: vec![0i16; chunk],
            chunk_ref: vec![0i16; chunk],
            feed_buf: vec![0i16; chunk * front.channels()],
            decode_buf: vec![0i16; config.audio.downlink_frame_samples()],
            config,
            io,
            front,
            encoder,
            decoder,
            pool,
            stats,
            channels,
            mode: PipeMode::Idle,
            recording_started: None,
            vad_end_posted: false,
            silence_since: None,
            vad_cooldown_until: None,
            aec_converge_until: None,
            thinking_since: None,
            zero_blocks: 0,
            aec_fallback: false,
            last_volume: 0.0,
            last_capture_rms: 0.0,
            samples_captured: 0,
            last_stats: Instant::now(),
            underruns_since_log: 0,
            last_underrun_log: Instant::now(),
        }
    }

    pub fn run(mut self) {
        info!("audio pipeline started");
        while self.iterate() {}
        info!("audio pipeline stopped");
    }

    /// One pass of the main loop. Returns false on shutdown.
    fn iterate(&mut self) -> bool {
        if self.mode == PipeMode::Playing {
            self.playback_dispatch();
            // No early return: capture and the front-end feed must keep
            // running during playback or wake-during-playback cannot work.
        }

        if !self.capture_read() {
            return true;
        }

        loop {
            match self.channels.cmd_rx.try_recv() {
                Ok(PipelineCmd::Shutdown) => return false,
                Ok(cmd) => self.handle_cmd(cmd),
                Err(_) => break,
            }
        }

        self.feed_front();
        for _ in 0..10 {
            match self.front.fetch() {
                Some(block) => self.handle_front_block(block),
                None => break,
            }
        }

        if self.mode == PipeMode::Thinking {
            if let Some(since) = self.thinking_since {
                if since.elapsed() > self.config.timeouts.thinking_pipeline {
                    debug!("thinking timed out, returning to idle");
                    self.mode = PipeMode::Idle;
                    self.thinking_since = None;
                }
            }
        }

        if self.last_stats.elapsed() >= self.config.stats_interval {
            self.log_stats();
        }
        true
    }

    fn playback_dispatch(&mut self) {
        match self
            .channels
            .playback_rx
            .recv_timeout(self.config.timeouts.playback_wait)
        {
            Ok(packet) => self.play_packet(packet),
            Err(RecvTimeoutError::Timeout) => {
                CoreStats::bump(&self.stats.playback_underruns);
                self.underruns_since_log += 1;
                if self.last_underrun_log.elapsed() > Duration::from_secs(2) {
                    warn!(count = self.underruns_since_log, "playback underrun");
                    self.underruns_since_log = 0;
                    self.last_underrun_log = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {}
        }
    }

    fn play_packet(&mut self, packet: PoolBlock) {
        match self.decoder.decode(&packet, &mut self.decode_buf) {
            Ok(n) => {
                let pcm = &self.decode_buf[..n];
                if let Err(e) = self.io.write_playback(pcm) {
                    warn!(error = %e, "speaker write failed");
                }
                // Mirror into the reference ring for echo cancellation; a
                // full ring just loses reference, never playback.
                self.reference.write(pcm);
                CoreStats::bump(&self.stats.packets_decoded);
            }
            Err(e) => {
                CoreStats::bump(&self.stats.decode_errors);
                debug!(error = %e, len = packet.len(), "dropping undecodable packet");
            }
        }
    }

    /// Read one capture frame and split it into the mic rings. Returns
    /// false when the read failed and the pass should be cut short.
    fn capture_read(&mut self) -> bool {
        let want = self.config.audio.capture_samples();
        let n = match self.io.read_capture(&mut self.capture_buf[..want]) {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "capture read failed");
                std::thread::sleep(Duration::from_millis(10));
                return false;
            }
        };
        let frames = n / 2;
        if frames == 0 {
            return true;
        }

        // De-interleave. The scratch chunks are chunk-sized; capture reads
        // are independent of chunk size, so split into bounded segments.
        let mut offset = 0;
        while offset < frames {
            let seg = (frames - offset).min(self.chunk_mic0.len());
            for i in 0..seg {
                let base = (offset + i) * 2;
                self.chunk_mic0[i] = self.capture_buf[base];
                self.chunk_mic1[i] = self.capture_buf[base + 1];
            }
            let w0 = self.mic0.write(&self.chunk_mic0[..seg]);
            let w1 = self.mic1.write(&self.chunk_mic1[..seg]);
            let lost = (seg - w0) + (seg - w1);
            if lost > 0 {
                CoreStats::add(&self.stats.ring_samples_dropped, lost as u64);
            }
            offset += seg;
        }
        self.samples_captured += frames as u64;

        // Capture diagnostics; meaningless while the speaker is playing
        // because the mics mostly hear the speaker.
        if self.mode != PipeMode::Playing {
            let sum: f64 = self.capture_buf[..n]
                .iter()
                .step_by(2)
                .map(|&s| (s as f64) * (s as f64))
                .sum();
            self.last_capture_rms = ((sum / frames as f64).sqrt() / i16::MAX as f64) as f32;
        }
        true
    }

    fn handle_cmd(&mut self, cmd: PipelineCmd) {
        debug!(?cmd, mode = ?self.mode, "pipeline command");
        match cmd {
            PipelineCmd::StartRecording => {
                self.mic0.reset();
                self.mic1.reset();
                self.reference.reset();
                self.mode = PipeMode::Recording;
                self.recording_started = Some(Instant::now());
                self.silence_since = None;
                self.vad_end_posted = false;
                self.acc_len = 0;
                // Nothing is playing while we record
                self.front.set_aec_enabled(false);
                self.aec_converge_until = None;
                self.thinking_since = None;
            }
            PipelineCmd::StopRecording => {
                if self.mode == PipeMode::Recording {
                    self.enter_thinking();
                }
            }
            PipelineCmd::StartPlayback => {
                self.mode = PipeMode::Playing;
                self.thinking_since = None;
                self.zero_blocks = 0;
                if self.config.front.aec && !self.aec_fallback {
                    self.front.set_aec_enabled(true);
                    self.aec_converge_until =
                        Some(Instant::now() + self.config.timeouts.aec_converge);
                } else {
                    self.aec_converge_until = None;
                }
            }
            PipelineCmd::StopPlayback => {
                // Flush undelivered packets; their blocks return to the pool.
                while self.channels.playback_rx.try_recv().is_ok() {}
                self.mode = PipeMode::Idle;
                self.reference.reset();
                // mic1 holds stale echo from the speaker period
                self.mic1.reset();
                self.front.set_aec_enabled(false);
                self.aec_converge_until = None;
                self.vad_cooldown_until =
                    Some(Instant::now() + self.config.timeouts.vad_cooldown);
                self.thinking_since = None;
            }
            PipelineCmd::Shutdown => {}
        }
    }

    fn enter_thinking(&mut self) {
        self.mode = PipeMode::Thinking;
        self.thinking_since = Some(Instant::now());
        self.acc_len = 0;
        if !self.vad_end_posted {
            self.vad_end_posted = true;
            self.post_event(PipelineEvent::VadEnd {
                short_utterance: false,
            });
        }
    }

    fn feed_front(&mut self) {
        let chunk = self.front.chunk_samples();
        let channels = self.front.channels();

        while self.mic0.available() >= chunk && self.mic1.available() >= chunk {
            self.mic0.read(&mut self.chunk_mic0[..chunk]);
            self.mic1.read(&mut self.chunk_mic1[..chunk]);

            if channels == 3 {
                // Zero-fill an under-supplied reference; the three rings
                // are independently clocked.
                let got = self.reference.read(&mut self.chunk_ref[..chunk]);
                self.chunk_ref[got..chunk].fill(0);
            }

            for i in 0..chunk {
                let base = i * channels;
                self.feed_buf[base] = self.chunk_mic0[i];
                self.feed_buf[base + 1] = self.chunk_mic1[i];
                if channels == 3 {
                    self.feed_buf[base + 2] = self.chunk_ref[i];
                }
            }

            if self.front.feed(&self.feed_buf[..chunk * channels]).is_err() {
                // The front-end counts the drop; retrying would stall capture
                break;
            }
        }
    }

    fn handle_front_block(&mut self, block: FrontBlock) {
        self.last_volume = block.meta.volume;

        // Echo-canceller divergence: sustained all-zero output right after
        // playback start means the canceller is eating the signal.
        if self.mode == PipeMode::Playing && self.front.aec_enabled() {
            if block.is_all_zero() {
                self.zero_blocks += 1;
                if self.zero_blocks >= self.config.policy.zero_block_limit && !self.aec_fallback {
                    self.aec_fallback = true;
                    self.front.set_aec_enabled(false);
                    warn!("echo canceller diverged, falling back to aec-off");
                }
            } else {
                self.zero_blocks = 0;
            }
        }

        if self.mode == PipeMode::Recording {
            self.recording_checks(&block);
        }
        // recording_checks may have left Recording
        if self.mode == PipeMode::Recording {
            self.accumulate(&block.pcm);
        }

        if block.meta.wake == WakeState::Detected {
            self.handle_wake();
        }
    }

    fn recording_checks(&mut self, block: &FrontBlock) {
        let Some(started) = self.recording_started else {
            return;
        };

        if started.elapsed() > self.config.timeouts.recording_cap_pipeline {
            info!("recording cap reached, entering thinking");
            self.enter_thinking();
            return;
        }

        let in_cooldown = self
            .vad_cooldown_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false);

        match block.meta.vad {
            VadState::Speech => self.silence_since = None,
            VadState::Silence if in_cooldown => self.silence_since = None,
            VadState::Silence => {
                let since = *self.silence_since.get_or_insert_with(Instant::now);
                if since.elapsed() >= self.config.timeouts.vad_silence {
                    // Wall-clock speech before the silence began
                    let speech = since.duration_since(started);
                    if speech < self.config.timeouts.min_utterance {
                        debug!("no speech captured, cancelling recording");
                        CoreStats::bump(&self.stats.short_cancels);
                        self.mode = PipeMode::Idle;
                        self.recording_started = None;
                        self.acc_len = 0;
                        self.vad_end_posted = true;
                        self.post_event(PipelineEvent::VadEnd {
                            short_utterance: true,
                        });
                    } else {
                        info!(speech_ms = speech.as_millis() as u64, "silence ended recording");
                        self.enter_thinking();
                    }
                }
            }
        }
    }

    fn accumulate(&mut self, pcm: &[i16]) {
        let frame = self.config.audio.uplink_frame_samples();
        let mut offset = 0;
        while offset < pcm.len() {
            let take = (frame - self.acc_len).min(pcm.len() - offset);
            self.acc[self.acc_len..self.acc_len + take]
                .copy_from_slice(&pcm[offset..offset + take]);
            self.acc_len += take;
            offset += take;
            if self.acc_len == frame {
                self.emit_frame();
                self.acc_len = 0;
            }
        }
    }

    fn emit_frame(&mut self) {
        apply_preamp(&mut self.acc, self.config.audio.preamp_gain);

        let mut packet = [0u8; 2048];
        let len = match self.encoder.encode(&self.acc, &mut packet) {
            Ok(len) => len,
            Err(e) => {
                CoreStats::bump(&self.stats.encode_errors);
                warn!(error = %e, "encode failed, dropping frame");
                return;
            }
        };

        let Some(block) = self.pool.copy_from(&packet[..len]) else {
            CoreStats::bump(&self.stats.uplink_dropped_pool);
            return;
        };
        match self.channels.uplink_tx.try_send(block) {
            Ok(()) => {
                CoreStats::bump(&self.stats.frames_encoded);
            }
            Err(TrySendError::Full(_)) => {
                // Never block the audio path on a slow uplink
                CoreStats::bump(&self.stats.uplink_dropped_queue);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn handle_wake(&mut self) {
        let converging = self
            .aec_converge_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false);
        let muted_by_playback =
            self.mode == PipeMode::Playing && !self.config.policy.acoustic_wake_during_playback;

        if converging || muted_by_playback {
            CoreStats::bump(&self.stats.wake_suppressed);
            debug!(converging, muted_by_playback, "acoustic wake suppressed");
            return;
        }
        self.post_event(PipelineEvent::WakeDetected {
            source: WakeSource::Voice,
        });
    }

    fn post_event(&self, event: PipelineEvent) {
        if let Err(TrySendError::Full(event)) = self.channels.event_tx.try_send(event) {
            warn!(?event, "event queue full, dropping");
        }
    }

    fn log_stats(&mut self) {
        let pool = self.pool.stats();
        info!(
            mode = ?self.mode,
            samples = self.samples_captured,
            mic0_depth = self.mic0.available(),
            mic1_depth = self.mic1.available(),
            ref_depth = self.reference.available(),
            volume = self.last_volume,
            capture_rms = self.last_capture_rms,
            pool_in_use = pool.total_in_use(),
            ring_dropped = CoreStats::get(&self.stats.ring_samples_dropped),
            underruns = CoreStats::get(&self.stats.playback_underruns),
            "pipeline stats"
        );
        self.samples_captured = 0;
        self.last_stats = Instant::now();
    }
}
