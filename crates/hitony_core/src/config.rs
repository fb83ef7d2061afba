//! Core Configuration
//!
//! Every tunable of the audio plane, the session state machine, and the
//! reconnect policy lives here with its production default. Tests shrink
//! the timeouts; the relationships between them (warned-before-aborted,
//! pipeline-cap-before-session-cap) are what the validation checks.

use std::time::Duration;

use hitony_front::FrontConfig;
use hitony_rt::PoolLayout;

use crate::error::{CoreError, CoreResult};
use crate::protocol::ListenMode;

/// Audio-plane numerics.
#[derive(Debug, Clone)]
pub struct AudioConfig {
    pub sample_rate: u32,
    /// Uplink codec frame duration.
    pub uplink_frame_ms: u32,
    /// Downlink decoder frame duration.
    pub downlink_frame_ms: u32,
    /// Fixed software preamp applied after the front-end, saturating.
    pub preamp_gain: i32,
    /// Stereo frames per capture read (the DMA period).
    pub capture_frames: usize,
    /// Capacity of each microphone ring, in samples.
    pub mic_ring_capacity: usize,
    /// Capacity of the playback reference ring, in samples.
    pub ref_ring_capacity: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            uplink_frame_ms: 20,
            downlink_frame_ms: 60,
            preamp_gain: 3,
            capture_frames: 256,
            mic_ring_capacity: 8_192,
            ref_ring_capacity: 8_192,
        }
    }
}

impl AudioConfig {
    /// Samples in one uplink codec frame (320 by default).
    pub fn uplink_frame_samples(&self) -> usize {
        (self.sample_rate / 1000) as usize * self.uplink_frame_ms as usize
    }

    /// Samples in one downlink decoder frame (960 by default).
    pub fn downlink_frame_samples(&self) -> usize {
        (self.sample_rate / 1000) as usize * self.downlink_frame_ms as usize
    }

    /// Interleaved stereo samples per capture read.
    pub fn capture_samples(&self) -> usize {
        self.capture_frames * 2
    }

    /// Wall-clock duration of one capture read.
    pub fn capture_period(&self) -> Duration {
        Duration::from_micros(self.capture_frames as u64 * 1_000_000 / self.sample_rate as u64)
    }
}

/// Every timeout of both workers, as wall-clock deltas.
#[derive(Debug, Clone)]
pub struct TimeoutConfig {
    /// Pipeline-side recording cap.
    pub recording_cap_pipeline: Duration,
    /// Session-side recording hard cap (whichever fires first wins).
    pub recording_cap_session: Duration,
    /// Contiguous silence that ends a recording.
    pub vad_silence: Duration,
    /// Recordings shorter than this cancel to Idle instead of uploading.
    pub min_utterance: Duration,
    /// Pipeline-side wait in Thinking before giving up.
    pub thinking_pipeline: Duration,
    /// Session-side wait for `tts_start` before resetting the UI.
    pub thinking_session: Duration,
    /// Inbound starvation in Speaking before aborting.
    pub speaking_stall: Duration,
    /// Progressive starvation warnings.
    pub speaking_warn_early: Duration,
    pub speaking_warn_late: Duration,
    /// Acoustic wake events are dropped this long after playback start,
    /// while the echo canceller converges.
    pub aec_converge: Duration,
    /// Silence-window freeze after playback stops, so speaker tails cannot
    /// end the next recording instantly.
    pub vad_cooldown: Duration,
    /// Drain-wait sampling interval and required consecutive empty samples.
    pub drain_sample: Duration,
    pub drain_consecutive: u32,
    /// Bounded dequeue of the playback queue in the pipeline loop.
    pub playback_wait: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            recording_cap_pipeline: Duration::from_secs(10),
            recording_cap_session: Duration::from_secs(15),
            vad_silence: Duration::from_millis(800),
            min_utterance: Duration::from_millis(500),
            thinking_pipeline: Duration::from_secs(15),
            thinking_session: Duration::from_secs(10),
            speaking_stall: Duration::from_secs(8),
            speaking_warn_early: Duration::from_secs(2),
            speaking_warn_late: Duration::from_secs(4),
            aec_converge: Duration::from_millis(300),
            vad_cooldown: Duration::from_millis(500),
            drain_sample: Duration::from_millis(10),
            drain_consecutive: 10,
            playback_wait: Duration::from_millis(20),
        }
    }
}

/// Reconnect backoff schedule; the last entry repeats.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    pub schedule: Vec<Duration>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            schedule: [3u64, 6, 12, 24]
                .iter()
                .map(|&s| Duration::from_secs(s))
                .collect(),
        }
    }
}

impl ReconnectConfig {
    pub fn delay(&self, attempt: u32) -> Duration {
        let idx = (attempt as usize).min(self.schedule.len() - 1);
        self.schedule[idx]
    }
}

/// Queue depths. Each queue has one producer and one consumer.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub receive: usize,
    pub playback: usize,
    pub uplink: usize,
    pub command: usize,
    pub events: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            receive: 64,
            playback: 64,
            uplink: 32,
            command: 8,
            events: 32,
        }
    }
}

/// Behaviour switches that are policy, not plumbing.
#[derive(Debug, Clone)]
pub struct PolicyConfig {
    /// Re-open the microphone right after a TTS reply. Off: with a
    /// divergent echo canceller it creates a noise loop.
    pub auto_listen_after_tts: bool,
    /// Honour acoustic wake while the speaker is playing. Off unless the
    /// echo canceller is known-convergent on the target hardware; touch
    /// wake is honoured regardless.
    pub acoustic_wake_during_playback: bool,
    /// Consecutive all-zero front-end blocks after playback start that
    /// trigger the echo-cancellation-off fallback.
    pub zero_block_limit: u32,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            auto_listen_after_tts: false,
            acoustic_wake_during_playback: false,
            zero_block_limit: 100,
        }
    }
}

/// Root configuration of the device core.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub server_url: String,
    pub firmware_version: String,
    pub wake_phrase: String,
    pub listen_mode: ListenMode,

    pub audio: AudioConfig,
    pub timeouts: TimeoutConfig,
    pub reconnect: ReconnectConfig,
    pub queues: QueueConfig,
    pub policy: PolicyConfig,
    pub front: FrontConfig,
    pub pool: PoolLayout,

    /// Interval of the pipeline's periodic stats log.
    pub stats_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8000/voice".to_string(),
            firmware_version: env!("CARGO_PKG_VERSION").to_string(),
            wake_phrase: "Hi Tony".to_string(),
            listen_mode: ListenMode::Auto,
            audio: AudioConfig::default(),
            timeouts: TimeoutConfig::default(),
            reconnect: ReconnectConfig::default(),
            queues: QueueConfig::default(),
            policy: PolicyConfig::default(),
            front: FrontConfig::default(),
            pool: PoolLayout::default(),
            stats_interval: Duration::from_secs(10),
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> CoreResult<()> {
        self.front
            .validate()
            .map_err(|e| CoreError::Config(e.to_string()))?;

        if self.audio.sample_rate != self.front.sample_rate {
            return Err(CoreError::Config(format!(
                "core sample rate {} != front-end sample rate {}",
                self.audio.sample_rate, self.front.sample_rate
            )));
        }
        if self.audio.sample_rate % 1000 != 0 {
            return Err(CoreError::Config(
                "sample rate must be a whole number of kHz".into(),
            ));
        }
        if self.audio.uplink_frame_samples() == 0 || self.audio.downlink_frame_samples() == 0 {
            return Err(CoreError::Config("zero-length codec frame".into()));
        }
        if self.reconnect.schedule.is_empty() {
            return Err(CoreError::Config("empty reconnect schedule".into()));
        }
        if self.timeouts.recording_cap_pipeline > self.timeouts.recording_cap_session {
            return Err(CoreError::Config(
                "pipeline recording cap must not exceed the session hard cap".into(),
            ));
        }
        if self.timeouts.speaking_warn_late >= self.timeouts.speaking_stall
            || self.timeouts.speaking_warn_early >= self.timeouts.speaking_warn_late
        {
            return Err(CoreError::Config(
                "speaking warnings must precede the stall abort".into(),
            ));
        }
        if self.audio.mic_ring_capacity < self.front.chunk_samples * 2
            || self.audio.ref_ring_capacity < self.front.chunk_samples * 2
        {
            return Err(CoreError::Config("rings smaller than two chunks".into()));
        }
        Ok(())
    }
}
