//! Message Types for Worker Communication
//!
//! Commands flow from the control worker to the pipeline worker; pipeline
//! events flow back. Engine events flow from the control worker to whoever
//! embeds the engine (UI shell, daemon, tests).

use serde::{Deserialize, Serialize};

/// Commands sent from the control worker to the pipeline worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineCmd {
    StartRecording,
    StopRecording,
    StartPlayback,
    StopPlayback,
    Shutdown,
}

/// Where a wake event originated. Touch bypasses every acoustic gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeSource {
    Voice,
    Touch,
}

/// Events sent from the pipeline worker to the control worker. Encoded
/// uplink packets travel on their own queue; its readability is the
/// "encode ready" signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineEvent {
    WakeDetected {
        source: WakeSource,
    },
    /// The recording ended locally (silence window or pipeline cap).
    /// `short_utterance` marks an auto-listen that caught no speech; the
    /// session returns to Idle without producing a server turn.
    VadEnd {
        short_utterance: bool,
    },
}

/// The authoritative session state, owned by the control worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Recording,
    Speaking,
    Music,
    Error,
}

impl SessionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Recording => 1,
            SessionState::Speaking => 2,
            SessionState::Music => 3,
            SessionState::Error => 4,
        }
    }

    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            1 => SessionState::Recording,
            2 => SessionState::Speaking,
            3 => SessionState::Music,
            4 => SessionState::Error,
            _ => SessionState::Idle,
        }
    }

    /// Only these states admit inbound audio packets.
    pub fn accepts_inbound_audio(self) -> bool {
        matches!(self, SessionState::Speaking | SessionState::Music)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Recording => "recording",
            SessionState::Speaking => "speaking",
            SessionState::Music => "music",
            SessionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// Status LED pattern, a pure function of the session state plus the
/// reconnect countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedPattern {
    Breathing,
    Listening,
    Thinking,
    Speaking,
    Music,
    Error,
}

/// Events surfaced by the engine to its embedder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum Event {
    StateChanged(SessionState),
    /// Status label text for the display collaborator.
    StatusText(String),
    Led(LedPattern),
    Expression {
        expr: String,
        duration_ms: u64,
    },
    ReconnectCountdown {
        seconds_left: u64,
        attempt: u32,
    },
    SessionStarted {
        session_id: String,
    },
    AsrText(String),
    ServerError(String),
    MusicTitle(String),
    UpdateAvailable {
        version: String,
        url: String,
    },
}
