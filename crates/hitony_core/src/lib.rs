//! Hi Tony Core - Voice Device Firmware Core
//!
//! The real-time audio and control plane of a full-duplex voice assistant
//! client: wake-word listening, compressed voice uplink, synthesized-speech
//! and music playback, and the session protocol over a persistent
//! connection.
//!
//! # Architecture
//!
//! Two cooperating workers communicate exclusively over bounded queues:
//! the audio pipeline turns microphone PCM into encoded uplink packets and
//! decoded downlink packets into speaker output; the control worker owns
//! the session state machine, the transport, the reconnect policy, and the
//! timeouts. The embedder talks to both through the [`DeviceEngine`]
//! facade.

mod codec;
mod config;
mod engine;
mod error;
mod identity;
mod io;
mod message;
mod pipeline;
mod protocol;
mod session;
mod stats;

pub use codec::{apply_preamp, OpusDecoder, OpusEncoder, PacketDecoder, PacketEncoder};
pub use config::{
    AudioConfig, CoreConfig, PolicyConfig, QueueConfig, ReconnectConfig, TimeoutConfig,
};
pub use engine::{DeviceEngine, EngineSeams};
pub use error::{CoreError, CoreResult};
pub use identity::DeviceIdentity;
pub use io::AudioIo;
pub use message::{Event, LedPattern, PipelineEvent, SessionState, WakeSource};
pub use protocol::{
    encode_batch, AbortReason, BatchIter, ClientMsg, Features, ListenMode, ListenState,
    MusicAction, ServerMsg,
};
pub use session::SessionController;
pub use stats::CoreStats;

// Re-export the collaborator crates' public surfaces for embedders
pub use hitony_front::{
    ChannelLayout, FrontConfig, LoudnessWake, NoWake, VadSensitivity, WakeDetector,
};
pub use hitony_link::{
    Connector, LinkCounters, LinkError, LinkEvent, LinkResult, Opcode, RawMsg, RxSink, Transport,
    WsConnector,
};
pub use hitony_rt::{BlockPool, PoolLayout};
