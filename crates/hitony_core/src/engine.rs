//! Device Engine - Main Entry Point
//!
//! Owns the two long-running workers and every queue between them:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │ audio worker (pin: core 0, highest prio, ~32 KB stack)      │
//! │   capture ─▶ rings ─▶ front-end ─▶ encoder ─▶ uplink queue  │
//! │   playback queue ─▶ decoder ─▶ speaker ─▶ reference ring    │
//! └─────────────────────────────────────────────────────────────┘
//!        ▲ commands            │ events, uplink packets
//!        │                     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │ control worker (pin: core 1, medium prio, ~8 KB stack)      │
//! │   session FSM ◀── receive queue ◀── transport callback      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! The embedder injects the hardware and network seams, polls the event
//! stream, and forwards touch wakes. Dropping the engine shuts both
//! workers down.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use hitony_front::{FrontEnd, WakeDetector};
use hitony_link::{Connector, LinkCounters};
use hitony_rt::BlockPool;
use tracing::{info, warn};

use crate::codec::{PacketDecoder, PacketEncoder};
use crate::config::CoreConfig;
use crate::error::CoreResult;
use crate::identity::DeviceIdentity;
use crate::io::AudioIo;
use crate::message::{Event, PipelineCmd, PipelineEvent, SessionState, WakeSource};
use crate::pipeline::{Pipeline, PipelineChannels};
use crate::session::{Session, SessionChannels, SessionController};
use crate::stats::CoreStats;

/// The injected collaborators: audio hardware, codecs, network, wake model.
pub struct EngineSeams {
    pub io: Box<dyn AudioIo>,
    pub encoder: Box<dyn PacketEncoder>,
    pub decoder: Box<dyn PacketDecoder>,
    pub connector: Box<dyn Connector>,
    pub wake_detector: Box<dyn WakeDetector>,
}

pub struct DeviceEngine {
    ui_rx: Receiver<Event>,
    event_tx: Sender<PipelineEvent>,
    cmd_tx: Sender<PipelineCmd>,
    shutdown: Arc<AtomicBool>,
    state_cell: Arc<AtomicU8>,
    stats: Arc<CoreStats>,
    link_counters: Arc<LinkCounters>,
    pool: Arc<BlockPool>,
    controller: SessionController,
    audio_thread: Option<JoinHandle<()>>,
    control_thread: Option<JoinHandle<()>>,
}

impl DeviceEngine {
    /// Build the core and start both workers. A failed collaborator init
    /// is fatal: the engine refuses to start and the embedder keeps its
    /// error banner up.
    pub fn new(
        config: CoreConfig,
        identity: DeviceIdentity,
        seams: EngineSeams,
    ) -> CoreResult<Self> {
        config.validate()?;

        let pool = BlockPool::with_layout(config.pool);
        let stats = CoreStats::new();
        let link_counters = LinkCounters::new();
        let front = FrontEnd::with_detector(config.front.clone(), seams.wake_detector)?;

        let (cmd_tx, cmd_rx) = bounded::<PipelineCmd>(config.queues.command);
        let (event_tx, event_rx) = bounded::<PipelineEvent>(config.queues.events);
        let (uplink_tx, uplink_rx) = bounded(config.queues.uplink);
        let (playback_tx, playback_rx) = bounded(config.queues.playback);
        let (link_tx, link_rx) = bounded(config.queues.receive);
        let (ui_tx, ui_rx) = unbounded::<Event>();

        let shutdown = Arc::new(AtomicBool::new(false));
        let state_cell = Arc::new(AtomicU8::new(SessionState::Idle.as_u8()));
        let controller = SessionController::new();

        let pipeline = Pipeline::new(
            config.clone(),
            seams.io,
            front,
            seams.encoder,
            seams.decoder,
            Arc::clone(&pool),
            Arc::clone(&stats),
            PipelineChannels {
                cmd_rx,
                event_tx: event_tx.clone(),
                uplink_tx,
                playback_rx,
            },
        );
        let audio_thread = std::thread::Builder::new()
            .name("tony-audio".into())
            .spawn(move || pipeline.run())
            .map_err(|e| crate::error::CoreError::Init(format!("audio worker: {}", e)))?;

        let session = Session::new(
            config,
            identity,
            Arc::clone(&pool),
            Arc::clone(&stats),
            Arc::clone(&link_counters),
            seams.connector,
            controller.clone(),
            Arc::clone(&state_cell),
            Arc::clone(&shutdown),
            SessionChannels {
                link_rx,
                link_tx,
                event_rx,
                uplink_rx,
                cmd_tx: cmd_tx.clone(),
                playback_tx,
                ui_tx,
            },
        );
        let control_thread = std::thread::Builder::new()
            .name("tony-ctrl".into())
            .spawn(move || session.run())
            .map_err(|e| crate::error::CoreError::Init(format!("control worker: {}", e)))?;

        Ok(Self {
            ui_rx,
            event_tx,
            cmd_tx,
            shutdown,
            state_cell,
            stats,
            link_counters,
            pool,
            controller,
            audio_thread: Some(audio_thread),
            control_thread: Some(control_thread),
        })
    }

    /// Current authoritative session state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state_cell.load(Ordering::SeqCst))
    }

    /// Forward a touch wake. Touch bypasses the acoustic gates and is
    /// honoured in every state once the handshake is done.
    pub fn touch_wake(&self) {
        if self
            .event_tx
            .try_send(PipelineEvent::WakeDetected {
                source: WakeSource::Touch,
            })
            .is_err()
        {
            warn!("touch wake dropped, event queue unavailable");
        }
    }

    /// Get next engine event (non-blocking).
    pub fn poll_event(&self) -> Option<Event> {
        self.ui_rx.try_recv().ok()
    }

    /// Get next engine event (blocking).
    pub fn wait_event(&self) -> Option<Event> {
        self.ui_rx.recv().ok()
    }

    pub fn stats(&self) -> &Arc<CoreStats> {
        &self.stats
    }

    pub fn link_counters(&self) -> &Arc<LinkCounters> {
        &self.link_counters
    }

    pub fn pool(&self) -> &Arc<BlockPool> {
        &self.pool
    }

    /// Handle for the firmware-update collaborator.
    pub fn controller(&self) -> SessionController {
        self.controller.clone()
    }

    fn shutdown_workers(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.cmd_tx.send(PipelineCmd::Shutdown);
        if let Some(handle) = self.audio_thread.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.control_thread.take() {
            let _ = handle.join();
        }
        info!("engine stopped");
    }
}

impl Drop for DeviceEngine {
    fn drop(&mut self) {
        self.shutdown_workers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{PacketDecoder, PacketEncoder};
    use crate::error::{CoreError, CoreResult};
    use hitony_front::NoWake;
    use hitony_link::{LinkError, LinkResult, RxSink, Transport};
    use std::time::Duration;

    /// Silent stereo capture at roughly the DMA cadence.
    struct SilentIo;

    impl AudioIo for SilentIo {
        fn read_capture(&mut self, out: &mut [i16]) -> CoreResult<usize> {
            std::thread::sleep(Duration::from_millis(4));
            out.fill(0);
            Ok(out.len())
        }

        fn write_playback(&mut self, _pcm: &[i16]) -> CoreResult<()> {
            Ok(())
        }
    }

    struct NullCodec;

    impl PacketEncoder for NullCodec {
        fn encode(&mut self, _pcm: &[i16], out: &mut [u8]) -> CoreResult<usize> {
            out[0] = 0;
            Ok(1)
        }
    }

    impl PacketDecoder for NullCodec {
        fn decode(&mut self, _packet: &[u8], _out: &mut [i16]) -> CoreResult<usize> {
            Ok(0)
        }
    }

    /// Connector with no server behind it.
    struct DeadConnector;

    impl Connector for DeadConnector {
        fn connect(&mut self, _sink: RxSink) -> LinkResult<Box<dyn Transport>> {
            Err(LinkError::Connect("nobody home".into()))
        }
    }

    fn test_engine() -> DeviceEngine {
        let mut config = CoreConfig::default();
        config.front.aec = false;
        config.front.noise_suppression = false;
        config.front.agc = false;
        config.front.layout = hitony_front::ChannelLayout::DualMic;
        DeviceEngine::new(
            config,
            DeviceIdentity::from_mac([1, 2, 3, 4, 5, 6]),
            EngineSeams {
                io: Box::new(SilentIo),
                encoder: Box::new(NullCodec),
                decoder: Box::new(NullCodec),
                connector: Box::new(DeadConnector),
                wake_detector: Box::new(NoWake),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_engine_creation_and_shutdown() {
        let engine = test_engine();
        std::thread::sleep(Duration::from_millis(50));
        drop(engine); // must join cleanly
    }

    #[test]
    fn test_unreachable_server_enters_error() {
        let engine = test_engine();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while engine.state() != SessionState::Error {
            assert!(std::time::Instant::now() < deadline, "never entered Error");
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn test_wake_before_handshake_is_ignored() {
        let engine = test_engine();
        std::thread::sleep(Duration::from_millis(100));
        engine.touch_wake();
        std::thread::sleep(Duration::from_millis(100));
        assert_ne!(engine.state(), SessionState::Recording);
    }

    #[test]
    fn test_invalid_config_is_fatal() {
        let mut config = CoreConfig::default();
        config.audio.sample_rate = 44_100;
        let result = DeviceEngine::new(
            config,
            DeviceIdentity::from_mac([1, 2, 3, 4, 5, 6]),
            EngineSeams {
                io: Box::new(SilentIo),
                encoder: Box::new(NullCodec),
                decoder: Box::new(NullCodec),
                connector: Box::new(DeadConnector),
                wake_detector: Box::new(NoWake),
            },
        );
        assert!(matches!(result, Err(CoreError::Config(_))));
    }
}
