//! Control Worker - Session State Machine
//!
//! Owns the authoritative session state {Idle, Recording, Speaking, Music,
//! Error}, the transport connection, the reconnect policy, and every
//! session timeout. Ingests three queues: reassembled transport messages,
//! pipeline events, and encoded uplink packets. Timers are polled on a
//! 10 ms tick; every suspension is bounded.
//!
//! Ordering note: `tts_start` and the binary batches that follow it arrive
//! on the same FIFO receive queue, so Speaking is always set before the
//! first batch is examined and in-order batches are never dropped as
//! out-of-state.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use hitony_link::{Connector, LinkCounters, RawMsg, RxSink, Transport};
use hitony_rt::{BlockPool, PoolBlock};
use tracing::{debug, info, warn};

use crate::config::CoreConfig;
use crate::identity::DeviceIdentity;
use crate::message::{Event, LedPattern, PipelineCmd, PipelineEvent, SessionState, WakeSource};
use crate::protocol::{
    AbortReason, BatchIter, ClientMsg, Features, ListenState, MusicAction, ServerMsg,
};
use crate::stats::CoreStats;

/// The slice of the session the firmware-update collaborator needs: an
/// atomic transport close plus the flag that suppresses reconnect while an
/// update is downloading.
#[derive(Clone)]
pub struct SessionController {
    update_in_progress: Arc<AtomicBool>,
    close_requested: Arc<AtomicBool>,
}

impl SessionController {
    pub(crate) fn new() -> Self {
        Self {
            update_in_progress: Arc::new(AtomicBool::new(false)),
            close_requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark an update as running and close the transport to free buffers.
    pub fn begin_update(&self) {
        self.update_in_progress.store(true, Ordering::SeqCst);
        self.close_requested.store(true, Ordering::SeqCst);
    }

    pub fn end_update(&self) {
        self.update_in_progress.store(false, Ordering::SeqCst);
    }

    pub fn update_in_progress(&self) -> bool {
        self.update_in_progress.load(Ordering::SeqCst)
    }

    /// Close the transport without entering update mode.
    pub fn request_close(&self) {
        self.close_requested.store(true, Ordering::SeqCst);
    }

    fn take_close_request(&self) -> bool {
        self.close_requested.swap(false, Ordering::SeqCst)
    }
}

/// Queue endpoints wired up by the engine.
pub(crate) struct SessionChannels {
    pub link_rx: Receiver<RawMsg>,
    pub link_tx: Sender<RawMsg>,
    pub event_rx: Receiver<PipelineEvent>,
    pub uplink_rx: Receiver<PoolBlock>,
    pub cmd_tx: Sender<PipelineCmd>,
    pub playback_tx: Sender<PoolBlock>,
    pub ui_tx: Sender<Event>,
}

pub(crate) struct Session {
    config: CoreConfig,
    identity: DeviceIdentity,
    pool: Arc<BlockPool>,
    stats: Arc<CoreStats>,
    link_counters: Arc<LinkCounters>,
    channels: SessionChannels,
    connector: Box<dyn Connector>,
    controller: SessionController,
    shutdown: Arc<AtomicBool>,

    transport: Option<Box<dyn Transport>>,
    transport_failed: bool,

    state: SessionState,
    state_cell: Arc<AtomicU8>,
    session_id: Option<String>,
    features: Features,
    handshake_done: bool,

    music_was_playing: bool,
    tts_end_received: bool,
    drain_empty_samples: u32,
    last_drain_sample: Instant,

    last_packet_at: Option<Instant>,
    warned_early: bool,
    warned_late: bool,

    recording_since: Option<Instant>,
    thinking_since: Option<Instant>,

    reconnect_attempt: u32,
    reconnect_at: Option<Instant>,
    last_countdown: Option<u64>,
}

impl Session {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: CoreConfig,
        identity: DeviceIdentity,
        pool: Arc<BlockPool>,
        stats: Arc<CoreStats>,
        link_counters: Arc<LinkCounters>,
        connector: Box<dyn Connector>,
        controller: SessionController,
        state_cell: Arc<AtomicU8>,
        shutdown: Arc<AtomicBool>,
        channels: SessionChannels,
    ) -> Self {
        Self {
            config,
            identity,
            pool,
            stats,
            link_counters,
            channels,
            connector,
            controller,
            shutdown,
            transport: None,
            transport_failed: false,
            state: SessionState::Idle,
            state_cell,
            session_id: None,
            features: Features::default(),
            handshake_done: false,
            music_was_playing: false,
            tts_end_received: false,
            drain_empty_samples: 0,
            last_drain_sample: Instant::now(),
            last_packet_at: None,
            warned_early: false,
            warned_late: false,
            recording_since: None,
            thinking_since: None,
            reconnect_attempt: 0,
            reconnect_at: None,
            last_countdown: None,
        }
    }

    pub fn run(mut self) {
        info!("control worker started");
        self.emit(Event::StatusText("connecting".into()));
        self.attempt_connect();

        // One bounded suspension per pass (the 10 ms tick), then drain the
        // other two queues without blocking. The receive queue is handled
        // strictly in order: tts_start always precedes its batches.
        while !self.shutdown.load(Ordering::SeqCst) {
            match self
                .channels
                .link_rx
                .recv_timeout(Duration::from_millis(10))
            {
                Ok(msg) => {
                    self.handle_raw(msg);
                    while let Ok(msg) = self.channels.link_rx.try_recv() {
                        self.handle_raw(msg);
                    }
                }
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            while let Ok(event) = self.channels.event_rx.try_recv() {
                self.handle_pipeline_event(event);
            }
            while let Ok(packet) = self.channels.uplink_rx.try_recv() {
                self.handle_uplink(packet);
            }
            self.tick();
        }

        // Engine teardown: close the socket deliberately
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        info!("control worker stopped");
    }

    // === state plumbing ===

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        debug!(from = %self.state, to = %next, "session state");
        self.state = next;
        self.state_cell.store(next.as_u8(), Ordering::SeqCst);
        self.emit(Event::StateChanged(next));
        self.emit(Event::Led(match next {
            SessionState::Idle => LedPattern::Breathing,
            SessionState::Recording => LedPattern::Listening,
            SessionState::Speaking => LedPattern::Speaking,
            SessionState::Music => LedPattern::Music,
            SessionState::Error => LedPattern::Error,
        }));
    }

    fn emit(&self, event: Event) {
        let _ = self.channels.ui_tx.send(event);
    }

    fn command(&self, cmd: PipelineCmd) {
        if self.channels.cmd_tx.send(cmd).is_err() {
            warn!(?cmd, "pipeline command channel closed");
        }
    }

    fn send_client(&mut self, msg: ClientMsg) {
        let Some(transport) = self.transport.as_ref() else {
            debug!("dropping outbound message, no transport");
            return;
        };
        if let Err(e) = transport.send_text(&msg.to_json()) {
            warn!(error = %e, "control send failed");
            self.transport_failed = true;
        }
    }

    // === transport receive path ===

    fn handle_raw(&mut self, msg: RawMsg) {
        match msg {
            RawMsg::Connected => {
                info!("transport connected");
                self.reconnect_at = None;
                self.last_countdown = None;
                if self.state == SessionState::Error {
                    self.set_state(SessionState::Idle);
                }
                self.emit(Event::StatusText("connected".into()));
            }
            RawMsg::Disconnected => self.on_transport_lost(false),
            RawMsg::Closed => self.on_transport_lost(true),
            RawMsg::Text(block) => match ServerMsg::parse(&block) {
                Ok(msg) => self.dispatch_server(msg),
                Err(e) => warn!(error = %e, "unparseable control message"),
            },
            RawMsg::Binary(block) => self.handle_batch(&block),
        }
    }

    /// Split one downlink batch into packets and hand them to the pipeline.
    fn handle_batch(&mut self, batch: &PoolBlock) {
        if !self.state.accepts_inbound_audio() {
            let count = BatchIter::new(batch).count().max(1);
            CoreStats::add(&self.stats.packets_dropped_state, count as u64);
            debug!(state = %self.state, count, "dropping out-of-state audio batch");
            return;
        }

        self.last_packet_at = Some(Instant::now());
        self.warned_early = false;
        self.warned_late = false;

        let mut iter = BatchIter::new(batch);
        for packet in iter.by_ref() {
            let Some(block) = self.pool.copy_from(packet) else {
                CoreStats::bump(&self.stats.packets_dropped_pool);
                continue;
            };
            match self.channels.playback_tx.try_send(block) {
                Ok(()) => CoreStats::bump(&self.stats.packets_received),
                Err(TrySendError::Full(_)) => {
                    CoreStats::bump(&self.stats.packets_dropped_queue);
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
        if iter.truncated() {
            warn!("malformed batch tail discarded");
        }
    }

    fn dispatch_server(&mut self, msg: ServerMsg) {
        match msg {
            ServerMsg::Hello {
                session_id,
                features,
            } => {
                self.session_id = Some(session_id.clone());
                self.features = features.unwrap_or_default();
                self.handshake_done = true;
                info!(
                    session_id = %session_id,
                    abort_supported = self.features.abort,
                    "server handshake complete"
                );
                self.reconnect_attempt = 0;
                self.emit(Event::SessionStarted { session_id });
            }

            ServerMsg::TtsStart { text } => self.on_tts_start(text),

            ServerMsg::TtsEnd { reason } => {
                debug!(?reason, "tts end");
                if self.state.accepts_inbound_audio() {
                    self.tts_end_received = true;
                    self.drain_empty_samples = 0;
                    self.last_drain_sample = Instant::now();
                }
            }

            ServerMsg::MusicStart { title } => self.on_music_start(title),

            ServerMsg::MusicEnd => {
                if self.state == SessionState::Music {
                    self.tts_end_received = true;
                    self.drain_empty_samples = 0;
                    self.last_drain_sample = Instant::now();
                }
            }

            ServerMsg::MusicResume => {
                if self.state == SessionState::Idle && self.music_was_playing {
                    info!("resuming music");
                    self.music_was_playing = false;
                    self.tts_end_received = false;
                    self.stats.reset_session_scoped();
                    self.last_packet_at = Some(Instant::now());
                    self.command(PipelineCmd::StartPlayback);
                    self.set_state(SessionState::Music);
                }
            }

            ServerMsg::AsrText { text } => self.emit(Event::AsrText(text)),

            ServerMsg::Error { message } => {
                warn!(message = %message, "server error");
                if self.state == SessionState::Idle && self.thinking_since.is_some() {
                    // The turn is dead; stop showing the thinking animation
                    self.thinking_since = None;
                    self.emit(Event::Led(LedPattern::Breathing));
                }
                self.emit(Event::ServerError(message));
            }

            ServerMsg::Expression { expr, duration_ms } => {
                self.emit(Event::Expression { expr, duration_ms });
            }

            ServerMsg::Pong => {}

            ServerMsg::OtaNotify { version, url } => {
                if version != self.config.firmware_version {
                    info!(version = %version, "update available");
                    self.emit(Event::UpdateAvailable { version, url });
                }
            }

            ServerMsg::Unknown => debug!("ignoring unknown control message"),
        }
    }

    fn on_tts_start(&mut self, text: Option<String>) {
        if let Some(text) = text {
            self.emit(Event::StatusText(text));
        }
        match self.state {
            SessionState::Idle => {
                self.thinking_since = None;
                self.begin_playback(SessionState::Speaking);
            }
            SessionState::Recording => {
                // The server started replying before our end-of-speech
                self.command(PipelineCmd::StopRecording);
                self.recording_since = None;
                self.begin_playback(SessionState::Speaking);
            }
            SessionState::Speaking => {
                // Continuation of the same reply; restart the counters
                self.stats.reset_session_scoped();
                self.last_packet_at = Some(Instant::now());
                self.tts_end_received = false;
            }
            SessionState::Music | SessionState::Error => {
                debug!(state = %self.state, "ignoring tts_start");
            }
        }
    }

    fn on_music_start(&mut self, title: Option<String>) {
        if let Some(title) = title {
            self.emit(Event::MusicTitle(title));
        }
        // A preceding hint utterance may have left a tts_end (or stale
        // pipeline events) in flight; they must not end the music session.
        self.tts_end_received = false;
        while self.channels.event_rx.try_recv().is_ok() {}

        self.music_was_playing = false;
        self.begin_playback(SessionState::Music);
    }

    fn begin_playback(&mut self, state: SessionState) {
        self.stats.reset_session_scoped();
        self.tts_end_received = false;
        self.last_packet_at = Some(Instant::now());
        self.warned_early = false;
        self.warned_late = false;
        self.command(PipelineCmd::StartPlayback);
        self.set_state(state);
    }

    // === pipeline events ===

    fn handle_pipeline_event(&mut self, event: PipelineEvent) {
        match event {
            PipelineEvent::WakeDetected { source } => self.on_wake(source),
            PipelineEvent::VadEnd { short_utterance } => self.on_recording_end(short_utterance),
        }
    }

    fn on_wake(&mut self, source: WakeSource) {
        if !self.handshake_done {
            debug!(?source, "wake before handshake, ignored");
            return;
        }
        match self.state {
            SessionState::Idle => {
                self.thinking_since = None;
                self.start_recording();
            }
            SessionState::Recording => {
                debug!("wake while already listening, ignored");
            }
            SessionState::Speaking => {
                info!(?source, "barge-in during speech");
                self.send_client(ClientMsg::Abort {
                    reason: Some(AbortReason::WakeWordDetected),
                });
                self.tts_end_received = false;
                self.command(PipelineCmd::StopPlayback);
                self.start_recording();
            }
            SessionState::Music => {
                info!(?source, "barge-in during music");
                self.send_client(ClientMsg::MusicCtrl {
                    action: MusicAction::Pause,
                });
                self.music_was_playing = true;
                self.tts_end_received = false;
                self.command(PipelineCmd::StopPlayback);
                self.start_recording();
            }
            SessionState::Error => {
                debug!("wake while disconnected, ignored");
            }
        }
    }

    fn start_recording(&mut self) {
        self.send_client(ClientMsg::Listen {
            state: ListenState::Detect,
            mode: None,
            text: Some(self.config.wake_phrase.clone()),
        });
        self.send_client(ClientMsg::Listen {
            state: ListenState::Start,
            mode: Some(self.config.listen_mode),
            text: None,
        });
        self.command(PipelineCmd::StartRecording);
        self.recording_since = Some(Instant::now());
        self.set_state(SessionState::Recording);
        self.emit(Event::StatusText("listening".into()));
    }

    fn on_recording_end(&mut self, short_utterance: bool) {
        if self.state != SessionState::Recording {
            debug!("stale recording end, ignored");
            return;
        }
        self.recording_since = None;
        if short_utterance {
            // Nothing was said; no server turn exists to stop
            debug!("short utterance cancelled");
            self.set_state(SessionState::Idle);
            self.emit(Event::StatusText("idle".into()));
            return;
        }
        self.send_client(ClientMsg::Listen {
            state: ListenState::Stop,
            mode: None,
            text: None,
        });
        self.command(PipelineCmd::StopRecording);
        self.set_state(SessionState::Idle);
        self.thinking_since = Some(Instant::now());
        self.emit(Event::Led(LedPattern::Thinking));
        self.emit(Event::StatusText("thinking".into()));
    }

    fn handle_uplink(&mut self, packet: PoolBlock) {
        if self.state != SessionState::Recording {
            CoreStats::bump(&self.stats.uplink_dropped_state);
            return;
        }
        let Some(transport) = self.transport.as_ref() else {
            CoreStats::bump(&self.stats.uplink_dropped_state);
            return;
        };
        if let Err(e) = transport.send_binary(&packet) {
            warn!(error = %e, "uplink send failed");
            self.transport_failed = true;
        }
    }

    // === timers ===

    fn tick(&mut self) {
        if self.controller.take_close_request() {
            if let Some(transport) = self.transport.as_ref() {
                info!("closing transport on request");
                transport.close();
            }
        }

        if self.transport_failed {
            self.transport_failed = false;
            self.on_transport_lost(false);
        }

        self.tick_drain_wait();
        self.tick_speaking_stall();
        self.tick_thinking();
        self.tick_recording_cap();
        self.tick_reconnect();
    }

    /// Two-stage drain: after `tts_end`, leave Speaking/Music only once the
    /// playback queue has been observed empty for ten consecutive samples.
    /// Queue-empty alone only proves the last packet was dequeued, not
    /// played.
    fn tick_drain_wait(&mut self) {
        if !(self.state.accepts_inbound_audio() && self.tts_end_received) {
            return;
        }
        if self.last_drain_sample.elapsed() < self.config.timeouts.drain_sample {
            return;
        }
        self.last_drain_sample = Instant::now();

        if self.channels.playback_tx.is_empty() {
            self.drain_empty_samples += 1;
        } else {
            self.drain_empty_samples = 0;
        }
        if self.drain_empty_samples < self.config.timeouts.drain_consecutive {
            return;
        }

        info!(state = %self.state, "playback drained");
        self.tts_end_received = false;
        self.drain_empty_samples = 0;
        self.command(PipelineCmd::StopPlayback);
        self.set_state(SessionState::Idle);
        self.emit(Event::StatusText("idle".into()));

        if self.music_was_playing {
            self.send_client(ClientMsg::MusicCtrl {
                action: MusicAction::Resume,
            });
            // Re-entry to Music happens on the server's music_resume
        } else if self.config.policy.auto_listen_after_tts && self.handshake_done {
            self.start_recording();
        }
    }

    fn tick_speaking_stall(&mut self) {
        if self.state != SessionState::Speaking || self.tts_end_received {
            return;
        }
        let Some(last) = self.last_packet_at else {
            return;
        };
        let starved = last.elapsed();

        if !self.warned_early && starved > self.config.timeouts.speaking_warn_early {
            self.warned_early = true;
            warn!(ms = starved.as_millis() as u64, "speech stream stalling");
        }
        if !self.warned_late && starved > self.config.timeouts.speaking_warn_late {
            self.warned_late = true;
            warn!(ms = starved.as_millis() as u64, "speech stream badly stalled");
        }
        if starved > self.config.timeouts.speaking_stall {
            warn!("speech stream starved, aborting turn");
            self.send_client(ClientMsg::Abort {
                reason: Some(AbortReason::SpeakingTimeout),
            });
            self.last_packet_at = None;
            self.command(PipelineCmd::StopPlayback);
            self.set_state(SessionState::Idle);
            self.emit(Event::StatusText("idle".into()));
        }
    }

    fn tick_thinking(&mut self) {
        if self.state != SessionState::Idle {
            return;
        }
        let Some(since) = self.thinking_since else {
            return;
        };
        if since.elapsed() > self.config.timeouts.thinking_session {
            info!("no reply from server, clearing thinking state");
            self.thinking_since = None;
            self.emit(Event::Led(LedPattern::Breathing));
            self.emit(Event::StatusText("idle".into()));
        }
    }

    fn tick_recording_cap(&mut self) {
        if self.state != SessionState::Recording {
            return;
        }
        let Some(since) = self.recording_since else {
            return;
        };
        if since.elapsed() > self.config.timeouts.recording_cap_session {
            info!("recording hard cap reached");
            self.on_recording_end(false);
        }
    }

    // === connection lifecycle ===

    fn on_transport_lost(&mut self, intentional: bool) {
        if self.transport.is_none() {
            return; // duplicate notification for an already-handled loss
        }
        info!(intentional, session = ?self.session_id, "transport lost");
        self.transport = None;
        self.handshake_done = false;
        self.session_id = None;
        self.tts_end_received = false;
        self.music_was_playing = false;
        self.thinking_since = None;
        self.recording_since = None;

        // Release every buffered pool block on both queues
        while self.channels.link_rx.try_recv().is_ok() {}
        match self.state {
            SessionState::Speaking | SessionState::Music => {
                self.command(PipelineCmd::StopPlayback)
            }
            SessionState::Recording => self.command(PipelineCmd::StopRecording),
            _ => {}
        }

        if intentional && self.controller.update_in_progress() {
            // The update collaborator closed us on purpose; not an error
            // and no reconnect until the update ends.
            self.reconnect_at = None;
            self.set_state(SessionState::Idle);
            self.emit(Event::StatusText("updating".into()));
            return;
        }

        self.set_state(SessionState::Error);
        self.emit(Event::StatusText("connection lost".into()));
        self.schedule_reconnect();
    }

    fn schedule_reconnect(&mut self) {
        let delay = self.config.reconnect.delay(self.reconnect_attempt);
        debug!(attempt = self.reconnect_attempt, ?delay, "reconnect scheduled");
        self.reconnect_at = Some(Instant::now() + delay);
        self.last_countdown = None;
    }

    fn tick_reconnect(&mut self) {
        if self.transport.is_some() || self.controller.update_in_progress() {
            return;
        }
        let Some(at) = self.reconnect_at else {
            // An intentional close ended (update finished); resume quietly
            self.schedule_reconnect();
            return;
        };

        let now = Instant::now();
        if now < at {
            let seconds_left = (at - now).as_secs() + 1;
            if self.last_countdown != Some(seconds_left) {
                self.last_countdown = Some(seconds_left);
                self.emit(Event::ReconnectCountdown {
                    seconds_left,
                    attempt: self.reconnect_attempt,
                });
            }
            return;
        }

        self.reconnect_at = None;
        self.attempt_connect();
    }

    /// Full client re-init: a fresh sink (fresh reassembly state) and a
    /// fresh transport instance, so headers and handshake are re-sent
    /// cleanly.
    fn attempt_connect(&mut self) {
        let sink = RxSink::new(
            self.channels.link_tx.clone(),
            Arc::clone(&self.pool),
            Arc::clone(&self.link_counters),
        );
        match self.connector.connect(sink) {
            Ok(transport) => {
                self.transport = Some(transport);
                self.handshake_done = false;
                self.send_client(ClientMsg::Hello {
                    device_id: self.identity.device_id.clone(),
                    fw: self.config.firmware_version.clone(),
                    listen_mode: self.config.listen_mode,
                });
            }
            Err(e) => {
                warn!(error = %e, attempt = self.reconnect_attempt, "connect failed");
                self.set_state(SessionState::Error);
                self.reconnect_attempt += 1;
                self.schedule_reconnect();
            }
        }
    }
}
