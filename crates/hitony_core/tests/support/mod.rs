//! Shared test harness: scripted microphone, captured speaker output, a
//! deterministic PCM codec, and an in-process fake server driving the real
//! receive-callback path.

// Each test binary compiles its own copy and uses a different subset
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use hitony_core::{
    AudioIo, Connector, CoreConfig, CoreResult, DeviceEngine, DeviceIdentity, EngineSeams,
    LinkEvent, LinkResult, LoudnessWake, Opcode, PacketDecoder, PacketEncoder, RxSink,
    ServerMsg, SessionState, Transport,
};

pub const SAMPLE_RATE: usize = 16_000;

/// Samples for `ms` milliseconds of mono audio.
pub fn samples(ms: u64) -> usize {
    SAMPLE_RATE * ms as usize / 1000
}

// === scripted audio hardware ===

pub struct FakeIo {
    mic: Arc<Mutex<VecDeque<i16>>>,
    played: Arc<Mutex<Vec<i16>>>,
    period: Duration,
}

impl AudioIo for FakeIo {
    fn read_capture(&mut self, out: &mut [i16]) -> CoreResult<usize> {
        // Pace at the DMA period so wall-clock timeouts see realistic audio
        std::thread::sleep(self.period);
        let mut queue = self.mic.lock().unwrap();
        for pair in out.chunks_mut(2) {
            let sample = queue.pop_front().unwrap_or(0);
            pair[0] = sample;
            pair[1] = sample;
        }
        Ok(out.len())
    }

    fn write_playback(&mut self, pcm: &[i16]) -> CoreResult<()> {
        self.played.lock().unwrap().extend_from_slice(pcm);
        Ok(())
    }
}

#[derive(Clone)]
pub struct MicHandle(Arc<Mutex<VecDeque<i16>>>);

impl MicHandle {
    /// Queue a loud burst the scripted wake detector triggers on.
    pub fn push_wake(&self) {
        let mut queue = self.0.lock().unwrap();
        for _ in 0..1024 {
            queue.push_back(32_000);
        }
    }

    /// Queue `ms` milliseconds of clearly-voiced audio.
    pub fn push_speech(&self, ms: u64) {
        let mut queue = self.0.lock().unwrap();
        for i in 0..samples(ms) {
            queue.push_back(((i as f32 * 0.25).sin() * 9_000.0) as i16);
        }
    }

    /// Queue explicit silence (an empty script is also silence).
    pub fn push_silence(&self, ms: u64) {
        let mut queue = self.0.lock().unwrap();
        for _ in 0..samples(ms) {
            queue.push_back(0);
        }
    }
}

#[derive(Clone)]
pub struct SpeakerHandle(Arc<Mutex<Vec<i16>>>);

impl SpeakerHandle {
    pub fn snapshot(&self) -> Vec<i16> {
        self.0.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

// === deterministic codec ===

/// Identity codec: i16 PCM <-> little-endian bytes. Keeps sequence markers
/// embedded in test packets observable at the speaker.
pub struct PcmCodec;

impl PacketEncoder for PcmCodec {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> CoreResult<usize> {
        for (i, &s) in pcm.iter().enumerate() {
            out[i * 2..i * 2 + 2].copy_from_slice(&s.to_le_bytes());
        }
        Ok(pcm.len() * 2)
    }
}

impl PacketDecoder for PcmCodec {
    fn decode(&mut self, packet: &[u8], out: &mut [i16]) -> CoreResult<usize> {
        let n = (packet.len() / 2).min(out.len());
        for (i, item) in out.iter_mut().take(n).enumerate() {
            *item = i16::from_le_bytes([packet[i * 2], packet[i * 2 + 1]]);
        }
        Ok(n)
    }
}

/// One downlink "packet": `count` samples all carrying the value `seq`.
pub fn seq_packet(seq: i16, count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count * 2);
    for _ in 0..count {
        out.extend_from_slice(&seq.to_le_bytes());
    }
    out
}

// === fake server ===

pub struct ServerHandle {
    sink: Mutex<Option<RxSink>>,
    sent_text: Mutex<Vec<serde_json::Value>>,
    sent_binary: Mutex<Vec<usize>>,
    connects: Mutex<Vec<Instant>>,
    refuse: AtomicI64,
    pub auto_hello: AtomicBool,
}

impl ServerHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sink: Mutex::new(None),
            sent_text: Mutex::new(Vec::new()),
            sent_binary: Mutex::new(Vec::new()),
            connects: Mutex::new(Vec::new()),
            refuse: AtomicI64::new(0),
            auto_hello: AtomicBool::new(true),
        })
    }

    pub fn refuse_next(&self, n: i64) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    pub fn send(&self, msg: &ServerMsg) {
        let json = serde_json::to_string(msg).unwrap();
        self.send_raw_text(&json);
    }

    pub fn send_raw_text(&self, json: &str) {
        if let Some(sink) = self.sink.lock().unwrap().as_mut() {
            sink.on_event(LinkEvent::Frame {
                opcode: Opcode::Text,
                data: json.as_bytes(),
                payload_len: json.len(),
                payload_offset: 0,
            });
        }
    }

    pub fn send_batch(&self, packets: &[Vec<u8>]) {
        let refs: Vec<&[u8]> = packets.iter().map(|p| p.as_slice()).collect();
        let frame = hitony_core::encode_batch(&refs);
        if let Some(sink) = self.sink.lock().unwrap().as_mut() {
            sink.on_event(LinkEvent::Frame {
                opcode: Opcode::Binary,
                data: &frame,
                payload_len: frame.len(),
                payload_offset: 0,
            });
        }
    }

    pub fn drop_connection(&self) {
        if let Some(mut sink) = self.sink.lock().unwrap().take() {
            sink.on_event(LinkEvent::Disconnected);
        }
    }

    pub fn connect_times(&self) -> Vec<Instant> {
        self.connects.lock().unwrap().clone()
    }

    /// All client JSON messages of the given `type`, in arrival order.
    pub fn texts_of_type(&self, ty: &str) -> Vec<serde_json::Value> {
        self.sent_text
            .lock()
            .unwrap()
            .iter()
            .filter(|v| v["type"] == ty)
            .cloned()
            .collect()
    }

    pub fn all_texts(&self) -> Vec<serde_json::Value> {
        self.sent_text.lock().unwrap().clone()
    }

    pub fn binary_count(&self) -> usize {
        self.sent_binary.lock().unwrap().len()
    }
}

pub struct FakeConnector(pub Arc<ServerHandle>);

impl Connector for FakeConnector {
    fn connect(&mut self, mut sink: RxSink) -> LinkResult<Box<dyn Transport>> {
        self.0.connects.lock().unwrap().push(Instant::now());
        if self.0.refuse.fetch_sub(1, Ordering::SeqCst) > 0 {
            return Err(hitony_core::LinkError::Connect("scripted refusal".into()));
        }
        self.0.refuse.store(0, Ordering::SeqCst);
        sink.on_event(LinkEvent::Connected);
        *self.0.sink.lock().unwrap() = Some(sink);
        Ok(Box::new(FakeTransport(Arc::clone(&self.0))))
    }
}

pub struct FakeTransport(Arc<ServerHandle>);

impl Transport for FakeTransport {
    fn send_text(&self, text: &str) -> LinkResult<()> {
        let value: serde_json::Value = serde_json::from_str(text).unwrap();
        let is_hello = value["type"] == "hello";
        self.0.sent_text.lock().unwrap().push(value);
        if is_hello && self.0.auto_hello.load(Ordering::SeqCst) {
            self.0.send(&ServerMsg::Hello {
                session_id: "sess-test".into(),
                features: None,
            });
        }
        Ok(())
    }

    fn send_binary(&self, data: &[u8]) -> LinkResult<()> {
        self.0.sent_binary.lock().unwrap().push(data.len());
        Ok(())
    }

    fn close(&self) {
        if let Some(mut sink) = self.0.sink.lock().unwrap().take() {
            sink.on_event(LinkEvent::Closed);
        }
    }
}

// === harness ===

/// Production config with the timeouts scaled down for test runtime. The
/// relationships between the values mirror the defaults.
pub fn test_config() -> CoreConfig {
    let mut config = CoreConfig::default();
    config.front.aec = false;
    config.front.noise_suppression = false;
    config.front.agc = false;
    config.front.layout = hitony_core::ChannelLayout::DualMic;

    config.timeouts.vad_silence = Duration::from_millis(300);
    config.timeouts.min_utterance = Duration::from_millis(250);
    config.timeouts.recording_cap_pipeline = Duration::from_secs(2);
    config.timeouts.recording_cap_session = Duration::from_secs(3);
    config.timeouts.thinking_pipeline = Duration::from_secs(2);
    config.timeouts.thinking_session = Duration::from_millis(1000);
    config.timeouts.speaking_stall = Duration::from_millis(1200);
    config.timeouts.speaking_warn_early = Duration::from_millis(300);
    config.timeouts.speaking_warn_late = Duration::from_millis(600);
    config.timeouts.aec_converge = Duration::from_millis(100);
    config.timeouts.vad_cooldown = Duration::from_millis(150);
    config.timeouts.playback_wait = Duration::from_millis(5);
    config.reconnect.schedule = [300u64, 600, 1200, 2400]
        .iter()
        .map(|&ms| Duration::from_millis(ms))
        .collect();
    config.stats_interval = Duration::from_secs(2);
    config
}

pub struct Harness {
    pub engine: DeviceEngine,
    pub server: Arc<ServerHandle>,
    pub mic: MicHandle,
    pub speaker: SpeakerHandle,
}

pub fn start(config: CoreConfig) -> Harness {
    start_with_server(config, ServerHandle::new())
}

/// Start with a pre-configured server (e.g. `auto_hello` off), avoiding
/// races with the engine's immediate first connect.
pub fn start_with_server(config: CoreConfig, server: Arc<ServerHandle>) -> Harness {
    let mic = Arc::new(Mutex::new(VecDeque::new()));
    let played = Arc::new(Mutex::new(Vec::new()));

    let capture_period = config.audio.capture_period();
    let engine = DeviceEngine::new(
        config,
        DeviceIdentity::from_mac([0x24, 0x6f, 0x28, 0xab, 0xcd, 0xef]),
        EngineSeams {
            io: Box::new(FakeIo {
                mic: Arc::clone(&mic),
                played: Arc::clone(&played),
                period: capture_period,
            }),
            encoder: Box::new(PcmCodec),
            decoder: Box::new(PcmCodec),
            connector: Box::new(FakeConnector(Arc::clone(&server))),
            wake_detector: Box::new(LoudnessWake::new(31_000, 2)),
        },
    )
    .expect("engine init");

    Harness {
        engine,
        server,
        mic: MicHandle(mic),
        speaker: SpeakerHandle(played),
    }
}

pub fn start_default() -> Harness {
    let harness = start(test_config());
    wait_connected(&harness);
    harness
}

pub fn wait_connected(harness: &Harness) {
    wait_until(
        || !harness.server.texts_of_type("hello").is_empty(),
        Duration::from_secs(2),
        "client hello never sent",
    );
    // Handshake reply is auto-sent; give the control loop a tick to absorb it
    std::thread::sleep(Duration::from_millis(50));
}

pub fn wait_state(harness: &Harness, state: SessionState, timeout: Duration) {
    wait_until(
        || harness.engine.state() == state,
        timeout,
        &format!("never reached {:?}", state),
    );
}

pub fn wait_until(mut condition: impl FnMut() -> bool, timeout: Duration, what: &str) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out: {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}
