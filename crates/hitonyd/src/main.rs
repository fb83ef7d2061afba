//! Hi Tony Daemon
//!
//! Runs the device core against the desktop's default audio devices and a
//! conversation server over WebSocket. Wake is a loudness stand-in (clap
//! twice) or the `w` + Enter key as the "touch" wake.

mod audio;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use hitony_core::{
    CoreConfig, DeviceEngine, DeviceIdentity, EngineSeams, Event, LoudnessWake, OpusDecoder,
    OpusEncoder, WsConnector,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "hitonyd", about = "Hi Tony voice device daemon")]
struct Args {
    /// Conversation server endpoint
    #[arg(long, default_value = "ws://127.0.0.1:8000/voice")]
    server: String,

    /// Device MAC as aa:bb:cc:dd:ee:ff (identity derivation)
    #[arg(long, default_value = "24:6f:28:ab:cd:ef")]
    mac: String,

    /// Disable acoustic echo cancellation
    #[arg(long)]
    no_aec: bool,

    /// Peak level the loudness wake stand-in triggers on
    #[arg(long, default_value_t = 28_000)]
    wake_threshold: i16,
}

fn parse_mac(raw: &str) -> Result<[u8; 6]> {
    let parts: Vec<&str> = raw.split(':').collect();
    if parts.len() != 6 {
        bail!("MAC must have six colon-separated bytes");
    }
    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16).with_context(|| format!("bad MAC byte {:?}", part))?;
    }
    Ok(mac)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let identity = DeviceIdentity::from_mac(parse_mac(&args.mac)?);
    info!(device_id = %identity.device_id, server = %args.server, "starting");

    let mut config = CoreConfig::default();
    config.server_url = args.server.clone();
    if args.no_aec {
        config.front.aec = false;
        config.front.layout = hitony_core::ChannelLayout::DualMic;
    }

    let io = audio::CpalAudio::start(config.audio.sample_rate, config.audio.capture_period())?;
    let engine = DeviceEngine::new(
        config.clone(),
        identity.clone(),
        EngineSeams {
            io: Box::new(io),
            encoder: Box::new(OpusEncoder::new(config.audio.sample_rate)?),
            decoder: Box::new(OpusDecoder::new(config.audio.sample_rate)?),
            connector: Box::new(WsConnector::new(
                &args.server,
                &identity.device_id,
                &identity.device_token,
            )),
            wake_detector: Box::new(LoudnessWake::new(args.wake_threshold, 3)),
        },
    )?;
    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        ctrlc::set_handler(move || running.store(false, Ordering::SeqCst))
            .context("installing signal handler")?;
    }

    // `w` + Enter acts as the touch sensor
    let (touch_tx, touch_rx) = crossbeam_channel::bounded::<()>(4);
    {
        let running = Arc::clone(&running);
        std::thread::Builder::new()
            .name("tony-stdin".into())
            .spawn(move || {
                let mut line = String::new();
                while running.load(Ordering::SeqCst) {
                    line.clear();
                    if std::io::stdin().read_line(&mut line).is_err() {
                        return;
                    }
                    if line.trim() == "w" && touch_tx.try_send(()).is_err() {
                        return;
                    }
                }
            })
            .context("spawning stdin thread")?;
    }

    info!("running; say the wake phrase loudly, or type `w` + Enter");
    while running.load(Ordering::SeqCst) {
        if touch_rx.try_recv().is_ok() {
            info!("touch wake");
            engine.touch_wake();
        }
        match engine.poll_event() {
            Some(Event::StateChanged(state)) => info!(%state, "session"),
            Some(Event::StatusText(text)) => info!(status = %text, "ui"),
            Some(Event::Led(pattern)) => info!(?pattern, "led"),
            Some(Event::Expression { expr, duration_ms }) => {
                info!(expr = %expr, duration_ms, "expression")
            }
            Some(Event::ReconnectCountdown {
                seconds_left,
                attempt,
            }) => info!(seconds_left, attempt, "reconnecting"),
            Some(Event::SessionStarted { session_id }) => info!(%session_id, "session started"),
            Some(Event::AsrText(text)) => info!(heard = %text, "asr"),
            Some(Event::MusicTitle(title)) => info!(%title, "music"),
            Some(Event::ServerError(message)) => tracing::warn!(%message, "server error"),
            Some(Event::UpdateAvailable { version, url }) => {
                info!(%version, %url, "firmware update available")
            }
            None => std::thread::sleep(Duration::from_millis(20)),
        }
    }

    info!("shutting down");
    drop(engine);
    Ok(())
}
