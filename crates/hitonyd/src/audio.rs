//! cpal-backed Audio I/O
//!
//! Desktop stand-in for the device's I²S codec. cpal streams are not Send,
//! so they live on a dedicated thread; the core sees only the channels.
//! The single desktop microphone is duplicated into both "mic" slots of
//! the stereo capture frame.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use hitony_core::{AudioIo, CoreError, CoreResult};
use tracing::{info, warn};

/// One second of buffering between the cpal callbacks and the core.
const CHANNEL_DEPTH: usize = 16_000;

pub struct CpalAudio {
    capture_rx: Receiver<i16>,
    playback_tx: Sender<i16>,
    period: Duration,
    shutdown: Arc<AtomicBool>,
    holder: Option<std::thread::JoinHandle<()>>,
}

impl CpalAudio {
    pub fn start(sample_rate: u32, period: Duration) -> Result<Self> {
        let (capture_tx, capture_rx) = bounded::<i16>(CHANNEL_DEPTH);
        let (playback_tx, playback_rx) = bounded::<i16>(CHANNEL_DEPTH);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let shutdown = Arc::new(AtomicBool::new(false));

        let holder_shutdown = Arc::clone(&shutdown);
        let holder = std::thread::Builder::new()
            .name("tony-cpal".into())
            .spawn(move || {
                let result = build_streams(sample_rate, capture_tx, playback_rx);
                match result {
                    Ok((input, output)) => {
                        let _ = ready_tx.send(Ok(()));
                        // Keep the streams alive until shutdown
                        while !holder_shutdown.load(Ordering::SeqCst) {
                            std::thread::park_timeout(Duration::from_millis(100));
                        }
                        drop(input);
                        drop(output);
                    }
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                    }
                }
            })
            .context("spawning audio holder thread")?;

        ready_rx
            .recv()
            .context("audio holder thread died during init")??;
        info!(sample_rate, "cpal audio started");

        Ok(Self {
            capture_rx,
            playback_tx,
            period,
            shutdown,
            holder: Some(holder),
        })
    }
}

fn build_streams(
    sample_rate: u32,
    capture_tx: Sender<i16>,
    playback_rx: Receiver<i16>,
) -> Result<(cpal::Stream, cpal::Stream)> {
    let host = cpal::default_host();
    let input_device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("no input device"))?;
    let output_device = host
        .default_output_device()
        .ok_or_else(|| anyhow!("no output device"))?;

    let config = cpal::StreamConfig {
        channels: 1,
        sample_rate: cpal::SampleRate(sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };

    let input_stream = input_device
        .build_input_stream(
            &config,
            move |data: &[i16], _: &cpal::InputCallbackInfo| {
                // Real-time callback: push and forget, never block
                for &sample in data {
                    if let Err(TrySendError::Full(_)) = capture_tx.try_send(sample) {
                        break;
                    }
                }
            },
            |err| warn!(error = %err, "input stream error"),
            None,
        )
        .context("building input stream")?;

    let output_stream = output_device
        .build_output_stream(
            &config,
            move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                for sample in data.iter_mut() {
                    *sample = playback_rx.try_recv().unwrap_or(0);
                }
            },
            |err| warn!(error = %err, "output stream error"),
            None,
        )
        .context("building output stream")?;

    input_stream.play().context("starting input stream")?;
    output_stream.play().context("starting output stream")?;
    Ok((input_stream, output_stream))
}

impl AudioIo for CpalAudio {
    fn read_capture(&mut self, out: &mut [i16]) -> CoreResult<usize> {
        let deadline = Instant::now() + self.period * 2;
        let frames = out.len() / 2;
        for i in 0..frames {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let sample = match self.capture_rx.recv_timeout(remaining) {
                Ok(sample) => sample,
                Err(_) => {
                    // Short read: the core treats missing tail as silence
                    for slot in out[i * 2..].iter_mut() {
                        *slot = 0;
                    }
                    return Ok(out.len());
                }
            };
            out[i * 2] = sample;
            out[i * 2 + 1] = sample;
        }
        Ok(out.len())
    }

    fn write_playback(&mut self, pcm: &[i16]) -> CoreResult<()> {
        for &sample in pcm {
            if self.playback_tx.try_send(sample).is_err() {
                return Err(CoreError::Io("playback buffer full".into()));
            }
        }
        Ok(())
    }
}

impl Drop for CpalAudio {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.holder.take() {
            handle.thread().unpark();
            let _ = handle.join();
        }
    }
}
