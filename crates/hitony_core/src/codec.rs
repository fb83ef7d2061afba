//! Codec Seam
//!
//! One encoder instance per uplink, one decoder per downlink, both holding
//! internal state across frames: a dropped packet must skip the packet, not
//! recreate the codec. The traits exist so the test suite can substitute a
//! deterministic PCM codec; production uses Opus in the VoIP profile.

use crate::error::{CoreError, CoreResult};

/// Encodes one fixed-duration PCM frame into a compressed packet.
pub trait PacketEncoder: Send {
    /// Encode `pcm` into `out`; returns the packet length in bytes.
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> CoreResult<usize>;
}

/// Decodes one compressed packet into PCM.
pub trait PacketDecoder: Send {
    /// Decode `packet` into `out`; returns the sample count written.
    fn decode(&mut self, packet: &[u8], out: &mut [i16]) -> CoreResult<usize>;
}

/// Opus uplink encoder, mono VoIP profile.
pub struct OpusEncoder {
    inner: opus::Encoder,
}

impl OpusEncoder {
    pub fn new(sample_rate: u32) -> CoreResult<Self> {
        let inner = opus::Encoder::new(
            sample_rate,
            opus::Channels::Mono,
            opus::Application::Voip,
        )
        .map_err(|e| CoreError::Init(format!("opus encoder: {}", e)))?;
        Ok(Self { inner })
    }
}

impl PacketEncoder for OpusEncoder {
    fn encode(&mut self, pcm: &[i16], out: &mut [u8]) -> CoreResult<usize> {
        self.inner
            .encode(pcm, out)
            .map_err(|e| CoreError::Codec(format!("encode: {}", e)))
    }
}

/// Opus downlink decoder, mono.
pub struct OpusDecoder {
    inner: opus::Decoder,
}

impl OpusDecoder {
    pub fn new(sample_rate: u32) -> CoreResult<Self> {
        let inner = opus::Decoder::new(sample_rate, opus::Channels::Mono)
            .map_err(|e| CoreError::Init(format!("opus decoder: {}", e)))?;
        Ok(Self { inner })
    }
}

impl PacketDecoder for OpusDecoder {
    fn decode(&mut self, packet: &[u8], out: &mut [i16]) -> CoreResult<usize> {
        self.inner
            .decode(packet, out, false)
            .map_err(|e| CoreError::Codec(format!("decode: {}", e)))
    }
}

/// Apply the fixed software preamp in place, saturating at full scale.
pub fn apply_preamp(pcm: &mut [i16], gain: i32) {
    if gain == 1 {
        return;
    }
    for s in pcm.iter_mut() {
        *s = (*s as i32 * gain).clamp(i16::MIN as i32, i16::MAX as i32) as i16;
    }
}
