//! Front-End Configuration

use crate::error::{FrontError, FrontResult};

/// Input channel layout handed to [`crate::FrontEnd::feed`].
///
/// The reference channel carries the signal currently being played through
/// the speaker; it is consumed by the echo canceller and never reaches the
/// processed output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    /// (mic0, mic1) interleaved - echo cancellation unavailable
    DualMic,
    /// (mic0, mic1, ref) interleaved
    DualMicWithRef,
}

impl ChannelLayout {
    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::DualMic => 2,
            ChannelLayout::DualMicWithRef => 3,
        }
    }

    pub fn has_reference(self) -> bool {
        matches!(self, ChannelLayout::DualMicWithRef)
    }
}

/// Voice-activity sensitivity. Level 0 is lenient (favours speech quality,
/// slow to call silence), level 3 is aggressive (quick to call silence).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct VadSensitivity(u8);

impl VadSensitivity {
    pub fn new(level: u8) -> FrontResult<Self> {
        if level > 3 {
            return Err(FrontError::InvalidConfig(format!(
                "VAD sensitivity {} out of range 0-3",
                level
            )));
        }
        Ok(Self(level))
    }

    pub fn level(self) -> u8 {
        self.0
    }
}

impl Default for VadSensitivity {
    fn default() -> Self {
        Self(2)
    }
}

/// Automatic gain control tuning.
#[derive(Debug, Clone, Copy)]
pub struct AgcConfig {
    /// Maximum compression gain applied to quiet input, in dB.
    pub gain_db: f32,
    /// Peak level the controller steers toward, as a fraction of full scale.
    pub target_level: f32,
}

impl Default for AgcConfig {
    fn default() -> Self {
        Self {
            gain_db: 9.0,
            target_level: 0.6,
        }
    }
}

/// Full front-end configuration.
#[derive(Debug, Clone)]
pub struct FrontConfig {
    pub sample_rate: u32,
    pub layout: ChannelLayout,
    /// Samples per channel per feed call (and per output block).
    pub chunk_samples: usize,

    pub aec: bool,
    pub noise_suppression: bool,
    pub agc: bool,
    pub vad: bool,
    pub wake: bool,

    pub vad_sensitivity: VadSensitivity,
    pub agc_config: AgcConfig,
    /// Identifiers of the wake models to load. The detector maps a trigger
    /// back to an index into this list.
    pub wake_models: Vec<String>,
}

impl Default for FrontConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            layout: ChannelLayout::DualMicWithRef,
            chunk_samples: 256,
            aec: true,
            noise_suppression: true,
            agc: true,
            vad: true,
            wake: true,
            vad_sensitivity: VadSensitivity::default(),
            agc_config: AgcConfig::default(),
            wake_models: vec!["hi_tony".to_string()],
        }
    }
}

impl FrontConfig {
    /// Interleaved samples expected by one feed call.
    pub fn block_samples(&self) -> usize {
        self.chunk_samples * self.layout.channels()
    }

    pub fn validate(&self) -> FrontResult<()> {
        if self.sample_rate < 8_000 || self.sample_rate > 48_000 {
            return Err(FrontError::InvalidConfig(format!(
                "unsupported sample rate {}",
                self.sample_rate
            )));
        }
        if self.chunk_samples == 0 || self.chunk_samples > 4096 {
            return Err(FrontError::InvalidConfig(format!(
                "invalid chunk size {}",
                self.chunk_samples
            )));
        }
        if self.aec && !self.layout.has_reference() {
            return Err(FrontError::InvalidConfig(
                "echo cancellation requires a reference channel".into(),
            ));
        }
        Ok(())
    }

    /// Wall-clock duration of one chunk, in milliseconds.
    pub fn chunk_ms(&self) -> f32 {
        self.chunk_samples as f32 * 1000.0 / self.sample_rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(FrontConfig::default().validate().is_ok());
    }

    #[test]
    fn test_block_samples() {
        let config = FrontConfig::default();
        assert_eq!(config.block_samples(), 256 * 3);

        let no_ref = FrontConfig {
            layout: ChannelLayout::DualMic,
            aec: false,
            ..FrontConfig::default()
        };
        assert_eq!(no_ref.block_samples(), 256 * 2);
    }

    #[test]
    fn test_aec_requires_reference() {
        let config = FrontConfig {
            layout: ChannelLayout::DualMic,
            aec: true,
            ..FrontConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_vad_sensitivity_range() {
        assert!(VadSensitivity::new(0).is_ok());
        assert!(VadSensitivity::new(3).is_ok());
        assert!(VadSensitivity::new(4).is_err());
    }

    #[test]
    fn test_chunk_ms() {
        let config = FrontConfig::default();
        assert!((config.chunk_ms() - 16.0).abs() < 0.01);
    }
}
