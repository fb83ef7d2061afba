//! Voice-Activity Detection
//!
//! Energy-based per-block classifier with an adaptive noise reference and a
//! hangover: once speech is declared, a few trailing blocks stay classified
//! as speech so word gaps do not flicker the state.

use crate::block::{rms_level, VadState};
use crate::config::VadSensitivity;

const NOISE_ADAPT: f32 = 0.02;

/// Per-sensitivity tuning: (speech-over-noise ratio, absolute level floor,
/// hangover blocks). Level 0 is lenient, level 3 aggressive.
const TUNING: [(f32, f32, u32); 4] = [
    (1.6, 0.006, 18),
    (2.0, 0.008, 12),
    (2.5, 0.010, 8),
    (3.2, 0.015, 4),
];

pub struct VoiceDetector {
    ratio: f32,
    floor: f32,
    hangover_blocks: u32,
    noise_level: f32,
    hangover_left: u32,
}

impl VoiceDetector {
    pub fn new(sensitivity: VadSensitivity) -> Self {
        let (ratio, floor, hangover_blocks) = TUNING[sensitivity.level() as usize];
        Self {
            ratio,
            floor,
            hangover_blocks,
            noise_level: 0.002,
            hangover_left: 0,
        }
    }

    pub fn classify(&mut self, samples: &[i16]) -> VadState {
        let level = rms_level(samples);

        let speech = level > self.floor && level > self.noise_level * self.ratio;

        if speech {
            self.hangover_left = self.hangover_blocks;
        } else {
            // Only silence adapts the noise reference
            self.noise_level += (level - self.noise_level) * NOISE_ADAPT;
            if self.hangover_left > 0 {
                self.hangover_left -= 1;
            }
        }

        if speech || self.hangover_left > 0 {
            VadState::Speech
        } else {
            VadState::Silence
        }
    }

    pub fn reset(&mut self) {
        self.noise_level = 0.002;
        self.hangover_left = 0;
    }
}
