//! Automatic Gain Control
//!
//! Steers the block peak toward the configured target level with a slewed
//! gain, bounded by the configured maximum compression gain. Gain moves
//! down fast (to catch clipping) and up slowly.

use crate::config::AgcConfig;

const GAIN_UP_RATE: f32 = 0.02;
const GAIN_DOWN_RATE: f32 = 0.5;
/// Blocks quieter than this are left alone rather than amplified into hiss.
const ACTIVITY_FLOOR: f32 = 0.004;

pub struct Agc {
    max_gain: f32,
    target_peak: f32,
    gain: f32,
}

impl Agc {
    pub fn new(config: AgcConfig) -> Self {
        Self {
            max_gain: 10f32.powf(config.gain_db / 20.0),
            target_peak: config.target_level.clamp(0.05, 1.0),
            gain: 1.0,
        }
    }

    pub fn process(&mut self, samples: &mut [i16]) {
        let peak = samples
            .iter()
            .map(|&s| (s as f32 / 32768.0).abs())
            .fold(0.0f32, f32::max);

        if peak > ACTIVITY_FLOOR {
            let desired = (self.target_peak / peak).clamp(1.0 / self.max_gain, self.max_gain);
            let rate = if desired < self.gain {
                GAIN_DOWN_RATE
            } else {
                GAIN_UP_RATE
            };
            self.gain += (desired - self.gain) * rate;
        }

        if (self.gain - 1.0).abs() > 0.001 {
            for s in samples.iter_mut() {
                let v = (*s as f32) * self.gain;
                *s = v.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
            }
        }
    }

    pub fn reset(&mut self) {
        self.gain = 1.0;
    }
}
