//! Noise Suppression Gate
//!
//! A soft downward expander: a tracker follows the noise floor and blocks
//! sitting near it are attenuated with a smoothed gain. The floor rises
//! slowly while the gate is open so speech cannot drag it up, faster while
//! closed so steady hiss is learned quickly, and falls fast so gaps
//! between words pull it back down.

const FLOOR_RISE_OPEN: f32 = 0.01;
const FLOOR_RISE_CLOSED: f32 = 0.05;
const FLOOR_FALL: f32 = 0.2;
const OPEN_MARGIN: f32 = 2.5;
const MIN_GAIN: f32 = 0.12;
const GAIN_SMOOTHING: f32 = 0.5;

pub struct NoiseGate {
    noise_floor: f32,
    gain: f32,
}

impl NoiseGate {
    pub fn new() -> Self {
        Self {
            noise_floor: 0.001,
            gain: 1.0,
        }
    }

    /// Attenuate `samples` in place when the block sits at the noise floor.
    pub fn process(&mut self, samples: &mut [i16]) {
        let level = crate::block::rms_level(samples);
        let open = level > self.noise_floor * OPEN_MARGIN;

        let rate = if level < self.noise_floor {
            FLOOR_FALL
        } else if open {
            FLOOR_RISE_OPEN
        } else {
            FLOOR_RISE_CLOSED
        };
        self.noise_floor += (level - self.noise_floor) * rate;

        let target = if open { 1.0 } else { MIN_GAIN };
        self.gain += (target - self.gain) * GAIN_SMOOTHING;

        if (self.gain - 1.0).abs() > 0.001 {
            for s in samples.iter_mut() {
                *s = (*s as f32 * self.gain) as i16;
            }
        }
    }

    pub fn reset(&mut self) {
        self.noise_floor = 0.001;
        self.gain = 1.0;
    }
}

impl Default for NoiseGate {
    fn default() -> Self {
        Self::new()
    }
}
