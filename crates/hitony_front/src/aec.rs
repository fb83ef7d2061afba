//! Acoustic Echo Canceller
//!
//! A normalised LMS adaptive filter: the reference (speaker) signal is passed
//! through an adaptive FIR estimate of the room path and subtracted from the
//! microphone pickup. The error signal is both the output and the adaptation
//! driver.
//!
//! # Real-time Safety Contract
//!
//! `process()` performs no heap allocation and runs in O(taps * chunk).

const DEFAULT_TAPS: usize = 64;
const STEP_SIZE: f32 = 0.05;
const REGULARISATION: f32 = 1e-3;

pub struct EchoCanceller {
    weights: Vec<f32>,
    history: Vec<f32>,
    pos: usize,
    /// Running energy of the reference history, for NLMS normalisation.
    ref_energy: f32,
}

impl EchoCanceller {
    pub fn new() -> Self {
        Self::with_taps(DEFAULT_TAPS)
    }

    pub fn with_taps(taps: usize) -> Self {
        Self {
            weights: vec![0.0; taps],
            history: vec![0.0; taps],
            pos: 0,
            ref_energy: 0.0,
        }
    }

    /// Cancel `reference` out of `mic` in place.
    pub fn process(&mut self, mic: &mut [i16], reference: &[i16]) {
        debug_assert_eq!(mic.len(), reference.len());
        let taps = self.weights.len();

        for i in 0..mic.len() {
            let x = reference[i] as f32 / 32768.0;
            let d = mic[i] as f32 / 32768.0;

            // Slide the reference into the circular history
            let evicted = self.history[self.pos];
            self.ref_energy += x * x - evicted * evicted;
            self.history[self.pos] = x;
            self.pos = (self.pos + 1) % taps;

            // Estimate the echo: y = w . history (newest-first)
            let mut y = 0.0f32;
            let mut idx = self.pos;
            for w in &self.weights {
                idx = if idx == 0 { taps - 1 } else { idx - 1 };
                y += w * self.history[idx];
            }

            let e = d - y;

            // NLMS update
            let norm = STEP_SIZE / (REGULARISATION + self.ref_energy.max(0.0));
            let mut idx = self.pos;
            for w in &mut self.weights {
                idx = if idx == 0 { taps - 1 } else { idx - 1 };
                *w += norm * e * self.history[idx];
            }

            mic[i] = (e * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        }
    }

    /// Clear the adaptive state. Called when the canceller is re-enabled for
    /// a new playback session so a stale room estimate cannot ring.
    pub fn reset(&mut self) {
        self.weights.fill(0.0);
        self.history.fill(0.0);
        self.ref_energy = 0.0;
        self.pos = 0;
    }
}

impl Default for EchoCanceller {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_reference_passthrough() {
        let mut aec = EchoCanceller::new();
        let mut mic: Vec<i16> = (0..256).map(|i| ((i * 37) % 2000) as i16).collect();
        let original = mic.clone();
        let reference = vec![0i16; 256];
        aec.process(&mut mic, &reference);
        assert_eq!(mic, original);
    }

    #[test]
    fn test_converges_on_direct_echo() {
        // Mic hears exactly the reference (identity echo path). After
        // adaptation the residual must be much quieter than the input.
        let mut aec = EchoCanceller::new();
        let reference: Vec<i16> = (0..16_000)
            .map(|i| ((i as f32 * 0.12).sin() * 8000.0) as i16)
            .collect();

        let mut tail_energy = 0.0f64;
        let mut input_energy = 0.0f64;
        for (block_idx, block) in reference.chunks(256).enumerate() {
            let mut mic = block.to_vec();
            aec.process(&mut mic, block);
            if block_idx >= 40 {
                for (&m, &r) in mic.iter().zip(block) {
                    tail_energy += (m as f64) * (m as f64);
                    input_energy += (r as f64) * (r as f64);
                }
            }
        }
        assert!(
            tail_energy < input_energy * 0.05,
            "echo not attenuated: residual {:.0} vs input {:.0}",
            tail_energy,
            input_energy
        );
    }

    #[test]
    fn test_reset_clears_state() {
        let mut aec = EchoCanceller::new();
        let reference: Vec<i16> = (0..256).map(|i| ((i * 91) % 5000) as i16).collect();
        let mut mic = reference.clone();
        aec.process(&mut mic, &reference);
        aec.reset();
        assert_eq!(aec.ref_energy, 0.0);
        assert!(aec.weights.iter().all(|&w| w == 0.0));
    }
}
