//! Wake-Word Detection Seam
//!
//! The keyword model itself is a vendor artifact; this module defines the
//! seam it plugs into plus two concrete detectors: a null detector for
//! configurations with no model loaded, and a loudness detector useful as a
//! stand-in during bring-up (clap twice to wake).

/// A keyword spotter. `process` consumes one processed mono block and
/// returns the index of the triggered wake model, if any.
pub trait WakeDetector: Send {
    fn process(&mut self, block: &[i16]) -> Option<usize>;

    /// Drop any partial-match state.
    fn reset(&mut self) {}
}

/// Never triggers. Used when no wake model is configured.
pub struct NoWake;

impl WakeDetector for NoWake {
    fn process(&mut self, _block: &[i16]) -> Option<usize> {
        None
    }
}

/// Bring-up stand-in: triggers model 0 after `required` consecutive blocks
/// whose peak exceeds `threshold`. Not a keyword spotter; do not ship it.
pub struct LoudnessWake {
    threshold: i16,
    required: u32,
    run: u32,
}

impl LoudnessWake {
    pub fn new(threshold: i16, required: u32) -> Self {
        Self {
            threshold,
            required,
            run: 0,
        }
    }
}

impl WakeDetector for LoudnessWake {
    fn process(&mut self, block: &[i16]) -> Option<usize> {
        let peak = block.iter().map(|&s| s.unsigned_abs()).max().unwrap_or(0);
        if peak >= self.threshold.unsigned_abs() {
            self.run += 1;
            if self.run >= self.required {
                self.run = 0;
                return Some(0);
            }
        } else {
            self.run = 0;
        }
        None
    }

    fn reset(&mut self) {
        self.run = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_wake_never_fires() {
        let mut det = NoWake;
        assert_eq!(det.process(&[i16::MAX; 64]), None);
    }

    #[test]
    fn test_loudness_requires_consecutive_blocks() {
        let mut det = LoudnessWake::new(10_000, 3);
        let loud = [12_000i16; 64];
        let quiet = [100i16; 64];

        assert_eq!(det.process(&loud), None);
        assert_eq!(det.process(&loud), None);
        assert_eq!(det.process(&loud), Some(0));

        // A quiet block resets the run
        assert_eq!(det.process(&loud), None);
        assert_eq!(det.process(&quiet), None);
        assert_eq!(det.process(&loud), None);
    }
}
