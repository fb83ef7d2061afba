//! Audio Hardware Seam
//!
//! The I²S codec on the device; cpal in the desktop shell; scripted fakes
//! in the test suite. The pipeline worker is the only caller.

use crate::error::CoreResult;

pub trait AudioIo: Send {
    /// Read one interleaved stereo capture frame into `out`, blocking up to
    /// the DMA period. Returns the interleaved sample count written; short
    /// reads are allowed.
    fn read_capture(&mut self, out: &mut [i16]) -> CoreResult<usize>;

    /// Write mono PCM to the speaker.
    fn write_playback(&mut self, pcm: &[i16]) -> CoreResult<()>;
}
