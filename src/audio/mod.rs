//! Audio ring buffer bridging emulation-rate samples to real-time playback
//!
//! The execution loop writes raw native samples; an audio-delivery thread
//! renders them on demand into interleaved little-endian 16-bit stereo PCM.
//! Buffer fill drives backpressure: emulation only advances while the buffer
//! is below its overrun threshold.

pub mod buffer;
#[cfg(feature = "playback")]
pub mod device;
pub mod shared;

pub use buffer::{AudioBuffer, AudioStats};
#[cfg(feature = "playback")]
pub use device::AudioDevice;
pub use shared::SharedAudioBuffer;

use crate::hardware::NativeSample;

/// Bytes per rendered stereo sample (two little-endian `i16`)
pub const BYTES_PER_SAMPLE: usize = 4;

/// Default device sample rate (48 kHz)
pub const DEFAULT_SAMPLE_RATE: u32 = 48_000;

/// Default bounded wait used by the audio and execution threads
pub const WAIT_TIMEOUT_MS: u64 = 20;

/// Channel DAC table (16 logarithmic steps)
///
/// Maps a 4-bit channel amplitude to its output level. The top entry is a
/// third of `i16::MAX`, so three full-scale channels sum without clipping.
pub const VOLUME_TABLE: [u16; 16] = [
    20, 53, 88, 125, 193, 258, 385, 525, 753, 1029, 1523, 2077, 3110, 4395, 7073, 10922,
];

/// Source of interleaved stereo PCM for an output device
pub trait PcmSource: Send + Sync {
    /// Render up to `samples_requested` stereo samples into `buffer` starting
    /// at byte `offset`. Returns the number of samples written.
    fn read_pcm(&self, buffer: &mut [u8], offset: usize, samples_requested: usize) -> usize;
}

/// Convert one native sample to a (left, right) pair.
///
/// ABC stereo: channel A left, C right, B shared between both sides.
/// `volume` scales linearly from 0 (silent) to 255 (full scale).
#[inline]
pub fn stereo_levels(sample: NativeSample, volume: u8) -> (i16, i16) {
    let a = VOLUME_TABLE[(sample & 0x0F) as usize] as u32;
    let b = VOLUME_TABLE[((sample >> 4) & 0x0F) as usize] as u32;
    let c = VOLUME_TABLE[((sample >> 8) & 0x0F) as usize] as u32;
    let vol = volume as u32;
    let left = (2 * a + b) * vol / 255;
    let right = (2 * c + b) * vol / 255;
    (left as i16, right as i16)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_table_monotonic_increasing() {
        for i in 1..16 {
            assert!(
                VOLUME_TABLE[i] > VOLUME_TABLE[i - 1],
                "Volume table not monotonic at {i}"
            );
        }
    }

    #[test]
    fn test_full_scale_does_not_clip() {
        let (l, r) = stereo_levels(0x0FFF, 255);
        assert_eq!(l, 3 * 10922);
        assert_eq!(r, 3 * 10922);
    }

    #[test]
    fn test_volume_zero_is_silent() {
        assert_eq!(stereo_levels(0x0ABC, 0), (0, 0));
    }

    #[test]
    fn test_channel_placement() {
        // A drives the left side, C the right; silent channels still emit the DAC floor
        let (l, r) = stereo_levels(0x000F, 255);
        assert_eq!((l, r), (2 * 10922 + 20, 3 * 20));
        let (l, r) = stereo_levels(0x0F00, 255);
        assert_eq!((l, r), (3 * 20, 2 * 10922 + 20));
    }
}
