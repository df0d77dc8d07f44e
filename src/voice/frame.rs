//! PCM audio frames

use std::time::Duration;

/// Sample rate of synthesized speech
pub const SAMPLE_RATE: u32 = 24_000;

/// Bytes per 16-bit mono sample
const BYTES_PER_SAMPLE: usize = 2;

/// A chunk of 16-bit little-endian mono PCM at [`SAMPLE_RATE`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame {
    /// Position of this frame within its speech session
    pub seq: u64,

    /// Raw PCM bytes, always a whole number of samples
    pub pcm: Vec<u8>,
}

impl AudioFrame {
    /// Create a frame
    #[must_use]
    pub const fn new(seq: u64, pcm: Vec<u8>) -> Self {
        Self { seq, pcm }
    }

    /// Build a frame from samples
    #[must_use]
    pub fn from_samples(seq: u64, samples: &[i16]) -> Self {
        let pcm = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
        Self { seq, pcm }
    }

    /// Decoded samples
    pub fn samples(&self) -> impl Iterator<Item = i16> + '_ {
        self.pcm
            .chunks_exact(BYTES_PER_SAMPLE)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
    }

    /// Number of samples
    #[must_use]
    pub const fn sample_count(&self) -> usize {
        self.pcm.len() / BYTES_PER_SAMPLE
    }

    /// Playback duration
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.sample_count() as f64 / f64::from(SAMPLE_RATE))
    }

    /// Whether the frame carries no audio
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.pcm.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn samples_are_little_endian() {
        let frame = AudioFrame::new(0, vec![0x01, 0x00, 0xff, 0xff]);
        assert_eq!(frame.samples().collect::<Vec<_>>(), vec![1, -1]);
    }

    #[test]
    fn from_samples_matches_bytes() {
        let frame = AudioFrame::from_samples(3, &[256, -2]);
        assert_eq!(frame.pcm, vec![0x00, 0x01, 0xfe, 0xff]);
        assert_eq!(frame.seq, 3);
    }

    #[test]
    fn one_second_of_audio() {
        let frame = AudioFrame::from_samples(0, &vec![0; SAMPLE_RATE as usize]);
        assert_eq!(frame.duration(), Duration::from_secs(1));
    }
}
