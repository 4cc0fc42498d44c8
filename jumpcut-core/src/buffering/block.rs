//! The unit of work handed to a processing context.

/// Frames per processing step, matching the render quantum of common audio graphs.
pub const QUANTUM_FRAMES: usize = 128;

/// A fixed-size block of planar multi-channel samples (a "quantum").
///
/// Zero channels means no input is connected: analysis treats such a block
/// as unknown loudness, never as silence.
#[derive(Debug, Clone)]
pub struct SampleBlock {
    /// One `Vec` per channel, every channel holding `frames` samples.
    pub channels: Vec<Vec<f32>>,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    frames: usize,
}

impl SampleBlock {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        let frames = channels.first().map_or(0, Vec::len);
        debug_assert!(
            channels.iter().all(|c| c.len() == frames),
            "all channels of a block must have the same length"
        );
        Self {
            channels,
            sample_rate,
            frames,
        }
    }

    /// A block with no channels: "no input connected".
    pub fn disconnected(frames: usize, sample_rate: u32) -> Self {
        Self {
            channels: Vec::new(),
            sample_rate,
            frames,
        }
    }

    /// Deinterleave `interleaved` into a block with `channel_count` channels.
    pub fn from_interleaved(interleaved: &[f32], channel_count: usize, sample_rate: u32) -> Self {
        if channel_count == 0 {
            return Self::disconnected(0, sample_rate);
        }
        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (ch, &s) in channels.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        Self {
            channels,
            sample_rate,
            frames,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn is_disconnected(&self) -> bool {
        self.channels.is_empty()
    }

    /// Duration of this block in seconds.
    pub fn duration_secs(&self) -> f64 {
        self.frames as f64 / self.sample_rate as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deinterleaves_stereo() {
        let block = SampleBlock::from_interleaved(&[1.0, -1.0, 2.0, -2.0, 3.0, -3.0], 2, 48_000);
        assert_eq!(block.frames(), 3);
        assert_eq!(block.channels[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(block.channels[1], vec![-1.0, -2.0, -3.0]);
    }

    #[test]
    fn zero_channels_is_disconnected() {
        let block = SampleBlock::from_interleaved(&[0.5; 8], 0, 48_000);
        assert!(block.is_disconnected());
        assert_eq!(block.channel_count(), 0);
    }

    #[test]
    fn duration_uses_sample_rate() {
        let block = SampleBlock::new(vec![vec![0.0; 480]], 48_000);
        assert!((block.duration_secs() - 0.01).abs() < 1e-12);
    }
}
