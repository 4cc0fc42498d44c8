//! Streaming windowed RMS loudness.
//!
//! ## Algorithm
//!
//! 1. For each frame, average the squared samples across channels.
//! 2. Keep a running sum of the last `W` such mean squares: subtract the one
//!    leaving the window, add the one entering it.
//! 3. Clamp the running sum at zero (floating-point drift) and emit
//!    `sqrt(sum / W)`.
//!
//! The window length is fixed for the estimator's lifetime. Windows shorter
//! than one processing block are not a supported configuration.

pub mod ring;

use crate::buffering::block::SampleBlock;
use crate::time::{seconds_to_samples, TimeDelta};
use ring::SquaresRing;

/// Rectangular-window RMS estimator.
#[derive(Debug, Clone)]
pub struct VolumeEstimator {
    squares: SquaresRing,
    window_samples: usize,
    running_sum: f64,
    out: Vec<f32>,
}

impl VolumeEstimator {
    /// Create an estimator with a `window` of the given length in seconds.
    pub fn new(window: TimeDelta, sample_rate: u32) -> Self {
        Self::with_window_samples(seconds_to_samples(window, sample_rate))
    }

    pub fn with_window_samples(window_samples: usize) -> Self {
        debug_assert!(window_samples > 0, "smoothing window must span at least one sample");
        let window_samples = window_samples.max(1);
        Self {
            squares: SquaresRing::new(window_samples),
            window_samples,
            running_sum: 0.0,
            out: Vec::new(),
        }
    }

    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    /// Process one block, returning one loudness value per frame.
    ///
    /// Returns `None` when the block has no channels: loudness is unknown,
    /// which is not the same as silent.
    pub fn process(&mut self, block: &SampleBlock) -> Option<&[f32]> {
        if block.is_disconnected() {
            return None;
        }
        let frames = block.frames();
        let num_channels = block.channel_count() as f32;
        self.out.clear();
        self.out.reserve(frames);

        for i in 0..frames {
            let square_sum: f32 = block.channels.iter().map(|ch| ch[i] * ch[i]).sum();
            let mean_square = square_sum / num_channels;

            let leaving = self.squares.get_reverse(self.window_samples - 1);
            self.running_sum -= leaving as f64;
            self.running_sum += mean_square as f64;
            self.running_sum = self.running_sum.max(0.0);
            self.squares.push(mean_square);

            self.out
                .push((self.running_sum / self.window_samples as f64).sqrt() as f32);
        }
        Some(self.out.as_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn constant_block(amplitude: f32, channels: usize, frames: usize) -> SampleBlock {
        SampleBlock::new(vec![vec![amplitude; frames]; channels], 48_000)
    }

    #[test]
    fn silence_stays_zero() {
        let mut est = VolumeEstimator::with_window_samples(256);
        for _ in 0..4 {
            let out = est.process(&constant_block(0.0, 2, 128)).unwrap();
            assert!(out.iter().all(|&v| v == 0.0));
        }
    }

    #[test]
    fn constant_amplitude_converges() {
        let mut est = VolumeEstimator::with_window_samples(300);
        let mut last = 0.0;
        for _ in 0..5 {
            last = *est.process(&constant_block(0.3, 2, 128)).unwrap().last().unwrap();
        }
        assert_abs_diff_eq!(last, 0.3, epsilon = 1e-5);
    }

    #[test]
    fn negative_samples_count_as_loud() {
        let mut est = VolumeEstimator::with_window_samples(128);
        let out = est.process(&constant_block(-0.5, 1, 128)).unwrap();
        assert_abs_diff_eq!(*out.last().unwrap(), 0.5, epsilon = 1e-5);
    }

    #[test]
    fn channels_are_averaged() {
        let mut est = VolumeEstimator::with_window_samples(128);
        let block = SampleBlock::new(vec![vec![1.0; 128], vec![0.0; 128]], 48_000);
        let out = est.process(&block).unwrap();
        assert_abs_diff_eq!(*out.last().unwrap(), 0.5f32.sqrt(), epsilon = 1e-5);
    }

    #[test]
    fn disconnected_input_is_unknown() {
        let mut est = VolumeEstimator::with_window_samples(128);
        assert!(est.process(&SampleBlock::disconnected(128, 48_000)).is_none());
    }

    #[test]
    fn full_scale_then_silence_decays_over_one_window() {
        let mut est = VolumeEstimator::new(0.02, 48_000);
        let window = est.window_samples();
        assert_eq!(window, 960);

        let loud = est.process(&constant_block(1.0, 1, window)).unwrap().to_vec();
        assert!(loud.windows(2).all(|w| w[1] >= w[0]));
        assert_abs_diff_eq!(*loud.last().unwrap(), 1.0, epsilon = 1e-6);

        let quiet = est.process(&constant_block(0.0, 1, window)).unwrap().to_vec();
        assert!(quiet.iter().all(|&v| v >= 0.0));
        assert!(quiet.windows(2).all(|w| w[1] <= w[0]));
        // Still above zero one sample before the window has passed...
        assert!(quiet[window - 2] > 0.0);
        // ...and exactly zero once every loud sample has left it.
        assert_eq!(quiet[window - 1], 0.0);

        let after = est.process(&constant_block(0.0, 1, 128)).unwrap();
        assert!(after.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn window_from_seconds() {
        let est = VolumeEstimator::new(0.02, 48_000);
        assert_eq!(est.window_samples(), 960);
    }
}
