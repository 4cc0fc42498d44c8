//! Accelerated playback for the shadow pipeline, using a rubato `FastFixedIn`
//! resampler.
//!
//! ## Design
//!
//! Playing media `rate` times faster without preserving pitch is resampling
//! by `1 / rate` and then treating the output as if it were at the original
//! sample rate. The ratio can be changed between chunks without rebuilding
//! the resampler, within the bounds given at construction.
//!
//! ```ignore
//! let mut rs = ShadowResampler::new(2, 1024, 8.0)?;
//! let frames = rs.process(&input)?;   // input: 1024 frames per channel
//! let block = rs.output_block(frames, 48_000);
//! ```

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

use crate::buffering::block::SampleBlock;
use crate::error::{JumpCutError, Result};
use crate::time::TimeDelta;

/// Slowest and fastest shadow rates the resampler is built for.
pub const MIN_SHADOW_RATE: f64 = 2.0;
pub const MAX_SHADOW_RATE: f64 = 8.0;

/// Headroom around the initial ratio; rubato rejects ratios at the bound itself.
const MAX_RATIO_RELATIVE: f64 = 5.0;

pub struct ShadowResampler {
    resampler: FastFixedIn<f32>,
    chunk_size: usize,
    channels: usize,
    rate: f64,
    /// Pre-allocated output buffer: `[channels][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl ShadowResampler {
    /// `chunk_size` input frames are consumed per [`process`](Self::process) call.
    pub fn new(channels: usize, chunk_size: usize, initial_rate: f64) -> Result<Self> {
        if channels == 0 || chunk_size == 0 {
            return Err(JumpCutError::Resampler(format!(
                "need at least one channel and frame, got {channels} x {chunk_size}"
            )));
        }
        let rate = initial_rate.clamp(MIN_SHADOW_RATE, MAX_SHADOW_RATE);
        // Centre the allowed range on the fastest rate, so every rate in
        // [MIN_SHADOW_RATE, MAX_SHADOW_RATE] stays inside it.
        let resampler = FastFixedIn::<f32>::new(
            1.0 / MAX_SHADOW_RATE,
            MAX_RATIO_RELATIVE,
            PolynomialDegree::Cubic,
            chunk_size,
            channels,
        )
        .map_err(|e| JumpCutError::Resampler(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let mut converter = Self {
            resampler,
            chunk_size,
            channels,
            rate: MAX_SHADOW_RATE,
            output_buf: vec![vec![0f32; max_out]; channels],
        };
        converter.set_rate(rate)?;
        debug!(channels, chunk_size, rate, max_out, "shadow resampler ready");
        Ok(converter)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Change the playback rate, clamped to the supported range.
    pub fn set_rate(&mut self, rate: f64) -> Result<()> {
        let rate = rate.clamp(MIN_SHADOW_RATE, MAX_SHADOW_RATE);
        if rate == self.rate {
            return Ok(());
        }
        self.resampler
            .set_resample_ratio(1.0 / rate, false)
            .map_err(|e| JumpCutError::Resampler(format!("set ratio for rate {rate}: {e}")))?;
        self.rate = rate;
        Ok(())
    }

    /// Delay the resampler adds, in output seconds at `sample_rate`.
    pub fn output_delay(&self, sample_rate: u32) -> TimeDelta {
        self.resampler.output_delay() as f64 / sample_rate as f64
    }

    /// Drop buffered history, e.g. after a seek.
    pub fn reset(&mut self) {
        self.resampler.reset();
    }

    /// Resample one full chunk. Returns the number of output frames.
    pub fn process(&mut self, input: &[Vec<f32>]) -> Result<usize> {
        debug_assert!(input.len() == self.channels && input.iter().all(|c| c.len() >= self.chunk_size));
        let (_consumed, produced) = self
            .resampler
            .process_into_buffer(input, &mut self.output_buf, None)
            .map_err(|e| JumpCutError::Resampler(format!("process: {e}")))?;
        Ok(produced)
    }

    /// Resample the last, partial chunk of a stream.
    pub fn process_last(&mut self, input: &[Vec<f32>]) -> Result<usize> {
        let (_consumed, produced) = self
            .resampler
            .process_partial_into_buffer(Some(input), &mut self.output_buf, None)
            .map_err(|e| JumpCutError::Resampler(format!("process partial: {e}")))?;
        Ok(produced)
    }

    /// Copy the first `frames` output frames into a block.
    pub fn output_block(&self, frames: usize, sample_rate: u32) -> SampleBlock {
        let channels = self
            .output_buf
            .iter()
            .map(|ch| ch[..frames.min(ch.len())].to_vec())
            .collect();
        SampleBlock::new(channels, sample_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_shrinks_by_rate() {
        let mut rs = ShadowResampler::new(1, 1024, 4.0).expect("resampler");
        let input = vec![vec![0.25f32; 1024]];
        let mut produced = 0;
        for _ in 0..8 {
            produced += rs.process(&input).expect("process");
        }
        let expected = 8 * 1024 / 4;
        assert!(
            (produced as isize - expected as isize).unsigned_abs() <= 16,
            "produced={produced} expected≈{expected}"
        );
    }

    #[test]
    fn rate_is_clamped_and_adjustable() {
        let mut rs = ShadowResampler::new(2, 512, 100.0).expect("resampler");
        assert_eq!(rs.rate(), MAX_SHADOW_RATE);
        rs.set_rate(2.0).expect("set rate");
        assert_eq!(rs.rate(), 2.0);
        rs.set_rate(0.5).expect("set rate");
        assert_eq!(rs.rate(), MIN_SHADOW_RATE);
    }

    #[test]
    fn rejects_empty_layout() {
        assert!(ShadowResampler::new(0, 512, 4.0).is_err());
        assert!(ShadowResampler::new(1, 0, 4.0).is_err());
    }

    #[test]
    fn block_has_requested_frames() {
        let mut rs = ShadowResampler::new(2, 256, 2.0).expect("resampler");
        let input = vec![vec![0.5f32; 256]; 2];
        let frames = rs.process(&input).expect("process");
        let block = rs.output_block(frames, 48_000);
        assert_eq!(block.frames(), frames);
        assert_eq!(block.channel_count(), 2);
    }
}
