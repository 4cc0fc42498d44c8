//! In-memory media source, decoded up front.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{JumpCutError, Result};
use crate::time::{seconds_to_samples, MediaTime};

use super::MediaSource;

/// Planar samples held in memory. Mirrors share the decoded data.
#[derive(Debug, Clone)]
pub struct BufferedSource {
    data: Arc<Vec<Vec<f32>>>,
    sample_rate: u32,
    frames: usize,
    cursor: usize,
    released: bool,
}

impl BufferedSource {
    pub fn new(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(JumpCutError::MediaSource("sample rate must be positive".into()));
        }
        let frames = channels.first().map_or(0, Vec::len);
        if channels.iter().any(|c| c.len() != frames) {
            return Err(JumpCutError::MediaSource("channels differ in length".into()));
        }
        Ok(Self {
            data: Arc::new(channels),
            sample_rate,
            frames,
            cursor: 0,
            released: false,
        })
    }

    /// Decode a WAV file. Integer formats are scaled to `[-1, 1]`.
    pub fn from_wav(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channel_count = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int if spec.bits_per_sample <= 16 => reader
                .samples::<i16>()
                .map(|s| s.map(|v| v as f32 / i16::MAX as f32))
                .collect::<std::result::Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let max = ((1_i64 << (spec.bits_per_sample - 1)) - 1) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max))
                    .collect::<std::result::Result<_, _>>()?
            }
        };

        let frames = interleaved.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in interleaved.chunks_exact(channel_count) {
            for (ch, &s) in channels.iter_mut().zip(frame) {
                ch.push(s);
            }
        }
        debug!(
            path = %path.display(),
            sample_rate = spec.sample_rate,
            channels = channel_count,
            frames,
            "decoded WAV"
        );
        Self::new(channels, spec.sample_rate)
    }

    /// An independent reader over the same samples, positioned at the start.
    pub fn mirror(&self) -> Self {
        Self {
            data: Arc::clone(&self.data),
            sample_rate: self.sample_rate,
            frames: self.frames,
            cursor: 0,
            released: false,
        }
    }

    pub fn frames(&self) -> usize {
        self.frames
    }

    /// Planar samples of `channel` in `[start, start + len)`, clipped to the stream.
    pub fn slice(&self, channel: usize, start: usize, len: usize) -> &[f32] {
        let data = &self.data[channel];
        let start = start.min(data.len());
        let end = start.saturating_add(len).min(data.len());
        &data[start..end]
    }
}

impl MediaSource for BufferedSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn channels(&self) -> usize {
        self.data.len()
    }

    fn duration(&self) -> Option<MediaTime> {
        Some(self.frames as f64 / self.sample_rate as f64)
    }

    fn position(&self) -> MediaTime {
        self.cursor as f64 / self.sample_rate as f64
    }

    fn seek(&mut self, position: MediaTime) -> Result<()> {
        if !position.is_finite() {
            return Err(JumpCutError::MediaSource(format!("cannot seek to {position}")));
        }
        self.cursor = seconds_to_samples(position, self.sample_rate).min(self.frames);
        Ok(())
    }

    fn read(&mut self, out: &mut [Vec<f32>], frames: usize) -> Result<usize> {
        if self.released {
            return Ok(0);
        }
        if out.len() < self.data.len() {
            return Err(JumpCutError::MediaSource(format!(
                "read buffer has {} channels, source has {}",
                out.len(),
                self.data.len()
            )));
        }
        let n = frames.min(self.frames - self.cursor);
        for (dst, src) in out.iter_mut().zip(self.data.iter()) {
            if dst.len() < n {
                return Err(JumpCutError::MediaSource("read buffer too short".into()));
            }
            dst[..n].copy_from_slice(&src[self.cursor..self.cursor + n]);
        }
        self.cursor += n;
        Ok(n)
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.data = Arc::new(Vec::new());
            self.frames = 0;
            self.cursor = 0;
        }
    }
}
