//! Seams towards the external playback engine.
//!
//! The core never owns real media. It reads positions and states from a
//! [`PlaybackEngine`], sends rate and position commands back to it, and asks
//! it for a detached [`MediaSource`] that the lookahead can play on its own.

pub mod buffered;
pub mod registry;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::stretch::StretchInfo;
use crate::time::MediaTime;

pub use buffered::BufferedSource;
pub use registry::{SourceLease, SourceRegistry};

/// Stable identity of a media source across controllers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackState {
    Playing,
    Paused,
    Seeking,
    Buffering,
    Ended,
}

impl PlaybackState {
    /// Actually advancing: not merely unpaused, but also not seeking or
    /// waiting for data.
    pub fn is_active(self) -> bool {
        matches!(self, PlaybackState::Playing)
    }
}

/// A readable, seekable stream of planar samples.
pub trait MediaSource: Send {
    fn sample_rate(&self) -> u32;

    fn channels(&self) -> usize;

    /// `None` while unknown (e.g. live streams).
    fn duration(&self) -> Option<MediaTime>;

    /// Media time of the next frame `read` will return.
    fn position(&self) -> MediaTime;

    fn seek(&mut self, position: MediaTime) -> Result<()>;

    /// Read up to `frames` frames into `out[channel][..n]`, returning `n`.
    /// `Ok(0)` means the end of the stream.
    fn read(&mut self, out: &mut [Vec<f32>], frames: usize) -> Result<usize>;

    /// Give back decode resources. Reads after this return `Ok(0)`.
    fn release(&mut self);
}

/// The host's player, as seen by the controller.
pub trait PlaybackEngine {
    fn source_id(&self) -> SourceId;

    fn position(&self) -> MediaTime;

    fn state(&self) -> PlaybackState;

    fn duration(&self) -> Option<MediaTime>;

    fn playback_rate(&self) -> f64;

    fn set_playback_rate(&mut self, rate: f64);

    fn set_position(&mut self, position: MediaTime);

    /// Sample rate and channel count of the audio the engine feeds to the
    /// live pipeline.
    fn output_format(&self) -> (u32, usize);

    /// A muted, detached copy of the current source for the lookahead.
    ///
    /// Fails when the source cannot be mirrored (cross-origin, DRM, live
    /// capture); the controller then runs without prediction.
    fn mirror_source(&mut self) -> Result<Box<dyn MediaSource>>;

    /// Whether the engine has a variable output delay stage that accepts
    /// [`StretchInfo`] ramps.
    fn supports_stretching(&self) -> bool {
        false
    }

    fn schedule_stretch(&mut self, _stretch: &StretchInfo) {}
}
