//! # jumpcut-core
//!
//! Silence-skipping playback re-timing engine.
//!
//! ## Architecture
//!
//! ```text
//! Engine output → SPSC RingBuffer → LivePipeline (thread)
//!                                        │  VolumeEstimator → SilenceDetector
//!                                        ▼
//! Mirror source → Lookahead shadow (thread, 2-8x) ──► predicted SilenceIntervals
//!                                        │
//!                                        ▼
//!                     Controller::tick ──► set_playback_rate / set_position
//!                                        │   StretchScheduler ramps
//!                                        ▼
//!                          broadcast::Sender<…> observable streams
//! ```
//!
//! The host owns the clock: everything time-driven happens in
//! [`Controller::tick`].

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod buffering;
pub mod controller;
pub mod detector;
pub mod error;
pub mod ipc;
pub mod lookahead;
pub mod media;
pub mod pipeline;
pub mod settings;
pub mod stretch;
pub mod time;
pub mod time_saved;
pub mod volume;

// Convenience re-exports for downstream crates
pub use controller::{Controller, ControllerConfig};
pub use detector::{DetectorParams, SilenceDetector, SilenceEvent, SilenceEventKind};
pub use error::{JumpCutError, Result};
pub use ipc::events::{
    ControllerStatus, ControllerStatusEvent, PlaybackCommand, PlaybackCommandEvent, SilenceEventRecord,
    VolumeReading,
};
pub use lookahead::{intervals::SilenceInterval, Lookahead, LookaheadConfig};
pub use media::{BufferedSource, MediaSource, PlaybackEngine, PlaybackState, SourceId, SourceRegistry};
pub use settings::{Settings, SpeedName};
pub use stretch::{StretchInfo, StretchScheduler};
pub use time_saved::{AveragingMethod, TimeSavedData, TimeSavedTracker};
pub use volume::VolumeEstimator;
