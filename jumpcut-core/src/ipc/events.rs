//! Observable event types for instrumentation and visualisation.
//!
//! ## Streams
//!
//! | Event | Subscribe via |
//! |-------|---------------|
//! | `VolumeReading` | `Controller::subscribe_volume` |
//! | `SilenceEventRecord` | `Controller::subscribe_silence` |
//! | `PlaybackCommandEvent` | `Controller::subscribe_commands` |
//! | `ControllerStatusEvent` | `Controller::subscribe_status` |
//!
//! Everything is forwarded from the control context, never from a
//! processing context, so the real-time side only ever does `try_send`.

use serde::{Deserialize, Serialize};

use crate::detector::SilenceEvent;
use crate::lookahead::intervals::SilenceInterval;
use crate::settings::SpeedName;
use crate::time::{ContextTime, MediaTime};

/// Which analysis pipeline produced a reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Analyses what is audible right now.
    Live,
    /// The accelerated mirror run by the lookahead.
    Shadow,
}

// ---------------------------------------------------------------------------
// Analysis events
// ---------------------------------------------------------------------------

/// Loudness at the end of one processed block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeReading {
    pub seq: u64,
    pub pipeline: PipelineKind,
    /// Pipeline clock time of the reading.
    pub time: ContextTime,
    pub volume: f32,
}

/// A detector transition as observed by the control context.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceEventRecord {
    pub seq: u64,
    pub pipeline: PipelineKind,
    #[serde(flatten)]
    pub event: SilenceEvent,
    /// Newly predicted interval, present for shadow `silenceEnd` events that
    /// produced one.
    pub interval: Option<SilenceInterval>,
}

// ---------------------------------------------------------------------------
// Playback commands
// ---------------------------------------------------------------------------

/// Why a seek was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SeekReason {
    /// Skip silence that runs until the end of the stream.
    TrailingSilence,
    /// Replay the margin-before that went by at silence speed.
    MarginBeforeSeekBack,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PlaybackCommand {
    SetPlaybackRate { value: f64, speed: SpeedName },
    SetPosition { time: MediaTime, reason: SeekReason },
}

/// A command the controller sent to the playback engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackCommandEvent {
    pub seq: u64,
    /// Controller clock time the command was issued at.
    pub at: ContextTime,
    pub command: PlaybackCommand,
}

// ---------------------------------------------------------------------------
// Controller status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerStatusEvent {
    pub status: ControllerStatus,
    /// Optional human-readable detail (e.g. why lookahead is unavailable).
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerStatus {
    /// Created, `init()` not called yet.
    Idle,
    /// Predictive mode: lookahead running.
    Active,
    /// Live-only detection; rate changes lag behind the audio.
    Degraded,
    /// Torn down.
    Stopped,
}
