//! Predicted silence intervals on the media timeline.

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::time::{MediaTime, TimeDelta};

/// Intervals shorter than this are not worth a rate change.
pub const MIN_INTERVAL_DURATION: TimeDelta = 0.010;

/// Negative durations below this point at a timing bug rather than float noise.
const SUSPICIOUS_NEGATIVE_DURATION: TimeDelta = -0.050;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SilenceInterval {
    pub start: MediaTime,
    pub end: MediaTime,
}

impl SilenceInterval {
    pub fn new(start: MediaTime, end: MediaTime) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    pub fn contains(&self, time: MediaTime) -> bool {
        self.start <= time && time <= self.end
    }
}

/// Append-only, in discovery order. Reseeks can make it unsorted and even
/// duplicate entries, so lookups scan everything.
#[derive(Debug, Clone, Default)]
pub struct SilenceIntervals {
    intervals: Vec<SilenceInterval>,
}

impl SilenceIntervals {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `[start, end]` unless it is shorter than `min_duration`.
    ///
    /// Returns the stored interval. Zero and negative lengths, produced by
    /// margins larger than the silence itself, are dropped like any other
    /// short interval.
    pub fn push(&mut self, start: MediaTime, end: MediaTime, min_duration: TimeDelta) -> Option<SilenceInterval> {
        let duration = end - start;
        if !(duration >= min_duration) {
            if duration < SUSPICIOUS_NEGATIVE_DURATION {
                warn!(start, end, duration, "large negative silence interval dropped");
            } else {
                trace!(start, end, duration, "short silence interval dropped");
            }
            return None;
        }
        let interval = SilenceInterval::new(start, end);
        self.intervals.push(interval);
        Some(interval)
    }

    /// The interval with the smallest end strictly after `time`.
    ///
    /// The returned interval may already have started.
    pub fn next_after(&self, time: MediaTime) -> Option<SilenceInterval> {
        self.intervals
            .iter()
            .filter(|i| i.end > time)
            .min_by(|a, b| a.end.total_cmp(&b.end))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.intervals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SilenceInterval> {
        self.intervals.iter()
    }
}
