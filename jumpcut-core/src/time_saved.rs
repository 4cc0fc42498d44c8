//! How much listening time the controller has saved.
//!
//! ## Model
//!
//! Real playback is split into snippets at every rate change, sounded-speed
//! change and silence-skipping seek. A snippet that lasted `d` real seconds
//! at rate `r` would have lasted `d * r` at intrinsic speed and
//! `d * r / sounded` at sounded speed, so it saved
//!
//! ```text
//! vs intrinsic: d * (r - 1)
//! vs sounded:   d * (r / sounded - 1)
//! ```
//!
//! Totals are either summed over all time or exponentially decayed so that
//! recent playback dominates. Time only counts while playback is active.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::settings::closest_non_normal_speed;
use crate::time::{ContextTime, MediaTime, TimeDelta};

/// How snippet totals are combined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum AveragingMethod {
    AllTime,
    /// Data older than `window` seconds weighs `1 - latest_weight` of the
    /// total.
    #[serde(rename_all = "camelCase")]
    Exponential { window: TimeDelta, latest_weight: f64 },
}

impl Default for AveragingMethod {
    fn default() -> Self {
        Self::Exponential {
            window: 600.0,
            latest_weight: 0.95,
        }
    }
}

/// Decay time constant (base e) that gives the last `window` seconds an
/// integral weight of `latest_weight`.
pub fn decay_time_constant(latest_weight: f64, window: TimeDelta) -> TimeDelta {
    let latest_is_greater_by = latest_weight / (1.0 - latest_weight);
    window / (latest_is_greater_by + 1.0).ln()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeSavedData {
    pub compared_to_sounded: TimeDelta,
    pub compared_to_intrinsic: TimeDelta,
    pub would_have_lasted_if_sounded: TimeDelta,
    pub would_have_lasted_if_intrinsic: TimeDelta,
}

impl TimeSavedData {
    /// Share of sounded-speed playback time that was saved.
    pub fn compared_to_sounded_fraction(&self) -> f64 {
        fraction(self.compared_to_sounded, self.would_have_lasted_if_sounded)
    }

    /// Share of intrinsic-speed playback time that was saved.
    pub fn compared_to_intrinsic_fraction(&self) -> f64 {
        fraction(self.compared_to_intrinsic, self.would_have_lasted_if_intrinsic)
    }

    fn zip(self, other: Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self {
            compared_to_sounded: f(self.compared_to_sounded, other.compared_to_sounded),
            compared_to_intrinsic: f(self.compared_to_intrinsic, other.compared_to_intrinsic),
            would_have_lasted_if_sounded: f(self.would_have_lasted_if_sounded, other.would_have_lasted_if_sounded),
            would_have_lasted_if_intrinsic: f(
                self.would_have_lasted_if_intrinsic,
                other.would_have_lasted_if_intrinsic,
            ),
        }
    }
}

fn fraction(saved: TimeDelta, would_have_lasted: TimeDelta) -> f64 {
    if would_have_lasted == 0.0 {
        0.0
    } else {
        saved / would_have_lasted
    }
}

/// One snippet's contribution.
fn snippet(realtime: TimeDelta, rate: f64, sounded_speed: f64) -> TimeSavedData {
    // The snapped "normal" rate counts as 1 so an idle controller does not
    // report a fraction of a percent saved.
    let rate = if rate == closest_non_normal_speed(1.0) { 1.0 } else { rate };
    let vs_sounded = rate / sounded_speed;
    TimeSavedData {
        compared_to_sounded: realtime * (vs_sounded - 1.0),
        compared_to_intrinsic: realtime * (rate - 1.0),
        would_have_lasted_if_sounded: realtime * vs_sounded,
        would_have_lasted_if_intrinsic: realtime * rate,
    }
}

/// Accumulates [`TimeSavedData`] from the rate changes the controller makes.
///
/// Totals are brought up to date only at snippet boundaries; [`data`](Self::data)
/// folds in the snippet still running.
#[derive(Debug, Clone)]
pub struct TimeSavedTracker {
    /// `None` for all-time sums.
    decay_time_constant: Option<TimeDelta>,
    rate: f64,
    sounded_speed: f64,
    totals: TimeSavedData,
    snippet_since: ContextTime,
    paused_at: Option<ContextTime>,
}

impl TimeSavedTracker {
    pub fn new(averaging: AveragingMethod, rate: f64, sounded_speed: f64, now: ContextTime, playing: bool) -> Self {
        let mut tracker = Self {
            decay_time_constant: None,
            rate,
            sounded_speed,
            totals: TimeSavedData::default(),
            snippet_since: now,
            paused_at: (!playing).then_some(now),
        };
        tracker.set_averaging(averaging);
        tracker
    }

    /// Invalid exponential parameters fall back to all-time sums.
    pub fn set_averaging(&mut self, averaging: AveragingMethod) {
        self.decay_time_constant = match averaging {
            AveragingMethod::AllTime => None,
            AveragingMethod::Exponential { window, latest_weight } => {
                let tau = decay_time_constant(latest_weight, window);
                if tau.is_finite() && tau > 0.0 {
                    Some(tau)
                } else {
                    warn!(window, latest_weight, "invalid exponential averaging, summing all time instead");
                    None
                }
            }
        };
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Real time the current snippet has been playing for.
    fn snippet_duration(&self, now: ContextTime) -> TimeDelta {
        (self.paused_at.unwrap_or(now) - self.snippet_since).max(0.0)
    }

    /// Totals as they would be if the current snippet ended at `now`.
    fn totals_at(&self, now: ContextTime) -> TimeSavedData {
        let duration = self.snippet_duration(now);
        let current = snippet(duration, self.rate, self.sounded_speed);
        match self.decay_time_constant {
            None => self.totals.zip(current, |total, value| total + value),
            Some(tau) => {
                let decay = (-duration / tau).exp();
                let integral = tau * (1.0 - decay);
                let per_second = if duration > 0.0 { duration } else { 1.0 };
                self.totals
                    .zip(current, |total, value| total * decay + integral * value / per_second)
            }
        }
    }

    /// Close the running snippet at `now` and start a new one.
    fn close_snippet(&mut self, now: ContextTime) {
        self.totals = self.totals_at(now);
        self.snippet_since = now;
        if self.paused_at.is_some() {
            self.paused_at = Some(now);
        }
    }

    pub fn on_rate_change(&mut self, rate: f64, now: ContextTime) {
        if rate == self.rate {
            return;
        }
        self.close_snippet(now);
        self.rate = rate;
    }

    pub fn on_sounded_speed_change(&mut self, sounded_speed: f64, now: ContextTime) {
        if sounded_speed == self.sounded_speed {
            return;
        }
        self.close_snippet(now);
        self.sounded_speed = sounded_speed;
    }

    /// Playback stopped or resumed. Stopped time does not count.
    pub fn on_playback_state(&mut self, playing: bool, now: ContextTime) {
        match (playing, self.paused_at) {
            (true, Some(paused_at)) => {
                self.snippet_since += now - paused_at;
                self.paused_at = None;
            }
            (false, None) => self.paused_at = Some(now),
            _ => {}
        }
    }

    /// A seek skipped `skipped` media seconds of silence and took
    /// `seek_duration` real seconds to complete.
    pub fn on_silence_skipping_seek(&mut self, skipped: MediaTime, seek_duration: TimeDelta, now: ContextTime) {
        self.close_snippet(now);
        let intrinsic_saved = skipped - seek_duration * self.rate;
        self.totals.compared_to_intrinsic += intrinsic_saved;
        self.totals.compared_to_sounded += intrinsic_saved / self.sounded_speed;
        self.totals.would_have_lasted_if_intrinsic += skipped;
        self.totals.would_have_lasted_if_sounded += skipped / self.sounded_speed;
        debug!(skipped, intrinsic_saved, "silence-skipping seek counted");
    }

    pub fn data(&self, now: ContextTime) -> TimeSavedData {
        self.totals_at(now)
    }
}
