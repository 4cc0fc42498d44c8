//! Delay ramps that re-time the output around silence.
//!
//! ## Model
//!
//! Audio passes through a fixed lookahead delay and then a variable
//! stretcher delay. Ramping the stretcher delay linearly between two output
//! times changes the effective playback rate during the ramp by
//! [`StretchInfo::speed_change_multiplier`]. At most one ramp is in flight;
//! scheduling a new one supersedes the future part of the previous one.
//!
//! All times here are on the output clock.

pub mod math;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::settings::Settings;
use crate::time::{ContextTime, TimeDelta};
use math::{
    delay_from_input_to_stretcher_output, realtime_margin, stretcher_delay_change,
    stretcher_sounded_delay,
};

/// A linear transition of the stretcher delay between two output times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StretchInfo {
    pub start_time: ContextTime,
    pub start_value: TimeDelta,
    pub end_time: ContextTime,
    pub end_value: TimeDelta,
}

impl StretchInfo {
    /// A ramp that holds `value` forever, starting at `at`.
    pub fn constant(value: TimeDelta, at: ContextTime) -> Self {
        Self {
            start_time: at,
            start_value: value,
            end_time: at,
            end_value: value,
        }
    }

    /// Playback-rate multiplier in effect while the ramp runs.
    ///
    /// `> 1` when the delay shrinks (speed-up), `< 1` when it grows, and
    /// exactly 1 for a constant (zero-length) ramp.
    pub fn speed_change_multiplier(&self) -> f64 {
        let duration = self.end_time - self.start_time;
        if duration <= 0.0 {
            return 1.0;
        }
        (duration + (self.start_value - self.end_value)) / duration
    }

    /// Pitch shift, in semitones, that undoes the rate change of this ramp.
    pub fn pitch_correction_semitones(&self) -> f64 {
        -12.0 * self.speed_change_multiplier().log2()
    }

    /// Delay value at output time `t`.
    pub fn value_at(&self, t: ContextTime) -> TimeDelta {
        if t <= self.start_time {
            self.start_value
        } else if t >= self.end_time {
            self.end_value
        } else {
            let progress = (t - self.start_time) / (self.end_time - self.start_time);
            self.start_value + (self.end_value - self.start_value) * progress
        }
    }

    pub fn direction(&self) -> StretchDirection {
        if self.end_value > self.start_value {
            StretchDirection::Slowdown
        } else {
            StretchDirection::Speedup
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StretchDirection {
    Speedup,
    Slowdown,
}

/// Maintains the in-flight ramp and maps input moments to output times.
#[derive(Debug, Clone)]
pub struct StretchScheduler {
    lookahead_delay: TimeDelta,
    last_stretch: StretchInfo,
    last_speed_switch_at: Option<ContextTime>,
    late_stretches: u64,
}

impl StretchScheduler {
    /// Start with a constant stretcher delay of `initial_delay`.
    pub fn new(lookahead_delay: TimeDelta, initial_delay: TimeDelta, now: ContextTime) -> Self {
        Self {
            lookahead_delay,
            last_stretch: StretchInfo::constant(initial_delay, now),
            last_speed_switch_at: None,
            late_stretches: 0,
        }
    }

    pub fn lookahead_delay(&self) -> TimeDelta {
        self.lookahead_delay
    }

    pub fn last_stretch(&self) -> &StretchInfo {
        &self.last_stretch
    }

    /// Ramps that were scheduled to start before "now".
    pub fn late_stretches(&self) -> u64 {
        self.late_stretches
    }

    /// Stretcher delay at output time `t`.
    pub fn delay_at(&self, t: ContextTime) -> TimeDelta {
        self.last_stretch.value_at(t)
    }

    /// Reset to a constant delay, e.g. after a settings change.
    pub fn reset(&mut self, lookahead_delay: TimeDelta, delay: TimeDelta, now: ContextTime) {
        self.lookahead_delay = lookahead_delay;
        self.last_stretch = StretchInfo::constant(delay, now);
        self.last_speed_switch_at = None;
    }

    /// When does the sample that was on the input at `moment` reach the
    /// stretcher's output?
    ///
    /// Only valid for answers after the current ramp's start; assumes the
    /// output clock never runs backwards.
    pub fn moment_to_output_time(&self, moment: ContextTime) -> ContextTime {
        let stretch = &self.last_stretch;
        let end_total_delay = delay_from_input_to_stretcher_output(self.lookahead_delay, stretch.end_value);
        let after_ramp = moment + end_total_delay;
        if after_ramp >= stretch.end_time || stretch.end_time <= stretch.start_time {
            return after_ramp;
        }
        // Output during the ramp: where it would land with the pre-ramp
        // delay, compressed by the ramp's speed multiplier.
        let start_total_delay = delay_from_input_to_stretcher_output(self.lookahead_delay, stretch.start_value);
        let offset_without_stretch = moment + start_total_delay - stretch.start_time;
        stretch.start_time + offset_without_stretch / stretch.speed_change_multiplier()
    }

    /// The playback engine switched to silence speed at input time `switched_at`.
    ///
    /// Ramps the delay from the sounded steady state down to zero so the
    /// margin-before that follows is heard at sounded speed.
    pub fn on_silence_start(
        &mut self,
        switched_at: ContextTime,
        settings: &Settings,
        now: ContextTime,
    ) -> Option<StretchInfo> {
        self.last_speed_switch_at = Some(switched_at);

        let speed_up_by = settings.silence_speed / settings.sounded_speed;
        let delay_decrease_speed = speed_up_by - 1.0;
        if delay_decrease_speed <= 0.0 {
            return None;
        }
        let realtime_margin_before = realtime_margin(settings.margin_before, settings.sounded_speed);
        let start_value =
            stretcher_sounded_delay(settings.margin_before, settings.sounded_speed, settings.silence_speed);
        let start_in =
            delay_from_input_to_stretcher_output(self.lookahead_delay, start_value) - realtime_margin_before;
        let snippet_new_duration = start_value / delay_decrease_speed;
        let start_time = switched_at + start_in;
        self.stretch(start_value, 0.0, start_time, start_time + snippet_new_duration, now)
    }

    /// The playback engine switched back to sounded speed at `switched_at`.
    ///
    /// Grows the delay so the part of the margin-before that already went by
    /// at silence speed gets replayed at sounded speed, interrupting the
    /// silence-start ramp if it is still running.
    pub fn on_silence_end(
        &mut self,
        switched_at: ContextTime,
        settings: &Settings,
        now: ContextTime,
    ) -> Option<StretchInfo> {
        let last_switch = self.last_speed_switch_at.replace(switched_at).unwrap_or(switched_at);
        let previous = self.last_stretch;

        let silence_lasted_realtime = switched_at - last_switch;
        let silence_lasted_intrinsic = silence_lasted_realtime * settings.silence_speed;

        let at_silence_speed_intrinsic = silence_lasted_intrinsic.min(settings.margin_before);
        let at_sounded_speed_intrinsic = settings.margin_before - at_silence_speed_intrinsic;
        let at_silence_speed_realtime = at_silence_speed_intrinsic / settings.silence_speed;
        let at_sounded_speed_realtime = at_sounded_speed_intrinsic / settings.sounded_speed;

        let margin_start_input_time = switched_at - at_silence_speed_realtime - at_sounded_speed_realtime;
        let margin_start_output_time = self.moment_to_output_time(margin_start_input_time);
        let margin_start_stretcher_delay =
            margin_start_output_time - margin_start_input_time - self.lookahead_delay;

        if margin_start_output_time < previous.end_time {
            self.interrupt(margin_start_stretcher_delay, margin_start_output_time);
        }

        let delay_increase = stretcher_delay_change(
            at_silence_speed_realtime,
            settings.silence_speed,
            settings.sounded_speed,
        );
        let final_delay = margin_start_stretcher_delay + delay_increase;
        let start_time = margin_start_output_time + at_sounded_speed_realtime;
        let end_time = switched_at + delay_from_input_to_stretcher_output(self.lookahead_delay, final_delay);
        self.stretch(margin_start_stretcher_delay, final_delay, start_time, end_time, now)
    }

    /// Cut the in-flight ramp short so that it reaches `value` at `at`.
    pub fn interrupt(&mut self, value: TimeDelta, at: ContextTime) {
        if !value.is_finite() || !at.is_finite() {
            warn!(value, at, "non-finite interrupt ignored");
            return;
        }
        debug!(value, at, "interrupting in-flight stretch");
        let previous = self.last_stretch;
        self.last_stretch = StretchInfo {
            start_time: previous.start_time.min(at),
            start_value: previous.start_value,
            end_time: at,
            end_value: value,
        };
    }

    /// Schedule a ramp. Zero-change and non-finite ramps are ignored.
    ///
    /// A ramp starting before `now` is a caller bug; it is logged, counted
    /// and applied anyway since the audio must keep flowing.
    pub fn stretch(
        &mut self,
        start_value: TimeDelta,
        end_value: TimeDelta,
        start_time: ContextTime,
        end_time: ContextTime,
        now: ContextTime,
    ) -> Option<StretchInfo> {
        if ![start_value, end_value, start_time, end_time].iter().all(|v| v.is_finite()) {
            warn!(start_time, end_time, start_value, end_value, "non-finite stretch ignored");
            return None;
        }
        if start_value == end_value {
            return None;
        }
        if start_time < now {
            self.late_stretches += 1;
            warn!(late_by = now - start_time, "stretch start scheduled in the past");
        }
        if end_time <= start_time {
            warn!(start_time, end_time, "degenerate stretch ignored");
            return None;
        }
        let stretch = StretchInfo {
            start_time,
            start_value,
            end_time,
            end_value,
        };
        debug!(
            start_time,
            end_time,
            start_value,
            end_value,
            direction = ?stretch.direction(),
            "stretch scheduled"
        );
        self.last_stretch = stretch;
        Some(stretch)
    }
}
