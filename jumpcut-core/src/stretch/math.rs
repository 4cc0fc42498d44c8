//! Closed-form timing relations between media time, real time and delay.

use crate::time::TimeDelta;

/// Extra lookahead so ramps are never scheduled for a moment that has
/// already passed by the time the control context gets to run.
pub const CODE_EXECUTION_MARGIN: TimeDelta = 0.010;

/// Real-time length of a media-time `margin` played at `speed`.
pub fn realtime_margin(margin: TimeDelta, speed: f64) -> TimeDelta {
    margin / speed
}

/// Mathematically minimal lookahead delay that lets `margin_before` work.
pub fn min_lookahead_delay(margin_before: TimeDelta, sounded_speed: f64, silence_speed: f64) -> TimeDelta {
    margin_before / sounded_speed.max(silence_speed)
}

/// [`min_lookahead_delay`] plus [`CODE_EXECUTION_MARGIN`].
pub fn optimal_lookahead_delay(margin_before: TimeDelta, sounded_speed: f64, silence_speed: f64) -> TimeDelta {
    min_lookahead_delay(margin_before, sounded_speed, silence_speed) + CODE_EXECUTION_MARGIN
}

/// How long a snippet lasts after its playback speed changes.
pub fn new_snippet_duration(original_realtime_duration: TimeDelta, original_speed: f64, new_speed: f64) -> TimeDelta {
    original_realtime_duration * original_speed / new_speed
}

/// Delay accumulated by the stretcher once it has finished re-timing a snippet.
pub fn stretcher_delay_change(
    snippet_original_realtime_duration: TimeDelta,
    original_speed: f64,
    new_speed: f64,
) -> TimeDelta {
    new_snippet_duration(snippet_original_realtime_duration, original_speed, new_speed)
        - snippet_original_realtime_duration
}

/// Steady-state stretcher delay at sounded speed: the margin-before went by
/// at silence speed and has to be replayed at sounded speed.
pub fn stretcher_sounded_delay(margin_before: TimeDelta, sounded_speed: f64, silence_speed: f64) -> TimeDelta {
    let realtime_margin_before = margin_before / silence_speed;
    stretcher_delay_change(realtime_margin_before, silence_speed, sounded_speed)
}

/// Total delay between the input and the stretcher's delay-node output.
pub fn delay_from_input_to_stretcher_output(lookahead_delay: TimeDelta, stretcher_delay: TimeDelta) -> TimeDelta {
    lookahead_delay + stretcher_delay
}

/// Total delay between the input and what the listener hears.
pub fn total_output_delay(
    lookahead_delay: TimeDelta,
    stretcher_delay: TimeDelta,
    pitch_corrector_delay: TimeDelta,
) -> TimeDelta {
    lookahead_delay + stretcher_delay + pitch_corrector_delay
}
