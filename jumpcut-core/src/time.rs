//! Time units shared by every component.
//!
//! There is no ambient clock anywhere in the crate: operations that need
//! "now" take it as an argument.

/// A position on the media's own timeline, in seconds.
pub type MediaTime = f64;

/// A moment on an analysis or output clock, in seconds.
pub type ContextTime = f64;

/// A duration in seconds.
pub type TimeDelta = f64;

/// Convert a duration to a whole number of samples.
///
/// Rounds rather than truncates: a window given as `0.02` s may arrive as
/// `0.019999…` after an `f32` round trip.
pub fn seconds_to_samples(seconds: TimeDelta, sample_rate: u32) -> usize {
    (seconds * sample_rate as f64).round().max(0.0) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_float_noise_away() {
        assert_eq!(seconds_to_samples(0.02, 48_000), 960);
        assert_eq!(seconds_to_samples(0.02f32 as f64, 48_000), 960);
        assert_eq!(seconds_to_samples(-1.0, 48_000), 0);
    }
}
