//! Hysteresis silence detection over a loudness stream.
//!
//! ## Algorithm
//!
//! Two states, `Sounded` and `Silent`, plus the time of the last loud sample.
//!
//! 1. A sample `>= volume_threshold` is loud: remember its time. If the
//!    detector was `Silent`, emit `SilenceEnd` immediately.
//! 2. A quiet sample while `Sounded` emits `SilenceStart` once
//!    `now >= last_loud + duration_threshold`.
//! 3. Unknown loudness (no input connected) counts as loud but never emits.
//!
//! End-of-silence detection is eager, start-of-silence detection is lazy.
//! The detector consumes a single loudness channel; the type of
//! [`SilenceDetector::process`] enforces that.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::time::{ContextTime, TimeDelta};

/// Direction of a detector transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SilenceEventKind {
    SilenceStart,
    SilenceEnd,
}

/// A transition, stamped with the detector's clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SilenceEvent {
    pub kind: SilenceEventKind,
    pub time: ContextTime,
}

/// Whether the detector currently considers its input silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DetectorState {
    Sounded,
    Silent,
}

/// Control-rate parameters, read once per block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorParams {
    /// Loudness at or above which a sample is loud. Range `[0, 1]`.
    pub volume_threshold: f32,
    /// How long loudness must stay below the threshold before silence starts.
    pub duration_threshold: TimeDelta,
}

impl DetectorParams {
    /// Clamp out-of-range values. Out-of-range input is a caller bug, so debug
    /// builds fail fast instead.
    pub fn sanitized(self) -> Self {
        let valid_volume = (0.0..=1.0).contains(&self.volume_threshold);
        let valid_duration = self.duration_threshold >= 0.0;
        debug_assert!(valid_volume, "volume_threshold out of [0, 1]: {}", self.volume_threshold);
        debug_assert!(valid_duration, "negative duration_threshold: {}", self.duration_threshold);
        if valid_volume && valid_duration {
            return self;
        }
        warn!(
            volume_threshold = self.volume_threshold,
            duration_threshold = self.duration_threshold,
            "detector parameters out of range, clamping"
        );
        Self {
            volume_threshold: if self.volume_threshold.is_nan() {
                0.0
            } else {
                self.volume_threshold.clamp(0.0, 1.0)
            },
            duration_threshold: if self.duration_threshold.is_nan() {
                0.0
            } else {
                self.duration_threshold.max(0.0)
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct SilenceDetector {
    sample_rate: u32,
    last_loud_time: ContextTime,
    state: DetectorState,
}

impl SilenceDetector {
    /// Create a detector whose input is assumed to have been silent for
    /// `assumed_prior_silence` seconds before `now`.
    ///
    /// A shadow pipeline starting mid-stream passes a non-zero value so it
    /// does not have to wait out the duration threshold again.
    pub fn new(
        sample_rate: u32,
        now: ContextTime,
        assumed_prior_silence: TimeDelta,
        params: DetectorParams,
    ) -> Self {
        let mut detector = Self {
            sample_rate,
            last_loud_time: now,
            state: DetectorState::Sounded,
        };
        detector.reset(now, assumed_prior_silence, params);
        detector
    }

    /// Re-derive the state from an assumed prior silence duration.
    pub fn reset(&mut self, now: ContextTime, assumed_prior_silence: TimeDelta, params: DetectorParams) {
        debug_assert!(assumed_prior_silence >= 0.0, "negative assumed prior silence");
        let params = params.sanitized();
        self.last_loud_time = now - assumed_prior_silence.max(0.0);
        self.state = if self.is_past_duration_threshold(now, params.duration_threshold) {
            DetectorState::Silent
        } else {
            DetectorState::Sounded
        };
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn last_loud_time(&self) -> ContextTime {
        self.last_loud_time
    }

    /// Single place for the `>=` convention.
    fn is_past_duration_threshold(&self, now: ContextTime, duration_threshold: TimeDelta) -> bool {
        now >= self.last_loud_time + duration_threshold
    }

    /// Consume one block of loudness values whose first frame is at `block_start`.
    ///
    /// `volume == None` means unknown loudness for `frames` frames: assume
    /// sounded, emit nothing.
    pub fn process<F>(
        &mut self,
        volume: Option<&[f32]>,
        frames: usize,
        block_start: ContextTime,
        params: DetectorParams,
        mut emit: F,
    ) where
        F: FnMut(SilenceEvent),
    {
        let params = params.sanitized();
        let period = 1.0 / self.sample_rate as f64;

        let Some(volume) = volume else {
            self.last_loud_time = block_start + frames.saturating_sub(1) as f64 * period;
            return;
        };

        for (i, &v) in volume.iter().enumerate() {
            let now = block_start + i as f64 * period;
            if v >= params.volume_threshold {
                self.last_loud_time = now;
                if self.state == DetectorState::Silent {
                    self.state = DetectorState::Sounded;
                    emit(SilenceEvent {
                        kind: SilenceEventKind::SilenceEnd,
                        time: now,
                    });
                }
            } else if self.state == DetectorState::Sounded
                && self.is_past_duration_threshold(now, params.duration_threshold)
            {
                self.state = DetectorState::Silent;
                emit(SilenceEvent {
                    kind: SilenceEventKind::SilenceStart,
                    time: now,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 1_000;

    fn params(volume_threshold: f32, duration_threshold: f64) -> DetectorParams {
        DetectorParams {
            volume_threshold,
            duration_threshold,
        }
    }

    fn run(det: &mut SilenceDetector, values: &[f32], start: f64, p: DetectorParams) -> Vec<SilenceEvent> {
        let mut events = Vec::new();
        det.process(Some(values), values.len(), start, p, |e| events.push(e));
        events
    }

    #[test]
    fn silence_start_is_lazy() {
        let p = params(0.1, 0.2);
        let mut det = SilenceDetector::new(SR, 0.0, 0.0, p);
        // 0.1 s loud, then 0.3 s at 0.05.
        let mut values = vec![0.5f32; 100];
        values.extend(vec![0.05f32; 300]);
        let events = run(&mut det, &values, 0.0, p);

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, SilenceEventKind::SilenceStart);
        // Last loud sample at 0.099 s: due no earlier than 0.299 s and within one period.
        let t = events[0].time;
        assert!(t - 0.099 >= 0.2 - 1e-12, "t={t}");
        assert!(t <= 0.3 + 1e-9, "t={t}");
    }

    #[test]
    fn silence_end_is_eager() {
        let p = params(0.1, 0.05);
        let mut det = SilenceDetector::new(SR, 0.0, 0.0, p);
        let mut values = vec![0.0f32; 100];
        values.push(0.2);
        let events = run(&mut det, &values, 0.0, p);

        assert_eq!(events.len(), 2);
        assert_eq!(events[1].kind, SilenceEventKind::SilenceEnd);
        assert!((events[1].time - 0.1).abs() < 1e-9);
        assert_eq!(det.state(), DetectorState::Sounded);
    }

    #[test]
    fn threshold_is_inclusive_for_loudness() {
        let p = params(0.1, 0.0);
        let mut det = SilenceDetector::new(SR, 0.0, 1.0, p);
        assert_eq!(det.state(), DetectorState::Silent);
        let events = run(&mut det, &[0.1], 0.0, p);
        assert_eq!(events[0].kind, SilenceEventKind::SilenceEnd);
    }

    #[test]
    fn assumed_prior_silence_sets_initial_state() {
        let p = params(0.1, 0.2);
        assert_eq!(SilenceDetector::new(SR, 5.0, 0.0, p).state(), DetectorState::Sounded);
        assert_eq!(SilenceDetector::new(SR, 5.0, 0.2, p).state(), DetectorState::Silent);
    }

    #[test]
    fn unknown_input_suppresses_start() {
        let p = params(0.1, 0.05);
        let mut det = SilenceDetector::new(SR, 0.0, 0.0, p);
        let mut events = Vec::new();
        for k in 0..10 {
            det.process(None, 100, k as f64 * 0.1, p, |e| events.push(e));
        }
        assert!(events.is_empty());
        assert_eq!(det.state(), DetectorState::Sounded);
        // Quiet input right after unknown input still needs the full threshold.
        let events = run(&mut det, &vec![0.0; 40], 1.0, p);
        assert!(events.is_empty());
    }

    #[test]
    fn events_strictly_alternate() {
        let p = params(0.1, 0.01);
        let mut det = SilenceDetector::new(SR, 0.0, 0.0, p);
        let values: Vec<f32> = (0..5_000)
            .map(|i| if (i / 37) % 3 == 0 { 0.4 } else { 0.0 })
            .collect();
        let events = run(&mut det, &values, 0.0, p);
        assert!(events.len() > 10);
        for pair in events.windows(2) {
            assert_ne!(pair[0].kind, pair[1].kind);
        }
    }

    #[test]
    #[cfg(not(debug_assertions))]
    fn negative_duration_is_clamped_in_release() {
        let p = params(0.1, -1.0).sanitized();
        assert_eq!(p.duration_threshold, 0.0);
    }
}
