//! User-facing tunables, as delivered by the host's settings layer.

use serde::{Deserialize, Serialize};

use crate::error::{JumpCutError, Result};

/// Which of the two configured speeds is in effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedName {
    Sounded,
    Silence,
}

/// Read-only to the core; the host owns persistence and change notification.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct Settings {
    /// Loudness in `[0, 1]` at or above which audio counts as sounded.
    /// `0` disables silence detection altogether.
    pub volume_threshold: f32,
    /// Media seconds of silence kept at sounded speed before audio resumes.
    pub margin_before: f64,
    /// Media seconds of silence kept at sounded speed after audio stops.
    pub margin_after: f64,
    pub sounded_speed: f64,
    pub silence_speed: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            volume_threshold: 0.005,
            margin_before: 0.050,
            margin_after: 0.030,
            sounded_speed: 1.0,
            silence_speed: 2.5,
        }
    }
}

/// Playback rates are clamped to this range by every mainstream engine.
pub const MIN_PLAYBACK_RATE: f64 = 0.0625;
pub const MAX_PLAYBACK_RATE: f64 = 16.0;

impl Settings {
    /// Reject values outside the documented ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.volume_threshold) {
            return Err(JumpCutError::InvalidSettings(format!(
                "volumeThreshold must be in [0, 1], got {}",
                self.volume_threshold
            )));
        }
        for (name, margin) in [
            ("marginBefore", self.margin_before),
            ("marginAfter", self.margin_after),
        ] {
            if !(margin >= 0.0) {
                return Err(JumpCutError::InvalidSettings(format!(
                    "{name} must be >= 0, got {margin}"
                )));
            }
        }
        for (name, speed) in [
            ("soundedSpeed", self.sounded_speed),
            ("silenceSpeed", self.silence_speed),
        ] {
            if !(speed > 0.0) || !speed.is_finite() {
                return Err(JumpCutError::InvalidSettings(format!(
                    "{name} must be a positive number, got {speed}"
                )));
            }
        }
        Ok(())
    }

    /// Clamp every field into range, replacing non-numbers with defaults.
    pub fn normalize(&mut self) {
        let defaults = Self::default();
        if self.volume_threshold.is_nan() {
            self.volume_threshold = defaults.volume_threshold;
        }
        self.volume_threshold = self.volume_threshold.clamp(0.0, 1.0);
        self.margin_before = finite_or(self.margin_before, defaults.margin_before).clamp(0.0, 10.0);
        self.margin_after = finite_or(self.margin_after, defaults.margin_after).clamp(0.0, 10.0);
        self.sounded_speed = finite_or(self.sounded_speed, defaults.sounded_speed)
            .clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
        self.silence_speed = finite_or(self.silence_speed, defaults.silence_speed)
            .clamp(MIN_PLAYBACK_RATE, MAX_PLAYBACK_RATE);
    }

    pub fn speed(&self, name: SpeedName) -> f64 {
        match name {
            SpeedName::Sounded => self.sounded_speed,
            SpeedName::Silence => self.silence_speed,
        }
    }

    /// The rate actually handed to the playback engine for `name`.
    pub fn actual_playback_rate(&self, name: SpeedName) -> f64 {
        maybe_closest_non_normal_speed(self.speed(name), self.volume_threshold)
    }

    /// Whether a change from `old` requires rebuilding the lookahead.
    pub fn lookahead_relevant_change(&self, old: &Settings) -> bool {
        self.volume_threshold != old.volume_threshold
            || self.margin_before != old.margin_before
            || self.margin_after != old.margin_after
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Engines route exactly-normal and non-normal rates through different audio
/// paths, and switching between the two glitches. Snap rates from the small
/// "normal" neighbourhood of 1.0 to its nearest edge.
pub fn closest_non_normal_speed(speed: f64) -> f64 {
    const SMALLEST_NON_NORMAL_ABOVE_1: f64 = 1.002;
    const BIGGEST_NON_NORMAL_BELOW_1: f64 = 1.0 - (SMALLEST_NON_NORMAL_ABOVE_1 - 1.0);

    if BIGGEST_NON_NORMAL_BELOW_1 < speed && speed < SMALLEST_NON_NORMAL_ABOVE_1 {
        // The band is symmetric around 1.0; 1.0 itself goes up.
        if speed >= 1.0 {
            SMALLEST_NON_NORMAL_ABOVE_1
        } else {
            BIGGEST_NON_NORMAL_BELOW_1
        }
    } else {
        speed
    }
}

/// `volume_threshold == 0` never switches to silence speed, so the snap is
/// unnecessary there and normal playback keeps the cheaper audio path.
pub fn maybe_closest_non_normal_speed(speed: f64, volume_threshold: f32) -> f64 {
    if volume_threshold == 0.0 {
        speed
    } else {
        closest_non_normal_speed(speed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Settings::default().validate().expect("defaults must be valid");
    }

    #[test]
    fn rejects_negative_margin_and_zero_speed() {
        let mut s = Settings {
            margin_after: -0.1,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
        s.margin_after = 0.1;
        s.silence_speed = 0.0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn normalize_clamps_and_repairs() {
        let mut s = Settings {
            volume_threshold: 3.0,
            margin_before: f64::NAN,
            margin_after: -1.0,
            sounded_speed: 100.0,
            silence_speed: 0.0,
        };
        s.normalize();
        assert_eq!(s.volume_threshold, 1.0);
        assert_eq!(s.margin_before, Settings::default().margin_before);
        assert_eq!(s.margin_after, 0.0);
        assert_eq!(s.sounded_speed, MAX_PLAYBACK_RATE);
        assert_eq!(s.silence_speed, MIN_PLAYBACK_RATE);
        s.validate().expect("normalized settings validate");
    }

    #[test]
    fn json_uses_camel_case_and_fills_defaults() {
        let s: Settings = serde_json::from_str(r#"{"soundedSpeed": 1.5}"#).expect("parse");
        assert_eq!(s.sounded_speed, 1.5);
        assert_eq!(s.silence_speed, Settings::default().silence_speed);
        let json = serde_json::to_value(s).expect("serialize");
        assert!(json.get("marginBefore").is_some());
    }

    #[test]
    fn normal_band_is_snapped_to_nearest_edge() {
        assert_eq!(closest_non_normal_speed(1.0005), 1.002);
        assert!((closest_non_normal_speed(0.9995) - 0.998).abs() < 1e-12);
        assert_eq!(closest_non_normal_speed(1.0), 1.002);
        assert_eq!(closest_non_normal_speed(2.5), 2.5);
        assert_eq!(maybe_closest_non_normal_speed(1.0, 0.0), 1.0);
    }
}
