//! Silence prediction ahead of real playback.
//!
//! ## How it works
//!
//! A mirror of the media is played on a worker thread, accelerated and
//! unthrottled, through its own [`AnalysisPipeline`]. Its silence events are
//! stamped with the shadow clock; [`Lookahead::pump`] translates them back to
//! the media timeline:
//!
//! ```text
//! media = shadowPosition - (shadowNow - eventTime + delay) * shadowRate
//!
//! delay(SilenceStart) = durationThreshold + smoothing/2 (+ resampler latency)
//! delay(SilenceEnd)   =                     smoothing/2 (+ resampler latency)
//! ```
//!
//! and stores `[start + marginAfter, end - marginBefore]` as a predicted
//! interval.
//!
//! The control side calls `pump` from its own loop with the real position.
//! `pump` also keeps the shadow honest: it reseeks it when real playback
//! leaves the range the shadow has covered, pauses it with real playback or
//! when it gets too far ahead, and slows it down as it gets ahead.

pub mod intervals;
pub mod resample;
pub mod shadow;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::detector::{DetectorParams, SilenceEvent, SilenceEventKind};
use crate::error::{JumpCutError, Result};
use crate::media::MediaSource;
use crate::pipeline::{AnalysisPipeline, PipelineConfig, VolumeSample};
use crate::settings::Settings;
use crate::stretch::math::realtime_margin;
use crate::time::{ContextTime, MediaTime, TimeDelta};

use intervals::{SilenceInterval, SilenceIntervals, MIN_INTERVAL_DURATION};
use resample::{ShadowResampler, MAX_SHADOW_RATE, MIN_SHADOW_RATE};
use shadow::{ShadowCommand, ShadowContext, ShadowMessage, ShadowProgress};

#[derive(Debug, Clone)]
pub struct LookaheadConfig {
    pub pipeline: PipelineConfig,
    /// Mirror frames read per worker step.
    pub chunk_frames: usize,
    pub min_interval: TimeDelta,
    pub min_rate: f64,
    pub max_rate: f64,
    /// The shadow pauses once this far ahead of real playback.
    pub max_ahead: TimeDelta,
    pub rate_update_period: TimeDelta,
    pub resync_period: TimeDelta,
    pub message_capacity: usize,
    pub command_capacity: usize,
}

impl Default for LookaheadConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            chunk_frames: 1024,
            min_interval: MIN_INTERVAL_DURATION,
            min_rate: MIN_SHADOW_RATE,
            max_rate: MAX_SHADOW_RATE,
            max_ahead: 180.0,
            rate_update_period: 3.0,
            resync_period: 1.0,
            message_capacity: 256,
            command_capacity: 64,
        }
    }
}

/// Shadow rate for a shadow that is `ahead` seconds ahead of real playback:
/// full speed when level, zero at `max_ahead`, then clamped.
pub fn adaptive_rate(ahead: TimeDelta, config: &LookaheadConfig) -> f64 {
    let unclamped = config.max_rate * (1.0 - ahead / config.max_ahead);
    unclamped.clamp(config.min_rate, config.max_rate)
}

/// Map a shadow-clock event back onto the media timeline.
///
/// `shadow_position` and `shadow_now` are a matching pair taken after the
/// event; `delay` is how long, in shadow seconds, the pipeline took to
/// notice the moment the event is about.
pub fn shadow_event_media_time(
    shadow_position: MediaTime,
    shadow_now: ContextTime,
    event_time: ContextTime,
    delay: TimeDelta,
    rate: f64,
) -> MediaTime {
    let realtime_since_event = shadow_now - event_time;
    shadow_position - (realtime_since_event + delay) * rate
}

/// Turns translated start/end moments into margin-adjusted intervals.
#[derive(Debug, Clone, Default)]
pub struct SilenceTracker {
    intervals: SilenceIntervals,
    silence_since: Option<MediaTime>,
    margin_before: TimeDelta,
    margin_after: TimeDelta,
    min_interval: TimeDelta,
}

impl SilenceTracker {
    pub fn new(settings: &Settings, min_interval: TimeDelta) -> Self {
        Self {
            intervals: SilenceIntervals::new(),
            silence_since: None,
            margin_before: settings.margin_before,
            margin_after: settings.margin_after,
            min_interval,
        }
    }

    pub fn silence_since(&self) -> Option<MediaTime> {
        self.silence_since
    }

    pub fn intervals(&self) -> &SilenceIntervals {
        &self.intervals
    }

    pub fn on_silence_start(&mut self, since: MediaTime) {
        self.silence_since = Some(since);
    }

    pub fn on_silence_end(&mut self, end: MediaTime) -> Option<SilenceInterval> {
        let Some(since) = self.silence_since.take() else {
            debug!(end, "silence end without a known start");
            return None;
        };
        self.intervals
            .push(since + self.margin_after, end - self.margin_before, self.min_interval)
    }

    /// The stream ended. A silence still in progress runs until `duration`,
    /// unless it "began" exactly there, which only a seek to the end produces.
    pub fn on_ended(&mut self, duration: MediaTime) -> Option<SilenceInterval> {
        let since = self.silence_since.take()?;
        if since == duration {
            return None;
        }
        self.intervals
            .push(since + self.margin_after, duration, self.min_interval)
    }

    /// The shadow jumped to `position` and its detector restarted there. A
    /// silence in progress is forgotten; if the new position is silent the
    /// detector reports it again from there.
    pub fn on_reseek(&mut self, position: MediaTime) {
        if let Some(since) = self.silence_since.take() {
            debug!(since, position, "silence in progress dropped by reseek");
        }
    }
}

/// A shadow silence event as seen by the control context.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowObservation {
    pub event: SilenceEvent,
    /// Media time the event was translated to.
    pub media_time: MediaTime,
    /// Interval stored because of this event, if any.
    pub interval: Option<SilenceInterval>,
}

pub struct Lookahead {
    config: LookaheadConfig,
    settings: Settings,
    tracker: SilenceTracker,
    commands: Sender<ShadowCommand>,
    messages: Receiver<ShadowMessage>,
    volumes: Receiver<VolumeSample>,
    progress: Arc<Mutex<ShadowProgress>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    generation: u64,
    /// Media ranges the shadow has played, one per generation.
    covered: Vec<(MediaTime, MediaTime)>,
    active: bool,
    rate: f64,
    duration: Option<MediaTime>,
    last_resync_at: Option<ContextTime>,
    last_rate_update_at: Option<ContextTime>,
}

impl Lookahead {
    /// Start a shadow over `mirror`, positioned at `start_position`.
    ///
    /// The shadow stays paused until the first [`pump`](Self::pump) with
    /// `playing == true`.
    pub fn start(
        mut mirror: Box<dyn MediaSource>,
        settings: &Settings,
        config: LookaheadConfig,
        start_position: MediaTime,
    ) -> Result<Self> {
        let channels = mirror.channels();
        let sample_rate = mirror.sample_rate();
        if channels == 0 || sample_rate == 0 {
            mirror.release();
            return Err(JumpCutError::MirrorUnavailable(format!(
                "mirror has {channels} channels at {sample_rate} Hz"
            )));
        }
        if let Err(e) = mirror.seek(start_position) {
            mirror.release();
            return Err(e);
        }
        let rate = config.max_rate.clamp(MIN_SHADOW_RATE, MAX_SHADOW_RATE);
        let resampler = match ShadowResampler::new(channels, config.chunk_frames, rate) {
            Ok(r) => r,
            Err(e) => {
                mirror.release();
                return Err(e);
            }
        };
        let params = DetectorParams {
            volume_threshold: settings.volume_threshold,
            duration_threshold: realtime_margin(settings.margin_before + settings.margin_after, rate),
        };
        let (pipeline, outputs) = AnalysisPipeline::new(&config.pipeline, sample_rate, 0.0, 0.0, params);

        let (command_tx, command_rx) = bounded(config.command_capacity.max(1));
        let (message_tx, message_rx) = bounded(config.message_capacity.max(1));
        let progress = Arc::new(Mutex::new(ShadowProgress {
            context_time: 0.0,
            media_position: start_position,
            rate,
            generation: 0,
            ended: false,
        }));
        let running = Arc::new(AtomicBool::new(true));

        let ctx = ShadowContext {
            source: mirror,
            resampler,
            pipeline,
            events: outputs.events,
            commands: command_rx,
            messages: message_tx,
            progress: Arc::clone(&progress),
            running: Arc::clone(&running),
            params,
            smoothing_delay: config.pipeline.smoothing_delay(),
            active: false,
        };
        let handle = std::thread::Builder::new()
            .name("jumpcut-shadow".into())
            .spawn(move || shadow::run(ctx))
            .map_err(|e| JumpCutError::Shadow(format!("spawn worker: {e}")))?;

        info!(start_position, rate, channels, sample_rate, "lookahead started");
        Ok(Self {
            tracker: SilenceTracker::new(settings, config.min_interval),
            config,
            settings: *settings,
            commands: command_tx,
            messages: message_rx,
            volumes: outputs.volumes,
            progress,
            running,
            handle: Some(handle),
            generation: 0,
            covered: vec![(start_position, start_position)],
            active: false,
            rate,
            duration: None,
            last_resync_at: None,
            last_rate_update_at: None,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn progress(&self) -> ShadowProgress {
        *self.progress.lock()
    }

    pub fn intervals(&self) -> &SilenceIntervals {
        self.tracker.intervals()
    }

    /// Duration reported by the shadow when it reached the end, if it did.
    pub fn duration(&self) -> Option<MediaTime> {
        self.duration
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Next predicted silence interval whose end is after `time`.
    /// `None` until the shadow has found one.
    pub fn next_silence_interval(&self, time: MediaTime) -> Option<SilenceInterval> {
        self.tracker.intervals().next_after(time)
    }

    /// Shadow volume readings since the last call.
    pub fn drain_volumes(&self) -> impl Iterator<Item = VolumeSample> + '_ {
        self.volumes.try_iter()
    }

    /// Process shadow output and steer the shadow after real playback.
    ///
    /// `playing` must be true only while real playback is actually advancing.
    pub fn pump(&mut self, now: ContextTime, real_position: MediaTime, playing: bool) -> Vec<ShadowObservation> {
        let mut observations = Vec::new();
        let messages: Vec<ShadowMessage> = self.messages.try_iter().collect();
        for message in messages {
            match message {
                ShadowMessage::Event {
                    event,
                    progress,
                    duration_threshold,
                    processing_delay,
                } => {
                    if progress.generation != self.generation {
                        continue;
                    }
                    let observation = self.on_shadow_event(event, progress, duration_threshold, processing_delay);
                    observations.push(observation);
                }
                ShadowMessage::Ended { generation, duration } => {
                    if generation != self.generation {
                        continue;
                    }
                    self.duration = Some(duration);
                    if let Some(interval) = self.tracker.on_ended(duration) {
                        debug!(start = interval.start, end = interval.end, "trailing silence predicted");
                    }
                }
            }
        }

        let progress = self.progress();
        if progress.generation == self.generation {
            if let Some(range) = self.covered.last_mut() {
                range.1 = range.1.max(progress.media_position);
            }
        }

        let resync_due = self
            .last_resync_at
            .map_or(true, |at| now - at >= self.config.resync_period);
        if resync_due {
            self.last_resync_at = Some(now);
            if !self.is_covered(real_position) {
                self.reseek(real_position);
            }
        }

        let ahead = if progress.generation == self.generation {
            progress.media_position - real_position
        } else {
            0.0
        };
        let want_active = playing && ahead <= self.config.max_ahead;
        if want_active != self.active {
            self.active = want_active;
            self.send(ShadowCommand::SetActive(want_active));
            debug!(active = want_active, ahead, "shadow activity changed");
        }

        let rate_due = self
            .last_rate_update_at
            .map_or(true, |at| now - at >= self.config.rate_update_period);
        if playing && rate_due {
            self.last_rate_update_at = Some(now);
            if ahead < 0.0 {
                debug!(ahead, "shadow behind real playback");
            }
            self.set_rate(adaptive_rate(ahead, &self.config));
        }

        observations
    }

    fn on_shadow_event(
        &mut self,
        event: SilenceEvent,
        progress: ShadowProgress,
        duration_threshold: TimeDelta,
        processing_delay: TimeDelta,
    ) -> ShadowObservation {
        let (delay, interval, media_time) = match event.kind {
            SilenceEventKind::SilenceStart => {
                let delay = duration_threshold + processing_delay;
                let since = shadow_event_media_time(
                    progress.media_position,
                    progress.context_time,
                    event.time,
                    delay,
                    progress.rate,
                );
                self.tracker.on_silence_start(since);
                (delay, None, since)
            }
            SilenceEventKind::SilenceEnd => {
                let end = shadow_event_media_time(
                    progress.media_position,
                    progress.context_time,
                    event.time,
                    processing_delay,
                    progress.rate,
                );
                (processing_delay, self.tracker.on_silence_end(end), end)
            }
        };
        debug!(
            kind = ?event.kind,
            media_time,
            delay,
            rate = progress.rate,
            interval = ?interval,
            "shadow silence event"
        );
        ShadowObservation {
            event,
            media_time,
            interval,
        }
    }

    fn is_covered(&self, position: MediaTime) -> bool {
        self.covered
            .iter()
            .any(|&(start, end)| start <= position && position <= end)
    }

    fn reseek(&mut self, position: MediaTime) {
        self.generation += 1;
        self.covered.push((position, position));
        self.tracker.on_reseek(position);
        self.send(ShadowCommand::Seek {
            position,
            generation: self.generation,
        });
        info!(position, generation = self.generation, "real playback left covered range, reseeking shadow");
    }

    fn set_rate(&mut self, rate: f64) {
        if (rate - self.rate).abs() < 1e-3 {
            return;
        }
        self.rate = rate;
        let threshold = realtime_margin(self.settings.margin_before + self.settings.margin_after, rate);
        self.send(ShadowCommand::SetRate(rate));
        self.send(ShadowCommand::SetDurationThreshold(threshold));
        debug!(rate, duration_threshold = threshold, "shadow rate adjusted");
    }

    fn send(&self, command: ShadowCommand) {
        if let Err(e) = self.commands.try_send(command) {
            warn!("shadow command not delivered: {e}");
        }
    }

    /// Stop the worker, wait for it and release the mirror. Idempotent.
    pub fn destroy(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.commands.try_send(ShadowCommand::Stop);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("shadow worker panicked");
            }
            info!(intervals = self.tracker.intervals().len(), "lookahead destroyed");
        }
    }
}

impl Drop for Lookahead {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn settings(margin_before: f64, margin_after: f64) -> Settings {
        Settings {
            margin_before,
            margin_after,
            ..Settings::default()
        }
    }

    #[test]
    fn margins_shrink_the_raw_interval() {
        let mut tracker = SilenceTracker::new(&settings(0.1, 0.05), MIN_INTERVAL_DURATION);
        tracker.on_silence_start(10.0);
        let interval = tracker.on_silence_end(12.0).expect("interval stored");
        assert_abs_diff_eq!(interval.start, 10.05, epsilon = 1e-12);
        assert_abs_diff_eq!(interval.end, 11.9, epsilon = 1e-12);
        assert!(tracker.silence_since().is_none());
    }

    #[test]
    fn silence_shorter_than_margins_is_dropped() {
        let mut tracker = SilenceTracker::new(&settings(0.1, 0.05), MIN_INTERVAL_DURATION);
        tracker.on_silence_start(10.0);
        assert!(tracker.on_silence_end(10.12).is_none());
        assert!(tracker.intervals().is_empty());
    }

    #[test]
    fn trailing_silence_runs_to_duration() {
        let mut tracker = SilenceTracker::new(&settings(0.1, 0.05), MIN_INTERVAL_DURATION);
        tracker.on_silence_start(50.0);
        let interval = tracker.on_ended(60.0).expect("trailing interval");
        assert_abs_diff_eq!(interval.start, 50.05, epsilon = 1e-12);
        assert_eq!(interval.end, 60.0);
    }

    #[test]
    fn silence_starting_at_duration_is_a_seek_artifact() {
        let mut tracker = SilenceTracker::new(&settings(0.1, 0.05), MIN_INTERVAL_DURATION);
        tracker.on_silence_start(60.0);
        assert!(tracker.on_ended(60.0).is_none());
        assert!(tracker.on_ended(60.0).is_none());
    }

    #[test]
    fn reseek_forgets_silence_in_progress() {
        let mut tracker = SilenceTracker::new(&settings(0.0, 0.0), MIN_INTERVAL_DURATION);
        tracker.on_silence_start(5.0);
        tracker.on_reseek(30.0);
        assert!(tracker.silence_since().is_none());
        // An end left over from before the jump spans skipped media.
        assert!(tracker.on_silence_end(31.0).is_none());
        assert!(tracker.intervals().is_empty());

        // The restarted detector reports the silence at the new position.
        tracker.on_silence_start(30.0);
        let interval = tracker.on_silence_end(31.0).expect("interval");
        assert_eq!(interval.start, 30.0);
    }

    #[test]
    fn translation_subtracts_scaled_delay() {
        // Shadow at media 20.0 when its clock reads 3.0; event at 2.9, rate 4,
        // detection delay 0.05: (0.1 + 0.05) * 4 = 0.6 media seconds back.
        let t = shadow_event_media_time(20.0, 3.0, 2.9, 0.05, 4.0);
        assert_abs_diff_eq!(t, 19.4, epsilon = 1e-12);
    }

    #[test]
    fn adaptive_rate_slows_down_when_ahead() {
        let config = LookaheadConfig::default();
        assert_eq!(adaptive_rate(0.0, &config), 8.0);
        assert_abs_diff_eq!(adaptive_rate(90.0, &config), 4.0, epsilon = 1e-12);
        assert_eq!(adaptive_rate(170.0, &config), 2.0);
        assert_eq!(adaptive_rate(-30.0, &config), 8.0);
    }
}
