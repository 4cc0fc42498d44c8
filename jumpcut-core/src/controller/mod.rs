//! `Controller`: drives a playback engine around silence.
//!
//! ## Lifecycle
//!
//! ```text
//! Controller::new()
//!     └─► init(now)      → live pipeline spawned, lookahead started
//!                          status = Active (or Degraded without a mirror)
//!         └─► tick(now)  → called periodically by the host
//!             └─► destroy() → lookahead + live pipeline stopped,
//!                             original rate restored, status = Stopped
//! ```
//!
//! ## Modes
//!
//! **Active**: predicted intervals from the [`Lookahead`] decide when to
//! switch to silence speed and back. A switch is scheduled for the real
//! position at which the interval starts and re-checked when due; it is
//! cancelled if the position is far off by then or playback stopped. The
//! live detector still runs: sound it hears while a predicted silence is
//! being sped through ends that silence early. Engines that support
//! stretching get a delay ramp at every switch.
//!
//! **Degraded**: no mirror could be played, so the live detector drives the
//! switches after the fact. The margin-before that already went by at
//! silence speed is replayed with a delay ramp when the engine supports one,
//! otherwise with a short seek back.
//!
//! There are no timers: everything scheduled is a pending transition that
//! [`Controller::tick`] fires once its time has come.

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::buffering::SampleProducer;
use crate::detector::{DetectorParams, SilenceEvent, SilenceEventKind};
use crate::error::{JumpCutError, Result};
use crate::ipc::events::{
    ControllerStatus, ControllerStatusEvent, PipelineKind, PlaybackCommand, PlaybackCommandEvent,
    SeekReason, SilenceEventRecord, VolumeReading,
};
use crate::lookahead::{intervals::SilenceInterval, Lookahead, LookaheadConfig};
use crate::media::{PlaybackEngine, SourceLease, SourceRegistry};
use crate::pipeline::{DiagnosticsSnapshot, LivePipeline, PipelineConfig};
use crate::settings::{Settings, SpeedName};
use crate::stretch::math::{optimal_lookahead_delay, realtime_margin, stretcher_sounded_delay};
use crate::stretch::StretchScheduler;
use crate::time::{ContextTime, MediaTime, TimeDelta};
use crate::time_saved::{AveragingMethod, TimeSavedData, TimeSavedTracker};

/// Broadcast channel capacity for every observable stream.
const BROADCAST_CAP: usize = 256;

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub pipeline: PipelineConfig,
    pub lookahead: LookaheadConfig,
    /// A due transition is dropped if the real position is further than
    /// this from where it was scheduled for.
    pub max_position_deviation: TimeDelta,
    /// Shortest realtime stretch worth switching speed for.
    pub min_transition: TimeDelta,
    /// Lookahead rebuilds after settings changes happen at most this often.
    pub rebuild_throttle: TimeDelta,
    pub broadcast_capacity: usize,
    pub time_saved_averaging: AveragingMethod,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            pipeline: PipelineConfig::default(),
            lookahead: LookaheadConfig::default(),
            max_position_deviation: 0.5,
            min_transition: 1.0 / 60.0,
            rebuild_throttle: 1.0,
            broadcast_capacity: BROADCAST_CAP,
            time_saved_averaging: AveragingMethod::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Transition {
    /// Switch to silence speed once real playback reaches `at`.
    Enter {
        due_at: ContextTime,
        at: MediaTime,
        until: MediaTime,
    },
    /// Playing at silence speed; back to sounded speed at `due_at`.
    Exit {
        due_at: ContextTime,
        entered_at: ContextTime,
        entered_position: MediaTime,
        speed: f64,
    },
}

pub struct Controller<E: PlaybackEngine> {
    engine: E,
    settings: Settings,
    config: ControllerConfig,
    registry: SourceRegistry,
    lease: Option<SourceLease>,
    live: Option<LivePipeline>,
    lookahead: Option<Lookahead>,
    scheduler: StretchScheduler,
    time_saved: TimeSavedTracker,
    was_playing: bool,
    status: ControllerStatus,
    speed: SpeedName,
    pending: Option<Transition>,
    /// When the live path last switched to silence speed.
    live_silence_since: Option<ContextTime>,
    original_rate: Option<f64>,
    rebuild_requested: bool,
    last_rebuild_at: Option<ContextTime>,
    seq: u64,
    volume_tx: broadcast::Sender<VolumeReading>,
    silence_tx: broadcast::Sender<SilenceEventRecord>,
    command_tx: broadcast::Sender<PlaybackCommandEvent>,
    status_tx: broadcast::Sender<ControllerStatusEvent>,
}

impl<E: PlaybackEngine> Controller<E> {
    pub fn new(engine: E, mut settings: Settings, config: ControllerConfig, registry: SourceRegistry) -> Self {
        settings.normalize();
        let cap = config.broadcast_capacity.max(1);
        let (volume_tx, _) = broadcast::channel(cap);
        let (silence_tx, _) = broadcast::channel(cap);
        let (command_tx, _) = broadcast::channel(cap);
        let (status_tx, _) = broadcast::channel(cap);
        let scheduler = Self::fresh_scheduler(&settings, 0.0);
        let was_playing = engine.state().is_active();
        let time_saved = TimeSavedTracker::new(
            config.time_saved_averaging,
            engine.playback_rate(),
            settings.sounded_speed,
            0.0,
            was_playing,
        );
        Self {
            engine,
            settings,
            config,
            registry,
            lease: None,
            live: None,
            lookahead: None,
            scheduler,
            time_saved,
            was_playing,
            status: ControllerStatus::Idle,
            speed: SpeedName::Sounded,
            pending: None,
            live_silence_since: None,
            original_rate: None,
            rebuild_requested: false,
            last_rebuild_at: None,
            seq: 0,
            volume_tx,
            silence_tx,
            command_tx,
            status_tx,
        }
    }

    fn fresh_scheduler(settings: &Settings, now: ContextTime) -> StretchScheduler {
        StretchScheduler::new(
            optimal_lookahead_delay(settings.margin_before, settings.sounded_speed, settings.silence_speed),
            stretcher_sounded_delay(settings.margin_before, settings.sounded_speed, settings.silence_speed),
            now,
        )
    }

    fn reset_scheduler(&mut self, now: ContextTime) {
        let s = &self.settings;
        self.scheduler.reset(
            optimal_lookahead_delay(s.margin_before, s.sounded_speed, s.silence_speed),
            stretcher_sounded_delay(s.margin_before, s.sounded_speed, s.silence_speed),
            now,
        );
    }

    // ── Accessors ───────────────────────────────────────────────────────────

    pub fn status(&self) -> ControllerStatus {
        self.status
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn lookahead(&self) -> Option<&Lookahead> {
        self.lookahead.as_ref()
    }

    pub fn scheduler(&self) -> &StretchScheduler {
        &self.scheduler
    }

    pub fn current_speed(&self) -> SpeedName {
        self.speed
    }

    pub fn live_diagnostics(&self) -> Option<DiagnosticsSnapshot> {
        self.live.as_ref().map(|l| l.diagnostics().snapshot())
    }

    /// Next predicted silence interval ending after `time`.
    pub fn next_silence_interval(&self, time: MediaTime) -> Option<SilenceInterval> {
        self.lookahead.as_ref().and_then(|l| l.next_silence_interval(time))
    }

    /// Time saved so far, as of `now`.
    pub fn time_saved(&self, now: ContextTime) -> TimeSavedData {
        self.time_saved.data(now)
    }

    /// When the input moment `moment` reaches the output of the delay stage.
    pub fn output_time_for(&self, moment: ContextTime) -> ContextTime {
        self.scheduler.moment_to_output_time(moment)
    }

    pub fn subscribe_volume(&self) -> broadcast::Receiver<VolumeReading> {
        self.volume_tx.subscribe()
    }

    pub fn subscribe_silence(&self) -> broadcast::Receiver<SilenceEventRecord> {
        self.silence_tx.subscribe()
    }

    pub fn subscribe_commands(&self) -> broadcast::Receiver<PlaybackCommandEvent> {
        self.command_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<ControllerStatusEvent> {
        self.status_tx.subscribe()
    }

    // ── Lifecycle ───────────────────────────────────────────────────────────

    /// Start analysis. The returned producer must be fed the audio the engine
    /// plays, interleaved in the engine's output format.
    ///
    /// A missing mirror is not an error: the controller runs degraded.
    pub fn init(&mut self, now: ContextTime) -> Result<SampleProducer> {
        match self.status {
            ControllerStatus::Idle => {}
            ControllerStatus::Stopped => return Err(JumpCutError::PipelineStopped),
            ControllerStatus::Active | ControllerStatus::Degraded => {
                return Err(JumpCutError::AlreadyInitialized)
            }
        }
        self.settings.validate()?;

        let (sample_rate, channels) = self.engine.output_format();
        let (live, producer) =
            LivePipeline::spawn(&self.config.pipeline, sample_rate, channels, now, self.live_params())?;
        self.live = Some(live);
        self.lease = Some(self.registry.attach(self.engine.source_id()));
        self.original_rate = Some(self.engine.playback_rate());
        self.was_playing = self.engine.state().is_active();
        self.time_saved = TimeSavedTracker::new(
            self.config.time_saved_averaging,
            self.engine.playback_rate(),
            self.settings.sounded_speed,
            now,
            self.was_playing,
        );
        self.reset_scheduler(now);
        if self.engine.supports_stretching() {
            let initial = *self.scheduler.last_stretch();
            self.engine.schedule_stretch(&initial);
        }

        self.start_lookahead(now);
        self.set_speed(SpeedName::Sounded, now);
        info!(source = %self.engine.source_id(), status = ?self.status, "controller initialised");
        Ok(producer)
    }

    /// (Re)start the lookahead at the current position and set the status
    /// to match the outcome.
    fn start_lookahead(&mut self, now: ContextTime) {
        if let Some(mut old) = self.lookahead.take() {
            old.destroy();
        }
        self.last_rebuild_at = Some(now);
        self.rebuild_requested = false;

        let position = self.engine.position();
        let started = self.engine.mirror_source().and_then(|mirror| {
            Lookahead::start(mirror, &self.settings, self.config.lookahead.clone(), position)
        });
        match started {
            Ok(lookahead) => {
                self.lookahead = Some(lookahead);
                self.set_status(ControllerStatus::Active, None);
            }
            Err(e) => {
                warn!("lookahead unavailable, falling back to live detection: {e}");
                self.set_status(ControllerStatus::Degraded, Some(e.to_string()));
            }
        }
    }

    /// Tear everything down and give the engine its rate back. Idempotent.
    pub fn destroy(&mut self) {
        if self.status == ControllerStatus::Stopped {
            return;
        }
        self.pending = None;
        if let Some(mut lookahead) = self.lookahead.take() {
            lookahead.destroy();
        }
        if let Some(mut live) = self.live.take() {
            live.stop();
        }
        self.lease = None;
        if let Some(rate) = self.original_rate.take() {
            self.engine.set_playback_rate(rate);
        }
        self.set_status(ControllerStatus::Stopped, None);
        info!("controller destroyed");
    }

    /// Apply new settings. Threshold and margin changes rebuild the
    /// lookahead (throttled); speed changes take effect immediately.
    pub fn update_settings(&mut self, mut settings: Settings, now: ContextTime) {
        settings.normalize();
        let old = self.settings;
        if settings == old {
            return;
        }
        self.settings = settings;
        if matches!(self.status, ControllerStatus::Idle | ControllerStatus::Stopped) {
            return;
        }
        self.time_saved.on_sounded_speed_change(settings.sounded_speed, now);

        let params = self.live_params();
        if let Some(live) = &self.live {
            live.set_params(params);
        }
        self.reset_scheduler(now);
        if self.engine.supports_stretching() {
            let constant = *self.scheduler.last_stretch();
            self.engine.schedule_stretch(&constant);
        }
        self.live_silence_since = None;

        if settings.lookahead_relevant_change(&old) {
            debug!("lookahead-relevant settings changed, rebuild requested");
            self.rebuild_requested = true;
            self.pending = None;
            self.set_speed(SpeedName::Sounded, now);
        } else {
            // Speeds only: re-issue whatever speed is in effect.
            if let Some(Transition::Exit { .. }) = self.pending {
                self.pending = None;
                self.set_speed(SpeedName::Sounded, now);
            } else {
                self.set_speed(self.speed, now);
            }
        }
    }

    /// Single entry point for everything time-driven.
    pub fn tick(&mut self, now: ContextTime) {
        if matches!(self.status, ControllerStatus::Idle | ControllerStatus::Stopped) {
            return;
        }

        if self.lease.as_ref().is_some_and(|l| !l.is_connected()) {
            warn!("source taken over by another consumer, live analysis stopped");
            if let Some(mut live) = self.live.take() {
                live.stop();
            }
            self.lease = None;
        }

        let live_events = self.forward_live();
        match self.status {
            ControllerStatus::Degraded => {
                for event in live_events {
                    self.on_live_event(event, now);
                }
            }
            ControllerStatus::Active => {
                for event in live_events {
                    self.on_live_event_predictive(event, now);
                }
            }
            _ => {}
        }

        if self.rebuild_requested
            && self
                .last_rebuild_at
                .map_or(true, |at| now - at >= self.config.rebuild_throttle)
        {
            self.start_lookahead(now);
        }

        let position = self.engine.position();
        let playing = self.engine.state().is_active();
        if playing != self.was_playing {
            self.was_playing = playing;
            self.time_saved.on_playback_state(playing, now);
        }
        self.forward_shadow(now, position, playing);

        if self.status == ControllerStatus::Active {
            self.step_predictive(now, position, playing);
        }
    }

    // ── Live path ───────────────────────────────────────────────────────────

    fn live_params(&self) -> DetectorParams {
        DetectorParams {
            volume_threshold: self.settings.volume_threshold,
            duration_threshold: realtime_margin(
                self.settings.margin_before + self.settings.margin_after,
                self.settings.sounded_speed,
            ),
        }
    }

    fn forward_live(&mut self) -> Vec<SilenceEvent> {
        let Some(live) = &self.live else {
            return Vec::new();
        };
        let volumes: Vec<_> = live.drain_volumes().collect();
        let events: Vec<_> = live.drain_events().collect();
        for v in volumes {
            let seq = self.next_seq();
            let _ = self.volume_tx.send(VolumeReading {
                seq,
                pipeline: PipelineKind::Live,
                time: v.time,
                volume: v.volume,
            });
        }
        for &event in &events {
            let seq = self.next_seq();
            let _ = self.silence_tx.send(SilenceEventRecord {
                seq,
                pipeline: PipelineKind::Live,
                event,
                interval: None,
            });
        }
        events
    }

    fn on_live_event(&mut self, event: SilenceEvent, now: ContextTime) {
        match event.kind {
            SilenceEventKind::SilenceStart if self.speed == SpeedName::Sounded => {
                self.enter_silence(now);
                self.live_silence_since = Some(now);
            }
            SilenceEventKind::SilenceEnd if self.speed == SpeedName::Silence => {
                let since = self.live_silence_since.take().unwrap_or(now);
                if !self.leave_silence(now) {
                    self.seek_back_margin(now - since, now);
                }
            }
            _ => debug!(kind = ?event.kind, speed = ?self.speed, "live event ignored"),
        }
    }

    /// Sound heard live while a predicted silence is being sped through
    /// means the prediction was wrong; resume sounded speed right away.
    fn on_live_event_predictive(&mut self, event: SilenceEvent, now: ContextTime) {
        let Some(Transition::Exit { entered_at, .. }) = self.pending else {
            return;
        };
        if event.kind == SilenceEventKind::SilenceEnd && event.time >= entered_at {
            debug!(at = event.time, "live detector heard sound, ending silence early");
            self.pending = None;
            self.leave_silence(now);
        }
    }

    /// Switch to silence speed, ramping the delay down when the engine
    /// can stretch.
    fn enter_silence(&mut self, now: ContextTime) {
        self.set_speed(SpeedName::Silence, now);
        if self.engine.supports_stretching() {
            if let Some(stretch) = self.scheduler.on_silence_start(now, &self.settings, now) {
                self.engine.schedule_stretch(&stretch);
            }
        }
    }

    /// Switch back to sounded speed. Returns whether the engine stretches,
    /// in which case the margin-before has been taken care of by a ramp.
    fn leave_silence(&mut self, now: ContextTime) -> bool {
        self.set_speed(SpeedName::Sounded, now);
        if !self.engine.supports_stretching() {
            return false;
        }
        if let Some(stretch) = self.scheduler.on_silence_end(now, &self.settings, now) {
            self.engine.schedule_stretch(&stretch);
        }
        true
    }

    /// Replay, at sounded speed, the part of the margin-before that was
    /// played at silence speed.
    fn seek_back_margin(&mut self, silence_lasted: TimeDelta, now: ContextTime) {
        let at_silence_speed = (silence_lasted * self.settings.silence_speed).min(self.settings.margin_before);
        if at_silence_speed <= 0.0 {
            return;
        }
        let target = (self.engine.position() - at_silence_speed).max(0.0);
        self.seek(target, SeekReason::MarginBeforeSeekBack, now);
    }

    // ── Predictive path ─────────────────────────────────────────────────────

    fn forward_shadow(&mut self, now: ContextTime, position: MediaTime, playing: bool) {
        let Some(lookahead) = &mut self.lookahead else {
            return;
        };
        let observations = lookahead.pump(now, position, playing);
        let volumes: Vec<_> = lookahead.drain_volumes().collect();
        for v in volumes {
            let seq = self.next_seq();
            let _ = self.volume_tx.send(VolumeReading {
                seq,
                pipeline: PipelineKind::Shadow,
                time: v.time,
                volume: v.volume,
            });
        }
        for observation in observations {
            let seq = self.next_seq();
            let _ = self.silence_tx.send(SilenceEventRecord {
                seq,
                pipeline: PipelineKind::Shadow,
                event: observation.event,
                interval: observation.interval,
            });
        }
    }

    fn step_predictive(&mut self, now: ContextTime, position: MediaTime, playing: bool) {
        let pending = self.pending;
        match pending {
            Some(Transition::Exit {
                due_at,
                entered_at,
                entered_position,
                speed,
            }) => {
                let expected = entered_position + (now.min(due_at) - entered_at) * speed;
                let off_track = (position - expected).abs() > self.config.max_position_deviation;
                if !playing || off_track {
                    debug!(position, expected, playing, "silence skip interrupted");
                    self.pending = None;
                    self.leave_silence(now);
                } else if now >= due_at {
                    self.pending = None;
                    self.leave_silence(now);
                } else {
                    return;
                }
            }
            Some(Transition::Enter { due_at, at, until }) if now >= due_at => {
                self.pending = None;
                self.maybe_skip(at, until, now, position, playing);
                return;
            }
            _ => {}
        }

        if !playing {
            self.pending = None;
            return;
        }
        let Some(interval) = self.next_silence_interval(position) else {
            self.pending = None;
            return;
        };
        let at = interval.start.max(position);
        let wait = (at - position) / self.settings.sounded_speed;
        if wait <= 0.0 {
            self.pending = None;
            self.maybe_skip(at, interval.end, now, position, playing);
        } else {
            self.pending = Some(Transition::Enter {
                due_at: now + wait,
                at,
                until: interval.end,
            });
        }
    }

    /// Speed through (or seek over) `[position, until]`, scheduled for when
    /// real playback was at `scheduled_at`.
    fn maybe_skip(
        &mut self,
        scheduled_at: MediaTime,
        until: MediaTime,
        now: ContextTime,
        position: MediaTime,
        playing: bool,
    ) {
        if !playing || (position - scheduled_at).abs() > self.config.max_position_deviation {
            debug!(position, scheduled_at, playing, "scheduled silence skip cancelled");
            return;
        }
        let until = self.coalesce(until);
        if until <= position {
            return;
        }

        let duration = self
            .engine
            .duration()
            .or_else(|| self.lookahead.as_ref().and_then(Lookahead::duration));
        if let Some(duration) = duration {
            if until >= duration {
                self.seek(duration, SeekReason::TrailingSilence, now);
                self.time_saved.on_silence_skipping_seek(duration - position, 0.0, now);
                return;
            }
        }

        let silence_speed = self.settings.silence_speed;
        let realtime_at_silence_speed = (until - position) / silence_speed;
        if realtime_at_silence_speed <= self.config.min_transition {
            debug!(position, until, "silence too short to speed up");
            return;
        }
        self.enter_silence(now);
        self.pending = Some(Transition::Exit {
            due_at: now + realtime_at_silence_speed,
            entered_at: now,
            entered_position: position,
            speed: silence_speed,
        });
    }

    /// Extend `until` across following intervals separated from it by less
    /// sounded time than a transition is worth.
    fn coalesce(&self, mut until: MediaTime) -> MediaTime {
        let max_gap = self.config.min_transition * self.settings.sounded_speed;
        while let Some(next) = self.next_silence_interval(until) {
            if next.start - until > max_gap {
                break;
            }
            debug!(from = until, to = next.end, "coalescing adjacent silence intervals");
            until = next.end;
        }
        until
    }

    // ── Commands ────────────────────────────────────────────────────────────

    fn set_speed(&mut self, speed: SpeedName, now: ContextTime) {
        let rate = self.settings.actual_playback_rate(speed);
        self.engine.set_playback_rate(rate);
        self.time_saved.on_rate_change(rate, now);
        self.speed = speed;
        debug!(?speed, rate, "playback rate set");
        self.emit_command(PlaybackCommand::SetPlaybackRate { value: rate, speed }, now);
    }

    fn seek(&mut self, time: MediaTime, reason: SeekReason, now: ContextTime) {
        self.engine.set_position(time);
        debug!(time, ?reason, "seek issued");
        self.emit_command(PlaybackCommand::SetPosition { time, reason }, now);
    }

    fn emit_command(&mut self, command: PlaybackCommand, now: ContextTime) {
        let seq = self.next_seq();
        let _ = self.command_tx.send(PlaybackCommandEvent { seq, at: now, command });
    }

    fn set_status(&mut self, status: ControllerStatus, detail: Option<String>) {
        self.status = status;
        let _ = self.status_tx.send(ControllerStatusEvent { status, detail });
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }
}

impl<E: PlaybackEngine> Drop for Controller<E> {
    fn drop(&mut self) {
        self.destroy();
    }
}

#[cfg(test)]
mod tests;
