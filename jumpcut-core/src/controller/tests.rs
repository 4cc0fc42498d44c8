use std::time::{Duration, Instant};

use approx::assert_abs_diff_eq;

use super::*;
use crate::buffering::Producer;
use crate::media::{BufferedSource, MediaSource, PlaybackState, SourceId};
use crate::stretch::StretchInfo;

struct MockEngine {
    id: SourceId,
    position: MediaTime,
    state: PlaybackState,
    duration: Option<MediaTime>,
    rate: f64,
    rates: Vec<f64>,
    seeks: Vec<MediaTime>,
    mirror: Option<BufferedSource>,
    stretching: bool,
    stretches: Vec<StretchInfo>,
}

impl MockEngine {
    fn new(mirror: Option<BufferedSource>) -> Self {
        Self {
            id: SourceId::new("mock"),
            position: 0.0,
            state: PlaybackState::Playing,
            duration: mirror.as_ref().and_then(MediaSource::duration),
            rate: 1.5,
            rates: Vec::new(),
            seeks: Vec::new(),
            mirror,
            stretching: false,
            stretches: Vec::new(),
        }
    }
}

impl PlaybackEngine for MockEngine {
    fn source_id(&self) -> SourceId {
        self.id.clone()
    }

    fn position(&self) -> MediaTime {
        self.position
    }

    fn state(&self) -> PlaybackState {
        self.state
    }

    fn duration(&self) -> Option<MediaTime> {
        self.duration
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.rate = rate;
        self.rates.push(rate);
    }

    fn set_position(&mut self, position: MediaTime) {
        self.position = position;
        self.seeks.push(position);
    }

    fn output_format(&self) -> (u32, usize) {
        (8_000, 1)
    }

    fn mirror_source(&mut self) -> Result<Box<dyn MediaSource>> {
        match &self.mirror {
            Some(source) => Ok(Box::new(source.mirror())),
            None => Err(JumpCutError::MirrorUnavailable("cross-origin".into())),
        }
    }

    fn supports_stretching(&self) -> bool {
        self.stretching
    }

    fn schedule_stretch(&mut self, stretch: &StretchInfo) {
        self.stretches.push(*stretch);
    }
}

fn settings() -> Settings {
    Settings {
        volume_threshold: 0.1,
        margin_before: 0.05,
        margin_after: 0.03,
        sounded_speed: 1.0,
        silence_speed: 2.5,
    }
}

/// 1 s loud, 3 s silent, 1 s loud at 8 kHz.
fn speech_with_pause() -> BufferedSource {
    let mut samples = vec![0.5f32; 8_000];
    samples.extend(std::iter::repeat(0.0).take(24_000));
    samples.extend(std::iter::repeat(0.5).take(8_000));
    BufferedSource::new(vec![samples], 8_000).expect("source")
}

fn controller(engine: MockEngine) -> Controller<MockEngine> {
    Controller::new(engine, settings(), ControllerConfig::default(), SourceRegistry::new())
}

/// Tick with a simulated clock until `done` or a wall-clock timeout.
fn tick_until(
    c: &mut Controller<MockEngine>,
    now: &mut ContextTime,
    advance_position: bool,
    mut done: impl FnMut(&Controller<MockEngine>) -> bool,
) -> bool {
    let deadline = Instant::now() + Duration::from_secs(10);
    while Instant::now() < deadline {
        c.tick(*now);
        if done(c) {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
        if advance_position {
            let rate = c.engine().rate;
            c.engine_mut().position += 0.01 * rate;
        }
        *now += 0.01;
    }
    false
}

#[test]
fn degrades_without_a_mirror() {
    let mut c = controller(MockEngine::new(None));
    let mut status = c.subscribe_status();
    let _producer = c.init(0.0).expect("init");

    assert_eq!(c.status(), ControllerStatus::Degraded);
    let event = status.try_recv().expect("status event");
    assert_eq!(event.status, ControllerStatus::Degraded);
    assert!(event.detail.is_some_and(|d| d.contains("cross-origin")));
    assert_abs_diff_eq!(c.engine().rate, 1.002, epsilon = 1e-12);
}

#[test]
fn second_init_is_rejected() {
    let mut c = controller(MockEngine::new(None));
    let _producer = c.init(0.0).expect("init");
    assert!(matches!(c.init(0.1), Err(JumpCutError::AlreadyInitialized)));
}

#[test]
fn invalid_settings_fail_init() {
    let engine = MockEngine::new(None);
    let mut c = Controller::new(engine, settings(), ControllerConfig::default(), SourceRegistry::new());
    // Bypass normalisation the way a host holding stale settings would.
    c.settings.margin_before = f64::NAN;
    assert!(matches!(c.init(0.0), Err(JumpCutError::InvalidSettings(_))));
    assert_eq!(c.status(), ControllerStatus::Idle);
}

#[test]
fn destroy_restores_rate_and_is_idempotent() {
    let mut c = controller(MockEngine::new(Some(speech_with_pause())));
    let _producer = c.init(0.0).expect("init");
    assert_eq!(c.status(), ControllerStatus::Active);

    c.destroy();
    c.destroy();
    assert_eq!(c.status(), ControllerStatus::Stopped);
    assert_eq!(c.engine().rate, 1.5);
    assert!(c.lookahead().is_none());
    assert!(matches!(c.init(1.0), Err(JumpCutError::PipelineStopped)));
}

#[test]
fn speed_change_applies_immediately() {
    let mut c = controller(MockEngine::new(None));
    let _producer = c.init(0.0).expect("init");
    let mut commands = c.subscribe_commands();

    c.update_settings(
        Settings {
            sounded_speed: 1.5,
            ..settings()
        },
        0.5,
    );
    assert_eq!(c.engine().rate, 1.5);
    let event = commands.try_recv().expect("command");
    assert_eq!(
        event.command,
        PlaybackCommand::SetPlaybackRate {
            value: 1.5,
            speed: SpeedName::Sounded
        }
    );
}

#[test]
fn unchanged_settings_issue_nothing() {
    let mut c = controller(MockEngine::new(None));
    let _producer = c.init(0.0).expect("init");
    let mut commands = c.subscribe_commands();
    c.update_settings(settings(), 0.5);
    assert!(commands.try_recv().is_err());
}

#[test]
fn degraded_mode_follows_live_detection() {
    let mut c = controller(MockEngine::new(None));
    let mut producer = c.init(0.0).expect("init");

    let mut samples = vec![0.5f32; 4_000];
    samples.extend(std::iter::repeat(0.0).take(8_000));
    let mut offset = 0;
    while offset < samples.len() {
        offset += producer.push_slice(&samples[offset..]);
    }

    let mut now = 0.0;
    assert!(tick_until(&mut c, &mut now, true, |c| c.current_speed() == SpeedName::Silence));
    assert_abs_diff_eq!(c.engine().rate, 2.5, epsilon = 1e-12);

    now += 0.2;
    let loud = vec![0.5f32; 4_000];
    let mut offset = 0;
    while offset < loud.len() {
        offset += producer.push_slice(&loud[offset..]);
    }
    assert!(tick_until(&mut c, &mut now, true, |c| c.current_speed() == SpeedName::Sounded));
    // Without stretching the margin-before is replayed by seeking back.
    assert_eq!(c.engine().seeks.len(), 1);
}

#[test]
fn degraded_mode_with_stretching_schedules_ramps() {
    let mut engine = MockEngine::new(None);
    engine.stretching = true;
    let mut c = controller(engine);
    let mut producer = c.init(0.0).expect("init");
    assert_eq!(c.engine().stretches.len(), 1);

    let mut samples = vec![0.5f32; 4_000];
    samples.extend(std::iter::repeat(0.0).take(8_000));
    let mut offset = 0;
    while offset < samples.len() {
        offset += producer.push_slice(&samples[offset..]);
    }
    let mut now = 0.0;
    assert!(tick_until(&mut c, &mut now, true, |c| c.engine().stretches.len() >= 2));

    now += 0.5;
    let loud = vec![0.5f32; 4_000];
    let mut offset = 0;
    while offset < loud.len() {
        offset += producer.push_slice(&loud[offset..]);
    }
    assert!(tick_until(&mut c, &mut now, true, |c| c.engine().stretches.len() >= 3));
    assert!(c.engine().seeks.is_empty());
    let ramps = &c.engine().stretches;
    assert_eq!(ramps[1].end_value, 0.0);
    assert!(ramps[2].end_value > ramps[2].start_value);
}

#[test]
fn predictive_mode_speeds_through_the_pause() {
    let mut c = controller(MockEngine::new(Some(speech_with_pause())));
    let mut silence = c.subscribe_silence();
    let _producer = c.init(0.0).expect("init");

    let mut now = 0.0;
    assert!(tick_until(&mut c, &mut now, false, |c| c
        .next_silence_interval(0.0)
        .is_some()));
    let interval = c.next_silence_interval(0.0).expect("interval");
    assert_abs_diff_eq!(interval.start, 1.03, epsilon = 0.15);
    assert_abs_diff_eq!(interval.end, 3.95, epsilon = 0.15);

    let shadow_record = std::iter::from_fn(|| silence.try_recv().ok())
        .find(|r| r.pipeline == PipelineKind::Shadow && r.interval.is_some());
    assert!(shadow_record.is_some());

    assert!(tick_until(&mut c, &mut now, true, |c| c.current_speed() == SpeedName::Silence));
    let entered = c.engine().position;
    assert!(entered > 0.9 && entered < 1.3, "entered silence speed at {entered}");
    assert!(tick_until(&mut c, &mut now, true, |c| c.current_speed() == SpeedName::Sounded));
    let left = c.engine().position;
    assert!(left > 3.7 && left < 4.2, "left silence speed at {left}");

    // Roughly 2.9 s of pause played at 2.5x.
    let saved = c.time_saved(now);
    assert!(saved.compared_to_intrinsic > 1.0, "saved {saved:?}");
    assert!(saved.compared_to_sounded_fraction() > 0.0);
}

#[test]
fn predictive_mode_with_stretching_ramps_at_both_switches() {
    let mut engine = MockEngine::new(Some(speech_with_pause()));
    engine.stretching = true;
    let mut c = controller(engine);
    let _producer = c.init(0.0).expect("init");
    assert_eq!(c.status(), ControllerStatus::Active);
    assert_eq!(c.engine().stretches.len(), 1);

    let mut now = 0.0;
    assert!(tick_until(&mut c, &mut now, true, |c| c.current_speed() == SpeedName::Silence));
    assert_eq!(c.engine().stretches.len(), 2);
    assert_eq!(c.engine().stretches[1].end_value, 0.0);

    assert!(tick_until(&mut c, &mut now, true, |c| c.current_speed() == SpeedName::Sounded));
    let ramps = &c.engine().stretches;
    assert!(ramps.len() >= 3, "only {} ramps scheduled", ramps.len());
    let last = ramps[ramps.len() - 1];
    assert!(last.end_value > last.start_value);
    assert!(c.engine().seeks.is_empty());
}

#[test]
fn live_sound_ends_a_predicted_silence_early() {
    let mut c = controller(MockEngine::new(Some(speech_with_pause())));
    let mut producer = c.init(0.0).expect("init");

    let mut now = 0.0;
    assert!(tick_until(&mut c, &mut now, false, |c| c
        .next_silence_interval(0.0)
        .is_some()));
    c.engine_mut().position = 2.0;
    c.tick(now);
    c.tick(now);
    assert_eq!(c.current_speed(), SpeedName::Silence);

    // The live clock starts at 0; sound resumes half a second after the
    // switch, well before the predicted end.
    let quiet_frames = ((now + 0.5) * 8_000.0) as usize;
    let mut samples = vec![0.0f32; quiet_frames];
    samples.extend(std::iter::repeat(0.5).take(4_000));
    let mut offset = 0;
    while offset < samples.len() {
        offset += producer.push_slice(&samples[offset..]);
    }

    let deadline = Instant::now() + Duration::from_secs(10);
    while c.current_speed() == SpeedName::Silence && Instant::now() < deadline {
        c.tick(now);
        std::thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(c.current_speed(), SpeedName::Sounded);
    assert!(c.engine().seeks.is_empty());
}

#[test]
fn pausing_cancels_a_silence_skip() {
    let mut c = controller(MockEngine::new(Some(speech_with_pause())));
    let _producer = c.init(0.0).expect("init");

    let mut now = 0.0;
    assert!(tick_until(&mut c, &mut now, false, |c| c
        .next_silence_interval(0.0)
        .is_some()));
    c.engine_mut().position = 2.0;
    c.tick(now);
    c.tick(now);
    assert_eq!(c.current_speed(), SpeedName::Silence);

    c.engine_mut().state = PlaybackState::Paused;
    c.tick(now + 0.01);
    assert_eq!(c.current_speed(), SpeedName::Sounded);
}

#[test]
fn jumping_away_cancels_a_silence_skip() {
    let mut c = controller(MockEngine::new(Some(speech_with_pause())));
    let _producer = c.init(0.0).expect("init");

    let mut now = 0.0;
    assert!(tick_until(&mut c, &mut now, false, |c| c
        .next_silence_interval(0.0)
        .is_some()));
    c.engine_mut().position = 2.0;
    c.tick(now);
    c.tick(now);
    assert_eq!(c.current_speed(), SpeedName::Silence);

    c.engine_mut().position = 0.2;
    c.tick(now + 0.01);
    assert_eq!(c.current_speed(), SpeedName::Sounded);
}

#[test]
fn trailing_silence_is_seeked_over() {
    let mut samples = vec![0.5f32; 8_000];
    samples.extend(std::iter::repeat(0.0).take(16_000));
    let source = BufferedSource::new(vec![samples], 8_000).expect("source");
    let mut c = controller(MockEngine::new(Some(source)));
    let mut commands = c.subscribe_commands();
    let _producer = c.init(0.0).expect("init");

    let mut now = 0.0;
    assert!(tick_until(&mut c, &mut now, true, |c| !c.engine().seeks.is_empty()));
    assert_abs_diff_eq!(c.engine().position, 3.0, epsilon = 1e-9);
    let seek = std::iter::from_fn(|| commands.try_recv().ok())
        .find(|e| matches!(e.command, PlaybackCommand::SetPosition { .. }))
        .expect("seek command");
    assert_eq!(
        seek.command,
        PlaybackCommand::SetPosition {
            time: 3.0,
            reason: SeekReason::TrailingSilence
        }
    );
    // The seek jumped over nearly two seconds of silence.
    assert!(c.time_saved(now).compared_to_intrinsic > 1.5);
}

#[test]
fn takeover_stops_live_analysis() {
    let registry = SourceRegistry::new();
    let mut c = Controller::new(
        MockEngine::new(None),
        settings(),
        ControllerConfig::default(),
        registry.clone(),
    );
    let _producer = c.init(0.0).expect("init");
    assert!(c.live_diagnostics().is_some());

    let _other = registry.attach(SourceId::new("mock"));
    c.tick(0.1);
    assert!(c.live_diagnostics().is_none());
}

#[test]
fn output_time_tracks_the_delay_stage() {
    let c = controller(MockEngine::new(None));
    let delay = c.scheduler().lookahead_delay() + c.scheduler().delay_at(5.0);
    assert_abs_diff_eq!(c.output_time_for(5.0), 5.0 + delay, epsilon = 1e-9);
}
