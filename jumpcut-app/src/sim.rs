//! A simulated player over a WAV file, running in virtual time.
//!
//! ## Loop (one iteration per tick)
//!
//! ```text
//! 1. Render tick_interval of output at the current rate → live producer
//! 2. Wait for the live pipeline to drain the ring
//! 3. Controller::tick(now)
//! 4. Forward observable events to the caller
//! ```
//!
//! Playback is instantaneous: a minute of audio takes as long as the live
//! pipeline needs to chew through it.

use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};
use jumpcut_core::buffering::{Observer, Producer, SampleProducer};
use jumpcut_core::media::{BufferedSource, MediaSource, PlaybackEngine, PlaybackState, SourceId};
use jumpcut_core::pipeline::DiagnosticsSnapshot;
use jumpcut_core::{
    AveragingMethod, Controller, ControllerConfig, ControllerStatusEvent, JumpCutError, PlaybackCommand,
    PlaybackCommandEvent, SilenceEventRecord, SourceRegistry, StretchInfo, TimeSavedData,
};
use serde::Serialize;
use tokio::sync::broadcast::{error::TryRecvError, Receiver};
use tracing::{debug, info, warn};

use crate::settings::AppSettings;

/// Give up on a live pipeline that stops draining for this long.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct SimEngine {
    id: SourceId,
    source: BufferedSource,
    position: f64,
    state: PlaybackState,
    rate: f64,
    stretching: bool,
    mirror: bool,
    stretches: u64,
}

impl SimEngine {
    pub fn new(id: SourceId, source: BufferedSource, settings: &AppSettings) -> Self {
        Self {
            id,
            source,
            position: 0.0,
            state: PlaybackState::Playing,
            rate: 1.0,
            stretching: settings.stretching,
            mirror: settings.lookahead_enabled,
            stretches: 0,
        }
    }

    /// Play `dt` seconds at the current rate and return the output,
    /// interleaved. Pitch is not preserved.
    fn render(&mut self, dt: f64) -> Vec<f32> {
        let sample_rate = self.source.sample_rate() as f64;
        let channels = self.source.channels();
        let total = self.source.frames();
        let frames = (dt * sample_rate).round() as usize;
        let mut out = Vec::with_capacity(frames * channels);
        if self.state != PlaybackState::Playing || total == 0 {
            out.resize(frames * channels, 0.0);
            return out;
        }
        for i in 0..frames {
            let media = self.position + i as f64 / sample_rate * self.rate;
            let index = ((media * sample_rate) as usize).min(total - 1);
            for ch in 0..channels {
                out.push(self.source.slice(ch, index, 1).first().copied().unwrap_or(0.0));
            }
        }
        self.position += dt * self.rate;
        if self.duration().is_some_and(|d| self.position >= d) {
            self.position = self.duration().unwrap_or(self.position);
            self.state = PlaybackState::Ended;
        }
        out
    }
}

impl PlaybackEngine for SimEngine {
    fn source_id(&self) -> SourceId {
        self.id.clone()
    }

    fn position(&self) -> f64 {
        self.position
    }

    fn state(&self) -> PlaybackState {
        self.state
    }

    fn duration(&self) -> Option<f64> {
        self.source.duration()
    }

    fn playback_rate(&self) -> f64 {
        self.rate
    }

    fn set_playback_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    fn set_position(&mut self, position: f64) {
        self.position = position.max(0.0);
        if self.duration().is_some_and(|d| self.position >= d) {
            self.state = PlaybackState::Ended;
        } else if self.state == PlaybackState::Ended {
            self.state = PlaybackState::Playing;
        }
    }

    fn output_format(&self) -> (u32, usize) {
        (self.source.sample_rate(), self.source.channels())
    }

    fn mirror_source(&mut self) -> jumpcut_core::Result<Box<dyn MediaSource>> {
        if !self.mirror {
            return Err(JumpCutError::MirrorUnavailable("mirroring disabled in settings".into()));
        }
        Ok(Box::new(self.source.mirror()))
    }

    fn supports_stretching(&self) -> bool {
        self.stretching
    }

    fn schedule_stretch(&mut self, stretch: &StretchInfo) {
        self.stretches += 1;
        debug!(?stretch, "stretch scheduled");
    }
}

/// One line of simulator output.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SimOutput {
    Command(PlaybackCommandEvent),
    Silence(SilenceEventRecord),
    Status(ControllerStatusEvent),
    Report(SimReport),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimReport {
    pub media_duration: f64,
    /// Simulated wall-clock time playback took.
    pub played_in: f64,
    /// Summed over the whole file.
    pub time_saved: TimeSavedData,
    pub rate_changes: u64,
    pub seeks: u64,
    pub stretches: u64,
    pub late_stretches: u64,
    pub predicted_intervals: usize,
    pub live: Option<DiagnosticsSnapshot>,
}

/// Play `path` to the end under a controller, reporting through `emit`.
pub fn run(path: &Path, settings: &AppSettings, mut emit: impl FnMut(SimOutput)) -> anyhow::Result<SimReport> {
    let source = BufferedSource::from_wav(path).with_context(|| format!("opening {}", path.display()))?;
    let Some(media_duration) = source.duration() else {
        bail!("{} has no known duration", path.display());
    };
    info!(
        path = %path.display(),
        media_duration,
        sample_rate = source.sample_rate(),
        channels = source.channels(),
        "simulation starting"
    );

    let engine = SimEngine::new(SourceId::new(path.display().to_string()), source, settings);
    let config = ControllerConfig {
        time_saved_averaging: AveragingMethod::AllTime,
        ..ControllerConfig::default()
    };
    let mut controller = Controller::new(engine, settings.playback, config, SourceRegistry::new());
    let mut commands = controller.subscribe_commands();
    let mut silence = controller.subscribe_silence();
    let mut status = controller.subscribe_status();
    let mut producer = controller.init(0.0)?;

    let dt = settings.tick_interval();
    let mut now = 0.0;
    let mut rate_changes = 0;
    let mut seeks = 0;
    while controller.engine().state() != PlaybackState::Ended {
        let samples = controller.engine_mut().render(dt);
        feed(&mut producer, &samples)?;
        now += dt;
        controller.tick(now);

        for event in drain(&mut commands) {
            match event.command {
                PlaybackCommand::SetPlaybackRate { .. } => rate_changes += 1,
                PlaybackCommand::SetPosition { .. } => seeks += 1,
            }
            emit(SimOutput::Command(event));
        }
        for record in drain(&mut silence) {
            emit(SimOutput::Silence(record));
        }
        for event in drain(&mut status) {
            emit(SimOutput::Status(event));
        }
    }

    let report = SimReport {
        media_duration,
        played_in: now,
        time_saved: controller.time_saved(now),
        rate_changes,
        seeks,
        stretches: controller.engine().stretches,
        late_stretches: controller.scheduler().late_stretches(),
        predicted_intervals: controller.lookahead().map_or(0, |l| l.intervals().len()),
        live: controller.live_diagnostics(),
    };
    controller.destroy();
    for event in drain(&mut status) {
        emit(SimOutput::Status(event));
    }
    info!(
        played_in = report.played_in,
        time_saved = report.time_saved.compared_to_intrinsic,
        "simulation finished"
    );
    emit(SimOutput::Report(report.clone()));
    Ok(report)
}

/// Push everything, then wait until the live pipeline has consumed it so
/// that its events line up with the simulated clock.
fn feed(producer: &mut SampleProducer, samples: &[f32]) -> anyhow::Result<()> {
    let started = Instant::now();
    let mut offset = 0;
    while offset < samples.len() || producer.occupied_len() > 0 {
        offset += producer.push_slice(&samples[offset..]);
        if started.elapsed() > DRAIN_TIMEOUT {
            bail!("live pipeline stopped draining");
        }
        std::thread::sleep(Duration::from_micros(250));
    }
    Ok(())
}

fn drain<T: Clone>(rx: &mut Receiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(item) => out.push(item),
            Err(TryRecvError::Lagged(n)) => warn!(skipped = n, "observer lagged behind"),
            Err(TryRecvError::Empty | TryRecvError::Closed) => break,
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(path: &Path, segments: &[(f32, f64)]) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("create wav");
        for &(amplitude, seconds) in segments {
            let frames = (seconds * 8_000.0) as usize;
            for i in 0..frames {
                // Square wave so the level is constant.
                let value = if i % 16 < 8 { amplitude } else { -amplitude };
                writer
                    .write_sample((value * i16::MAX as f32) as i16)
                    .expect("write sample");
            }
        }
        writer.finalize().expect("finalize");
    }

    #[test]
    fn skipping_a_pause_saves_time() {
        let path = std::env::temp_dir().join(format!("jumpcut-sim-{}.wav", std::process::id()));
        write_wav(&path, &[(0.5, 1.0), (0.0, 3.0), (0.5, 1.0)]);
        let settings = AppSettings {
            playback: jumpcut_core::Settings {
                volume_threshold: 0.1,
                ..Default::default()
            },
            ..Default::default()
        };

        let mut lines = Vec::new();
        let report = run(&path, &settings, |out| lines.push(out)).expect("simulation");
        let _ = std::fs::remove_file(&path);

        let saved = report.time_saved.compared_to_intrinsic;
        assert!(saved > 1.0, "saved only {saved}");
        // Wall-clock bookkeeping agrees with the tracker.
        assert!((report.media_duration - report.played_in - saved).abs() < 0.3);
        assert!(report.rate_changes >= 2);
        assert!(report.predicted_intervals >= 1);
        assert!(matches!(lines.last(), Some(SimOutput::Report(_))));
    }
}
