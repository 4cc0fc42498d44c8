//! One analysis pipeline: volume estimation followed by silence detection.
//!
//! ## Per block
//!
//! ```text
//! SampleBlock ─► VolumeEstimator ─► SilenceDetector ─► try_send(SilenceEvent)
//!                       │
//!                       └─► try_send(VolumeSample)   (last value of the block)
//! ```
//!
//! A pipeline is driven by exactly one processing context. It never blocks:
//! when the control side falls behind, messages are dropped and counted in
//! [`PipelineDiagnostics`].

pub mod live;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::Serialize;
use tracing::trace;

use crate::buffering::{block::SampleBlock, block::QUANTUM_FRAMES, LIVE_RING_CAPACITY};
use crate::detector::{DetectorParams, DetectorState, SilenceDetector, SilenceEvent};
use crate::time::{ContextTime, TimeDelta};
use crate::volume::VolumeEstimator;

pub use live::LivePipeline;

/// Smoothing window used by every pipeline unless configured otherwise.
pub const DEFAULT_SMOOTHING_WINDOW: TimeDelta = 0.02;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Volume smoothing window, in seconds.
    pub smoothing_window: TimeDelta,
    /// Frames per processing step.
    pub quantum_frames: usize,
    /// Silence events buffered towards the control context.
    pub event_capacity: usize,
    /// Volume readings buffered towards the control context.
    pub volume_capacity: usize,
    /// Interleaved samples buffered between the engine callback and a live pipeline.
    pub ring_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            smoothing_window: DEFAULT_SMOOTHING_WINDOW,
            quantum_frames: QUANTUM_FRAMES,
            event_capacity: 64,
            volume_capacity: 1024,
            ring_capacity: LIVE_RING_CAPACITY,
        }
    }
}

impl PipelineConfig {
    /// Processing delay caused by smoothing: half the window.
    ///
    /// Approximate. Where within the window the smoothed volume actually
    /// crosses the threshold depends on the level-to-threshold ratio, so
    /// falling edges tend to be seen later and rising edges earlier.
    pub fn smoothing_delay(&self) -> TimeDelta {
        self.smoothing_window / 2.0
    }
}

/// Loudness at the end of one processed block.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeSample {
    pub time: ContextTime,
    pub volume: f32,
}

// ── Diagnostics ─────────────────────────────────────────────────────────────

#[derive(Default)]
pub struct PipelineDiagnostics {
    pub blocks: AtomicU64,
    pub frames: AtomicU64,
    pub unknown_blocks: AtomicU64,
    pub events_emitted: AtomicU64,
    pub events_dropped: AtomicU64,
    pub volumes_dropped: AtomicU64,
}

impl PipelineDiagnostics {
    pub fn reset(&self) {
        self.blocks.store(0, Ordering::Relaxed);
        self.frames.store(0, Ordering::Relaxed);
        self.unknown_blocks.store(0, Ordering::Relaxed);
        self.events_emitted.store(0, Ordering::Relaxed);
        self.events_dropped.store(0, Ordering::Relaxed);
        self.volumes_dropped.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            blocks: self.blocks.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            unknown_blocks: self.unknown_blocks.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            volumes_dropped: self.volumes_dropped.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct DiagnosticsSnapshot {
    pub blocks: u64,
    pub frames: u64,
    pub unknown_blocks: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub volumes_dropped: u64,
}

// ── Control-rate parameters ─────────────────────────────────────────────────

/// Detector parameters written by the control context and read once per
/// block by the processing context, without locking.
#[derive(Debug)]
pub struct SharedParams {
    volume_threshold: AtomicU32,
    duration_threshold: AtomicU64,
}

impl SharedParams {
    pub fn new(params: DetectorParams) -> Self {
        Self {
            volume_threshold: AtomicU32::new(params.volume_threshold.to_bits()),
            duration_threshold: AtomicU64::new(params.duration_threshold.to_bits()),
        }
    }

    pub fn load(&self) -> DetectorParams {
        DetectorParams {
            volume_threshold: f32::from_bits(self.volume_threshold.load(Ordering::Relaxed)),
            duration_threshold: f64::from_bits(self.duration_threshold.load(Ordering::Relaxed)),
        }
    }

    pub fn store(&self, params: DetectorParams) {
        self.volume_threshold
            .store(params.volume_threshold.to_bits(), Ordering::Relaxed);
        self.duration_threshold
            .store(params.duration_threshold.to_bits(), Ordering::Relaxed);
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────────

/// Control-side ends of a pipeline's outbound channels.
pub struct PipelineOutputs {
    pub events: Receiver<SilenceEvent>,
    pub volumes: Receiver<VolumeSample>,
}

pub struct AnalysisPipeline {
    estimator: VolumeEstimator,
    detector: SilenceDetector,
    sample_rate: u32,
    start_time: ContextTime,
    frames_processed: u64,
    event_tx: Sender<SilenceEvent>,
    volume_tx: Sender<VolumeSample>,
    diagnostics: Arc<PipelineDiagnostics>,
}

impl AnalysisPipeline {
    /// Build a pipeline whose clock starts at `start_time`.
    ///
    /// `assumed_prior_silence` seeds the detector state, see
    /// [`SilenceDetector::new`].
    pub fn new(
        config: &PipelineConfig,
        sample_rate: u32,
        start_time: ContextTime,
        assumed_prior_silence: TimeDelta,
        params: DetectorParams,
    ) -> (Self, PipelineOutputs) {
        let (event_tx, event_rx) = bounded(config.event_capacity.max(1));
        let (volume_tx, volume_rx) = bounded(config.volume_capacity.max(1));
        let pipeline = Self {
            estimator: VolumeEstimator::new(config.smoothing_window, sample_rate),
            detector: SilenceDetector::new(sample_rate, start_time, assumed_prior_silence, params),
            sample_rate,
            start_time,
            frames_processed: 0,
            event_tx,
            volume_tx,
            diagnostics: Arc::new(PipelineDiagnostics::default()),
        };
        let outputs = PipelineOutputs {
            events: event_rx,
            volumes: volume_rx,
        };
        (pipeline, outputs)
    }

    /// Time of the next frame to be processed.
    pub fn clock(&self) -> ContextTime {
        self.start_time + self.frames_processed as f64 / self.sample_rate as f64
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn detector_state(&self) -> DetectorState {
        self.detector.state()
    }

    pub fn diagnostics(&self) -> Arc<PipelineDiagnostics> {
        Arc::clone(&self.diagnostics)
    }

    /// Re-seed the detector at the current clock.
    pub fn reset_detector(&mut self, assumed_prior_silence: TimeDelta, params: DetectorParams) {
        let now = self.clock();
        self.detector.reset(now, assumed_prior_silence, params);
    }

    /// Analyse one block and advance the clock by its length.
    pub fn process_block(&mut self, block: &SampleBlock, params: DetectorParams) {
        debug_assert_eq!(block.sample_rate, self.sample_rate, "block sample rate mismatch");
        let block_start = self.clock();
        let frames = block.frames();

        let volume = self.estimator.process(block);
        if volume.is_none() {
            self.diagnostics.unknown_blocks.fetch_add(1, Ordering::Relaxed);
        }
        let last_volume = volume.and_then(|v| v.last().copied());

        let event_tx = &self.event_tx;
        let diagnostics = &self.diagnostics;
        self.detector
            .process(volume, frames, block_start, params, |event| {
                trace!(kind = ?event.kind, time = event.time, "silence event");
                match event_tx.try_send(event) {
                    Ok(()) => {
                        diagnostics.events_emitted.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                        diagnostics.events_dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            });

        if let Some(volume) = last_volume {
            let reading = VolumeSample {
                time: block_start + frames.saturating_sub(1) as f64 / self.sample_rate as f64,
                volume,
            };
            if self.volume_tx.try_send(reading).is_err() {
                self.diagnostics.volumes_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.frames_processed += frames as u64;
        self.diagnostics.blocks.fetch_add(1, Ordering::Relaxed);
        self.diagnostics
            .frames
            .fetch_add(frames as u64, Ordering::Relaxed);
    }
}
