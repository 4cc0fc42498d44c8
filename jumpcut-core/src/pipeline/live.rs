//! The live pipeline: analyses what is audible right now.
//!
//! ## Threading
//!
//! ```text
//! engine audio callback ──push_slice──► SPSC ring ──pop_slice──► analysis thread
//!                                                                  │
//!                              control context ◄── try_send ───────┘
//! ```
//!
//! The callback side never locks or allocates. The analysis thread sleeps
//! briefly when the ring is empty. `stop()` is idempotent and joins the
//! thread; dropping the handle stops it too.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, error, info};

use crate::buffering::{
    block::SampleBlock, create_sample_ring, Consumer, Observer, SampleConsumer, SampleProducer,
};
use crate::detector::{DetectorParams, SilenceEvent};
use crate::error::{JumpCutError, Result};
use crate::time::ContextTime;

use super::{AnalysisPipeline, PipelineConfig, PipelineDiagnostics, PipelineOutputs, SharedParams, VolumeSample};

/// Sleep when the ring is empty (avoids busy-wait burning a core).
const SLEEP_EMPTY: Duration = Duration::from_millis(5);

pub struct LivePipeline {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    params: Arc<SharedParams>,
    outputs: PipelineOutputs,
    diagnostics: Arc<PipelineDiagnostics>,
    sample_rate: u32,
    channels: usize,
}

impl LivePipeline {
    /// Start the analysis thread. The returned producer feeds it interleaved
    /// samples with `channels` channels; its clock starts at `start_time`.
    pub fn spawn(
        config: &PipelineConfig,
        sample_rate: u32,
        channels: usize,
        start_time: ContextTime,
        params: DetectorParams,
    ) -> Result<(Self, SampleProducer)> {
        if sample_rate == 0 {
            return Err(JumpCutError::MediaSource("live feed sample rate is zero".into()));
        }
        let (producer, consumer) = create_sample_ring(config.ring_capacity);
        let (pipeline, outputs) = AnalysisPipeline::new(config, sample_rate, start_time, 0.0, params);
        let diagnostics = pipeline.diagnostics();
        let params = Arc::new(SharedParams::new(params));
        let running = Arc::new(AtomicBool::new(true));

        let ctx = LiveContext {
            pipeline,
            consumer,
            channels,
            quantum_frames: config.quantum_frames.max(1),
            params: Arc::clone(&params),
            running: Arc::clone(&running),
        };
        let handle = std::thread::Builder::new()
            .name("jumpcut-live".into())
            .spawn(move || run(ctx))?;

        info!(sample_rate, channels, "live pipeline started");
        Ok((
            Self {
                running,
                handle: Some(handle),
                params,
                outputs,
                diagnostics,
                sample_rate,
                channels,
            },
            producer,
        ))
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Takes effect from the next block.
    pub fn set_params(&self, params: DetectorParams) {
        self.params.store(params);
    }

    pub fn params(&self) -> DetectorParams {
        self.params.load()
    }

    pub fn diagnostics(&self) -> &PipelineDiagnostics {
        &self.diagnostics
    }

    /// Silence events produced since the last call, in emission order.
    pub fn drain_events(&self) -> impl Iterator<Item = SilenceEvent> + '_ {
        self.outputs.events.try_iter()
    }

    pub fn drain_volumes(&self) -> impl Iterator<Item = VolumeSample> + '_ {
        self.outputs.volumes.try_iter()
    }

    /// Stop and join the analysis thread. Safe to call more than once.
    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("live pipeline thread panicked");
            }
            info!(diagnostics = ?self.diagnostics.snapshot(), "live pipeline stopped");
        }
    }
}

impl Drop for LivePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LiveContext {
    pipeline: AnalysisPipeline,
    consumer: SampleConsumer,
    channels: usize,
    quantum_frames: usize,
    params: Arc<SharedParams>,
    running: Arc<AtomicBool>,
}

fn run(mut ctx: LiveContext) {
    let sample_rate = ctx.pipeline.sample_rate();
    let stride = ctx.channels.max(1);
    let mut raw = vec![0f32; ctx.quantum_frames * stride];

    while ctx.running.load(Ordering::Relaxed) {
        // Only whole frames, so channels never shift.
        let available = ctx.consumer.occupied_len();
        let want = (available - available % stride).min(raw.len());
        if want == 0 {
            std::thread::sleep(SLEEP_EMPTY);
            continue;
        }
        let n = ctx.consumer.pop_slice(&mut raw[..want]);
        let block = if ctx.channels == 0 {
            SampleBlock::disconnected(n, sample_rate)
        } else {
            SampleBlock::from_interleaved(&raw[..n], ctx.channels, sample_rate)
        };
        ctx.pipeline.process_block(&block, ctx.params.load());
    }
    debug!(clock = ctx.pipeline.clock(), "live analysis loop exited");
}
