//! The shadow worker: plays a mirror of the media ahead of real playback.
//!
//! ## Loop
//!
//! ```text
//! 1. Apply pending commands (seek, rate, active, duration threshold, stop)
//! 2. Read one chunk from the mirror source
//! 3. Resample by 1 / rate (accelerated, pitch not preserved)
//! 4. Run the output through the shadow AnalysisPipeline
//! 5. Forward silence events, each stamped with the progress at the end of
//!    the block that produced it
//! 6. Publish progress
//! ```
//!
//! The worker is not throttled to real time. It idles while inactive or at
//! the end of the stream. The mirror source is released when the context is
//! dropped, whether or not the worker ever ran.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::detector::{DetectorParams, SilenceEvent};
use crate::error::Result;
use crate::media::MediaSource;
use crate::pipeline::AnalysisPipeline;
use crate::time::{ContextTime, MediaTime, TimeDelta};

use super::resample::ShadowResampler;

/// How long an idle worker waits for a command before checking again.
const IDLE_WAIT: Duration = Duration::from_millis(20);

/// Control → worker.
#[derive(Debug, Clone, PartialEq)]
pub enum ShadowCommand {
    /// Jump to a media position. Starts a new generation.
    Seek { position: MediaTime, generation: u64 },
    SetRate(f64),
    SetActive(bool),
    SetDurationThreshold(TimeDelta),
    Stop,
}

/// Where the worker is. Single writer (the worker), read by the control side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ShadowProgress {
    /// Shadow analysis clock.
    pub context_time: ContextTime,
    /// Mirror position matching `context_time`.
    pub media_position: MediaTime,
    pub rate: f64,
    /// Incremented by every seek; progress of older generations is stale.
    pub generation: u64,
    pub ended: bool,
}

/// Worker → control.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ShadowMessage {
    Event {
        event: SilenceEvent,
        /// Progress at the end of the block the event was detected in.
        progress: ShadowProgress,
        /// Detector duration threshold the event was detected with.
        duration_threshold: TimeDelta,
        /// Processing delay in shadow seconds besides the duration threshold.
        processing_delay: TimeDelta,
    },
    Ended {
        generation: u64,
        duration: MediaTime,
    },
}

pub(crate) struct ShadowContext {
    pub source: Box<dyn MediaSource>,
    pub resampler: ShadowResampler,
    pub pipeline: AnalysisPipeline,
    pub events: Receiver<SilenceEvent>,
    pub commands: Receiver<ShadowCommand>,
    pub messages: Sender<ShadowMessage>,
    pub progress: Arc<Mutex<ShadowProgress>>,
    pub running: Arc<AtomicBool>,
    pub params: DetectorParams,
    pub smoothing_delay: TimeDelta,
    pub active: bool,
}

impl Drop for ShadowContext {
    fn drop(&mut self) {
        self.source.release();
    }
}

pub(crate) fn run(mut ctx: ShadowContext) {
    info!(rate = ctx.resampler.rate(), "shadow worker started");
    let channels = ctx.source.channels();
    let chunk = ctx.resampler.chunk_size();
    let sample_rate = ctx.source.sample_rate();
    let mut input = vec![vec![0f32; chunk]; channels];
    let mut generation = ctx.progress.lock().generation;
    let mut ended = false;

    'outer: while ctx.running.load(Ordering::Relaxed) {
        // ── 1. Commands ─────────────────────────────────────────────────
        let idle = !ctx.active || ended;
        let command = if idle {
            match ctx.commands.recv_timeout(IDLE_WAIT) {
                Ok(c) => Some(c),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            }
        } else {
            match ctx.commands.try_recv() {
                Ok(c) => Some(c),
                Err(TryRecvError::Empty) => None,
                Err(TryRecvError::Disconnected) => break,
            }
        };
        if let Some(command) = command {
            match command {
                ShadowCommand::Stop => break 'outer,
                ShadowCommand::Seek {
                    position,
                    generation: next,
                } => {
                    if let Err(e) = ctx.source.seek(position) {
                        warn!("shadow seek failed: {e}");
                    }
                    ctx.resampler.reset();
                    // Detection restarts at the new position; anything still
                    // queued belongs to the old one.
                    ctx.pipeline.reset_detector(0.0, ctx.params);
                    let stale = ctx.events.try_iter().count();
                    generation = next;
                    ended = false;
                    publish(&ctx, generation, false);
                    debug!(position, generation, stale, "shadow reseeked");
                }
                ShadowCommand::SetRate(rate) => {
                    if let Err(e) = ctx.resampler.set_rate(rate) {
                        warn!("shadow rate change rejected: {e}");
                    }
                }
                ShadowCommand::SetActive(active) => ctx.active = active,
                ShadowCommand::SetDurationThreshold(threshold) => {
                    ctx.params.duration_threshold = threshold;
                }
            }
            continue;
        }
        if idle {
            continue;
        }

        // ── 2-4. Read, accelerate, analyse ──────────────────────────────
        match step(&mut ctx, &mut input, chunk, sample_rate, generation) {
            Ok(true) => {}
            Ok(false) => {
                ended = true;
                publish(&ctx, generation, true);
                let duration = ctx.source.duration().unwrap_or_else(|| ctx.source.position());
                if ctx
                    .messages
                    .try_send(ShadowMessage::Ended { generation, duration })
                    .is_err()
                {
                    warn!("control side not draining shadow messages, end of stream lost");
                }
                debug!(generation, duration, "shadow reached end of stream");
            }
            Err(e) => {
                error!("shadow worker failed: {e}");
                break;
            }
        }
    }

    ctx.running.store(false, Ordering::SeqCst);
    info!(
        diagnostics = ?ctx.pipeline.diagnostics().snapshot(),
        "shadow worker stopped"
    );
}

/// One chunk. `Ok(false)` at the end of the stream.
fn step(
    ctx: &mut ShadowContext,
    input: &mut [Vec<f32>],
    chunk: usize,
    sample_rate: u32,
    generation: u64,
) -> Result<bool> {
    let read = ctx.source.read(input, chunk)?;
    if read == 0 {
        return Ok(false);
    }
    let produced = if read == chunk {
        ctx.resampler.process(input)?
    } else {
        let partial: Vec<Vec<f32>> = input.iter().map(|ch| ch[..read].to_vec()).collect();
        ctx.resampler.process_last(&partial)?
    };
    if produced > 0 {
        let block = ctx.resampler.output_block(produced, sample_rate);
        ctx.pipeline.process_block(&block, ctx.params);
    }

    let progress = publish(ctx, generation, false);
    let processing_delay = ctx.smoothing_delay + ctx.resampler.output_delay(sample_rate);
    for event in ctx.events.try_iter() {
        let message = ShadowMessage::Event {
            event,
            progress,
            duration_threshold: ctx.params.duration_threshold,
            processing_delay,
        };
        if ctx.messages.try_send(message).is_err() {
            warn!(kind = ?event.kind, "shadow message channel full, event dropped");
        }
    }
    Ok(true)
}

fn publish(ctx: &ShadowContext, generation: u64, ended: bool) -> ShadowProgress {
    let progress = ShadowProgress {
        context_time: ctx.pipeline.clock(),
        media_position: ctx.source.position(),
        rate: ctx.resampler.rate(),
        generation,
        ended,
    };
    *ctx.progress.lock() = progress;
    progress
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use crossbeam_channel::bounded;

    use super::*;
    use crate::pipeline::PipelineConfig;

    /// Endless silence that counts how often it is released.
    struct CountingSource {
        position: MediaTime,
        releases: Arc<AtomicUsize>,
    }

    impl MediaSource for CountingSource {
        fn sample_rate(&self) -> u32 {
            8_000
        }

        fn channels(&self) -> usize {
            1
        }

        fn duration(&self) -> Option<MediaTime> {
            None
        }

        fn position(&self) -> MediaTime {
            self.position
        }

        fn seek(&mut self, position: MediaTime) -> Result<()> {
            self.position = position;
            Ok(())
        }

        fn read(&mut self, out: &mut [Vec<f32>], frames: usize) -> Result<usize> {
            out[0][..frames].fill(0.0);
            self.position += frames as f64 / 8_000.0;
            Ok(frames)
        }

        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn context(releases: &Arc<AtomicUsize>) -> (ShadowContext, Sender<ShadowCommand>, Receiver<ShadowMessage>) {
        let params = DetectorParams {
            volume_threshold: 0.1,
            duration_threshold: 0.02,
        };
        let (pipeline, outputs) = AnalysisPipeline::new(&PipelineConfig::default(), 8_000, 0.0, 0.0, params);
        let (command_tx, command_rx) = bounded(8);
        let (message_tx, message_rx) = bounded(64);
        let ctx = ShadowContext {
            source: Box::new(CountingSource {
                position: 0.0,
                releases: Arc::clone(releases),
            }),
            resampler: ShadowResampler::new(1, 256, 8.0).expect("resampler"),
            pipeline,
            events: outputs.events,
            commands: command_rx,
            messages: message_tx,
            progress: Arc::new(Mutex::new(ShadowProgress {
                context_time: 0.0,
                media_position: 0.0,
                rate: 8.0,
                generation: 0,
                ended: false,
            })),
            running: Arc::new(AtomicBool::new(true)),
            params,
            smoothing_delay: 0.0,
            active: false,
        };
        (ctx, command_tx, message_rx)
    }

    #[test]
    fn dropping_an_unstarted_context_releases_the_source() {
        let releases = Arc::new(AtomicUsize::new(0));
        let (ctx, _commands, _messages) = context(&releases);
        drop(ctx);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stopped_worker_releases_once() {
        let releases = Arc::new(AtomicUsize::new(0));
        let (ctx, commands, _messages) = context(&releases);
        commands.send(ShadowCommand::Stop).expect("send stop");
        run(ctx);
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn seek_restarts_detection_in_a_new_generation() {
        let releases = Arc::new(AtomicUsize::new(0));
        let (ctx, commands, messages) = context(&releases);
        let progress = Arc::clone(&ctx.progress);
        let worker = std::thread::spawn(move || run(ctx));

        // Long enough in silence for the detector to have gone silent.
        commands.send(ShadowCommand::SetActive(true)).expect("send");
        let silent = std::iter::from_fn(|| messages.recv_timeout(Duration::from_secs(5)).ok())
            .find(|m| matches!(m, ShadowMessage::Event { .. }));
        assert!(silent.is_some());

        commands
            .send(ShadowCommand::Seek {
                position: 30.0,
                generation: 1,
            })
            .expect("send");
        // The reset detector reports the silence again, under the new
        // generation and no earlier than the seek target.
        let restarted = std::iter::from_fn(|| messages.recv_timeout(Duration::from_secs(5)).ok())
            .find_map(|m| match m {
                ShadowMessage::Event { progress, .. } if progress.generation == 1 => Some(progress),
                _ => None,
            })
            .expect("event after seek");
        assert!(restarted.media_position >= 30.0);
        assert_eq!(progress.lock().generation, 1);

        commands.send(ShadowCommand::Stop).expect("send stop");
        worker.join().expect("worker");
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
