//! The blocking per-byte processing pipeline: bytes → frames → probabilities
//! → state-machine events → broadcast sends.
//!
//! `PipelineCore` bundles the stage objects (frame assembler, Silero model,
//! speech iterator) behind free functions that do the actual work, so they
//! are callable identically from the mic-capture thread and from a direct
//! `VadHandler::feed` call. `PipelineDiagnostics` is an `AtomicUsize`-counter
//! struct with `reset`/`snapshot`.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::audio::ring::AudioConsumer;
use crate::config::VadConfig;
use crate::error::Result;
use crate::events::{ErrorEvent, EventChannels};
use crate::frame::FrameAssembler;
use crate::iterator::{IteratorEvent, VadIterator};
use crate::model::{ModelRunner, SileroModel};

/// Owns every piece of per-session mutable pipeline state. A `VadHandler`
/// holds exactly one of these behind a lock for the lifetime of a listening
/// session (§5: single-writer).
///
/// `model` is boxed behind the [`ModelRunner`] trait rather than naming
/// `SileroModel` concretely so integration tests can substitute a scripted
/// fake and drive the real frame-assembly → inference → state-machine path
/// without an ONNX runtime.
pub struct PipelineCore {
    pub(crate) assembler: FrameAssembler,
    pub(crate) model: Box<dyn ModelRunner>,
    pub(crate) iterator: VadIterator,
}

impl PipelineCore {
    pub fn new(config: &VadConfig) -> Result<Self> {
        let model = SileroModel::load(config.model, config.base_asset_path.as_deref())?;
        Ok(Self::with_model(config, Box::new(model)))
    }

    /// Construct with an already-built model runner — the seam tests use to
    /// inject a `ScriptedModel` in place of `SileroModel`.
    pub fn with_model(config: &VadConfig, model: Box<dyn ModelRunner>) -> Self {
        Self {
            assembler: FrameAssembler::new(config.frame_samples),
            model,
            iterator: VadIterator::new(config),
        }
    }

    /// Reload the ONNX session for a new model version; leaves the assembler
    /// and iterator untouched (the caller rebuilds those separately).
    pub fn reload_model(&mut self, config: &VadConfig) -> Result<()> {
        self.model = Box::new(SileroModel::load(
            config.model,
            config.base_asset_path.as_deref(),
        )?);
        Ok(())
    }
}

/// Counters for the supplemented observability surface: frames assembled,
/// model evaluations and inference errors, speech starts, misfires, and
/// chunks emitted.
#[derive(Default)]
pub struct PipelineDiagnostics {
    frames_assembled: AtomicUsize,
    model_evaluations: AtomicUsize,
    inference_errors: AtomicUsize,
    speech_starts: AtomicUsize,
    misfires: AtomicUsize,
    chunks_emitted: AtomicUsize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineDiagnosticsSnapshot {
    pub frames_assembled: usize,
    pub model_evaluations: usize,
    pub inference_errors: usize,
    pub speech_starts: usize,
    pub misfires: usize,
    pub chunks_emitted: usize,
}

impl PipelineDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&self) {
        self.frames_assembled.store(0, Ordering::Relaxed);
        self.model_evaluations.store(0, Ordering::Relaxed);
        self.inference_errors.store(0, Ordering::Relaxed);
        self.speech_starts.store(0, Ordering::Relaxed);
        self.misfires.store(0, Ordering::Relaxed);
        self.chunks_emitted.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> PipelineDiagnosticsSnapshot {
        PipelineDiagnosticsSnapshot {
            frames_assembled: self.frames_assembled.load(Ordering::Relaxed),
            model_evaluations: self.model_evaluations.load(Ordering::Relaxed),
            inference_errors: self.inference_errors.load(Ordering::Relaxed),
            speech_starts: self.speech_starts.load(Ordering::Relaxed),
            misfires: self.misfires.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
        }
    }
}

/// Push one batch of PCM16-LE bytes through assembly, inference, and the
/// state machine, fanning out every resulting event.
///
/// Inference failures (§7) are logged and reported on the `error` channel;
/// the offending frame is skipped and recurrent model state is left
/// untouched, since `SileroModel::evaluate` only mutates state on success.
pub fn process_bytes(
    core: &mut PipelineCore,
    channels: &EventChannels,
    diagnostics: &PipelineDiagnostics,
    bytes: &[u8],
) {
    let frames = core.assembler.push_bytes(bytes);
    for frame in frames {
        diagnostics.frames_assembled.fetch_add(1, Ordering::Relaxed);
        match core.model.evaluate(&frame) {
            Ok(probability) => {
                diagnostics.model_evaluations.fetch_add(1, Ordering::Relaxed);
                let events = core.iterator.process_frame(probability, frame);
                emit_events(events, channels, diagnostics);
            }
            Err(err) => {
                diagnostics.inference_errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %err, "inference failed; skipping frame, recurrent state unchanged");
                let _ = channels.error.send(ErrorEvent {
                    message: err.to_string(),
                });
            }
        }
    }
}

pub fn emit_events(
    events: Vec<IteratorEvent>,
    channels: &EventChannels,
    diagnostics: &PipelineDiagnostics,
) {
    for event in events {
        match event {
            IteratorEvent::SpeechStart => {
                diagnostics.speech_starts.fetch_add(1, Ordering::Relaxed);
                let _ = channels.speech_start.send(());
            }
            IteratorEvent::RealSpeechStart => {
                let _ = channels.real_speech_start.send(());
            }
            IteratorEvent::SpeechEnd(event) => {
                let _ = channels.speech_end.send(event);
            }
            IteratorEvent::FrameProcessed(event) => {
                let _ = channels.frame_processed.send(event);
            }
            IteratorEvent::Misfire => {
                diagnostics.misfires.fetch_add(1, Ordering::Relaxed);
                let _ = channels.misfire.send(());
            }
            IteratorEvent::Chunk(event) => {
                diagnostics.chunks_emitted.fetch_add(1, Ordering::Relaxed);
                let _ = channels.chunk.send(event);
            }
        }
    }
}

/// The mic-capture loop, run on its own OS thread by `VadHandler::start`
/// (the same thread that opened the `AudioCapture`, since its `cpal::Stream`
/// is `!Send`). Pulls bytes out of the SPSC ring and feeds them through
/// [`process_bytes`] until `running` is cleared.
///
/// While `paused` is set, bytes are drained from the ring (so the producer
/// never blocks/drops against a full buffer) but never handed to the
/// pipeline: pausing does not cancel the input subscription, it just drops
/// the batches on the floor until `resume`.
pub fn run_capture(
    mut consumer: AudioConsumer,
    core: Arc<Mutex<Option<PipelineCore>>>,
    channels: Arc<EventChannels>,
    diagnostics: Arc<PipelineDiagnostics>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
) {
    use ringbuf::traits::Consumer;

    let mut buf = vec![0u8; 4096];
    while running.load(Ordering::Acquire) {
        let n = consumer.pop_slice(&mut buf);
        if n == 0 {
            std::thread::sleep(Duration::from_millis(5));
            continue;
        }
        if paused.load(Ordering::Acquire) {
            continue;
        }
        if let Some(core) = core.lock().as_mut() {
            process_bytes(core, &channels, &diagnostics, &buf[..n]);
        }
    }
}
