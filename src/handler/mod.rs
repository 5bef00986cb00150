//! `VadHandler` — the public coordinator (§4.1).
//!
//! Owns the `VadConfig`, the seven broadcast channels, and (while listening)
//! a [`pipeline::PipelineCore`]. Uses an `Arc<AtomicBool>` running flag, an
//! `Arc<Mutex<_>>` status, broadcast senders constructed up front and handed
//! out via `subscribe_*`, and a dedicated OS thread (not an async task) for
//! the audio device itself, since `cpal::Stream` is `!Send` on
//! Windows/macOS and must be created and dropped on the same thread.
//! Device-open success or failure is reported back to the synchronous
//! `start()` caller over a `std::sync::mpsc` channel. This crate spawns a
//! plain `std::thread` rather than `tokio::task::spawn_blocking`, so
//! `start()` does not require an enclosing Tokio runtime (only the
//! broadcast channels do, and sending on them is synchronous).

pub mod pipeline;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::info;

use crate::audio::{self, ring::new_ring};
use crate::config::VadConfig;
use crate::error::{Result, VadError};
use crate::events::EventChannels;
use crate::frame::FrameAssembler;
use crate::iterator::VadIterator;
use pipeline::{PipelineCore, PipelineDiagnostics, PipelineDiagnosticsSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerStatus {
    Idle,
    /// Transient: `start_core` has built the pipeline but the capture thread
    /// (if any) has not yet reported readiness. Blocks re-entrant `start()`
    /// calls the same way `Listening`/`Paused` do.
    Starting,
    Listening,
    Paused,
}

pub struct VadHandler {
    config: Mutex<VadConfig>,
    /// Held behind a lock (rather than a bare `Arc<EventChannels>`) so
    /// `dispose()` can swap in a fresh, senderless set and let the old one
    /// drop — the only way to actually close a `tokio::sync::broadcast`
    /// channel out from under existing subscribers (§5: "dispose … closes
    /// all output channels").
    channels: Mutex<Arc<EventChannels>>,
    diagnostics: Arc<PipelineDiagnostics>,
    core: Arc<Mutex<Option<PipelineCore>>>,
    status: Mutex<HandlerStatus>,
    running: Arc<AtomicBool>,
    paused: Arc<AtomicBool>,
    capture_thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    /// Set by `dispose()`; every other public entry point checks this first
    /// and returns `VadError::Disposed` instead of acting (§5: "further
    /// public calls are no-ops or errors").
    disposed: AtomicBool,
}

impl VadHandler {
    /// Validates `config` and constructs an idle handler. No model is loaded
    /// and no capture device is opened until [`VadHandler::start`] or
    /// [`VadHandler::start_external`].
    pub fn new(config: VadConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config: Mutex::new(config),
            channels: Mutex::new(Arc::new(EventChannels::new())),
            diagnostics: Arc::new(PipelineDiagnostics::new()),
            core: Arc::new(Mutex::new(None)),
            status: Mutex::new(HandlerStatus::Idle),
            running: Arc::new(AtomicBool::new(false)),
            paused: Arc::new(AtomicBool::new(false)),
            capture_thread: Mutex::new(None),
            disposed: AtomicBool::new(false),
        })
    }

    fn check_not_disposed(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(VadError::Disposed);
        }
        Ok(())
    }

    pub fn status(&self) -> HandlerStatus {
        *self.status.lock()
    }

    /// The currently active configuration, after any model-version default
    /// remap (§4.1) applied by the most recent `start`/`reconfigure`.
    pub fn config(&self) -> VadConfig {
        self.config.lock().clone()
    }

    pub fn diagnostics(&self) -> PipelineDiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    pub fn subscribe_speech_start(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.channels.lock().speech_start.subscribe()
    }

    pub fn subscribe_real_speech_start(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.channels.lock().real_speech_start.subscribe()
    }

    pub fn subscribe_speech_end(
        &self,
    ) -> tokio::sync::broadcast::Receiver<crate::events::SpeechEndEvent> {
        self.channels.lock().speech_end.subscribe()
    }

    pub fn subscribe_frame_processed(
        &self,
    ) -> tokio::sync::broadcast::Receiver<crate::events::FrameProcessedEvent> {
        self.channels.lock().frame_processed.subscribe()
    }

    pub fn subscribe_misfire(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.channels.lock().misfire.subscribe()
    }

    pub fn subscribe_chunk(&self) -> tokio::sync::broadcast::Receiver<crate::events::ChunkEvent> {
        self.channels.lock().chunk.subscribe()
    }

    pub fn subscribe_error(&self) -> tokio::sync::broadcast::Receiver<crate::events::ErrorEvent> {
        self.channels.lock().error.subscribe()
    }

    /// Start listening on the platform microphone (§4.1/§6's default,
    /// no-external-source path). Blocks until the capture device has either
    /// opened successfully or failed.
    pub fn start(&self) -> Result<()> {
        self.start_core(None)?;

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let core = Arc::clone(&self.core);
        let channels = Arc::clone(&self.channels.lock());
        let diagnostics = Arc::clone(&self.diagnostics);
        let running = Arc::clone(&self.running);
        let paused = Arc::clone(&self.paused);
        let capture_running = Arc::clone(&self.running);

        let handle = std::thread::spawn(move || {
            let (producer, consumer) = new_ring();
            let capture = match audio::AudioCapture::open_default(producer, capture_running) {
                Ok(capture) => {
                    let _ = ready_tx.send(Ok(()));
                    capture
                }
                Err(err) => {
                    let _ = ready_tx.send(Err(err));
                    return;
                }
            };
            pipeline::run_capture(consumer, core, channels, diagnostics, running, paused);
            capture.stop();
        });
        *self.capture_thread.lock() = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => {
                *self.status.lock() = HandlerStatus::Listening;
                info!("VAD handler listening on platform microphone");
                Ok(())
            }
            Ok(Err(err)) => {
                self.abort_start();
                Err(err)
            }
            Err(_) => {
                self.abort_start();
                Err(VadError::CaptureFailure(
                    "capture thread terminated before reporting readiness".into(),
                ))
            }
        }
    }

    /// Start in externally-fed mode (§6): no capture device is opened: the
    /// caller pushes bytes via [`VadHandler::feed`].
    pub fn start_external(&self) -> Result<()> {
        self.start_core(None)?;
        *self.status.lock() = HandlerStatus::Listening;
        info!("VAD handler listening on externally supplied audio");
        Ok(())
    }

    /// Start in externally-fed mode with a caller-supplied model runner in
    /// place of the ONNX-backed `SileroModel` — the seam integration tests
    /// use to drive the real assembler/iterator path with a scripted
    /// probability sequence instead of a loaded model.
    pub fn start_external_with_model(
        &self,
        model: Box<dyn crate::model::ModelRunner>,
    ) -> Result<()> {
        self.start_core(Some(model))?;
        *self.status.lock() = HandlerStatus::Listening;
        info!("VAD handler listening on externally supplied audio with injected model runner");
        Ok(())
    }

    fn start_core(&self, model_override: Option<Box<dyn crate::model::ModelRunner>>) -> Result<()> {
        self.check_not_disposed()?;
        let mut status = self.status.lock();
        if *status != HandlerStatus::Idle {
            return Err(VadError::AlreadyRunning);
        }

        let mut config = self.config.lock();
        config.apply_model_version_defaults();
        config.validate()?;
        let built = match model_override {
            Some(model) => PipelineCore::with_model(&config, model),
            None => PipelineCore::new(&config)?,
        };
        *self.core.lock() = Some(built);
        drop(config);

        self.diagnostics.reset();
        self.running.store(true, Ordering::Release);
        self.paused.store(false, Ordering::Release);
        *status = HandlerStatus::Starting;
        Ok(())
    }

    fn abort_start(&self) {
        self.running.store(false, Ordering::Release);
        *self.core.lock() = None;
        *self.status.lock() = HandlerStatus::Idle;
        *self.capture_thread.lock() = None;
    }

    /// Feed externally supplied PCM16-LE bytes (§6). A no-op, but not an
    /// error, while paused — matches the mic-path's drop-during-pause
    /// behavior.
    pub fn feed(&self, bytes: &[u8]) -> Result<()> {
        self.check_not_disposed()?;
        if *self.status.lock() == HandlerStatus::Idle {
            return Err(VadError::NotRunning);
        }
        if self.paused.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut guard = self.core.lock();
        let core = guard.as_mut().ok_or(VadError::NotRunning)?;
        let channels = self.channels.lock().clone();
        pipeline::process_bytes(core, &channels, &self.diagnostics, bytes);
        Ok(())
    }

    /// Pause (§5): input is dropped, not buffered, until `resume`. If
    /// `submit_user_speech_on_pause` is set, any active utterance is
    /// force-ended first so its `speechEnd`/final chunk still fire.
    pub fn pause(&self) -> Result<()> {
        self.check_not_disposed()?;
        let mut status = self.status.lock();
        if *status == HandlerStatus::Idle {
            return Err(VadError::NotRunning);
        }
        if self.config.lock().submit_user_speech_on_pause {
            if let Some(core) = self.core.lock().as_mut() {
                let events = core.iterator.force_end_speech();
                let channels = self.channels.lock().clone();
                pipeline::emit_events(events, &channels, &self.diagnostics);
            }
        }
        self.paused.store(true, Ordering::Release);
        *status = HandlerStatus::Paused;
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.check_not_disposed()?;
        let mut status = self.status.lock();
        if *status == HandlerStatus::Idle {
            return Err(VadError::NotRunning);
        }
        self.paused.store(false, Ordering::Release);
        *status = HandlerStatus::Listening;
        Ok(())
    }

    /// Stop (§5): cancels the input subscription, resets the iterator and
    /// recurrent model state, and joins the capture thread (a no-op in
    /// externally-fed mode). Force-ends an active utterance first only when
    /// `submit_user_speech_on_pause` is set (§4.1); otherwise a bare `reset`
    /// applies and no `speechEnd`/final chunk fires for it (§4.3).
    pub fn stop(&self) -> Result<()> {
        self.check_not_disposed()?;
        self.stop_internal()
    }

    /// Shared by `stop()` and `dispose()`; unlike `stop()` this does not
    /// check `disposed`, since `dispose()` must be able to tear down a still
    /// running handler after already marking it disposed.
    fn stop_internal(&self) -> Result<()> {
        let mut status = self.status.lock();
        if *status == HandlerStatus::Idle {
            return Err(VadError::NotRunning);
        }

        let submit_on_pause = self.config.lock().submit_user_speech_on_pause;
        if let Some(core) = self.core.lock().as_mut() {
            if submit_on_pause {
                let events = core.iterator.force_end_speech();
                let channels = self.channels.lock().clone();
                pipeline::emit_events(events, &channels, &self.diagnostics);
            }
            core.iterator.reset();
            core.model.reset();
        }

        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.capture_thread.lock().take() {
            let _ = handle.join();
        }
        *self.core.lock() = None;
        *status = HandlerStatus::Idle;
        Ok(())
    }

    /// Dispose (§5): best-effort stop, tolerant of an already-idle handler,
    /// then releases the model (dropped along with the core) and closes all
    /// output channels by swapping in a fresh, senderless `EventChannels` —
    /// existing subscribers observe their channel as closed rather than
    /// merely going quiet. Every other public entry point becomes an error
    /// (`VadError::Disposed`) after this call. Idempotent: a second `dispose`
    /// call is a no-op.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if self.status() != HandlerStatus::Idle {
            let _ = self.stop_internal();
        }
        *self.channels.lock() = Arc::new(EventChannels::new());
    }

    /// Reconfigure mid-life (§4.1): any field difference tears down and
    /// rebuilds the iterator and frame assembler; the model is reloaded only
    /// if `model` (the version) actually changed. A config identical to the
    /// current one is a no-op.
    pub fn reconfigure(&self, mut new_config: VadConfig) -> Result<()> {
        self.check_not_disposed()?;
        new_config.apply_model_version_defaults();
        new_config.validate()?;

        let mut current = self.config.lock();
        if *current == new_config {
            return Ok(());
        }

        let model_changed = current.model != new_config.model;
        *current = new_config.clone();
        drop(current);

        if self.status() != HandlerStatus::Idle {
            if let Some(core) = self.core.lock().as_mut() {
                if model_changed {
                    core.reload_model(&new_config)?;
                }
                core.assembler = FrameAssembler::new(new_config.frame_samples);
                core.iterator = VadIterator::new(&new_config);
            }
        }
        Ok(())
    }
}
