//! Integration tests driving [`VadHandler`] end-to-end: real frame assembly
//! and the real `VadIterator` state machine, with a scripted probability
//! sequence standing in for the ONNX-backed `SileroModel`.
//!
//! The probability-sequence scenarios are covered as unit tests against
//! `VadIterator` directly (`src/iterator/mod.rs`); these tests instead cover
//! the handler-level behaviors that need the full pipeline: model-version
//! reconfiguration and force-end on pause.

use std::collections::VecDeque;

use silero_vad::{Frame, HandlerStatus, ModelRunner, ModelVersion, VadConfig, VadError, VadHandler};

/// Returns a fixed probability per call, in order; repeats the last value
/// once the scripted sequence is exhausted.
struct ScriptedModel {
    probs: VecDeque<f32>,
    last: f32,
}

impl ScriptedModel {
    fn new(probs: Vec<f32>) -> Self {
        let last = probs.first().copied().unwrap_or(0.0);
        Self {
            probs: probs.into(),
            last,
        }
    }
}

impl ModelRunner for ScriptedModel {
    fn evaluate(&mut self, _frame: &Frame) -> Result<f32, VadError> {
        let p = self.probs.pop_front().unwrap_or(self.last);
        self.last = p;
        Ok(p)
    }

    fn reset(&mut self) {}
}

fn tiny_frame_bytes(frame_samples: usize) -> Vec<u8> {
    vec![0u8; frame_samples * 2]
}

#[test]
fn reconfiguration_mid_life_applies_v5_defaults_over_v4_caller_values() {
    let handler = VadHandler::new(VadConfig::default()).expect("valid default config");
    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.1])))
        .expect("start with v4 defaults");

    let first = handler.config();
    assert_eq!(first.frame_samples, 1536);
    assert_eq!(first.redemption_frames, 8);
    assert_eq!(first.min_speech_frames, 3);

    handler.stop().expect("stop");

    // Caller passes the same struct back (its v4-default field values),
    // only flipping `model` to v5 — untouched fields must be remapped to
    // the v5 equivalents.
    handler
        .reconfigure(VadConfig {
            model: ModelVersion::V5,
            ..VadConfig::default()
        })
        .expect("reconfigure to v5");

    let second = handler.config();
    assert_eq!(second.frame_samples, 512);
    assert_eq!(second.redemption_frames, 24);
    assert_eq!(second.min_speech_frames, 9);
    assert_eq!(second.pre_speech_pad_frames, 3);
    assert_eq!(second.end_speech_pad_frames, 3);

    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.1])))
        .expect("start with remapped v5 config");
    handler.stop().expect("stop");
}

#[test]
fn explicit_non_default_values_survive_v5_remap() {
    let handler = VadHandler::new(VadConfig::default()).expect("valid default config");
    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.1])))
        .unwrap();
    handler.stop().unwrap();

    handler
        .reconfigure(VadConfig {
            model: ModelVersion::V5,
            min_speech_frames: 5, // explicit override, not the v4 default of 3
            ..VadConfig::default()
        })
        .unwrap();

    assert_eq!(handler.config().min_speech_frames, 5);
}

#[test]
fn force_end_on_pause_emits_speech_end_despite_insufficient_min_speech_frames() {
    let config = VadConfig {
        frame_samples: 2,
        positive_speech_threshold: 0.5,
        negative_speech_threshold: 0.35,
        redemption_frames: 8,
        pre_speech_pad_frames: 0,
        min_speech_frames: 10, // deliberately unreachable with one frame
        end_speech_pad_frames: 1,
        num_frames_to_emit: 0,
        submit_user_speech_on_pause: true,
        ..VadConfig::default()
    };
    let handler = VadHandler::new(config).expect("valid config");

    let mut speech_start_rx = handler.subscribe_speech_start();
    let mut speech_end_rx = handler.subscribe_speech_end();
    let mut misfire_rx = handler.subscribe_misfire();

    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.9])))
        .expect("start");

    handler
        .feed(&tiny_frame_bytes(2))
        .expect("feed one frame above the positive threshold");

    assert!(speech_start_rx.try_recv().is_ok(), "expected speechStart");
    assert!(
        speech_end_rx.try_recv().is_err(),
        "speechEnd must not have fired yet"
    );

    handler.pause().expect("pause forces utterance end");

    assert!(
        speech_end_rx.try_recv().is_ok(),
        "pause with submit_user_speech_on_pause must force a speechEnd"
    );
    assert!(
        misfire_rx.try_recv().is_err(),
        "force-end bypasses the min_speech_frames gate: no misfire"
    );

    handler.stop().expect("stop");
}

#[test]
fn dispose_closes_channels_and_rejects_further_calls() {
    let handler = VadHandler::new(VadConfig::default()).expect("valid default config");
    let mut speech_start_rx = handler.subscribe_speech_start();

    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.1])))
        .expect("start");
    assert_eq!(handler.status(), HandlerStatus::Listening);

    handler.dispose();
    assert_eq!(handler.status(), HandlerStatus::Idle);

    assert!(matches!(
        speech_start_rx.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Closed)
    ));

    assert!(matches!(handler.start_external(), Err(VadError::Disposed)));
    assert!(matches!(handler.pause(), Err(VadError::Disposed)));
    assert!(matches!(handler.resume(), Err(VadError::Disposed)));
    assert!(matches!(handler.stop(), Err(VadError::Disposed)));
    assert!(matches!(handler.feed(&[0, 0]), Err(VadError::Disposed)));
    assert!(matches!(
        handler.reconfigure(VadConfig::default()),
        Err(VadError::Disposed)
    ));

    // Idempotent: a second dispose is a no-op, not a panic.
    handler.dispose();
}

#[test]
fn dispose_force_ends_an_active_utterance_before_closing() {
    let config = VadConfig {
        frame_samples: 2,
        positive_speech_threshold: 0.5,
        negative_speech_threshold: 0.35,
        redemption_frames: 8,
        pre_speech_pad_frames: 0,
        min_speech_frames: 1,
        end_speech_pad_frames: 0,
        num_frames_to_emit: 0,
        submit_user_speech_on_pause: true,
        ..VadConfig::default()
    };
    let handler = VadHandler::new(config).expect("valid config");
    let mut speech_end_rx = handler.subscribe_speech_end();

    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.9])))
        .expect("start");
    handler
        .feed(&tiny_frame_bytes(2))
        .expect("feed one frame above the positive threshold");
    assert!(speech_end_rx.try_recv().is_err());

    handler.dispose();

    assert!(speech_end_rx.try_recv().is_ok());
}

#[test]
fn dispose_without_submit_on_pause_resets_silently() {
    let config = VadConfig {
        frame_samples: 2,
        positive_speech_threshold: 0.5,
        negative_speech_threshold: 0.35,
        redemption_frames: 8,
        pre_speech_pad_frames: 0,
        min_speech_frames: 1,
        end_speech_pad_frames: 0,
        num_frames_to_emit: 0,
        submit_user_speech_on_pause: false,
        ..VadConfig::default()
    };
    let handler = VadHandler::new(config).expect("valid config");
    let mut speech_end_rx = handler.subscribe_speech_end();

    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.9])))
        .expect("start");
    handler
        .feed(&tiny_frame_bytes(2))
        .expect("feed one frame above the positive threshold");

    handler.dispose();

    // Without submit_user_speech_on_pause, dispose resets the active
    // utterance silently (§4.3) rather than force-ending it.
    assert!(matches!(
        speech_end_rx.try_recv(),
        Err(tokio::sync::broadcast::error::TryRecvError::Closed)
    ));
}

#[test]
fn stop_force_ends_when_submit_user_speech_on_pause_is_set() {
    let config = VadConfig {
        frame_samples: 2,
        positive_speech_threshold: 0.5,
        negative_speech_threshold: 0.35,
        redemption_frames: 8,
        pre_speech_pad_frames: 0,
        min_speech_frames: 10, // deliberately unreachable with one frame
        end_speech_pad_frames: 1,
        num_frames_to_emit: 0,
        submit_user_speech_on_pause: true,
        ..VadConfig::default()
    };
    let handler = VadHandler::new(config).expect("valid config");
    let mut speech_end_rx = handler.subscribe_speech_end();
    let mut misfire_rx = handler.subscribe_misfire();

    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.9])))
        .expect("start");
    handler
        .feed(&tiny_frame_bytes(2))
        .expect("feed one frame above the positive threshold");

    handler.stop().expect("stop forces utterance end");

    assert!(
        speech_end_rx.try_recv().is_ok(),
        "stop with submit_user_speech_on_pause must force a speechEnd"
    );
    assert!(
        misfire_rx.try_recv().is_err(),
        "force-end bypasses the min_speech_frames gate: no misfire"
    );
}

#[test]
fn stop_without_submit_on_pause_resets_silently() {
    let config = VadConfig {
        frame_samples: 2,
        positive_speech_threshold: 0.5,
        negative_speech_threshold: 0.35,
        redemption_frames: 8,
        pre_speech_pad_frames: 0,
        min_speech_frames: 10, // deliberately unreachable with one frame
        end_speech_pad_frames: 1,
        num_frames_to_emit: 0,
        submit_user_speech_on_pause: false,
        ..VadConfig::default()
    };
    let handler = VadHandler::new(config).expect("valid config");
    let mut speech_end_rx = handler.subscribe_speech_end();
    let mut misfire_rx = handler.subscribe_misfire();

    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.9])))
        .expect("start");
    handler
        .feed(&tiny_frame_bytes(2))
        .expect("feed one frame above the positive threshold");

    handler.stop().expect("stop resets silently by default");

    // §4.3: the default path is a bare reset, no speechEnd and no misfire.
    assert!(speech_end_rx.try_recv().is_err());
    assert!(misfire_rx.try_recv().is_err());
}

#[test]
fn paused_audio_is_dropped_and_not_reprocessed_on_resume() {
    let config = VadConfig {
        frame_samples: 2,
        ..VadConfig::default()
    };
    let handler = VadHandler::new(config).expect("valid config");
    let mut frame_rx = handler.subscribe_frame_processed();

    handler
        .start_external_with_model(Box::new(ScriptedModel::new(vec![0.1, 0.1, 0.1])))
        .expect("start");

    handler.pause().expect("pause");
    handler
        .feed(&tiny_frame_bytes(2))
        .expect("feed while paused is accepted but dropped");
    assert!(
        frame_rx.try_recv().is_err(),
        "no frameProcessed while paused"
    );

    handler.resume().expect("resume");
    handler
        .feed(&tiny_frame_bytes(2))
        .expect("feed after resume");
    assert!(
        frame_rx.try_recv().is_ok(),
        "frameProcessed expected once resumed; paused bytes are not replayed"
    );

    handler.stop().expect("stop");
}
