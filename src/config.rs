//! Session configuration for the VAD engine.
//!
//! `VadConfig` is immutable for the lifetime of one [`crate::iterator::VadIterator`]
//! session (see module docs there). [`VadHandler`](crate::handler::VadHandler)
//! compares configs field-by-field across `start()` calls to decide whether the
//! iterator must be rebuilt.

use crate::error::{Result, VadError};

/// Which Silero VAD model generation to run.
///
/// The two generations have different recurrent-state shapes (§4.5): v4 is a
/// two-tensor LSTM (`h`, `c`), v5 is a single combined GRU state tensor. A
/// change of `model` always invalidates recurrent state — see
/// [`VadConfig::apply_model_version_defaults`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelVersion {
    V4,
    V5,
}

impl Default for ModelVersion {
    fn default() -> Self {
        ModelVersion::V4
    }
}

/// Immutable per-session VAD configuration.
///
/// Defaults match the Silero v4 reference configuration. Constructing with
/// `model: ModelVersion::V5` and otherwise-default fields should go through
/// [`VadConfig::apply_model_version_defaults`] (done automatically by
/// `VadHandler::start`) so the v5-appropriate defaults are substituted.
#[derive(Debug, Clone, PartialEq)]
pub struct VadConfig {
    /// Fixed at 16000 Hz; kept as a field for self-documentation and to
    /// detect accidental misconfiguration rather than hard-coding it in
    /// every call site.
    pub sample_rate: u32,
    /// Model input frame width in samples. v4 recommends 512/1024/1536; v5
    /// is only validated at 512.
    pub frame_samples: usize,
    /// Probability at/above which a frame counts as speech.
    pub positive_speech_threshold: f32,
    /// Probability below which a frame counts toward redemption. Must be
    /// strictly less than `positive_speech_threshold`.
    pub negative_speech_threshold: f32,
    /// Consecutive sub-negative frames after speech-start that end the
    /// utterance.
    pub redemption_frames: u32,
    /// Capacity of the rolling pre-speech ring, in frames.
    pub pre_speech_pad_frames: u32,
    /// Frames of positive evidence required to validate an utterance.
    pub min_speech_frames: u32,
    /// Of the redemption tail, how many leading frames are appended to the
    /// emitted utterance.
    pub end_speech_pad_frames: u32,
    /// Frame count between intermediate chunk emissions. `0` disables
    /// intermediate emission (only the final chunk is emitted).
    pub num_frames_to_emit: u32,
    /// Which Silero model generation to load.
    pub model: ModelVersion,
    /// If set, force-end any active utterance on pause/stop (§4.3
    /// `forceEndSpeech`).
    pub submit_user_speech_on_pause: bool,
    /// Directory containing `silero_vad_v4.onnx` / `silero_vad_v5.onnx`.
    /// `None` falls back to [`crate::model::default_models_dir`].
    pub base_asset_path: Option<std::path::PathBuf>,
}

/// v4 reference defaults.
const V4_PRE_SPEECH_PAD_FRAMES: u32 = 1;
const V4_REDEMPTION_FRAMES: u32 = 8;
const V4_FRAME_SAMPLES: usize = 1536;
const V4_MIN_SPEECH_FRAMES: u32 = 3;
const V4_END_SPEECH_PAD_FRAMES: u32 = 1;

/// v5 remaps, applied when these fields are still at their v4 default (§4.1).
const V5_PRE_SPEECH_PAD_FRAMES: u32 = 3;
const V5_REDEMPTION_FRAMES: u32 = 24;
const V5_FRAME_SAMPLES: usize = 512;
const V5_MIN_SPEECH_FRAMES: u32 = 9;
const V5_END_SPEECH_PAD_FRAMES: u32 = 3;

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            frame_samples: V4_FRAME_SAMPLES,
            positive_speech_threshold: 0.5,
            negative_speech_threshold: 0.35,
            redemption_frames: V4_REDEMPTION_FRAMES,
            pre_speech_pad_frames: V4_PRE_SPEECH_PAD_FRAMES,
            min_speech_frames: V4_MIN_SPEECH_FRAMES,
            end_speech_pad_frames: V4_END_SPEECH_PAD_FRAMES,
            num_frames_to_emit: 0,
            model: ModelVersion::V4,
            submit_user_speech_on_pause: false,
            base_asset_path: None,
        }
    }
}

impl VadConfig {
    /// Remap fields still holding their v4 default to the v5 equivalent.
    /// Explicit non-default values are left untouched.
    ///
    /// Called by `VadHandler::start` before every iterator (re)construction;
    /// idempotent and a no-op for `ModelVersion::V4`.
    pub fn apply_model_version_defaults(&mut self) {
        if self.model != ModelVersion::V5 {
            return;
        }
        if self.pre_speech_pad_frames == V4_PRE_SPEECH_PAD_FRAMES {
            self.pre_speech_pad_frames = V5_PRE_SPEECH_PAD_FRAMES;
        }
        if self.redemption_frames == V4_REDEMPTION_FRAMES {
            self.redemption_frames = V5_REDEMPTION_FRAMES;
        }
        if self.frame_samples == V4_FRAME_SAMPLES {
            self.frame_samples = V5_FRAME_SAMPLES;
        }
        if self.min_speech_frames == V4_MIN_SPEECH_FRAMES {
            self.min_speech_frames = V5_MIN_SPEECH_FRAMES;
        }
        if self.end_speech_pad_frames == V4_END_SPEECH_PAD_FRAMES {
            self.end_speech_pad_frames = V5_END_SPEECH_PAD_FRAMES;
        }
    }

    /// Validate threshold ordering and non-zero frame sizes.
    ///
    /// # Errors
    /// `VadError::ConfigInvalid` on inverted/equal thresholds, a zero
    /// `frame_samples`, or a zero `min_speech_frames`.
    pub fn validate(&self) -> Result<()> {
        if !(self.positive_speech_threshold > 0.0 && self.positive_speech_threshold < 1.0) {
            return Err(VadError::ConfigInvalid(format!(
                "positive_speech_threshold must be in (0, 1), got {}",
                self.positive_speech_threshold
            )));
        }
        if !(self.negative_speech_threshold > 0.0 && self.negative_speech_threshold < 1.0) {
            return Err(VadError::ConfigInvalid(format!(
                "negative_speech_threshold must be in (0, 1), got {}",
                self.negative_speech_threshold
            )));
        }
        if self.negative_speech_threshold >= self.positive_speech_threshold {
            return Err(VadError::ConfigInvalid(format!(
                "negative_speech_threshold ({}) must be strictly less than positive_speech_threshold ({})",
                self.negative_speech_threshold, self.positive_speech_threshold
            )));
        }
        if self.frame_samples == 0 {
            return Err(VadError::ConfigInvalid(
                "frame_samples must be nonzero".into(),
            ));
        }
        if self.redemption_frames == 0 {
            return Err(VadError::ConfigInvalid(
                "redemption_frames must be at least 1".into(),
            ));
        }
        if self.min_speech_frames == 0 {
            return Err(VadError::ConfigInvalid(
                "min_speech_frames must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
