//! The Silero model runner (§4.5).
//!
//! Loads a v4 (LSTM, separate `h`/`c`) or v5 (GRU, unified `state`) Silero
//! VAD ONNX model, holds the recurrent state tensors between `evaluate`
//! calls, and exposes a single `probability ∈ [0, 1]` per frame.
//!
//! Resolves I/O tensor names (`resolve_name`) so the runner tolerates minor
//! export naming differences across Silero releases, and constructs either
//! the v4 or the v5 tensor layout on demand from
//! [`crate::config::ModelVersion`] instead of auto-detecting it from the
//! loaded graph.

mod session;

use std::path::{Path, PathBuf};

use ndarray::{Array1, Array2, Array3};
use ort::session::{Session, SessionInputValue};
use ort::value::Value;
use tracing::info;

use crate::config::ModelVersion;
use crate::error::{Result, VadError};
use crate::events::Frame;

/// v4 LSTM state size: 2 layers × 1 batch × 64 units, each of `h` and `c`.
const LSTM_UNITS: usize = 64;
/// v5 GRU state size: 2 layers × 1 batch × 128 units, one tensor.
const GRU_UNITS: usize = 128;

/// The abstract model runner contract: `evaluate(frame) -> probability`,
/// with recurrent state held across calls and reset independently of it.
///
/// [`PipelineCore`](crate::handler::pipeline::PipelineCore) holds a
/// `Box<dyn ModelRunner>` rather than a concrete `SileroModel` precisely so
/// the state machine's own boundary (frame assembly → probability →
/// `VadIterator`) can be exercised end to end with a scripted fake.
pub trait ModelRunner: Send {
    /// Evaluate one frame; returns the speech probability in `[0, 1]`.
    /// Must not mutate recurrent state unless the evaluation succeeds (§7).
    fn evaluate(&mut self, frame: &Frame) -> Result<f32>;

    /// Zero the recurrent state (§4.5 `reset()`).
    fn reset(&mut self);
}

impl ModelRunner for SileroModel {
    fn evaluate(&mut self, frame: &Frame) -> Result<f32> {
        SileroModel::evaluate(self, frame)
    }

    fn reset(&mut self) {
        SileroModel::reset(self)
    }
}

enum RunnerState {
    Lstm { h: Vec<f32>, c: Vec<f32> },
    Gru { state: Vec<f32> },
}

/// Stateful Silero VAD ONNX runner.
pub struct SileroModel {
    session: Session,
    version: ModelVersion,
    input_name: String,
    sr_name: Option<String>,
    output_name: String,
    h_name: Option<String>,
    c_name: Option<String>,
    hn_name: Option<String>,
    cn_name: Option<String>,
    state_name: Option<String>,
    state_out_name: Option<String>,
    state: RunnerState,
}

impl SileroModel {
    /// Load the Silero VAD ONNX model for `version` from `base_asset_path`
    /// (or [`default_models_dir`] when `None`), per the `<base>/silero_vad_v4.onnx`
    /// / `<base>/silero_vad_v5.onnx` convention of §6.
    pub fn load(version: ModelVersion, base_asset_path: Option<&Path>) -> Result<Self> {
        let dir = base_asset_path
            .map(Path::to_path_buf)
            .unwrap_or_else(default_models_dir);
        let filename = match version {
            ModelVersion::V4 => "silero_vad_v4.onnx",
            ModelVersion::V5 => "silero_vad_v5.onnx",
        };
        let path = dir.join(filename);

        info!(?path, ?version, "loading Silero VAD model");
        let session = session::create_session(&path)?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();
        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        let input_name = resolve_name(&input_names, &["input", "audio", "x"])
            .or_else(|| input_names.first().cloned())
            .ok_or_else(|| VadError::ModelLoadFailure("Silero model has no inputs".into()))?;
        let sr_name = resolve_name(&input_names, &["sr", "sample_rate"]);
        let output_name = resolve_name(&output_names, &["output", "speech_prob", "prob"])
            .or_else(|| output_names.first().cloned())
            .ok_or_else(|| VadError::ModelLoadFailure("Silero model has no outputs".into()))?;

        let (h_name, c_name, hn_name, cn_name, state_name, state_out_name, state) = match version {
            ModelVersion::V4 => {
                let h_name = resolve_name(&input_names, &["h", "state_h"]);
                let c_name = resolve_name(&input_names, &["c", "state_c"]);
                let hn_name = resolve_name(&output_names, &["hn", "state_hn", "h_out"]);
                let cn_name = resolve_name(&output_names, &["cn", "state_cn", "c_out"]);
                if h_name.is_none() || c_name.is_none() {
                    return Err(VadError::ModelLoadFailure(
                        "v4 model missing h/c state inputs".into(),
                    ));
                }
                (
                    h_name,
                    c_name,
                    hn_name,
                    cn_name,
                    None,
                    None,
                    RunnerState::Lstm {
                        h: vec![0.0; 2 * LSTM_UNITS],
                        c: vec![0.0; 2 * LSTM_UNITS],
                    },
                )
            }
            ModelVersion::V5 => {
                let state_name = resolve_name(&input_names, &["state", "h_0", "hidden"]);
                let state_out_name =
                    resolve_name(&output_names, &["stateN", "state_out", "h_0_out", "hn_out"]);
                if state_name.is_none() {
                    return Err(VadError::ModelLoadFailure(
                        "v5 model missing combined state input".into(),
                    ));
                }
                (
                    None,
                    None,
                    None,
                    None,
                    state_name,
                    state_out_name,
                    RunnerState::Gru {
                        state: vec![0.0; 2 * GRU_UNITS],
                    },
                )
            }
        };

        info!("Silero model ready");

        Ok(Self {
            session,
            version,
            input_name,
            sr_name,
            output_name,
            h_name,
            c_name,
            hn_name,
            cn_name,
            state_name,
            state_out_name,
            state,
        })
    }

    /// Evaluate one frame; returns the speech probability in `[0, 1]`.
    ///
    /// # Errors
    /// `VadError::InferenceFailure` if the ONNX run or tensor extraction
    /// fails. The caller (`VadIterator`) is expected to skip the offending
    /// frame and leave recurrent state unchanged (§7) — this method does not
    /// mutate `self.state` unless the run succeeds.
    pub fn evaluate(&mut self, frame: &Frame) -> Result<f32> {
        let window = frame.samples();
        let input_arr = Array2::<f32>::from_shape_vec((1, window.len()), window.to_vec())
            .map_err(|e| VadError::InferenceFailure(e.to_string()))?;
        let input_val =
            Value::from_array(input_arr).map_err(|e: ort::Error| VadError::InferenceFailure(e.to_string()))?;

        let mut inputs: Vec<(String, SessionInputValue<'_>)> =
            vec![(self.input_name.clone(), input_val.into())];

        if let Some(sr_name) = &self.sr_name {
            let sr_arr = Array1::<i64>::from_elem(1, 16_000i64);
            let sr_val =
                Value::from_array(sr_arr).map_err(|e: ort::Error| VadError::InferenceFailure(e.to_string()))?;
            inputs.push((sr_name.clone(), sr_val.into()));
        }

        match &self.state {
            RunnerState::Lstm { h, c } => {
                let h_arr = Array3::<f32>::from_shape_vec((2, 1, LSTM_UNITS), h.clone())
                    .map_err(|e| VadError::InferenceFailure(e.to_string()))?;
                let c_arr = Array3::<f32>::from_shape_vec((2, 1, LSTM_UNITS), c.clone())
                    .map_err(|e| VadError::InferenceFailure(e.to_string()))?;
                let h_val =
                    Value::from_array(h_arr).map_err(|e: ort::Error| VadError::InferenceFailure(e.to_string()))?;
                let c_val =
                    Value::from_array(c_arr).map_err(|e: ort::Error| VadError::InferenceFailure(e.to_string()))?;
                inputs.push((self.h_name.clone().unwrap(), h_val.into()));
                inputs.push((self.c_name.clone().unwrap(), c_val.into()));
            }
            RunnerState::Gru { state } => {
                let state_arr = Array3::<f32>::from_shape_vec((2, 1, GRU_UNITS), state.clone())
                    .map_err(|e| VadError::InferenceFailure(e.to_string()))?;
                let state_val = Value::from_array(state_arr)
                    .map_err(|e: ort::Error| VadError::InferenceFailure(e.to_string()))?;
                inputs.push((self.state_name.clone().unwrap(), state_val.into()));
            }
        }

        let outputs = self
            .session
            .run(inputs)
            .map_err(|e| VadError::InferenceFailure(e.to_string()))?;

        let prob_output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| VadError::InferenceFailure("missing output tensor".into()))?;
        let (_, prob_data) = prob_output
            .try_extract_tensor::<f32>()
            .map_err(|e| VadError::InferenceFailure(e.to_string()))?;
        let prob = prob_data
            .first()
            .copied()
            .ok_or_else(|| VadError::InferenceFailure("empty probability tensor".into()))?;

        match &mut self.state {
            RunnerState::Lstm { h, c } => {
                let hn_name = self
                    .hn_name
                    .as_ref()
                    .ok_or_else(|| VadError::InferenceFailure("missing hn output name".into()))?;
                let cn_name = self
                    .cn_name
                    .as_ref()
                    .ok_or_else(|| VadError::InferenceFailure("missing cn output name".into()))?;
                let hn_out = outputs
                    .get(hn_name.as_str())
                    .ok_or_else(|| VadError::InferenceFailure("missing hn output tensor".into()))?;
                let cn_out = outputs
                    .get(cn_name.as_str())
                    .ok_or_else(|| VadError::InferenceFailure("missing cn output tensor".into()))?;
                let (_, hn_data) = hn_out
                    .try_extract_tensor::<f32>()
                    .map_err(|e| VadError::InferenceFailure(e.to_string()))?;
                let (_, cn_data) = cn_out
                    .try_extract_tensor::<f32>()
                    .map_err(|e| VadError::InferenceFailure(e.to_string()))?;
                *h = hn_data.to_vec();
                *c = cn_data.to_vec();
            }
            RunnerState::Gru { state } => {
                let state_out_name = self.state_out_name.as_ref().ok_or_else(|| {
                    VadError::InferenceFailure("missing state output name".into())
                })?;
                let state_out = outputs.get(state_out_name.as_str()).ok_or_else(|| {
                    VadError::InferenceFailure("missing state output tensor".into())
                })?;
                let (_, state_data) = state_out
                    .try_extract_tensor::<f32>()
                    .map_err(|e| VadError::InferenceFailure(e.to_string()))?;
                *state = state_data.to_vec();
            }
        }

        Ok(prob.clamp(0.0, 1.0))
    }

    /// Zero the recurrent state (§4.5 `reset()`).
    pub fn reset(&mut self) {
        match &mut self.state {
            RunnerState::Lstm { h, c } => {
                h.iter_mut().for_each(|v| *v = 0.0);
                c.iter_mut().for_each(|v| *v = 0.0);
            }
            RunnerState::Gru { state } => {
                state.iter_mut().for_each(|v| *v = 0.0);
            }
        }
    }

    pub fn version(&self) -> ModelVersion {
        self.version
    }
}

fn resolve_name(candidates: &[String], preferred: &[&str]) -> Option<String> {
    preferred.iter().find_map(|needle| {
        candidates
            .iter()
            .find(|name| name.eq_ignore_ascii_case(needle))
            .cloned()
    })
}

/// Default platform-specific directory for Silero model assets, following
/// the platform's XDG / `%APPDATA%` convention.
pub fn default_models_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(|p| PathBuf::from(p).join("Lattice Labs").join("silero-vad").join("models"))
            .unwrap_or_else(|| PathBuf::from("models"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("silero-vad")
            .join("models")
    }
}
