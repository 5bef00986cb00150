//! ONNX session construction for the Silero runner.
//!
//! A small number of env-var overrides control thread counts and execution
//! provider selection: `DirectML` is tried first on Windows with silent
//! fallback to CPU, and exactly-CPU everywhere else.

use std::path::Path;

use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::{ep, session::Session};
use tracing::{info, warn};

use crate::error::{Result, VadError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OrtExecutionPreference {
    Auto,
    Cpu,
    DirectML,
}

fn ort_execution_preference() -> OrtExecutionPreference {
    match std::env::var("SILERO_VAD_ORT_EP")
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
        .as_str()
    {
        "cpu" => OrtExecutionPreference::Cpu,
        "dml" | "directml" => OrtExecutionPreference::DirectML,
        _ => OrtExecutionPreference::Auto,
    }
}

/// Build an ONNX session for `model_path` with intra/inter thread counts
/// clamped to something sane for a single-model, per-frame inference
/// workload (the Silero models are small; heavy parallelism buys nothing and
/// wastes scheduling overhead on short inputs).
pub fn create_session(model_path: &Path) -> Result<Session> {
    if !model_path.exists() {
        return Err(VadError::ModelNotFound {
            path: model_path.to_path_buf(),
        });
    }

    let pref = ort_execution_preference();
    let intra_threads = std::env::var("SILERO_VAD_ORT_INTRA_THREADS")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(1)
        .clamp(1, 8);

    let builder = SessionBuilder::new()
        .map_err(|e| VadError::ModelLoadFailure(e.to_string()))?
        .with_intra_threads(intra_threads)
        .map_err(|e| VadError::ModelLoadFailure(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::All)
        .map_err(|e| VadError::ModelLoadFailure(e.to_string()))?;

    info!(intra_threads, ?pref, "Silero ONNX session threading configured");

    let builder = {
        #[cfg(target_os = "windows")]
        {
            match pref {
                OrtExecutionPreference::Cpu => builder
                    .with_execution_providers([ep::CPU::default().build()])
                    .map_err(|e| VadError::ModelLoadFailure(e.to_string()))?,
                OrtExecutionPreference::DirectML => builder
                    .with_execution_providers([
                        ep::DirectML::default().with_device_id(0).build().error_on_failure(),
                        ep::CPU::default().build(),
                    ])
                    .map_err(|e| VadError::ModelLoadFailure(e.to_string()))?,
                OrtExecutionPreference::Auto => builder
                    .with_execution_providers([
                        ep::DirectML::default().with_device_id(0).build().fail_silently(),
                        ep::CPU::default().build(),
                    ])
                    .map_err(|e| VadError::ModelLoadFailure(e.to_string()))?,
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if pref == OrtExecutionPreference::DirectML {
                warn!("SILERO_VAD_ORT_EP=directml requested on non-Windows host; using CPU EP");
            }
            builder
                .with_execution_providers([ep::CPU::default().build()])
                .map_err(|e| VadError::ModelLoadFailure(e.to_string()))?
        }
    };

    builder
        .commit_from_file(model_path)
        .map_err(|e| VadError::ModelLoadFailure(e.to_string()))
}
