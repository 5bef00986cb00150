use thiserror::Error;

/// All errors produced by the VAD engine.
#[derive(Debug, Error)]
pub enum VadError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("audio capture failure: {0}")]
    CaptureFailure(String),

    #[error("model load failure: {0}")]
    ModelLoadFailure(String),

    #[error("inference failure: {0}")]
    InferenceFailure(String),

    #[error("invalid VAD configuration: {0}")]
    ConfigInvalid(String),

    #[error("ring buffer is full — pipeline cannot keep up")]
    RingBufferFull,

    #[error("handler is already listening")]
    AlreadyRunning,

    #[error("handler is not listening")]
    NotRunning,

    #[error("handler has been disposed")]
    Disposed,

    #[error("model file not found: {path}")]
    ModelNotFound { path: std::path::PathBuf },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, VadError>;
