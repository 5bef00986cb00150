//! # silero-vad
//!
//! Streaming Voice Activity Detection engine around a Silero recurrent
//! ONNX model.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Pipeline(std::thread)
//!                                                    │
//!                                          FrameAssembler (PCM16 → frames)
//!                                                    │
//!                                        SileroModel::evaluate (probability)
//!                                                    │
//!                                      VadIterator (hysteresis + redemption)
//!                                                    │
//!                                broadcast::Sender<{speech_start, chunk, …}>
//! ```
//!
//! [`handler::VadHandler`] is the public coordinator: it owns the capture
//! device (or an external PCM feed), the [`model::SileroModel`], and the
//! [`iterator::VadIterator`] state machine, and fans lifecycle events out
//! onto seven broadcast channels.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod handler;
pub mod iterator;
pub mod model;

// Convenience re-exports for downstream crates
pub use config::{ModelVersion, VadConfig};
pub use error::VadError;
pub use events::{ChunkEvent, ErrorEvent, Frame, FrameProcessedEvent, SpeechEndEvent};
pub use handler::{HandlerStatus, VadHandler};
pub use iterator::{IteratorEvent, VadIterator};
pub use model::{ModelRunner, SileroModel};
