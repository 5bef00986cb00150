//! Event types broadcast by [`crate::handler::VadHandler`].
//!
//! One `tokio::sync::broadcast` channel per named event stream, rather than
//! a single tagged enum. Subscribers pick only the streams they care about,
//! and a slow/absent subscriber on one channel never backpressures another.

use serde::{Deserialize, Serialize};

/// One assembled model-input frame, carried on `frame_processed` and used
/// internally between the frame assembler and the iterator.
#[derive(Debug, Clone)]
pub struct Frame(pub Vec<f32>);

impl Frame {
    pub fn samples(&self) -> &[f32] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Emitted on `frame_processed` for every frame the model evaluates,
/// independent of any state-machine transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameProcessedEvent {
    /// Model's raw speech probability for this frame.
    pub is_speech: f32,
    /// `1.0 - is_speech`, precomputed for convenience (§4.3 step 2).
    pub not_speech: f32,
}

/// Emitted on `speech_end`: the complete captured utterance.
#[derive(Debug, Clone)]
pub struct SpeechEndEvent {
    /// Concatenated float samples: pre-speech pad + speech + end pad.
    pub samples: Vec<f32>,
}

/// Emitted on `chunk`: one PCM16-LE packaged slice of the active utterance.
#[derive(Debug, Clone)]
pub struct ChunkEvent {
    /// PCM16 little-endian bytes.
    pub bytes: Vec<u8>,
    /// `true` only for the terminal chunk of an utterance.
    pub is_final: bool,
}

/// Emitted on `error`: a human-readable description of a non-fatal failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
}

/// Capacity of each broadcast channel: bounded so a wedged subscriber can't
/// grow memory unboundedly, generous enough that short subscriber stalls
/// don't lag/drop under normal load.
pub const BROADCAST_CAP: usize = 256;

/// The seven output channels from §4.1, bundled so `VadHandler` can hand out
/// and hold senders/receivers together.
pub struct EventChannels {
    pub speech_start: tokio::sync::broadcast::Sender<()>,
    pub real_speech_start: tokio::sync::broadcast::Sender<()>,
    pub speech_end: tokio::sync::broadcast::Sender<SpeechEndEvent>,
    pub frame_processed: tokio::sync::broadcast::Sender<FrameProcessedEvent>,
    pub misfire: tokio::sync::broadcast::Sender<()>,
    pub chunk: tokio::sync::broadcast::Sender<ChunkEvent>,
    pub error: tokio::sync::broadcast::Sender<ErrorEvent>,
}

impl EventChannels {
    pub fn new() -> Self {
        Self {
            speech_start: tokio::sync::broadcast::channel(BROADCAST_CAP).0,
            real_speech_start: tokio::sync::broadcast::channel(BROADCAST_CAP).0,
            speech_end: tokio::sync::broadcast::channel(BROADCAST_CAP).0,
            frame_processed: tokio::sync::broadcast::channel(BROADCAST_CAP).0,
            misfire: tokio::sync::broadcast::channel(BROADCAST_CAP).0,
            chunk: tokio::sync::broadcast::channel(BROADCAST_CAP).0,
            error: tokio::sync::broadcast::channel(BROADCAST_CAP).0,
        }
    }
}

impl Default for EventChannels {
    fn default() -> Self {
        Self::new()
    }
}

/// Encode float samples in `[-1.0, 1.0]` as PCM16 little-endian bytes,
/// clamping per §4.4: `clamp(round(x*32768), -32768, 32767)`.
pub fn encode_pcm16_le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &x in samples {
        let scaled = (x * 32768.0).round();
        let clamped = scaled.clamp(-32768.0, 32767.0) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_pcm16_round_trips_known_values() {
        let samples = [0.0f32, 1.0, -1.0, 0.5, -0.5];
        let bytes = encode_pcm16_le(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);

        let decoded: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(decoded[0], 0);
        assert_eq!(decoded[1], 32767); // clamped from 32768
        assert_eq!(decoded[2], -32768);
        assert_eq!(decoded[3], 16384);
        assert_eq!(decoded[4], -16384);
    }

    #[test]
    fn encode_pcm16_clamps_out_of_range_input() {
        let bytes = encode_pcm16_le(&[2.0, -2.0]);
        let decoded: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|c| i16::from_le_bytes([c[0], c[1]]))
            .collect();
        assert_eq!(decoded[0], 32767);
        assert_eq!(decoded[1], -32768);
    }
}
