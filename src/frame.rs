//! Frame assembler — PCM16-LE byte stream → fixed-width float frames (§4.2).
//!
//! A small typed buffer passed between pipeline stages, consuming raw
//! bytes instead of already-decoded samples, since audio capture in this
//! crate (§6) hands the core PCM16-LE bytes rather than native floats.

use crate::events::Frame;

/// Accumulates PCM16-LE bytes into `frame_samples`-wide float frames
/// normalized to `[-1.0, 1.0]`.
///
/// Odd trailing bytes (a half sample) are retained across calls, as are any
/// samples beyond the last complete frame boundary.
pub struct FrameAssembler {
    frame_samples: usize,
    pending_byte: Option<u8>,
    pending_samples: Vec<f32>,
}

impl FrameAssembler {
    pub fn new(frame_samples: usize) -> Self {
        Self {
            frame_samples,
            pending_byte: None,
            pending_samples: Vec::with_capacity(frame_samples * 2),
        }
    }

    /// Feed a batch of raw PCM16-LE bytes; returns zero or more complete
    /// frames extracted in order.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut iter = bytes.iter().copied();

        if let Some(lo) = self.pending_byte.take() {
            if let Some(hi) = iter.next() {
                self.pending_samples.push(decode_sample(lo, hi));
            } else {
                // Still only half a sample total; keep waiting.
                self.pending_byte = Some(lo);
            }
        }

        loop {
            let lo = match iter.next() {
                Some(b) => b,
                None => break,
            };
            match iter.next() {
                Some(hi) => self.pending_samples.push(decode_sample(lo, hi)),
                None => {
                    self.pending_byte = Some(lo);
                    break;
                }
            }
        }

        let mut frames = Vec::new();
        while self.pending_samples.len() >= self.frame_samples {
            let tail = self.pending_samples.split_off(self.frame_samples);
            let frame_samples = std::mem::replace(&mut self.pending_samples, tail);
            frames.push(Frame(frame_samples));
        }
        frames
    }
}

fn decode_sample(lo: u8, hi: u8) -> f32 {
    i16::from_le_bytes([lo, hi]) as f32 / 32768.0
}
