//! Lock-free byte ring buffer carrying PCM16-LE bytes from the cpal audio
//! callback thread to the blocking pipeline thread.
//!
//! Built on `HeapRb::<u8>::new(RING_CAPACITY).split()`, carrying raw
//! PCM16-LE bytes since capture in this crate hands the core already-encoded
//! bytes rather than native floats.

use ringbuf::{traits::Split, HeapRb};

pub type AudioProducer = ringbuf::HeapProd<u8>;
pub type AudioConsumer = ringbuf::HeapCons<u8>;

/// ~8 seconds of 16kHz mono PCM16 audio; generous enough that a brief stall
/// in the pipeline thread doesn't drop capture.
pub const RING_CAPACITY: usize = 16_000 * 2 * 8;

pub fn new_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<u8>::new(RING_CAPACITY).split()
}
