//! The speech state machine (§4.3) plus its pre-speech ring buffer (§4.5)
//! and chunk emitter (§4.4) — the heart of this crate.
//!
//! `VadIterator` is deliberately decoupled from [`crate::model::SileroModel`]:
//! it consumes `(probability, Frame)` pairs and returns a list of
//! [`IteratorEvent`]s. That split is what makes the state machine testable
//! as plain unit tests against scripted probability sequences, with no ONNX
//! runtime involved.

use std::collections::VecDeque;

use crate::config::VadConfig;
use crate::events::{encode_pcm16_le, ChunkEvent, Frame, FrameProcessedEvent, SpeechEndEvent};

/// One output of [`VadIterator::process_frame`] / [`VadIterator::force_end_speech`].
///
/// `VadHandler` fans these out onto the seven broadcast channels of §4.1;
/// tests consume the `Vec<IteratorEvent>` directly.
#[derive(Debug, Clone)]
pub enum IteratorEvent {
    SpeechStart,
    RealSpeechStart,
    SpeechEnd(SpeechEndEvent),
    FrameProcessed(FrameProcessedEvent),
    Misfire,
    Chunk(ChunkEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Speaking,
}

/// Owns all session-mutable state and drives the Idle/Speaking transitions
/// from a stream of `(probability, Frame)` pairs.
pub struct VadIterator {
    positive_speech_threshold: f32,
    negative_speech_threshold: f32,
    redemption_frames: u32,
    pre_speech_pad_frames: u32,
    min_speech_frames: u32,
    end_speech_pad_frames: u32,
    num_frames_to_emit: u32,

    state: State,
    positive_frame_count: u32,
    redemption_counter: u32,
    real_start_emitted: bool,

    pre_buffer: VecDeque<Frame>,
    utterance_buffer: Vec<Frame>,
    /// Frames confirmed to remain in the utterance and not yet flushed as an
    /// intermediate chunk. Frames belonging to an *unresolved* redemption run
    /// live in `end_pad_buffer` instead, until that run resolves — see
    /// module docs in DESIGN.md for why this differs from a literal reading
    /// of §4.3's "append to chunkAccumulator unconditionally" and how it
    /// keeps the §8 chunk/utterance parity invariant intact.
    chunk_accumulator: Vec<Frame>,
    /// Frames observed since the most recent positive→negative transition
    /// that has not yet resolved (by a new positive frame, or by redemption
    /// expiring). Doubles as the staging area for chunk frames in the same
    /// unresolved window.
    end_pad_buffer: Vec<Frame>,
    /// Committed frames queued before `realSpeechStart` has fired. An
    /// utterance that never reaches `min_speech_frames` ends in a misfire
    /// (§4.4: "No chunks are emitted for misfires"), so nothing here may
    /// reach `chunk_accumulator` — and thus no `chunk` event — until
    /// `realSpeechStart` is confirmed. Flushed into `chunk_accumulator` in
    /// one move the instant that happens.
    pending_chunk_frames: Vec<Frame>,
}

impl VadIterator {
    pub fn new(config: &VadConfig) -> Self {
        Self {
            positive_speech_threshold: config.positive_speech_threshold,
            negative_speech_threshold: config.negative_speech_threshold,
            redemption_frames: config.redemption_frames,
            pre_speech_pad_frames: config.pre_speech_pad_frames,
            min_speech_frames: config.min_speech_frames,
            end_speech_pad_frames: config.end_speech_pad_frames,
            num_frames_to_emit: config.num_frames_to_emit,
            state: State::Idle,
            positive_frame_count: 0,
            redemption_counter: 0,
            real_start_emitted: false,
            pre_buffer: VecDeque::new(),
            utterance_buffer: Vec::new(),
            chunk_accumulator: Vec::new(),
            end_pad_buffer: Vec::new(),
            pending_chunk_frames: Vec::new(),
        }
    }

    pub fn is_speaking(&self) -> bool {
        self.state == State::Speaking
    }

    /// Process one model evaluation result. Returns the events produced, in
    /// emission order (§5: transition events before `frameProcessed`).
    pub fn process_frame(&mut self, probability: f32, frame: Frame) -> Vec<IteratorEvent> {
        let mut events = Vec::new();

        match self.state {
            State::Idle => self.process_idle_frame(probability, frame, &mut events),
            State::Speaking => self.process_speaking_frame(probability, frame, &mut events),
        }

        events.push(IteratorEvent::FrameProcessed(FrameProcessedEvent {
            is_speech: probability,
            not_speech: 1.0 - probability,
        }));

        events
    }

    fn process_idle_frame(&mut self, p: f32, frame: Frame, events: &mut Vec<IteratorEvent>) {
        // §4.3 step 1: always push F into preBuffer while Idle, including
        // the frame that turns out to trigger a transition this same step —
        // the transition clause below drains preBuffer (which already holds
        // F as its newest entry when pre_speech_pad_frames ≥ 1) and then
        // separately appends F, per the literal "then append F" wording.
        self.push_pre_buffer(frame.clone());

        if p >= self.positive_speech_threshold {
            let drained: Vec<Frame> = self.pre_buffer.drain(..).collect();
            for pre in drained {
                self.push_committed(pre.clone());
                self.utterance_buffer.push(pre);
            }
            self.push_committed(frame.clone());
            self.utterance_buffer.push(frame);

            self.state = State::Speaking;
            self.positive_frame_count = 1;
            self.redemption_counter = 0;
            self.real_start_emitted = false;
            self.end_pad_buffer.clear();

            events.push(IteratorEvent::SpeechStart);

            if self.positive_frame_count >= self.min_speech_frames {
                self.real_start_emitted = true;
                self.flush_pending_chunk_frames();
                events.push(IteratorEvent::RealSpeechStart);
            }

            self.drain_chunk_accumulator(events);
        }
    }

    fn process_speaking_frame(&mut self, p: f32, frame: Frame, events: &mut Vec<IteratorEvent>) {
        let was_in_redemption = self.redemption_counter > 0;
        self.utterance_buffer.push(frame.clone());

        if p >= self.positive_speech_threshold {
            self.push_committed(frame);
            // Redemption run (if any) recovers: its staged frames remain
            // part of the utterance, so commit them now.
            let recovered: Vec<Frame> = self.end_pad_buffer.drain(..).collect();
            for f in recovered {
                self.push_committed(f);
            }

            self.positive_frame_count += 1;
            self.redemption_counter = 0;

            if !self.real_start_emitted && self.positive_frame_count >= self.min_speech_frames {
                self.real_start_emitted = true;
                self.flush_pending_chunk_frames();
                events.push(IteratorEvent::RealSpeechStart);
            }

            self.drain_chunk_accumulator(events);
        } else if p < self.negative_speech_threshold {
            self.end_pad_buffer.push(frame);
            self.redemption_counter += 1;

            if self.redemption_counter >= self.redemption_frames {
                self.end_of_speech(events);
            }
        } else {
            // Hold: neither resets nor advances redemption.
            if was_in_redemption {
                self.end_pad_buffer.push(frame);
            } else {
                self.push_committed(frame);
                self.drain_chunk_accumulator(events);
            }
        }
    }

    /// Emit `speechEnd`/`misfire` and reset, per §4.3's End-of-speech
    /// procedure. Called once `redemption_counter` reaches `redemption_frames`.
    fn end_of_speech(&mut self, events: &mut Vec<IteratorEvent>) {
        let keep = (self.end_speech_pad_frames as usize).min(self.end_pad_buffer.len());
        let kept_pad: Vec<Frame> = self.end_pad_buffer.drain(..keep).collect();
        self.end_pad_buffer.clear(); // discard the rest of the tail

        debug_assert!(self.utterance_buffer.len() >= self.redemption_frames as usize);
        let trimmed_len = self
            .utterance_buffer
            .len()
            .saturating_sub(self.redemption_frames as usize);
        self.utterance_buffer.truncate(trimmed_len);
        self.utterance_buffer.extend(kept_pad.iter().cloned());

        if self.positive_frame_count >= self.min_speech_frames {
            for f in kept_pad {
                self.chunk_accumulator.push(f);
            }
            events.push(IteratorEvent::SpeechEnd(SpeechEndEvent {
                samples: flatten(&self.utterance_buffer),
            }));
            self.flush_final_chunk(events);
        } else {
            events.push(IteratorEvent::Misfire);
        }

        self.reset_to_idle();
    }

    /// §4.3 `forceEndSpeech`: behave as if redemption just completed, but
    /// without trimming any tail, and bypassing the `minSpeechFrames` gate.
    pub fn force_end_speech(&mut self) -> Vec<IteratorEvent> {
        let mut events = Vec::new();
        if self.state != State::Speaking {
            return events;
        }

        let pending: Vec<Frame> = self.end_pad_buffer.drain(..).collect();
        self.utterance_buffer.extend(pending.iter().cloned());
        self.flush_pending_chunk_frames();
        for f in pending {
            self.chunk_accumulator.push(f);
        }

        events.push(IteratorEvent::SpeechEnd(SpeechEndEvent {
            samples: flatten(&self.utterance_buffer),
        }));
        self.flush_final_chunk(&mut events);
        self.reset_to_idle();
        events
    }

    /// §4.3 `reset`: unconditionally drop all session state, no events.
    pub fn reset(&mut self) {
        self.reset_to_idle();
        self.pre_buffer.clear();
    }

    fn reset_to_idle(&mut self) {
        self.state = State::Idle;
        self.positive_frame_count = 0;
        self.redemption_counter = 0;
        self.real_start_emitted = false;
        self.utterance_buffer.clear();
        self.chunk_accumulator.clear();
        self.end_pad_buffer.clear();
        self.pending_chunk_frames.clear();
    }

    fn push_pre_buffer(&mut self, frame: Frame) {
        if self.pre_speech_pad_frames == 0 {
            return;
        }
        if self.pre_buffer.len() >= self.pre_speech_pad_frames as usize {
            self.pre_buffer.pop_front();
        }
        self.pre_buffer.push_back(frame);
    }

    /// Push a frame that is now guaranteed to remain part of the utterance.
    /// Until `realSpeechStart` has fired the utterance could still misfire,
    /// so the frame is staged in `pending_chunk_frames` rather than handed
    /// to the chunk accumulator directly — see that field's docs. A no-op,
    /// aside from the push, when intermediate/final chunk emission is
    /// disabled.
    fn push_committed(&mut self, frame: Frame) {
        if self.num_frames_to_emit == 0 {
            return;
        }
        if self.real_start_emitted {
            self.chunk_accumulator.push(frame);
        } else {
            self.pending_chunk_frames.push(frame);
        }
    }

    /// Moves all staged pending frames into the chunk accumulator, in order,
    /// the instant `realSpeechStart` fires and the utterance is confirmed
    /// real. Called before `drain_chunk_accumulator` so any newly-eligible
    /// frames are included in the next chunk boundary check.
    fn flush_pending_chunk_frames(&mut self) {
        self.chunk_accumulator.append(&mut self.pending_chunk_frames);
    }

    fn drain_chunk_accumulator(&mut self, events: &mut Vec<IteratorEvent>) {
        if self.num_frames_to_emit == 0 {
            return;
        }
        while self.chunk_accumulator.len() >= self.num_frames_to_emit as usize {
            let tail = self.chunk_accumulator.split_off(self.num_frames_to_emit as usize);
            let ready = std::mem::replace(&mut self.chunk_accumulator, tail);
            events.push(IteratorEvent::Chunk(ChunkEvent {
                bytes: encode_pcm16_le(&flatten(&ready)),
                is_final: false,
            }));
        }
    }

    fn flush_final_chunk(&mut self, events: &mut Vec<IteratorEvent>) {
        if self.num_frames_to_emit == 0 {
            return;
        }
        let remaining = std::mem::take(&mut self.chunk_accumulator);
        events.push(IteratorEvent::Chunk(ChunkEvent {
            bytes: encode_pcm16_le(&flatten(&remaining)),
            is_final: true,
        }));
    }
}

fn flatten(frames: &[Frame]) -> Vec<f32> {
    frames.iter().flat_map(|f| f.samples().iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(
        positive: f32,
        negative: f32,
        redemption_frames: u32,
        pre_pad: u32,
        min_speech: u32,
        end_pad: u32,
        emit_every: u32,
    ) -> VadConfig {
        VadConfig {
            positive_speech_threshold: positive,
            negative_speech_threshold: negative,
            redemption_frames,
            pre_speech_pad_frames: pre_pad,
            min_speech_frames: min_speech,
            end_speech_pad_frames: end_pad,
            num_frames_to_emit: emit_every,
            ..Default::default()
        }
    }

    fn frame(tag: f32) -> Frame {
        Frame(vec![tag; 2])
    }

    fn feed(it: &mut VadIterator, probs: &[f32]) -> Vec<IteratorEvent> {
        probs
            .iter()
            .enumerate()
            .flat_map(|(i, &p)| it.process_frame(p, frame(i as f32)))
            .collect()
    }

    fn count_speech_starts(events: &[IteratorEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, IteratorEvent::SpeechStart))
            .count()
    }

    #[test]
    fn silence_only_emits_only_frame_processed() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 1, 3, 1, 0));
        let events = feed(&mut it, &vec![0.1; 100]);
        assert_eq!(events.len(), 100);
        assert!(events
            .iter()
            .all(|e| matches!(e, IteratorEvent::FrameProcessed(_))));
    }

    #[test]
    fn short_blip_misfires() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 0, 3, 1, 0));
        let mut probs = vec![0.9, 0.9];
        probs.extend(std::iter::repeat(0.1).take(20));
        let events = feed(&mut it, &probs);

        assert_eq!(count_speech_starts(&events), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, IteratorEvent::Misfire)));
        assert!(!events
            .iter()
            .any(|e| matches!(e, IteratorEvent::SpeechEnd(_))));
        assert!(!events
            .iter()
            .any(|e| matches!(e, IteratorEvent::RealSpeechStart)));
    }

    #[test]
    fn valid_utterance_has_expected_sample_length() {
        // v4 defaults: pre_pad=1, redemption=8, end_pad=1, min_speech=3, frame_samples irrelevant here
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 1, 3, 1, 0));
        let mut probs = vec![0.9; 10];
        probs.extend(std::iter::repeat(0.1).take(8));
        let events = feed(&mut it, &probs);

        assert_eq!(count_speech_starts(&events), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, IteratorEvent::RealSpeechStart)));

        let end = events
            .iter()
            .find_map(|e| match e {
                IteratorEvent::SpeechEnd(s) => Some(s),
                _ => None,
            })
            .expect("expected a speechEnd event");

        // 1 pre-pad + 10 speech + 1 end-pad = 12 frames * 2 samples/frame
        assert_eq!(end.samples.len(), 12 * 2);
    }

    #[test]
    fn real_speech_start_precedes_speech_end() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 1, 3, 1, 0));
        let mut probs = vec![0.9; 10];
        probs.extend(std::iter::repeat(0.1).take(8));
        let events = feed(&mut it, &probs);

        let real_start_idx = events
            .iter()
            .position(|e| matches!(e, IteratorEvent::RealSpeechStart))
            .expect("real speech start expected");
        let end_idx = events
            .iter()
            .position(|e| matches!(e, IteratorEvent::SpeechEnd(_)))
            .expect("speech end expected");
        assert!(real_start_idx < end_idx);
    }

    #[test]
    fn min_speech_frames_one_makes_real_start_coincide_with_speech_start() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 1, 1, 1, 0));
        let events = feed(&mut it, &[0.9]);
        // Both events must appear for the very same (first) frame.
        assert_eq!(count_speech_starts(&events), 1);
        assert!(events
            .iter()
            .any(|e| matches!(e, IteratorEvent::RealSpeechStart)));
        let start_idx = events
            .iter()
            .position(|e| matches!(e, IteratorEvent::SpeechStart))
            .unwrap();
        let real_idx = events
            .iter()
            .position(|e| matches!(e, IteratorEvent::RealSpeechStart))
            .unwrap();
        assert_eq!(real_idx, start_idx + 1);
    }

    #[test]
    fn zero_pre_speech_pad_starts_at_triggering_frame() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 0, 1, 0, 0));
        let mut probs = vec![0.1, 0.1, 0.9];
        probs.extend(std::iter::repeat(0.1).take(8));
        let events = feed(&mut it, &probs);
        let end = events
            .iter()
            .find_map(|e| match e {
                IteratorEvent::SpeechEnd(s) => Some(s),
                _ => None,
            })
            .unwrap();
        // No pre-pad, no end-pad (end_speech_pad_frames=0): just the one triggering frame.
        assert_eq!(end.samples.len(), 2);
    }

    #[test]
    fn end_speech_pad_zero_excludes_redemption_tail() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 4, 0, 1, 0, 0));
        let mut probs = vec![0.9, 0.9, 0.9];
        probs.extend(std::iter::repeat(0.1).take(4));
        let events = feed(&mut it, &probs);
        let end = events
            .iter()
            .find_map(|e| match e {
                IteratorEvent::SpeechEnd(s) => Some(s),
                _ => None,
            })
            .unwrap();
        assert_eq!(end.samples.len(), 3 * 2);
    }

    #[test]
    fn probability_exactly_at_thresholds_is_classified_per_spec() {
        // p == positive counts positive; p == negative counts as hold (not redemption).
        let mut it = VadIterator::new(&cfg(0.5, 0.3, 3, 0, 1, 0, 0));
        let events = feed(&mut it, &[0.5]);
        assert_eq!(count_speech_starts(&events), 1);

        let mut it2 = VadIterator::new(&cfg(0.5, 0.3, 3, 0, 1, 0, 0));
        feed(&mut it2, &[0.5]); // start speaking
        let hold_events = feed(&mut it2, &[0.3]); // equals negative: hold, not redemption
        assert!(it2.is_speaking());
        assert!(!hold_events
            .iter()
            .any(|e| matches!(e, IteratorEvent::SpeechEnd(_) | IteratorEvent::Misfire)));
    }

    #[test]
    fn chunked_utterance_emits_intermediate_and_final_chunks() {
        // pre_pad=0 to make the frame counting in the scenario easy to reason about.
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 0, 1, 1, 4));
        let mut probs = vec![0.9; 10];
        probs.extend(std::iter::repeat(0.1).take(8));
        let events = feed(&mut it, &probs);

        let chunks: Vec<&ChunkEvent> = events
            .iter()
            .filter_map(|e| match e {
                IteratorEvent::Chunk(c) => Some(c),
                _ => None,
            })
            .collect();

        assert!(chunks.len() >= 2);
        assert!(chunks.iter().filter(|c| !c.is_final).count() >= 2);
        assert_eq!(chunks.iter().filter(|c| c.is_final).count(), 1);
        assert!(chunks.last().unwrap().is_final);
    }

    #[test]
    fn chunk_concatenation_matches_speech_end_samples() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 1, 3, 1, 3));
        let mut probs = vec![0.9; 10];
        probs.extend(std::iter::repeat(0.1).take(8));
        let events = feed(&mut it, &probs);

        let end = events
            .iter()
            .find_map(|e| match e {
                IteratorEvent::SpeechEnd(s) => Some(s.samples.clone()),
                _ => None,
            })
            .unwrap();

        let mut concatenated = Vec::new();
        for e in &events {
            if let IteratorEvent::Chunk(c) = e {
                concatenated.extend_from_slice(&c.bytes);
            }
        }

        assert_eq!(concatenated, encode_pcm16_le(&end));
    }

    #[test]
    fn no_chunks_emitted_when_disabled() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 1, 3, 1, 0));
        let mut probs = vec![0.9; 10];
        probs.extend(std::iter::repeat(0.1).take(8));
        let events = feed(&mut it, &probs);
        assert!(!events.iter().any(|e| matches!(e, IteratorEvent::Chunk(_))));
    }

    #[test]
    fn no_chunks_emitted_on_misfire() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 0, 5, 1, 1));
        let mut probs = vec![0.9, 0.9];
        probs.extend(std::iter::repeat(0.1).take(8));
        let events = feed(&mut it, &probs);
        assert!(events.iter().any(|e| matches!(e, IteratorEvent::Misfire)));
        assert!(!events.iter().any(|e| matches!(e, IteratorEvent::Chunk(_))));
    }

    #[test]
    fn no_intermediate_chunks_leak_before_a_misfire() {
        // min_speech_frames=5 is never reached (only 2 positive frames), so
        // this utterance misfires. With num_frames_to_emit=1, a naive
        // implementation would have already flushed an intermediate chunk
        // per committed frame well before the misfire is known — §4.4
        // forbids any chunk, intermediate or final, reaching a misfired
        // utterance.
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 0, 5, 1, 1));
        let mut probs = vec![0.9, 0.9];
        probs.extend(std::iter::repeat(0.1).take(8));
        let events = feed(&mut it, &probs);
        assert!(events.iter().any(|e| matches!(e, IteratorEvent::Misfire)));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, IteratorEvent::Chunk(_)))
                .count(),
            0,
            "no chunk of any kind may be emitted for a misfired utterance"
        );
    }

    #[test]
    fn force_end_speech_emits_speech_end_bypassing_min_speech_frames() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 0, 10, 1, 0));
        // Only one positive frame: far short of min_speech_frames=10.
        feed(&mut it, &[0.9]);
        assert!(it.is_speaking());

        let events = it.force_end_speech();
        assert!(events
            .iter()
            .any(|e| matches!(e, IteratorEvent::SpeechEnd(_))));
        assert!(!it.is_speaking());
    }

    #[test]
    fn force_end_speech_is_noop_when_idle() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 0, 1, 1, 0));
        assert!(it.force_end_speech().is_empty());
    }

    #[test]
    fn reset_drops_state_without_emitting_events() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 8, 1, 1, 1, 0));
        feed(&mut it, &[0.9, 0.9]);
        assert!(it.is_speaking());
        it.reset();
        assert!(!it.is_speaking());
    }

    #[test]
    fn no_two_consecutive_speech_starts_without_intervening_end_or_misfire() {
        let mut it = VadIterator::new(&cfg(0.5, 0.35, 4, 0, 1, 0, 0));
        let mut probs = vec![0.9; 5];
        probs.extend(std::iter::repeat(0.1).take(4)); // ends
        probs.extend(vec![0.9; 5]); // second utterance
        probs.extend(std::iter::repeat(0.1).take(4));
        let events = feed(&mut it, &probs);

        let mut speaking = false;
        for e in &events {
            match e {
                IteratorEvent::SpeechStart => {
                    assert!(!speaking, "speechStart while already speaking");
                    speaking = true;
                }
                IteratorEvent::SpeechEnd(_) | IteratorEvent::Misfire => {
                    assert!(speaking, "end/misfire without a preceding speechStart");
                    speaking = false;
                }
                _ => {}
            }
        }
        assert!(!speaking);
        assert_eq!(count_speech_starts(&events), 2);
    }
}
