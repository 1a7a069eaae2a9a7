//! EVT2 event stream encoding.
//!
//! The encoder interleaves TIME_HIGH words into a CD event stream so that a
//! decoder always has an unambiguous time base. TIME_HIGH words are emitted
//! redundantly: the internal step advances by a quarter of the 64 us time
//! base stride, so a stream survives up to three dropped TIME_HIGH words.

use crate::parser;
use crate::types::CdEvent;

const REDUNDANCY_FACTOR: u64 = 4;
const TH_STEP: u64 = 1 << parser::N_LOWER_BITS_TH; // 64 us
const TH_NEXT_STEP: u64 = TH_STEP / REDUNDANCY_FACTOR; // 16 us

/// Emits TIME_HIGH words carrying the upper 28 bits of the timebase.
///
/// State is the next Time High to encode, kept aligned to `TH_NEXT_STEP`.
#[derive(Debug)]
pub struct EventTimeEncoder {
    th: u64,
}

impl EventTimeEncoder {
    /// Creates an encoder whose first TIME_HIGH covers `base` (in us).
    ///
    /// The internal counter starts at the greatest multiple of the step
    /// below or equal to `base`.
    pub fn new(base: u64) -> Self {
        Self {
            th: base & !(TH_NEXT_STEP - 1),
        }
    }

    /// Time (in us) of the next TIME_HIGH to be emitted.
    #[inline]
    pub fn next_time_high(&self) -> u64 {
        self.th
    }

    /// Appends one TIME_HIGH word to `out` and advances the counter.
    pub fn encode(&mut self, out: &mut Vec<u8>) {
        let word = parser::time_high_build(self.th >> parser::N_LOWER_BITS_TH);
        out.extend_from_slice(&word.to_le_bytes());
        self.th += TH_NEXT_STEP;
    }

    /// Resets the encoder to a new base timestamp.
    pub fn reset(&mut self, base: u64) {
        self.th = base & !(TH_NEXT_STEP - 1);
    }
}

/// Encodes a batch of CD events into EVT2 bytes.
///
/// Callers guarantee that `events` is non-decreasing in timestamp. One
/// TIME_HIGH word is emitted up front so that the stream is decodable from
/// the start of any batch; further TIME_HIGH words are interleaved whenever
/// an event reaches the encoder's next Time High.
///
/// Returns the number of events encoded.
pub fn encode_events(
    events: &[CdEvent],
    out: &mut Vec<u8>,
    time_encoder: &mut EventTimeEncoder,
) -> usize {
    time_encoder.encode(out);
    for event in events {
        while event.timestamp >= time_encoder.next_time_high() {
            time_encoder.encode(out);
        }
        let word = parser::cd_build(event.x, event.y, event.polarity, event.timestamp);
        out.extend_from_slice(&word.to_le_bytes());
    }
    events.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{get_event_type, time_high_get_value, RawEventType};

    fn words(bytes: &[u8]) -> Vec<u32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn test_base_aligns_down_to_step() {
        let encoder = EventTimeEncoder::new(16);
        assert_eq!(encoder.next_time_high(), 16);
        let encoder = EventTimeEncoder::new(23);
        assert_eq!(encoder.next_time_high(), 16);
        let encoder = EventTimeEncoder::new(0);
        assert_eq!(encoder.next_time_high(), 0);
    }

    #[test]
    fn test_encode_advances_by_quarter_step() {
        let mut encoder = EventTimeEncoder::new(64);
        let mut out = Vec::new();
        encoder.encode(&mut out);
        assert_eq!(encoder.next_time_high(), 80);
        encoder.encode(&mut out);
        encoder.encode(&mut out);
        encoder.encode(&mut out);
        assert_eq!(encoder.next_time_high(), 128);

        // All four words carry t_high = 64 >> 6 = 1
        for &word in &words(&out) {
            assert_eq!(get_event_type(word), RawEventType::TimeHigh as u8);
            assert_eq!(time_high_get_value(word), 1);
        }
    }

    #[test]
    fn test_reset() {
        let mut encoder = EventTimeEncoder::new(16);
        encoder.reset(64);
        assert_eq!(encoder.next_time_high(), 64);
    }

    #[test]
    fn test_empty_batch_still_emits_time_high() {
        let mut encoder = EventTimeEncoder::new(0);
        let mut out = Vec::new();
        let count = encode_events(&[], &mut out, &mut encoder);
        assert_eq!(count, 0);
        let words = words(&out);
        assert_eq!(words.len(), 1);
        assert_eq!(get_event_type(words[0]), RawEventType::TimeHigh as u8);
    }

    #[test]
    fn test_time_high_emitted_across_64us_boundary() {
        let mut encoder = EventTimeEncoder::new(0);
        let mut out = Vec::new();
        let events = [CdEvent::new(0, 0, 0, 63), CdEvent::new(0, 0, 1, 64)];
        encode_events(&events, &mut out, &mut encoder);

        let words = words(&out);
        // Find the two CD words and check a TIME_HIGH with t_high = 1 sits
        // between them.
        let cd_positions: Vec<usize> = words
            .iter()
            .enumerate()
            .filter(|(_, &w)| get_event_type(w) <= 1)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(cd_positions.len(), 2);
        let between = &words[cd_positions[0] + 1..cd_positions[1]];
        assert!(between
            .iter()
            .any(|&w| get_event_type(w) == RawEventType::TimeHigh as u8
                && time_high_get_value(w) == 1));
    }

    #[test]
    fn test_time_high_density() {
        // Between two events 640 us apart at least 10 TIME_HIGH words appear.
        let mut encoder = EventTimeEncoder::new(0);
        let mut out = Vec::new();
        let events = [CdEvent::new(1, 1, 1, 0), CdEvent::new(2, 2, 0, 640)];
        encode_events(&events, &mut out, &mut encoder);

        let th_count = words(&out)
            .iter()
            .filter(|&&w| get_event_type(w) == RawEventType::TimeHigh as u8)
            .count();
        assert!(th_count >= 10, "expected >= 10 TIME_HIGH words, got {th_count}");
    }
}
