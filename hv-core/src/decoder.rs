//! Stateful EVT2 decoder.
//!
//! This module implements the EVT2 decoding state machine that reconstructs
//! full 34-bit microsecond timestamps from TIME_HIGH and CD words.

use crate::parser::{self, RawEventType};
use crate::types::{CdEvent, TriggerEvent};

/// Span in us covered by the 34-bit reconstructed timestamp.
const TIME_BASE_RANGE: u64 = 1 << 34;
/// Threshold for detecting an apparent TIME_HIGH wrap-around.
const LOOP_THRESHOLD: u64 = TIME_BASE_RANGE / 2;

/// Stateful EVT2 decoder.
///
/// Maintains the rolling time base across buffers so that a stream can be
/// decoded in arbitrary chunks. CD words that arrive before the first
/// TIME_HIGH have no defined timestamp and are dropped; conforming encoders
/// always emit a TIME_HIGH first.
#[derive(Debug, Default)]
pub struct Evt2Decoder {
    current_time_base: u64,
    first_time_base_set: bool,
    n_time_high_loops: u64,
}

impl Evt2Decoder {
    /// Creates a new decoder with default state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resets the decoder state.
    pub fn reset(&mut self) {
        self.current_time_base = 0;
        self.first_time_base_set = false;
        self.n_time_high_loops = 0;
    }

    /// Current reconstructed time base in microseconds.
    pub fn current_time_base(&self) -> u64 {
        self.current_time_base
    }

    /// Number of apparent TIME_HIGH wrap-arounds observed.
    ///
    /// The counter is informational only; wrapped bases are taken as-is
    /// because a 34-bit span (about 4.7 hours) outlives any session this
    /// pipeline records.
    pub fn time_high_loops(&self) -> u64 {
        self.n_time_high_loops
    }

    /// Decodes a buffer of EVT2 bytes into CD and trigger events.
    ///
    /// `bytes` is interpreted as little-endian 32-bit words; a trailing
    /// partial word is ignored, so callers must feed whole words. Trigger
    /// events are delivered only when a sink is provided. Returns the number
    /// of CD events decoded.
    pub fn decode_buffer(
        &mut self,
        bytes: &[u8],
        cd_events: &mut Vec<CdEvent>,
        mut trigger_events: Option<&mut Vec<TriggerEvent>>,
    ) -> usize {
        let before = cd_events.len();

        for chunk in bytes.chunks_exact(4) {
            let word = u32::from_le_bytes(chunk.try_into().unwrap());

            match RawEventType::from_u8(parser::get_event_type(word)) {
                Some(RawEventType::CdOff) | Some(RawEventType::CdOn) => {
                    if !self.first_time_base_set {
                        continue;
                    }
                    let timestamp = self.current_time_base | parser::cd_get_t_low(word);
                    let polarity = (parser::get_event_type(word) == RawEventType::CdOn as u8) as u8;
                    cd_events.push(CdEvent::new(
                        parser::cd_get_x(word),
                        parser::cd_get_y(word),
                        polarity,
                        timestamp,
                    ));
                }

                Some(RawEventType::TimeHigh) => {
                    let new_base = parser::time_high_get_value(word) << parser::N_LOWER_BITS_TH;
                    if self.first_time_base_set
                        && self.current_time_base > new_base
                        && self.current_time_base - new_base > LOOP_THRESHOLD
                    {
                        self.n_time_high_loops += 1;
                    }
                    self.current_time_base = new_base;
                    self.first_time_base_set = true;
                }

                Some(RawEventType::ExtTrigger) => {
                    if !self.first_time_base_set {
                        continue;
                    }
                    if let Some(sink) = trigger_events.as_deref_mut() {
                        let timestamp = self.current_time_base | parser::trigger_get_t_low(word);
                        sink.push(TriggerEvent::new(
                            parser::trigger_get_value(word),
                            parser::trigger_get_id(word),
                            timestamp,
                        ));
                    }
                }

                None => {
                    // Reserved/unknown event type, skip
                }
            }
        }

        cd_events.len() - before
    }
}
