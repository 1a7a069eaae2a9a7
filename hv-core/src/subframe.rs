//! Decoding of the vendor sub-frame pixel format.
//!
//! The sensor delivers its 768x608 frame as four Bayer-like quadrants of
//! 384x304 pixels. Each quadrant arrives as one sub-frame: a 32768-byte slot
//! of which the leading 29200 bytes are payload, laid out as little-endian
//! 64-bit words. Word 0 carries a 24-bit header tag and the 40-bit raw
//! device timestamp, word 1 carries the quadrant id, and the remaining 3648
//! words pack the pixel grid at 2 bits per pixel (32 pixels per word, 12
//! words per row).

use log::warn;
use thiserror::Error;

use crate::types::CdEvent;

/// Full sensor width in pixels.
pub const EVS_WIDTH: u16 = 768;
/// Full sensor height in pixels.
pub const EVS_HEIGHT: u16 = 608;
/// Sub-frame (quadrant) width in pixels.
pub const SUB_WIDTH: usize = 384;
/// Sub-frame (quadrant) height in pixels.
pub const SUB_HEIGHT: usize = 304;
/// Size of one sub-frame slot in a raw block.
pub const SUB_FULL_BYTES: usize = 32768;
/// Payload bytes at the start of each sub-frame slot.
pub const SUB_VALID_BYTES: usize = 29200;
/// Size of one USB bulk-in raw block (16 sub-frame slots).
pub const BUF_LEN: usize = 4096 * 128;
/// Stride between 4-sub-frame groups in a raw block.
pub const GROUP_BYTES: usize = 4 * SUB_FULL_BYTES;

/// Pixel words per sub-frame row (32 pixels per 64-bit word).
const WORDS_PER_ROW: usize = SUB_WIDTH / 32;
/// Expected low 24 bits of word 0.
const HEADER_TAG: u64 = 0x00FFFF;
/// Raw device timestamp ticks per microsecond (5 ns ticks).
const TICKS_PER_US: u64 = 200;

/// Errors produced while unpacking a sub-frame.
#[derive(Error, Debug)]
pub enum SubframeError {
    #[error("sub-frame payload too short: {0} bytes")]
    TooShort(usize),

    #[error("invalid sub-frame id: {0}")]
    BadSubframeId(u8),
}

/// Events extracted from one sub-frame.
#[derive(Debug)]
pub struct SubframeEvents {
    /// Timestamp in microseconds shared by every event of the sub-frame.
    pub timestamp: u64,
    /// Decoded CD events, in row-major sensor order.
    pub events: Vec<CdEvent>,
}

#[inline]
fn read_word(data: &[u8], index: usize) -> u64 {
    let offset = index * 8;
    u64::from_le_bytes(data[offset..offset + 8].try_into().unwrap())
}

/// Maps a sub-frame id to its (x, y) quadrant offset on the full frame.
#[inline]
fn quadrant_offset(subframe_id: u8) -> Option<(u16, u16)> {
    match subframe_id {
        0 => Some((0, 0)),
        1 => Some((1, 0)),
        2 => Some((0, 1)),
        3 => Some((1, 1)),
        _ => None,
    }
}

/// Unpacks one sub-frame payload into positioned CD events.
///
/// `data` must hold at least [`SUB_VALID_BYTES`]. A header tag mismatch is
/// logged and decoding continues (the device occasionally produces such
/// frames with valid payloads); an out-of-range sub-frame id aborts the
/// sub-frame since the quadrant placement would be undefined.
///
/// Pixel code `0b01` decodes to an OFF event and `0b11` to an ON event.
/// Code `0b10` is never produced by the sensor but decodes to ON; the
/// behavior is vendor-undefined.
pub fn decode_subframe(data: &[u8]) -> Result<SubframeEvents, SubframeError> {
    if data.len() < SUB_VALID_BYTES {
        return Err(SubframeError::TooShort(data.len()));
    }

    let word0 = read_word(data, 0);
    if word0 & 0xFF_FFFF != HEADER_TAG {
        warn!("sub-frame header tag mismatch: {:#08x}", word0 & 0xFF_FFFF);
    }
    let raw_timestamp = (word0 >> 24) & 0xFF_FFFF_FFFF;
    let timestamp = raw_timestamp / TICKS_PER_US;

    let word1 = read_word(data, 1);
    let subframe_id = ((word1 >> 44) & 0xF) as u8;
    let (x_offset, y_offset) =
        quadrant_offset(subframe_id).ok_or(SubframeError::BadSubframeId(subframe_id))?;

    let mut events = Vec::new();
    let mut word_index = 2;
    let mut y = y_offset;
    for _ in 0..SUB_HEIGHT {
        let mut x = x_offset;
        for j in 0..WORDS_PER_ROW {
            let word = read_word(data, word_index + j);
            let mut bits = word;
            for _ in 0..32 {
                let pix = bits & 0x3;
                bits >>= 2;
                if x >= EVS_WIDTH || y >= EVS_HEIGHT {
                    x += 2;
                    continue;
                }
                if pix > 0 {
                    events.push(CdEvent::new(x, y, (pix >> 1) as u8, timestamp));
                }
                x += 2;
            }
        }
        word_index += WORDS_PER_ROW;
        y += 2;
    }

    Ok(SubframeEvents { timestamp, events })
}

/// Decodes one 4-sub-frame group covering a full-resolution frame.
///
/// `group` must hold four consecutive sub-frame slots ([`GROUP_BYTES`]
/// bytes). Events are appended to `out` in sub-frame order; sub-frames with
/// an invalid id are skipped with a warning. Returns the number of events
/// appended.
pub fn decode_group(group: &[u8], out: &mut Vec<CdEvent>) -> usize {
    let before = out.len();
    for sub in 0..4 {
        let offset = sub * SUB_FULL_BYTES;
        match decode_subframe(&group[offset..offset + SUB_VALID_BYTES]) {
            Ok(decoded) => out.extend_from_slice(&decoded.events),
            Err(err) => warn!("skipping sub-frame {sub}: {err}"),
        }
    }
    out.len() - before
}

/// Decodes every 4-sub-frame group of a raw USB block, appending to `out`.
///
/// Returns the number of events appended. A trailing partial group is
/// ignored.
pub fn decode_block(block: &[u8], out: &mut Vec<CdEvent>) -> usize {
    let before = out.len();
    for group in block.chunks_exact(GROUP_BYTES) {
        decode_group(group, out);
    }
    out.len() - before
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a sub-frame payload with the given raw timestamp, id, and
    /// pixel codes addressed as (pixel index in row, row, 2-bit code).
    fn make_subframe(raw_timestamp: u64, subframe_id: u8, pixels: &[(usize, usize, u64)]) -> Vec<u8> {
        let mut words = vec![0u64; SUB_VALID_BYTES / 8];
        words[0] = (raw_timestamp << 24) | HEADER_TAG;
        words[1] = (subframe_id as u64) << 44;
        for &(u, v, code) in pixels {
            let word_index = 2 + v * WORDS_PER_ROW + u / 32;
            let shift = (u % 32) * 2;
            words[word_index] |= (code & 0x3) << shift;
        }
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_empty_subframe() {
        let data = make_subframe(1000, 0, &[]);
        let decoded = decode_subframe(&data).unwrap();
        assert_eq!(decoded.timestamp, 5);
        assert!(decoded.events.is_empty());
    }

    #[test]
    fn test_single_pixel_quadrant_3() {
        // raw_ts 200_000_000 ticks = 1_000_000 us; pixel (10, 5) ON in
        // quadrant 3 lands at (1 + 2*10, 1 + 2*5).
        let data = make_subframe(200_000_000, 3, &[(10, 5, 0b11)]);
        let decoded = decode_subframe(&data).unwrap();
        assert_eq!(decoded.timestamp, 1_000_000);
        assert_eq!(decoded.events, vec![CdEvent::new(21, 11, 1, 1_000_000)]);
    }

    #[test]
    fn test_quadrant_offsets() {
        for (id, x0, y0) in [(0u8, 0u16, 0u16), (1, 1, 0), (2, 0, 1), (3, 1, 1)] {
            let data = make_subframe(200, id, &[(0, 0, 0b01)]);
            let decoded = decode_subframe(&data).unwrap();
            assert_eq!(decoded.events, vec![CdEvent::new(x0, y0, 0, 1)], "id {id}");
        }
    }

    #[test]
    fn test_polarity_mapping() {
        // 01 -> OFF, 11 -> ON, 10 -> ON (vendor-undefined but preserved).
        let data = make_subframe(200, 0, &[(0, 0, 0b01), (1, 0, 0b11), (2, 0, 0b10)]);
        let decoded = decode_subframe(&data).unwrap();
        let polarities: Vec<u8> = decoded.events.iter().map(|e| e.polarity).collect();
        assert_eq!(polarities, vec![0, 1, 1]);
    }

    #[test]
    fn test_last_pixel_of_frame() {
        // Pixel (383, 303) of quadrant 3 is the bottom-right sensor pixel.
        let data = make_subframe(200, 3, &[(383, 303, 0b11)]);
        let decoded = decode_subframe(&data).unwrap();
        assert_eq!(decoded.events, vec![CdEvent::new(767, 607, 1, 1)]);
    }

    #[test]
    fn test_bad_subframe_id() {
        let data = make_subframe(200, 7, &[(0, 0, 0b11)]);
        assert!(matches!(
            decode_subframe(&data),
            Err(SubframeError::BadSubframeId(7))
        ));
    }

    #[test]
    fn test_bad_header_is_lenient() {
        let mut data = make_subframe(200_000, 1, &[(4, 4, 0b11)]);
        data[0] = 0x00; // corrupt the header tag
        let decoded = decode_subframe(&data).unwrap();
        assert_eq!(decoded.events.len(), 1);
    }

    #[test]
    fn test_too_short() {
        assert!(matches!(
            decode_subframe(&[0u8; 100]),
            Err(SubframeError::TooShort(100))
        ));
    }

    #[test]
    fn test_decode_group_concatenates_quadrants() {
        let mut group = Vec::with_capacity(GROUP_BYTES);
        for id in 0..4u8 {
            let mut slot = make_subframe(2000, id, &[(id as usize, 0, 0b11)]);
            slot.resize(SUB_FULL_BYTES, 0);
            group.extend_from_slice(&slot);
        }

        let mut events = Vec::new();
        let count = decode_group(&group, &mut events);
        assert_eq!(count, 4);
        // All events share the group timestamp and sit in distinct quadrants.
        for event in &events {
            assert_eq!(event.timestamp, 10);
        }
        assert_eq!(events[0], CdEvent::new(0, 0, 1, 10));
        assert_eq!(events[1], CdEvent::new(3, 0, 1, 10));
        assert_eq!(events[2], CdEvent::new(4, 1, 1, 10));
        assert_eq!(events[3], CdEvent::new(7, 1, 1, 10));
    }

    #[test]
    fn test_decode_block_walks_groups() {
        let mut block = vec![0u8; BUF_LEN];
        // Two groups with one ON pixel each; remaining slots keep id 0 and
        // empty payloads.
        for group_index in 0..2 {
            let slot = make_subframe(400 * (group_index as u64 + 1), 0, &[(0, 0, 0b11)]);
            let base = group_index * GROUP_BYTES;
            block[base..base + slot.len()].copy_from_slice(&slot);
        }

        let mut events = Vec::new();
        decode_block(&block, &mut events);
        let with_pixels: Vec<&CdEvent> = events.iter().filter(|e| e.timestamp > 0).collect();
        assert_eq!(with_pixels.len(), 2);
        assert_eq!(with_pixels[0].timestamp, 2);
        assert_eq!(with_pixels[1].timestamp, 4);
    }
}
