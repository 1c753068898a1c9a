//! Per-connection byte accumulation and frame extraction.
//!
//! Uses `bytes::BytesMut` as an owned arena; extracted frames are removed
//! from the front with `advance`, corrupt input is dropped with `clear`.
//!
//! Extraction always starts at offset 0 and is gated by
//! [`is_valid_packet`], a cheap heuristic that looks at the header byte,
//! the minimum size, and the tail position implied by byte 2. Only once
//! the heuristic passes is the real 4-byte length field read.
//!
//! # Example
//!
//! ```
//! use hydrolink::protocol::{Frame, FrameDecoder, MeasurementRecord, Timestamp};
//!
//! let bytes = Frame::new(
//!     "000000000001",
//!     Timestamp::new(2024, 1, 1, 0, 0, 0),
//!     vec![MeasurementRecord::new(0x10, 0, 1.5)],
//! )
//! .encode();
//!
//! let mut decoder = FrameDecoder::new();
//! decoder.feed(&bytes[..10]);
//! assert!(decoder.try_extract().unwrap().is_none());
//!
//! decoder.feed(&bytes[10..]);
//! let (frame, consumed) = decoder.try_extract().unwrap().unwrap();
//! assert_eq!(consumed, bytes.len());
//! assert_eq!(frame.water_level(), 1.5);
//! assert!(decoder.is_empty());
//! ```

use bytes::{Buf, BytesMut};
use serde::{Deserialize, Serialize};

use super::frame::{decode_with, DecodeError, DecodeMode, Frame};
use super::wire_format::{
    offsets, read_u32_le, DEFAULT_MAX_FRAME_SIZE, DISCARD_THRESHOLD, FRAME_HEADER, FRAME_TAIL,
    MIN_FRAME_SIZE,
};

/// What to drop when the buffer holds bytes that cannot start a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResyncPolicy {
    /// Drop the whole buffer.
    #[default]
    DiscardAll,
    /// Drop bytes up to the next start marker after offset 0.
    ScanToHeader,
}

/// Quick validity check run before any decode attempt.
///
/// Passes when the buffer holds at least [`MIN_FRAME_SIZE`] bytes, starts
/// with the start marker, and the byte at `buf[2] - 1` is the end marker.
/// Byte 2 is only the low byte of the length field, so frames of 256
/// bytes or more generally fail this check.
pub fn is_valid_packet(buf: &[u8]) -> bool {
    if buf.len() < MIN_FRAME_SIZE || buf[offsets::HEADER] != FRAME_HEADER {
        return false;
    }
    let tail_index = match usize::from(buf[offsets::LENGTH]).checked_sub(1) {
        Some(i) => i,
        None => return false,
    };
    buf.get(tail_index) == Some(&FRAME_TAIL)
}

/// Configuration for a [`FrameDecoder`].
#[derive(Debug, Clone, Copy)]
pub struct DecoderConfig {
    pub mode: DecodeMode,
    pub resync: ResyncPolicy,
    /// Declared lengths above this are treated as corrupt.
    pub max_frame_size: usize,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            mode: DecodeMode::Lenient,
            resync: ResyncPolicy::DiscardAll,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// Incremental frame extractor owning one connection's buffer.
pub struct FrameDecoder {
    buffer: BytesMut,
    config: DecoderConfig,
}

impl FrameDecoder {
    /// Create a decoder with default settings.
    pub fn new() -> Self {
        Self::with_config(DecoderConfig::default())
    }

    pub fn with_config(config: DecoderConfig) -> Self {
        Self {
            buffer: BytesMut::with_capacity(4 * 1024),
            config,
        }
    }

    #[inline]
    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Append freshly read bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Try to extract one frame from the front of the buffer.
    ///
    /// Returns:
    /// - `Ok(Some((frame, consumed)))` when a frame was decoded; `consumed`
    ///   bytes have been removed from the buffer
    /// - `Ok(None)` when the precheck fails or the frame is incomplete
    /// - `Err(...)` when the buffered bytes pass the precheck but cannot be
    ///   a frame; the buffer is left untouched
    pub fn try_extract(&mut self) -> Result<Option<(Frame, usize)>, DecodeError> {
        if !is_valid_packet(&self.buffer) {
            return Ok(None);
        }

        let declared = read_u32_le(&self.buffer, offsets::LENGTH) as usize;
        if declared > self.config.max_frame_size {
            return Err(DecodeError::FrameTooLarge {
                declared,
                max: self.config.max_frame_size,
            });
        }
        if self.buffer.len() < declared {
            return Ok(None);
        }

        let frame = decode_with(&self.buffer[..declared], self.config.mode)?;
        self.buffer.advance(declared);
        Ok(Some((frame, declared)))
    }

    /// True when the leftover bytes are past the discard threshold and
    /// still fail the precheck.
    pub fn needs_resync(&self) -> bool {
        self.buffer.len() > DISCARD_THRESHOLD && !is_valid_packet(&self.buffer)
    }

    /// Drop corrupt bytes according to the resync policy.
    ///
    /// Returns the number of bytes discarded.
    pub fn resync(&mut self) -> usize {
        match self.config.resync {
            ResyncPolicy::DiscardAll => {
                let n = self.buffer.len();
                self.buffer.clear();
                n
            }
            ResyncPolicy::ScanToHeader => {
                let next = self
                    .buffer
                    .iter()
                    .skip(1)
                    .position(|&b| b == FRAME_HEADER)
                    .map(|p| p + 1);
                match next {
                    Some(n) => {
                        self.buffer.advance(n);
                        n
                    }
                    None => {
                        let n = self.buffer.len();
                        self.buffer.clear();
                        n
                    }
                }
            }
        }
    }

    /// Buffered bytes, front first.
    #[inline]
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop everything buffered.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{tags, MeasurementRecord, Timestamp};

    /// 35-byte frame with one water level record.
    fn frame_bytes(device: &str, level: f32) -> Vec<u8> {
        Frame::new(
            device,
            Timestamp::new(2024, 1, 1, 0, 0, 0),
            vec![MeasurementRecord::new(tags::WATER_LEVEL, 0, level)],
        )
        .encode()
    }

    /// 41-byte frame with both channels.
    fn two_record_frame() -> Vec<u8> {
        Frame::new(
            "000000000000",
            Timestamp::new(2024, 1, 1, 0, 0, 0),
            vec![
                MeasurementRecord::new(tags::WATER_LEVEL, 0, 1.5),
                MeasurementRecord::new(tags::RAINFALL, 0, 0.5),
            ],
        )
        .encode()
    }

    #[test]
    fn test_single_complete_frame() {
        let bytes = frame_bytes("A", 1.5);
        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);

        let (frame, consumed) = decoder.try_extract().unwrap().unwrap();
        assert_eq!(consumed, 35);
        assert_eq!(frame.device_id, "A");
        assert!(decoder.is_empty());
        assert!(decoder.try_extract().unwrap().is_none());
    }

    #[test]
    fn test_short_buffer_is_incomplete() {
        let bytes = frame_bytes("A", 1.5);
        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes[..34]);

        assert!(decoder.try_extract().unwrap().is_none());
        assert_eq!(decoder.len(), 34);
    }

    #[test]
    fn test_fragmented_frame() {
        let bytes = two_record_frame();
        assert_eq!(bytes.len(), 41);
        let mut decoder = FrameDecoder::new();

        decoder.feed(&bytes[..10]);
        assert!(decoder.try_extract().unwrap().is_none());
        assert!(!decoder.needs_resync());

        decoder.feed(&bytes[10..]);
        let (frame, consumed) = decoder.try_extract().unwrap().unwrap();
        assert_eq!(consumed, 41);
        assert_eq!(frame.rainfall(), 0.5);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_partial_frame_past_threshold_fails_precheck() {
        // tail index lies beyond what is buffered
        let bytes = two_record_frame();
        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes[..36]);

        assert!(decoder.try_extract().unwrap().is_none());
        assert!(decoder.needs_resync());
    }

    #[test]
    fn test_two_frames_in_one_feed() {
        let mut data = frame_bytes("FIRST", 1.0);
        data.extend_from_slice(&frame_bytes("SECOND", 2.0));

        let mut decoder = FrameDecoder::new();
        decoder.feed(&data);

        let (first, _) = decoder.try_extract().unwrap().unwrap();
        let (second, _) = decoder.try_extract().unwrap().unwrap();
        assert_eq!(first.device_id, "FIRST");
        assert_eq!(second.device_id, "SECOND");
        assert!(decoder.try_extract().unwrap().is_none());
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_empty_frame_needs_trailing_bytes() {
        let empty = Frame::new("EMPTY", Timestamp::new(2024, 1, 1, 0, 0, 0), Vec::new()).encode();
        assert_eq!(empty.len(), 29);

        // alone it is under the minimum size and never leaves the buffer
        let mut decoder = FrameDecoder::new();
        decoder.feed(&empty);
        assert!(decoder.try_extract().unwrap().is_none());
        assert!(decoder.needs_resync());

        // followed by another frame the precheck passes and both come out
        let mut data = empty.clone();
        data.extend_from_slice(&frame_bytes("NEXT", 1.0));
        let mut decoder = FrameDecoder::new();
        decoder.feed(&data);

        let (first, consumed) = decoder.try_extract().unwrap().unwrap();
        assert_eq!(consumed, 29);
        assert_eq!(first.device_id, "EMPTY");
        assert!(first.measurements.is_empty());
        let (second, _) = decoder.try_extract().unwrap().unwrap();
        assert_eq!(second.device_id, "NEXT");
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_complete_frame_then_partial() {
        let first = frame_bytes("ONE", 1.0);
        let second = frame_bytes("TWO", 2.0);
        let mut data = first.clone();
        data.extend_from_slice(&second[..5]);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&data);
        assert!(decoder.try_extract().unwrap().is_some());
        assert!(decoder.try_extract().unwrap().is_none());
        assert_eq!(decoder.len(), 5);

        decoder.feed(&second[5..]);
        let (frame, _) = decoder.try_extract().unwrap().unwrap();
        assert_eq!(frame.device_id, "TWO");
    }

    #[test]
    fn test_byte_at_a_time() {
        let bytes = frame_bytes("B", 4.0);
        let mut decoder = FrameDecoder::new();
        let mut frames = Vec::new();

        for byte in &bytes {
            decoder.feed(&[*byte]);
            if let Some((frame, _)) = decoder.try_extract().unwrap() {
                frames.push(frame);
            }
        }

        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].water_level(), 4.0);
    }

    #[test]
    fn test_precheck_rules() {
        let bytes = frame_bytes("A", 1.0);
        assert!(is_valid_packet(&bytes));

        let mut bad_header = bytes.clone();
        bad_header[0] = 0x00;
        assert!(!is_valid_packet(&bad_header));

        let mut bad_tail = bytes.clone();
        bad_tail[34] = 0x00;
        assert!(!is_valid_packet(&bad_tail));

        let mut zero_len = bytes.clone();
        zero_len[2] = 0;
        assert!(!is_valid_packet(&zero_len));

        assert!(!is_valid_packet(&bytes[..34]));
        assert!(!is_valid_packet(&[]));
    }

    #[test]
    fn test_precheck_reads_only_byte_two() {
        // upper length bytes are ignored by the heuristic
        let mut bytes = frame_bytes("A", 1.0);
        bytes[4] = 0x01;
        assert!(is_valid_packet(&bytes));

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        let err = decoder.try_extract().unwrap_err();
        assert_eq!(
            err,
            DecodeError::FrameTooLarge {
                declared: 35 + 65536,
                max: DEFAULT_MAX_FRAME_SIZE
            }
        );
    }

    #[test]
    fn test_declared_length_waits_for_more_bytes() {
        // low byte says 35, real length says 35 + 256
        let mut bytes = frame_bytes("A", 1.0);
        bytes[3] = 0x01;
        let mut decoder = FrameDecoder::with_config(DecoderConfig {
            max_frame_size: 1024,
            ..DecoderConfig::default()
        });
        decoder.feed(&bytes);
        assert!(decoder.try_extract().unwrap().is_none());
        assert_eq!(decoder.len(), 35);
    }

    #[test]
    fn test_decode_error_leaves_buffer_untouched() {
        // declared length below the fixed overhead
        let mut bytes = frame_bytes("A", 1.0);
        bytes[2] = 20;
        bytes[19] = 0x03;
        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);

        let err = decoder.try_extract().unwrap_err();
        assert!(matches!(err, DecodeError::TooShort { .. }));
        assert_eq!(decoder.len(), 35);
    }

    #[test]
    fn test_invalid_buffer_cleared_entirely() {
        let mut bytes = frame_bytes("A", 1.0);
        bytes[34] = 0x00;
        let mut good = frame_bytes("B", 2.0);
        bytes.append(&mut good);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&bytes);
        assert!(decoder.try_extract().unwrap().is_none());
        assert!(decoder.needs_resync());

        assert_eq!(decoder.resync(), 70);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_short_garbage_kept_under_threshold() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[0xFF; 20]);
        assert!(!decoder.needs_resync());
        decoder.feed(&[0xFF]);
        assert!(decoder.needs_resync());
    }

    #[test]
    fn test_scan_to_header_recovers_following_frame() {
        let mut data = vec![0xAA, 0xBB, 0xCC];
        data.extend_from_slice(&frame_bytes("NEXT", 3.0));

        let mut decoder = FrameDecoder::with_config(DecoderConfig {
            resync: ResyncPolicy::ScanToHeader,
            ..DecoderConfig::default()
        });
        decoder.feed(&data);
        assert!(decoder.needs_resync());

        assert_eq!(decoder.resync(), 3);
        let (frame, _) = decoder.try_extract().unwrap().unwrap();
        assert_eq!(frame.device_id, "NEXT");
    }

    #[test]
    fn test_scan_to_header_without_marker_clears() {
        let mut decoder = FrameDecoder::with_config(DecoderConfig {
            resync: ResyncPolicy::ScanToHeader,
            ..DecoderConfig::default()
        });
        decoder.feed(&[0x02; 1]);
        decoder.feed(&[0x55; 30]);
        assert_eq!(decoder.resync(), 31);
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_strict_mode_propagates_soft_errors() {
        let mut bytes = frame_bytes("A", 1.0);
        bytes[22] = 0; // month 0
        let mut decoder = FrameDecoder::with_config(DecoderConfig {
            mode: DecodeMode::Strict,
            ..DecoderConfig::default()
        });
        decoder.feed(&bytes);
        assert!(matches!(
            decoder.try_extract(),
            Err(DecodeError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn test_clear() {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&[1, 2, 3]);
        decoder.clear();
        assert!(decoder.is_empty());
        assert_eq!(decoder.buffered(), &[] as &[u8]);
    }
}
