//! Telemetry frame decoding and encoding.
//!
//! A [`Frame`] is built only by decoding a slice whose length equals the
//! frame's declared length field. Two decode modes exist:
//!
//! - [`DecodeMode::Lenient`]: an impossible calendar date yields an empty
//!   timestamp string, and a record loop that runs out of bytes stops early.
//!   This is the default.
//! - [`DecodeMode::Strict`]: both situations are reported as errors.
//!
//! # Example
//!
//! ```
//! use hydrolink::protocol::{decode, Frame, MeasurementRecord, Timestamp};
//!
//! let frame = Frame::new(
//!     "000000000000",
//!     Timestamp::new(2024, 1, 1, 0, 0, 0),
//!     vec![MeasurementRecord::new(0x10, 0, 1.5)],
//! );
//! let bytes = frame.encode();
//! let decoded = decode(&bytes).unwrap();
//!
//! assert_eq!(decoded.water_level(), 1.5);
//! assert_eq!(decoded.rainfall(), 0.0);
//! assert_eq!(decoded.timestamp_string(), "20240101000000");
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::wire_format::{
    offsets, read_u32_le, tags, DEVICE_ADDR_SIZE, FIXED_OVERHEAD, FRAME_HEADER, FRAME_TAIL,
    RECORD_SIZE,
};
use crate::sink::Reading;

/// Timestamp text format used by the persistence contract.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Latest year that still formats as four digits.
pub const MAX_YEAR: u16 = 9999;

/// Most records a frame can declare in its one-byte count fields.
pub const MAX_RECORDS: usize = u8::MAX as usize;

/// Errors produced while decoding a telemetry frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// Not enough bytes for the fixed fields.
    #[error("frame too short: {len} bytes, need at least {min}")]
    TooShort { len: usize, min: usize },

    /// First byte is not the start marker.
    #[error("bad header byte 0x{0:02X}")]
    BadHeader(u8),

    /// Last byte is not the end marker.
    #[error("bad tail byte 0x{0:02X}")]
    BadTail(u8),

    /// Slice length disagrees with the length field.
    #[error("declared length {declared} does not match slice length {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    /// Declared length exceeds the configured maximum.
    #[error("declared length {declared} exceeds maximum {max}")]
    FrameTooLarge { declared: usize, max: usize },

    /// Calendar fields do not form a valid date (strict mode only).
    #[error("invalid timestamp {0:?}")]
    InvalidTimestamp(Timestamp),

    /// Fewer records fit in the frame than it declares (strict mode only).
    #[error("frame declares {declared} records but only {decoded} fit")]
    TruncatedMeasurements { declared: u8, decoded: usize },
}

/// How tolerant decoding is of soft field errors.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecodeMode {
    /// Degrade bad timestamps to "" and silently truncate records.
    #[default]
    Lenient,
    /// Reject bad timestamps and truncated record lists.
    Strict,
}

/// Raw calendar fields as sent by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl Timestamp {
    pub fn new(year: u16, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        Self {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    /// Decode the 7 date bytes. Year is `low | (high << 8)`.
    fn decode(buf: &[u8]) -> Self {
        Self {
            year: u16::from(buf[0]) | (u16::from(buf[1]) << 8),
            month: buf[2],
            day: buf[3],
            hour: buf[4],
            minute: buf[5],
            second: buf[6],
        }
    }

    fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.year.to_le_bytes());
        buf.extend_from_slice(&[self.month, self.day, self.hour, self.minute, self.second]);
    }

    /// The calendar date, if the fields form one. Years outside
    /// `1..=9999` are rejected.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        if self.year == 0 || self.year > MAX_YEAR {
            return None;
        }
        NaiveDate::from_ymd_opt(i32::from(self.year), u32::from(self.month), u32::from(self.day))?
            .and_hms_opt(
                u32::from(self.hour),
                u32::from(self.minute),
                u32::from(self.second),
            )
    }

    /// `yyyyMMddHHmmss`, or an empty string for an impossible date.
    pub fn format(&self) -> String {
        self.to_datetime()
            .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
            .unwrap_or_default()
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.to_datetime().is_some()
    }
}

/// One tagged sensor value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeasurementRecord {
    /// Sensor channel (see [`tags`]).
    pub tag: u8,
    pub sub_id: u8,
    pub value: f32,
}

impl MeasurementRecord {
    pub fn new(tag: u8, sub_id: u8, value: f32) -> Self {
        Self { tag, sub_id, value }
    }
}

/// A decoded telemetry frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub version: u8,
    /// Declared total length, header through tail.
    pub length: u32,
    pub packet_type: u8,
    pub data_count: u8,
    /// Device address, trimmed at the first NUL.
    pub device_id: String,
    pub timestamp: Timestamp,
    /// Declared number of measurement records.
    pub usage: u8,
    /// Decoded records; may hold fewer than `usage` in lenient mode.
    pub measurements: Vec<MeasurementRecord>,
}

impl Frame {
    /// Build a version 1 frame with `data_count` and `usage` set to the
    /// record count.
    ///
    /// # Panics
    ///
    /// Panics if more than [`MAX_RECORDS`] records are given.
    pub fn new(
        device_id: impl Into<String>,
        timestamp: Timestamp,
        measurements: Vec<MeasurementRecord>,
    ) -> Self {
        let count = match u8::try_from(measurements.len()) {
            Ok(n) => n,
            Err(_) => panic!(
                "{} records exceed the frame limit of {}",
                measurements.len(),
                MAX_RECORDS
            ),
        };
        let length = (FIXED_OVERHEAD + measurements.len() * RECORD_SIZE) as u32;
        Self {
            version: 0x01,
            length,
            packet_type: 0x01,
            data_count: count,
            device_id: device_id.into(),
            timestamp,
            usage: count,
            measurements,
        }
    }

    /// First record carrying `tag`.
    pub fn measurement(&self, tag: u8) -> Option<&MeasurementRecord> {
        self.measurements.iter().find(|m| m.tag == tag)
    }

    /// Water level value, 0.0 when absent.
    pub fn water_level(&self) -> f32 {
        self.measurement(tags::WATER_LEVEL)
            .map(|m| m.value)
            .unwrap_or(0.0)
    }

    /// Rainfall value, 0.0 when absent.
    pub fn rainfall(&self) -> f32 {
        self.measurement(tags::RAINFALL)
            .map(|m| m.value)
            .unwrap_or(0.0)
    }

    /// Timestamp in persistence format (empty when the date is invalid).
    pub fn timestamp_string(&self) -> String {
        self.timestamp.format()
    }

    /// The row handed to the persistence sink.
    pub fn to_reading(&self) -> Reading {
        Reading {
            timestamp: self.timestamp_string(),
            device_id: self.device_id.clone(),
            water_level: self.water_level(),
            rainfall: self.rainfall(),
        }
    }

    /// Encode to wire bytes.
    ///
    /// The length field is recomputed from the records present, so a frame
    /// decoded with truncated records re-encodes to a shorter frame.
    /// Device addresses longer than 12 bytes are cut.
    pub fn encode(&self) -> Vec<u8> {
        let total = FIXED_OVERHEAD + self.measurements.len() * RECORD_SIZE;
        let mut buf = Vec::with_capacity(total);
        buf.push(FRAME_HEADER);
        buf.push(self.version);
        buf.extend_from_slice(&(total as u32).to_le_bytes());
        buf.push(self.packet_type);
        buf.push(self.data_count);

        let mut addr = [0u8; DEVICE_ADDR_SIZE];
        let id = self.device_id.as_bytes();
        let n = id.len().min(DEVICE_ADDR_SIZE);
        addr[..n].copy_from_slice(&id[..n]);
        buf.extend_from_slice(&addr);

        self.timestamp.encode_into(&mut buf);
        buf.push(self.usage);

        for m in &self.measurements {
            buf.push(m.tag);
            buf.push(m.sub_id);
            buf.extend_from_slice(&m.value.to_le_bytes());
        }

        buf.push(FRAME_TAIL);
        buf
    }
}

/// Decode a frame leniently.
#[inline]
pub fn decode(buf: &[u8]) -> Result<Frame, DecodeError> {
    decode_with(buf, DecodeMode::Lenient)
}

/// Decode a frame from a slice holding exactly one frame.
pub fn decode_with(buf: &[u8], mode: DecodeMode) -> Result<Frame, DecodeError> {
    if buf.len() < FIXED_OVERHEAD {
        return Err(DecodeError::TooShort {
            len: buf.len(),
            min: FIXED_OVERHEAD,
        });
    }
    if buf[offsets::HEADER] != FRAME_HEADER {
        return Err(DecodeError::BadHeader(buf[offsets::HEADER]));
    }

    let length = read_u32_le(buf, offsets::LENGTH);
    if length as usize != buf.len() {
        return Err(DecodeError::LengthMismatch {
            declared: length as usize,
            actual: buf.len(),
        });
    }

    let tail = buf[buf.len() - 1];
    if tail != FRAME_TAIL {
        return Err(DecodeError::BadTail(tail));
    }

    let device_id = decode_device_addr(&buf[offsets::DEVICE_ADDR..offsets::DATE]);

    let timestamp = Timestamp::decode(&buf[offsets::DATE..offsets::USAGE]);
    if mode == DecodeMode::Strict && !timestamp.is_valid() {
        return Err(DecodeError::InvalidTimestamp(timestamp));
    }

    let usage = buf[offsets::USAGE];
    let mut measurements = Vec::with_capacity(usize::from(usage));
    let mut offset = offsets::RECORDS;
    for _ in 0..usage {
        // keep the tail byte out of reach
        if offset + RECORD_SIZE > buf.len() - 1 {
            break;
        }
        let value = f32::from_le_bytes([
            buf[offset + 2],
            buf[offset + 3],
            buf[offset + 4],
            buf[offset + 5],
        ]);
        measurements.push(MeasurementRecord::new(buf[offset], buf[offset + 1], value));
        offset += RECORD_SIZE;
    }

    if mode == DecodeMode::Strict && measurements.len() < usize::from(usage) {
        return Err(DecodeError::TruncatedMeasurements {
            declared: usage,
            decoded: measurements.len(),
        });
    }

    Ok(Frame {
        version: buf[offsets::VERSION],
        length,
        packet_type: buf[offsets::PACKET_TYPE],
        data_count: buf[offsets::DATA_COUNT],
        device_id,
        timestamp,
        usage,
        measurements,
    })
}

/// ASCII up to the first NUL; bytes outside ASCII become `?`.
fn decode_device_addr(buf: &[u8]) -> String {
    buf.iter()
        .take_while(|&&b| b != 0)
        .map(|&b| if b.is_ascii() { b as char } else { '?' })
        .collect()
}
