//! Wire format constants and control frame encoding.
//!
//! Telemetry frame layout (variable length):
//! ```text
//! ┌────────┬─────────┬──────────┬──────┬───────┬──────────┬────────┬───────┬──────────────┬──────┐
//! │ Header │ Version │ Length   │ Type │ Count │ DevAddr  │ Date   │ Usage │ Record × N   │ Tail │
//! │ 0x02   │ 1 byte  │ u32 LE   │ 1    │ 1     │ 12 ASCII │ 7      │ 1     │ 6 bytes each │ 0x03 │
//! └────────┴─────────┴──────────┴──────┴───────┴──────────┴────────┴───────┴──────────────┴──────┘
//! ```
//!
//! Control frame layout (ACK/NEK, always 9 bytes):
//! ```text
//! ┌────────┬─────────┬──────────────┬──────┬───────┬──────┐
//! │ 0x02   │ Version │ 0x00000009 LE│ Type │ 0x00  │ 0x03 │
//! └────────┴─────────┴──────────────┴──────┴───────┴──────┘
//! ```
//!
//! All multi-byte integers are Little Endian.

/// Start-of-frame marker.
pub const FRAME_HEADER: u8 = 0x02;

/// End-of-frame marker.
pub const FRAME_TAIL: u8 = 0x03;

/// Protocol version written into control frames unless configured otherwise.
pub const DEFAULT_CONTROL_VERSION: u8 = 0x01;

/// Control frame size in bytes (fixed, exactly 9).
pub const CONTROL_FRAME_SIZE: usize = 9;

/// Smallest buffer the precheck accepts (fixed fields plus one record).
pub const MIN_FRAME_SIZE: usize = 35;

/// Bytes taken by every field except the measurement records.
pub const FIXED_OVERHEAD: usize = 29;

/// One measurement record: tag + sub id + f32 value.
pub const RECORD_SIZE: usize = 6;

/// Buffers longer than this that fail the precheck are discarded.
pub const DISCARD_THRESHOLD: usize = 20;

/// Default upper bound on a declared frame length.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

/// Device address field width.
pub const DEVICE_ADDR_SIZE: usize = 12;

/// Date field width (year LE u16 + month, day, hour, minute, second).
pub const DATE_SIZE: usize = 7;

/// Field offsets inside a telemetry frame.
pub mod offsets {
    pub const HEADER: usize = 0;
    pub const VERSION: usize = 1;
    pub const LENGTH: usize = 2;
    pub const PACKET_TYPE: usize = 6;
    pub const DATA_COUNT: usize = 7;
    pub const DEVICE_ADDR: usize = 8;
    pub const DATE: usize = 20;
    pub const USAGE: usize = 27;
    pub const RECORDS: usize = 28;
}

/// Measurement channel tags.
pub mod tags {
    /// Water level channel.
    pub const WATER_LEVEL: u8 = 0x10;
    /// Rainfall channel.
    pub const RAINFALL: u8 = 0x16;
}

/// Packet type byte of an ACK control frame.
pub const ACK_TYPE: u8 = 0x81;

/// Packet type byte of a NEK control frame.
pub const NEK_TYPE: u8 = 0xF0;

/// Kind of control frame sent back to a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Frame ingested.
    Ack,
    /// Input rejected as unparsable.
    Nek,
}

impl ControlKind {
    /// Packet type byte for this kind.
    #[inline]
    pub fn type_byte(self) -> u8 {
        match self {
            ControlKind::Ack => ACK_TYPE,
            ControlKind::Nek => NEK_TYPE,
        }
    }

    /// Map a packet type byte back to a control kind.
    pub fn from_type_byte(byte: u8) -> Option<Self> {
        match byte {
            ACK_TYPE => Some(ControlKind::Ack),
            NEK_TYPE => Some(ControlKind::Nek),
            _ => None,
        }
    }
}

/// Encode a control frame.
///
/// # Example
///
/// ```
/// use hydrolink::protocol::{encode_control_frame, ControlKind};
///
/// let bytes = encode_control_frame(ControlKind::Ack, 0x01);
/// assert_eq!(bytes, [0x02, 0x01, 0x09, 0x00, 0x00, 0x00, 0x81, 0x00, 0x03]);
/// ```
pub fn encode_control_frame(kind: ControlKind, version: u8) -> [u8; CONTROL_FRAME_SIZE] {
    let mut buf = [0u8; CONTROL_FRAME_SIZE];
    buf[0] = FRAME_HEADER;
    buf[1] = version;
    buf[2..6].copy_from_slice(&(CONTROL_FRAME_SIZE as u32).to_le_bytes());
    buf[6] = kind.type_byte();
    buf[7] = 0x00;
    buf[8] = FRAME_TAIL;
    buf
}

/// Decode a control frame.
///
/// Returns `None` unless `buf` is exactly a well-formed ACK or NEK.
pub fn decode_control_frame(buf: &[u8]) -> Option<ControlKind> {
    if buf.len() != CONTROL_FRAME_SIZE
        || buf[0] != FRAME_HEADER
        || buf[8] != FRAME_TAIL
        || read_u32_le(buf, 2) as usize != CONTROL_FRAME_SIZE
    {
        return None;
    }
    ControlKind::from_type_byte(buf[6])
}

/// Read a little-endian u32 at `offset`.
///
/// Caller guarantees `buf.len() >= offset + 4`.
#[inline]
pub(crate) fn read_u32_le(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}
