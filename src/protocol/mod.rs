//! Protocol module - wire format, frame codec, and stream reassembly.
//!
//! This module implements the device-facing binary protocol:
//! - Telemetry frame decoding/encoding
//! - 9-byte ACK/NEK control frames
//! - Frame decoder for accumulating partial reads

mod frame;
mod frame_buffer;
mod wire_format;

pub use frame::{
    decode, decode_with, DecodeError, DecodeMode, Frame, MeasurementRecord, Timestamp, MAX_RECORDS,
    MAX_YEAR, TIMESTAMP_FORMAT,
};
pub use frame_buffer::{is_valid_packet, DecoderConfig, FrameDecoder, ResyncPolicy};
pub use wire_format::{
    decode_control_frame, encode_control_frame, offsets, tags, ControlKind, ACK_TYPE,
    CONTROL_FRAME_SIZE, DATE_SIZE, DEFAULT_CONTROL_VERSION, DEFAULT_MAX_FRAME_SIZE,
    DEVICE_ADDR_SIZE, DISCARD_THRESHOLD, FIXED_OVERHEAD, FRAME_HEADER, FRAME_TAIL,
    MIN_FRAME_SIZE, NEK_TYPE, RECORD_SIZE,
};
