//! Property tests for the frame codec and the incremental decoder.

use hydrolink::protocol::{
    decode, is_valid_packet, tags, Frame, FrameDecoder, MeasurementRecord, Timestamp,
    DISCARD_THRESHOLD, FIXED_OVERHEAD, FRAME_HEADER, FRAME_TAIL, MIN_FRAME_SIZE, RECORD_SIZE,
};
use proptest::prelude::*;

/// Raw frame with `payload` bytes in the record area and an arbitrary
/// usage byte, independent of how many records actually fit.
fn raw_frame(usage: u8, payload: &[u8]) -> Vec<u8> {
    let total = FIXED_OVERHEAD + payload.len();
    let mut buf = Vec::with_capacity(total);
    buf.push(FRAME_HEADER);
    buf.push(0x01);
    buf.extend_from_slice(&(total as u32).to_le_bytes());
    buf.push(0x01);
    buf.push(usage);
    buf.extend_from_slice(b"PROP-DEVICE\0");
    buf.extend_from_slice(&2024u16.to_le_bytes());
    buf.extend_from_slice(&[1, 2, 3, 4, 5]);
    buf.push(usage);
    buf.extend_from_slice(payload);
    buf.push(FRAME_TAIL);
    buf
}

fn arb_frame() -> impl Strategy<Value = Frame> {
    (
        "[A-Z0-9]{1,12}",
        proptest::collection::vec((any::<u8>(), -1000.0f32..1000.0), 1..6),
    )
        .prop_map(|(device, values)| {
            let records = values
                .into_iter()
                .enumerate()
                .map(|(i, (sub, v))| {
                    let tag = if i % 2 == 0 { tags::WATER_LEVEL } else { tags::RAINFALL };
                    MeasurementRecord::new(tag, sub, v)
                })
                .collect();
            Frame::new(device, Timestamp::new(2023, 12, 31, 23, 59, 59), records)
        })
}

proptest! {
    #[test]
    fn prop_record_count_is_bounded_by_usage_and_length(
        usage in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..120),
    ) {
        let buf = raw_frame(usage, &payload);
        let frame = decode(&buf).unwrap();
        let fit = (buf.len() - FIXED_OVERHEAD) / RECORD_SIZE;
        prop_assert_eq!(frame.measurements.len(), usize::from(usage).min(fit));
    }

    #[test]
    fn prop_precheck_is_deterministic(buf in proptest::collection::vec(any::<u8>(), 0..300)) {
        prop_assert_eq!(is_valid_packet(&buf), is_valid_packet(&buf));
    }

    #[test]
    fn prop_short_buffers_never_extract(buf in proptest::collection::vec(any::<u8>(), 0..MIN_FRAME_SIZE)) {
        let mut decoder = FrameDecoder::new();
        decoder.feed(&buf);
        prop_assert!(matches!(decoder.try_extract(), Ok(None)));
        prop_assert_eq!(decoder.buffered(), &buf[..]);
    }

    #[test]
    fn prop_invalid_buffer_past_threshold_is_cleared(
        first in any::<u8>().prop_filter("not a header", |b| *b != FRAME_HEADER),
        rest in proptest::collection::vec(any::<u8>(), DISCARD_THRESHOLD..200),
    ) {
        let mut buf = vec![first];
        buf.extend_from_slice(&rest);

        let mut decoder = FrameDecoder::new();
        decoder.feed(&buf);
        prop_assert!(matches!(decoder.try_extract(), Ok(None)));
        prop_assert!(decoder.needs_resync());
        prop_assert_eq!(decoder.resync(), buf.len());
        prop_assert!(decoder.is_empty());
    }

    #[test]
    fn prop_chunking_does_not_change_output(
        frames in proptest::collection::vec(arb_frame(), 1..5),
        cuts in proptest::collection::vec(any::<prop::sample::Index>(), 0..8),
    ) {
        let stream: Vec<u8> = frames.iter().flat_map(Frame::encode).collect();

        let mut points: Vec<usize> = cuts.iter().map(|c| c.index(stream.len())).collect();
        points.sort_unstable();
        points.dedup();

        let mut decoder = FrameDecoder::new();
        let mut decoded = Vec::new();
        let mut start = 0;
        for end in points.into_iter().chain(std::iter::once(stream.len())) {
            decoder.feed(&stream[start..end]);
            start = end;
            while let Some((frame, _)) = decoder.try_extract().unwrap() {
                decoded.push(frame);
            }
        }

        prop_assert_eq!(decoded.len(), frames.len());
        for (got, sent) in decoded.iter().zip(&frames) {
            prop_assert_eq!(&got.device_id, &sent.device_id);
            prop_assert_eq!(&got.measurements, &sent.measurements);
        }
        prop_assert!(decoder.is_empty());
    }
}
