//! End-to-end codec tests: encoder output fed back through the decoder.

use std::time::{Duration, Instant};

use tidewire_core::error::{ErrorKind, ProtocolViolationKind};

use super::{Decoder, Encoder, StreamEvent};
use crate::frame::{FrameHeader, FrameType, FRAME_HEADER_SIZE, MAX_FRAME_PAYLOAD};

fn wire_bytes(frames: &[crate::frame::Frame]) -> Vec<u8> {
    Encoder::serialize_frames(frames).concat()
}

#[test]
fn single_frame_message_round_trip() {
    let frames = Encoder::encode_message(1, b"hello world", true).unwrap();
    let mut decoder = Decoder::default();
    decoder.feed(&wire_bytes(&frames)).unwrap();

    let message = decoder.next_message().unwrap();
    assert_eq!(message.message_id, 1);
    assert_eq!(message.data, b"hello world");
    assert!(decoder.next_message().is_none());
}

#[test]
fn fragmented_message_reassembles_across_arbitrary_chunks() {
    // 300 KiB with CRC fragments into 2 frames.
    let data = vec![0xAB; 300 * 1024];
    let frames = Encoder::encode_message(42, &data, true).unwrap();
    assert_eq!(frames.len(), 2);

    let stream = wire_bytes(&frames);
    let mut decoder = Decoder::default();

    // Feed in three uneven chunks that do not align with frame boundaries.
    let first = stream.len() / 3 + 7;
    let second = stream.len() / 2 + 11;
    decoder.feed(&stream[..first]).unwrap();
    assert!(decoder.next_message().is_none());
    decoder.feed(&stream[first..second]).unwrap();
    decoder.feed(&stream[second..]).unwrap();

    let message = decoder.next_message().unwrap();
    assert_eq!(message.message_id, 42);
    assert_eq!(message.data.len(), 307_200);
    assert!(message.data.iter().all(|&b| b == 0xAB));
    assert!(decoder.next_message().is_none());
    assert_eq!(decoder.stats().messages_completed, 1);
}

#[test]
fn byte_at_a_time_feeding_still_decodes() {
    let frames = Encoder::encode_message(5, b"drip", true).unwrap();
    let stream = wire_bytes(&frames);

    let mut decoder = Decoder::default();
    for byte in stream {
        decoder.feed(&[byte]).unwrap();
    }
    assert_eq!(decoder.next_message().unwrap().data, b"drip");
}

#[test]
fn corrupted_frame_is_skipped_and_stream_continues() {
    let mut stream = wire_bytes(&Encoder::encode_message(1, b"A", true).unwrap());
    let first_len = stream.len();
    stream.extend(wire_bytes(&Encoder::encode_message(2, b"B", true).unwrap()));

    // Flip one bit inside the CRC suffix of frame 1.
    stream[first_len - 1] ^= 0x01;

    let mut decoder = Decoder::default();
    decoder.feed(&stream).unwrap();

    assert_eq!(decoder.stats().crc_errors, 1);
    let message = decoder.next_message().unwrap();
    assert_eq!(message.message_id, 2);
    assert_eq!(message.data, b"B");
    assert!(decoder.next_message().is_none());
}

#[test]
fn corrupted_payload_byte_is_also_caught() {
    let mut stream = wire_bytes(&Encoder::encode_message(9, b"payload", true).unwrap());
    // Flip a bit in the first payload byte after the sub-header.
    stream[FRAME_HEADER_SIZE + 12] ^= 0x80;

    let mut decoder = Decoder::default();
    decoder.feed(&stream).unwrap();
    assert_eq!(decoder.stats().crc_errors, 1);
    assert!(decoder.next_message().is_none());
}

#[test]
fn large_round_trip_matches_input() {
    // A message spanning many frames with mixed content.
    let data: Vec<u8> = (0..2_000_000u32).map(|i| (i % 251) as u8).collect();
    let frames = Encoder::encode_message(77, &data, true).unwrap();
    assert!(frames.len() > 7);

    let mut decoder = Decoder::default();
    decoder.feed(&wire_bytes(&frames)).unwrap();
    let message = decoder.next_message().unwrap();
    assert_eq!(message.data, data);
}

#[test]
fn empty_message_round_trip() {
    let frames = Encoder::encode_message(3, b"", true).unwrap();
    let mut decoder = Decoder::default();
    decoder.feed(&wire_bytes(&frames)).unwrap();
    let message = decoder.next_message().unwrap();
    assert_eq!(message.message_id, 3);
    assert!(message.data.is_empty());
}

#[test]
fn pending_message_times_out_without_double_delivery() {
    // Hand-build slice 0 of a 3-slice message (id 7) by re-heading a
    // single-slice encoding.
    let slice0 = message_slice_frame(7, 3, 0, b"part0");

    let mut decoder = Decoder::new(Duration::from_secs(30));
    decoder.feed(&slice0).unwrap();
    assert_eq!(decoder.stats().pending_messages, 1);

    // 31 seconds later the partial assembly is reclaimed.
    let later = Instant::now() + Duration::from_secs(31);
    assert_eq!(decoder.cleanup_timeout_messages_at(later), 1);
    assert_eq!(decoder.stats().timeout_cleanups, 1);
    assert_eq!(decoder.stats().pending_messages, 0);

    // Late slices restart an (incomplete) assembly; nothing completes.
    decoder.feed(&message_slice_frame(7, 3, 1, b"part1")).unwrap();
    decoder.feed(&message_slice_frame(7, 3, 2, b"part2")).unwrap();
    assert!(decoder.next_message().is_none());
    assert_eq!(decoder.stats().messages_completed, 0);
}

#[test]
fn duplicate_slices_are_idempotent() {
    let slice = message_slice_frame(4, 2, 0, b"dup");
    let mut decoder = Decoder::default();
    decoder.feed(&slice).unwrap();
    decoder.feed(&slice).unwrap();
    assert_eq!(decoder.stats().pending_messages, 1);

    decoder.feed(&message_slice_frame(4, 2, 1, b"rest")).unwrap();
    let message = decoder.next_message().unwrap();
    assert_eq!(message.data, b"duprest");
    assert!(decoder.next_message().is_none());
}

#[test]
fn bad_magic_is_a_protocol_violation() {
    let mut stream = wire_bytes(&Encoder::encode_message(1, b"x", false).unwrap());
    stream[0] = 0x00;

    let mut decoder = Decoder::default();
    let err = decoder.feed(&stream).unwrap_err();
    assert!(matches!(err, ErrorKind::Protocol(ProtocolViolationKind::BadMagic)));
}

#[test]
fn bad_version_is_a_protocol_violation() {
    let mut stream = wire_bytes(&Encoder::encode_message(1, b"x", false).unwrap());
    stream[2] = 0x02;

    let mut decoder = Decoder::default();
    let err = decoder.feed(&stream).unwrap_err();
    assert!(matches!(err, ErrorKind::Protocol(ProtocolViolationKind::UnsupportedVersion)));
}

#[test]
fn oversized_payload_is_a_protocol_violation() {
    let header = FrameHeader::new(FrameType::Message, 0, (MAX_FRAME_PAYLOAD + 1) as u32);
    let mut stream = Vec::new();
    header.write_to(&mut stream);

    let mut decoder = Decoder::default();
    let err = decoder.feed(&stream).unwrap_err();
    assert!(matches!(err, ErrorKind::Protocol(ProtocolViolationKind::PayloadTooLarge)));
}

#[test]
fn bad_slice_index_is_a_protocol_violation() {
    // sequence equal to total_slices is out of range.
    let frame = message_slice_frame(1, 2, 2, b"oob");
    let mut decoder = Decoder::default();
    let err = decoder.feed(&frame).unwrap_err();
    assert!(matches!(err, ErrorKind::Protocol(ProtocolViolationKind::BadSliceIndex)));
}

#[test]
fn decoder_reset_clears_everything() {
    let mut decoder = Decoder::default();
    decoder.feed(&message_slice_frame(1, 2, 0, b"partial")).unwrap();
    assert_eq!(decoder.stats().pending_messages, 1);

    decoder.reset();
    let stats = decoder.stats();
    assert_eq!(stats.pending_messages, 0);
    assert_eq!(stats.bytes_received, 0);
    assert_eq!(stats.buffer_size, 0);
}

#[test]
fn stream_frames_round_trip() {
    let frames = vec![
        Encoder::encode_stream_start(11, 6).unwrap(),
        Encoder::encode_stream_chunk(11, 0, b"abc").unwrap(),
        Encoder::encode_stream_chunk(11, 3, b"def").unwrap(),
        Encoder::encode_stream_end(11, 0x1234_5678).unwrap(),
    ];

    let mut decoder = Decoder::default();
    decoder.feed(&wire_bytes(&frames)).unwrap();

    assert_eq!(
        decoder.next_stream_event().unwrap(),
        StreamEvent::Start { stream_id: 11, total_size: 6 }
    );
    assert_eq!(
        decoder.next_stream_event().unwrap(),
        StreamEvent::Chunk { stream_id: 11, offset: 0, data: b"abc".to_vec() }
    );
    assert_eq!(
        decoder.next_stream_event().unwrap(),
        StreamEvent::Chunk { stream_id: 11, offset: 3, data: b"def".to_vec() }
    );
    assert_eq!(
        decoder.next_stream_event().unwrap(),
        StreamEvent::End { stream_id: 11, crc32: 0x1234_5678 }
    );
    assert!(decoder.next_stream_event().is_none());
    assert_eq!(decoder.stats().stream_events, 4);
}

#[test]
fn stats_track_bytes_and_frames() {
    let frames = Encoder::encode_message(1, b"counted", true).unwrap();
    let stream = wire_bytes(&frames);

    let mut decoder = Decoder::default();
    decoder.feed(&stream).unwrap();
    let stats = decoder.stats();
    assert_eq!(stats.bytes_received, stream.len() as u64);
    assert_eq!(stats.frames_received, 1);
    assert_eq!(stats.buffer_size, 0);
}

/// Builds one wire-encoded Message frame with an explicit slice position,
/// CRC enabled.
fn message_slice_frame(message_id: u64, total: u16, sequence: u16, data: &[u8]) -> Vec<u8> {
    use byteorder::{NativeEndian, WriteBytesExt};

    use super::checksum::crc32;
    use crate::frame::{Frame, FLAG_CRC32, MESSAGE_HEADER_SIZE};

    let mut payload = Vec::with_capacity(MESSAGE_HEADER_SIZE + data.len() + 4);
    let _ = payload.write_u64::<NativeEndian>(message_id);
    let _ = payload.write_u16::<NativeEndian>(total);
    let _ = payload.write_u16::<NativeEndian>(sequence);
    payload.extend_from_slice(data);
    let value = crc32(&payload);
    let _ = payload.write_u32::<NativeEndian>(value);

    Frame {
        header: FrameHeader::new(FrameType::Message, FLAG_CRC32, payload.len() as u32),
        payload,
    }
    .serialize()
}
