//! Message fragmentation and frame construction.

use byteorder::{NativeEndian, WriteBytesExt};

use tidewire_core::error::{ErrorKind, ProtocolViolationKind, Result};

use super::checksum::crc32;
use crate::frame::{
    Frame, FrameHeader, FrameType, FLAG_CRC32, MAX_FRAME_PAYLOAD, MAX_MESSAGE_SLICES,
    MESSAGE_HEADER_SIZE,
};

/// Stream chunk sub-header size (`stream_id` + `offset`).
const STREAM_CHUNK_HEADER_SIZE: usize = 16;

/// Serializes application messages and stream operations into wire frames.
pub struct Encoder;

impl Encoder {
    /// Builds a single frame, appending a CRC32 suffix when requested.
    fn make_frame(frame_type: FrameType, mut payload: Vec<u8>, crc: bool) -> Result<Frame> {
        if payload.len() > MAX_FRAME_PAYLOAD {
            return Err(ErrorKind::Protocol(ProtocolViolationKind::PayloadTooLarge));
        }

        let flags = if crc { FLAG_CRC32 } else { 0 };
        if crc {
            let value = crc32(&payload);
            let _ = payload.write_u32::<NativeEndian>(value);
        }

        Ok(Frame {
            header: FrameHeader::new(frame_type, flags, payload.len() as u32),
            payload,
        })
    }

    /// Encodes a message, splitting it into as many `Message` frames as its
    /// size requires. Each frame's payload is the 12-byte message sub-header
    /// followed by one slice of the data (plus the CRC32 suffix when
    /// `enable_crc` is set).
    ///
    /// Fails with a `MessageTooLarge` violation when the slice count would
    /// not fit 16 bits. An empty message encodes as a single empty slice.
    pub fn encode_message(message_id: u64, data: &[u8], enable_crc: bool) -> Result<Vec<Frame>> {
        let slice_payload =
            MAX_FRAME_PAYLOAD - MESSAGE_HEADER_SIZE - if enable_crc { 4 } else { 0 };

        let total = data.len().div_ceil(slice_payload).max(1);
        if total > MAX_MESSAGE_SLICES {
            return Err(ErrorKind::Protocol(ProtocolViolationKind::MessageTooLarge));
        }

        let mut frames = Vec::with_capacity(total);
        for sequence in 0..total {
            let offset = sequence * slice_payload;
            let chunk = slice_payload.min(data.len() - offset);

            let mut payload = Vec::with_capacity(MESSAGE_HEADER_SIZE + chunk);
            let _ = payload.write_u64::<NativeEndian>(message_id);
            let _ = payload.write_u16::<NativeEndian>(total as u16);
            let _ = payload.write_u16::<NativeEndian>(sequence as u16);
            payload.extend_from_slice(&data[offset..offset + chunk]);

            frames.push(Self::make_frame(FrameType::Message, payload, enable_crc)?);
        }
        Ok(frames)
    }

    /// Encodes a stream-start frame announcing `total_size` bytes
    /// (0 when unknown).
    pub fn encode_stream_start(stream_id: u64, total_size: u64) -> Result<Frame> {
        let mut payload = Vec::with_capacity(16);
        let _ = payload.write_u64::<NativeEndian>(stream_id);
        let _ = payload.write_u64::<NativeEndian>(total_size);
        Self::make_frame(FrameType::StreamStart, payload, false)
    }

    /// Encodes one stream chunk at the given offset.
    pub fn encode_stream_chunk(stream_id: u64, offset: u64, data: &[u8]) -> Result<Frame> {
        if data.len() + STREAM_CHUNK_HEADER_SIZE > MAX_FRAME_PAYLOAD {
            return Err(ErrorKind::Protocol(ProtocolViolationKind::ChunkTooLarge));
        }

        let mut payload = Vec::with_capacity(STREAM_CHUNK_HEADER_SIZE + data.len());
        let _ = payload.write_u64::<NativeEndian>(stream_id);
        let _ = payload.write_u64::<NativeEndian>(offset);
        payload.extend_from_slice(data);
        Self::make_frame(FrameType::StreamChunk, payload, false)
    }

    /// Encodes a stream-end frame. The CRC32 field is advisory and carried
    /// through; the decoder does not verify it.
    pub fn encode_stream_end(stream_id: u64, crc: u32) -> Result<Frame> {
        let mut payload = Vec::with_capacity(12);
        let _ = payload.write_u64::<NativeEndian>(stream_id);
        let _ = payload.write_u32::<NativeEndian>(crc);
        Self::make_frame(FrameType::StreamEnd, payload, false)
    }

    /// Serializes frames into wire packets, one per frame.
    pub fn serialize_frames(frames: &[Frame]) -> Vec<Vec<u8>> {
        frames.iter().map(Frame::serialize).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_message_is_a_single_frame() {
        let frames = Encoder::encode_message(1, b"hello", false).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].header.frame_type, FrameType::Message as u8);
        assert_eq!(frames[0].payload.len(), MESSAGE_HEADER_SIZE + 5);
    }

    #[test]
    fn crc_suffix_extends_payload_and_sets_flag() {
        let frames = Encoder::encode_message(1, b"hello", true).unwrap();
        assert!(frames[0].header.has_crc());
        assert_eq!(frames[0].payload.len(), MESSAGE_HEADER_SIZE + 5 + 4);
        assert_eq!(frames[0].header.payload_len as usize, frames[0].payload.len());
    }

    #[test]
    fn large_message_fragments() {
        // 300 KiB does not fit one 256 KiB frame.
        let data = vec![0xAB; 300 * 1024];
        let frames = Encoder::encode_message(42, &data, true).unwrap();
        assert_eq!(frames.len(), 2);

        let carried: usize = frames
            .iter()
            .map(|f| f.payload.len() - MESSAGE_HEADER_SIZE - 4)
            .sum();
        assert_eq!(carried, data.len());
    }

    #[test]
    fn empty_message_encodes_one_empty_slice() {
        let frames = Encoder::encode_message(7, b"", false).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].payload.len(), MESSAGE_HEADER_SIZE);
    }

    #[test]
    fn oversized_stream_chunk_is_rejected() {
        let data = vec![0u8; MAX_FRAME_PAYLOAD];
        let err = Encoder::encode_stream_chunk(1, 0, &data).unwrap_err();
        assert!(matches!(err, ErrorKind::Protocol(ProtocolViolationKind::ChunkTooLarge)));
    }

    #[test]
    fn stream_frames_carry_expected_sizes() {
        let start = Encoder::encode_stream_start(5, 1_000).unwrap();
        assert_eq!(start.payload.len(), 16);
        let chunk = Encoder::encode_stream_chunk(5, 0, b"abc").unwrap();
        assert_eq!(chunk.payload.len(), 16 + 3);
        let end = Encoder::encode_stream_end(5, 0xDEAD_BEEF).unwrap();
        assert_eq!(end.payload.len(), 12);
    }
}
