//! Feed-driven frame decoding and message reassembly.
//!
//! The decoder owns an internal byte buffer so callers can feed it whatever
//! segmentation the transport produced. Completed messages and stream
//! events queue up until drained with [`Decoder::next_message`] /
//! [`Decoder::next_stream_event`].
//!
//! CRC32 mismatches are non-fatal: the frame is counted and skipped.
//! Structural violations (bad magic, bad version, oversized or truncated
//! payloads, bad slice indices) are fatal to the feed call; the decoder
//! stays in a defined state and the caller may `reset` or drop the
//! connection.

use std::{
    collections::{HashMap, VecDeque},
    io::Cursor,
    time::{Duration, Instant},
};

use byteorder::{NativeEndian, ReadBytesExt};

use tidewire_core::error::{ErrorKind, ProtocolViolationKind, Result};

use super::checksum::crc32;
use crate::frame::{
    FrameHeader, FrameType, FRAME_HEADER_SIZE, MAGIC1, MAGIC2, MAX_FRAME_PAYLOAD,
    MESSAGE_HEADER_SIZE, VERSION,
};

/// A fully reassembled message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedMessage {
    /// The message id shared by all of the message's slices.
    pub message_id: u64,
    /// The reassembled message bytes, slices concatenated in order.
    pub data: Vec<u8>,
}

/// A decoded stream frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A stream was announced.
    Start {
        /// The stream identifier.
        stream_id: u64,
        /// Declared total size in bytes; 0 when unknown.
        total_size: u64,
    },
    /// A chunk of stream data arrived.
    Chunk {
        /// The stream identifier.
        stream_id: u64,
        /// Offset of this chunk within the stream.
        offset: u64,
        /// The chunk bytes.
        data: Vec<u8>,
    },
    /// A stream ended.
    End {
        /// The stream identifier.
        stream_id: u64,
        /// Advisory CRC32 of the whole stream; carried through unverified.
        crc32: u32,
    },
}

/// Decoder observability counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecoderStats {
    /// Total bytes fed into the decoder.
    pub bytes_received: u64,
    /// Frames fully parsed (including skipped corrupt frames).
    pub frames_received: u64,
    /// Messages reassembled to completion.
    pub messages_completed: u64,
    /// Stream events decoded.
    pub stream_events: u64,
    /// Frames dropped due to CRC32 mismatch.
    pub crc_errors: u64,
    /// Partial messages reclaimed by the reassembly timeout.
    pub timeout_cleanups: u64,
    /// Partial messages currently awaiting slices.
    pub pending_messages: usize,
    /// Bytes currently buffered awaiting a complete frame.
    pub buffer_size: usize,
}

/// Reassembly state for one in-flight fragmented message.
#[derive(Debug)]
struct MessageAssembly {
    total_slices: u16,
    slices: Vec<Option<Vec<u8>>>,
    received: u16,
    first_seen: Instant,
}

/// Feed-driven decoder for the tidewire frame stream.
#[derive(Debug)]
pub struct Decoder {
    buffer: Vec<u8>,
    pending: HashMap<u64, MessageAssembly>,
    completed: VecDeque<CompletedMessage>,
    stream_events: VecDeque<StreamEvent>,
    stats: DecoderStats,
    message_timeout: Duration,
}

impl Decoder {
    /// Creates a decoder with the given reassembly timeout.
    pub fn new(message_timeout: Duration) -> Self {
        Self {
            buffer: Vec::new(),
            pending: HashMap::new(),
            completed: VecDeque::new(),
            stream_events: VecDeque::new(),
            stats: DecoderStats::default(),
            message_timeout,
        }
    }

    /// Feeds bytes into the decoder and decodes as many complete frames as
    /// the buffer now holds.
    pub fn feed(&mut self, data: &[u8]) -> Result<()> {
        self.stats.bytes_received += data.len() as u64;
        self.buffer.extend_from_slice(data);
        self.try_decode()
    }

    fn try_decode(&mut self) -> Result<()> {
        loop {
            let Some(header) = FrameHeader::read_from(&self.buffer) else {
                return Ok(());
            };

            if header.magic1 != MAGIC1 || header.magic2 != MAGIC2 {
                return Err(ErrorKind::Protocol(ProtocolViolationKind::BadMagic));
            }
            if header.version != VERSION {
                return Err(ErrorKind::Protocol(ProtocolViolationKind::UnsupportedVersion));
            }
            if header.payload_len as usize > MAX_FRAME_PAYLOAD {
                return Err(ErrorKind::Protocol(ProtocolViolationKind::PayloadTooLarge));
            }

            let frame_size = FRAME_HEADER_SIZE + header.payload_len as usize;
            if self.buffer.len() < frame_size {
                return Ok(());
            }

            self.stats.frames_received += 1;

            // CRC check first: a corrupt frame is consumed and skipped
            // without interpreting its contents.
            let mut payload_data_len = header.payload_len as usize;
            if header.has_crc() && payload_data_len >= 4 {
                payload_data_len -= 4;
                let payload = &self.buffer[FRAME_HEADER_SIZE..frame_size];
                let mut received = [0u8; 4];
                received.copy_from_slice(&payload[payload_data_len..]);
                let received = u32::from_ne_bytes(received);
                if received != crc32(&payload[..payload_data_len]) {
                    self.stats.crc_errors += 1;
                    self.consume(frame_size);
                    continue;
                }
            }

            let frame_type = match FrameType::try_from(header.frame_type) {
                Ok(t) => t,
                Err(kind) => return Err(ErrorKind::Protocol(kind)),
            };

            let result = {
                let payload = &self.buffer[FRAME_HEADER_SIZE..FRAME_HEADER_SIZE + payload_data_len];
                match frame_type {
                    FrameType::Message => Self::decode_message_slice(
                        &mut self.pending,
                        &mut self.completed,
                        &mut self.stats,
                        payload,
                    ),
                    FrameType::StreamStart | FrameType::StreamChunk | FrameType::StreamEnd => {
                        Self::decode_stream_frame(
                            &mut self.stream_events,
                            &mut self.stats,
                            frame_type,
                            payload,
                        )
                    }
                }
            };
            result?;

            self.consume(frame_size);
        }
    }

    fn decode_message_slice(
        pending: &mut HashMap<u64, MessageAssembly>,
        completed: &mut VecDeque<CompletedMessage>,
        stats: &mut DecoderStats,
        payload: &[u8],
    ) -> Result<()> {
        if payload.len() < MESSAGE_HEADER_SIZE {
            return Err(ErrorKind::Protocol(ProtocolViolationKind::TruncatedPayload));
        }

        let mut cursor = Cursor::new(payload);
        let message_id = cursor.read_u64::<NativeEndian>().map_err(ErrorKind::Io)?;
        let total_slices = cursor.read_u16::<NativeEndian>().map_err(ErrorKind::Io)?;
        let sequence = cursor.read_u16::<NativeEndian>().map_err(ErrorKind::Io)?;

        if sequence >= total_slices {
            return Err(ErrorKind::Protocol(ProtocolViolationKind::BadSliceIndex));
        }

        let assembly = pending.entry(message_id).or_insert_with(|| MessageAssembly {
            total_slices,
            slices: vec![None; total_slices as usize],
            received: 0,
            first_seen: Instant::now(),
        });
        if sequence >= assembly.total_slices {
            return Err(ErrorKind::Protocol(ProtocolViolationKind::BadSliceIndex));
        }

        // Duplicate slices are ignored; only the first copy counts.
        let slot = &mut assembly.slices[sequence as usize];
        if slot.is_none() {
            *slot = Some(payload[MESSAGE_HEADER_SIZE..].to_vec());
            assembly.received += 1;
        }

        if assembly.received == assembly.total_slices {
            let assembly = pending.remove(&message_id).expect("assembly just inserted");
            let mut data = Vec::new();
            for slice in assembly.slices {
                data.extend_from_slice(&slice.unwrap_or_default());
            }
            completed.push_back(CompletedMessage { message_id, data });
            stats.messages_completed += 1;
        }
        Ok(())
    }

    fn decode_stream_frame(
        stream_events: &mut VecDeque<StreamEvent>,
        stats: &mut DecoderStats,
        frame_type: FrameType,
        payload: &[u8],
    ) -> Result<()> {
        let mut cursor = Cursor::new(payload);
        let event = match frame_type {
            FrameType::StreamStart => {
                if payload.len() < 16 {
                    return Err(ErrorKind::Protocol(ProtocolViolationKind::TruncatedPayload));
                }
                StreamEvent::Start {
                    stream_id: cursor.read_u64::<NativeEndian>().map_err(ErrorKind::Io)?,
                    total_size: cursor.read_u64::<NativeEndian>().map_err(ErrorKind::Io)?,
                }
            }
            FrameType::StreamChunk => {
                if payload.len() < 16 {
                    return Err(ErrorKind::Protocol(ProtocolViolationKind::TruncatedPayload));
                }
                StreamEvent::Chunk {
                    stream_id: cursor.read_u64::<NativeEndian>().map_err(ErrorKind::Io)?,
                    offset: cursor.read_u64::<NativeEndian>().map_err(ErrorKind::Io)?,
                    data: payload[16..].to_vec(),
                }
            }
            FrameType::StreamEnd => {
                if payload.len() < 12 {
                    return Err(ErrorKind::Protocol(ProtocolViolationKind::TruncatedPayload));
                }
                StreamEvent::End {
                    stream_id: cursor.read_u64::<NativeEndian>().map_err(ErrorKind::Io)?,
                    crc32: cursor.read_u32::<NativeEndian>().map_err(ErrorKind::Io)?,
                }
            }
            FrameType::Message => unreachable!("message frames are handled separately"),
        };
        stream_events.push_back(event);
        stats.stream_events += 1;
        Ok(())
    }

    fn consume(&mut self, n: usize) {
        self.buffer.drain(..n);
    }

    /// Takes the next completed message, oldest first.
    pub fn next_message(&mut self) -> Option<CompletedMessage> {
        self.completed.pop_front()
    }

    /// Takes the next stream event, oldest first.
    pub fn next_stream_event(&mut self) -> Option<StreamEvent> {
        self.stream_events.pop_front()
    }

    /// Drops partial assemblies older than the reassembly timeout and
    /// returns how many were reclaimed.
    pub fn cleanup_timeout_messages(&mut self) -> usize {
        self.cleanup_timeout_messages_at(Instant::now())
    }

    /// Timeout reclamation against an explicit clock, for deterministic
    /// tests and callers that already hold a timestamp.
    pub fn cleanup_timeout_messages_at(&mut self, now: Instant) -> usize {
        let timeout = self.message_timeout;
        let before = self.pending.len();
        self.pending
            .retain(|_, assembly| now.saturating_duration_since(assembly.first_seen) < timeout);
        let cleaned = before - self.pending.len();
        self.stats.timeout_cleanups += cleaned as u64;
        cleaned
    }

    /// Returns a snapshot of the decoder's counters.
    pub fn stats(&self) -> DecoderStats {
        DecoderStats {
            pending_messages: self.pending.len(),
            buffer_size: self.buffer.len(),
            ..self.stats
        }
    }

    /// Clears all buffered bytes, partial assemblies, queued results and
    /// counters.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.pending.clear();
        self.completed.clear();
        self.stream_events.clear();
        self.stats = DecoderStats::default();
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}
