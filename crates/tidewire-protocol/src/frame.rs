//! Wire frame layout.
//!
//! A frame is a fixed 16-byte header followed by `payload_len` payload
//! bytes. All multi-byte fields are stored in the native byte order of the
//! producing host.
//!
//! ```text
//! offset  size  field
//! 0       1     magic1      = 0x5A
//! 1       1     magic2      = 0x5C
//! 2       1     version     = 0x01
//! 3       1     type        (Message / StreamStart / StreamChunk / StreamEnd)
//! 4       2     flags       bit 0 = CRC32 present
//! 6       4     payload_len <= 262_144
//! 10      4     reserved    = 0
//! 14      2     reserved2   = 0
//! ```

use std::io::Cursor;

use byteorder::{NativeEndian, ReadBytesExt, WriteBytesExt};

use tidewire_core::error::ProtocolViolationKind;

/// First magic byte of every frame.
pub const MAGIC1: u8 = 0x5A;
/// Second magic byte of every frame.
pub const MAGIC2: u8 = 0x5C;
/// Protocol version this codec speaks.
pub const VERSION: u8 = 0x01;
/// Flag bit: the last 4 payload bytes are a CRC32 of the preceding payload.
pub const FLAG_CRC32: u16 = 0x0001;
/// Size of the fixed frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 16;
/// Size of the message sub-header (`message_id`, `total_slices`, `sequence`).
pub const MESSAGE_HEADER_SIZE: usize = 12;
/// Upper bound on a frame's payload length.
pub const MAX_FRAME_PAYLOAD: usize = 256 * 1024;
/// Upper bound on the slice count of a fragmented message.
pub const MAX_MESSAGE_SLICES: usize = u16::MAX as usize;

/// The kind of content a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// One slice of a (possibly fragmented) message.
    Message = 0x01,
    /// Announces a stream and its total size.
    StreamStart = 0x02,
    /// One chunk of stream data at an explicit offset.
    StreamChunk = 0x03,
    /// Ends a stream, carrying an advisory whole-stream CRC32.
    StreamEnd = 0x04,
}

impl TryFrom<u8> for FrameType {
    type Error = ProtocolViolationKind;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(FrameType::Message),
            0x02 => Ok(FrameType::StreamStart),
            0x03 => Ok(FrameType::StreamChunk),
            0x04 => Ok(FrameType::StreamEnd),
            _ => Err(ProtocolViolationKind::UnknownFrameType),
        }
    }
}

/// The fixed 16-byte frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// First magic byte; always [`MAGIC1`].
    pub magic1: u8,
    /// Second magic byte; always [`MAGIC2`].
    pub magic2: u8,
    /// Protocol version; always [`VERSION`].
    pub version: u8,
    /// Raw frame type byte; see [`FrameType`].
    pub frame_type: u8,
    /// Frame flags; see [`FLAG_CRC32`].
    pub flags: u16,
    /// Number of payload bytes following the header.
    pub payload_len: u32,
    /// Reserved; always 0.
    pub reserved: u32,
    /// Reserved; always 0.
    pub reserved2: u16,
}

impl FrameHeader {
    /// Builds a header for the given type, flags and payload length.
    pub fn new(frame_type: FrameType, flags: u16, payload_len: u32) -> Self {
        Self {
            magic1: MAGIC1,
            magic2: MAGIC2,
            version: VERSION,
            frame_type: frame_type as u8,
            flags,
            payload_len,
            reserved: 0,
            reserved2: 0,
        }
    }

    /// Appends the 16 header bytes to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.push(self.magic1);
        out.push(self.magic2);
        out.push(self.version);
        out.push(self.frame_type);
        // Infallible: Vec<u8> writes cannot fail.
        let _ = out.write_u16::<NativeEndian>(self.flags);
        let _ = out.write_u32::<NativeEndian>(self.payload_len);
        let _ = out.write_u32::<NativeEndian>(self.reserved);
        let _ = out.write_u16::<NativeEndian>(self.reserved2);
    }

    /// Reads a header from the first [`FRAME_HEADER_SIZE`] bytes of `data`.
    ///
    /// Returns `None` when fewer bytes are available. No field validation
    /// happens here; the decoder checks magic, version and payload length.
    pub fn read_from(data: &[u8]) -> Option<Self> {
        if data.len() < FRAME_HEADER_SIZE {
            return None;
        }
        let mut cursor = Cursor::new(data);
        Some(Self {
            magic1: cursor.read_u8().ok()?,
            magic2: cursor.read_u8().ok()?,
            version: cursor.read_u8().ok()?,
            frame_type: cursor.read_u8().ok()?,
            flags: cursor.read_u16::<NativeEndian>().ok()?,
            payload_len: cursor.read_u32::<NativeEndian>().ok()?,
            reserved: cursor.read_u32::<NativeEndian>().ok()?,
            reserved2: cursor.read_u16::<NativeEndian>().ok()?,
        })
    }

    /// Returns true when the CRC32 flag is set.
    pub fn has_crc(&self) -> bool {
        self.flags & FLAG_CRC32 != 0
    }
}

/// One wire-level unit: a header and its payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// The frame's header.
    pub header: FrameHeader,
    /// The frame's payload, `header.payload_len` bytes long.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Serializes the frame into one contiguous wire packet.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(FRAME_HEADER_SIZE + self.payload.len());
        self.header.write_to(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }
}
