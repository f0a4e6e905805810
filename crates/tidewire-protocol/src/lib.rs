#![warn(missing_docs)]

//! tidewire-protocol: the stream-level framing codec.
//!
//! The codec sits above the raw byte transport. An [`frame_codec::Encoder`]
//! splits application messages into wire frames (with optional per-frame
//! CRC32), and a [`frame_codec::Decoder`] reassembles frames fed in
//! arbitrary chunks back into messages and stream events.
//!
//! Frame fields travel in the byte order of the producing host; the codec
//! is a same-architecture protocol by design.

/// Frame layout: header, types and wire constants.
pub mod frame;
/// Encoding and decoding of frames, messages and streams.
pub mod frame_codec;

pub use frame::{Frame, FrameHeader, FrameType};
pub use frame_codec::{
    CompletedMessage, Decoder, DecoderStats, Encoder, StreamEvent,
};
