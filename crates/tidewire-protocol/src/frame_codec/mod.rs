//! Frame encoding and decoding.
//!
//! The encoder turns application messages and stream operations into wire
//! frames; the decoder is feed-driven and tolerant of arbitrary TCP
//! segmentation. CRC32 protection is per frame and non-fatal on mismatch:
//! a corrupt frame is counted and skipped, and decoding continues.

/// CRC32 checksum utilities.
pub mod checksum;
/// Feed-driven frame decoding and message reassembly.
pub mod decoder;
/// Message fragmentation and frame construction.
pub mod encoder;

pub use decoder::{CompletedMessage, Decoder, DecoderStats, StreamEvent};
pub use encoder::Encoder;

#[cfg(test)]
mod tests;
