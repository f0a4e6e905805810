//! CRC32 checksum utilities for frame integrity verification.

use crc32fast::Hasher;

/// Computes the CRC32 of `data`.
///
/// Standard reflected CRC-32 (polynomial 0xEDB88320, initial value
/// 0xFFFFFFFF, final xor 0xFFFFFFFF), matching the wire format bit for bit.
pub fn crc32(data: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
