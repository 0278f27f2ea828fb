//! Frame checksum
//!
//! Reflected CRC-32 (polynomial 0xEDB88320, init 0xFFFFFFFF, final complement),
//! the same variant the device-side test driver computes over each payload.

use crc32fast::Hasher;

/// Compute the CRC-32 of `bytes`.
///
/// Any input is valid, including an empty slice.
pub fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}
