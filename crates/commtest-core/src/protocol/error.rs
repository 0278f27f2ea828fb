//! Protocol errors

use thiserror::Error;

use super::PROTOCOL_OVERHEAD;

/// Reasons an inbound buffer is not a valid frame.
///
/// Every variant is recoverable: the sequencer counts it as a protocol error
/// and keeps the session alive.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    #[error("Wrong length: {len} bytes, need more than {}", PROTOCOL_OVERHEAD)]
    TooShort { len: usize },

    #[error("Wrong header byte: {0:#04x}")]
    BadMarker(u8),

    #[error("Zero data length")]
    ZeroLength,

    #[error("Length mismatch: header declares {declared} payload bytes, frame carries {actual}")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("CRC mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}
