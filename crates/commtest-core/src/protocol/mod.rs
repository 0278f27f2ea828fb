//! Echo Test Protocol
//!
//! Framing shared by the serial and TCP channels: a zero marker, a big-endian
//! 16-bit length, the payload and a big-endian CRC32 of the payload.

pub mod checksum;
mod error;
pub mod frame;

pub use checksum::crc32;
pub use error::FrameError;
pub use frame::{unwrap, wrap};

use std::time::Duration;

/// Bytes added around every payload (marker + length + CRC)
pub const PROTOCOL_OVERHEAD: usize = 7;

/// Marker + length field
pub const HEADER_SIZE: usize = 3;

/// First byte of every frame
pub const FRAME_MARKER: u8 = 0x00;

/// Payload the device sends to request a new test
pub const START_PAYLOAD: [u8; 1] = [0x00];

/// Highest test index; the device-side driver uses the same value
pub const TEST_INDEX_MAX: u16 = 400;

/// Safety margin added on top of the transport's per-size timeout
pub const TEST_FRAME_TIMEOUT: Duration = Duration::from_millis(500);
