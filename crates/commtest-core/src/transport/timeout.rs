//! Timeout model
//!
//! Maps a byte count to the time a channel needs to move it. The sequencer
//! builds its per-frame deadline from this (plus a fixed margin), and the
//! transports use it for their own read/write inactivity timers.

use std::time::Duration;

/// Per-channel transfer time estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutModel {
    /// Cost derived from the baud rate, in whole milliseconds per byte
    Serial { per_byte_ms: u64 },
    /// Coarse size-scaled heuristic for TCP
    Network,
}

impl TimeoutModel {
    /// Serial model for `baud_rate`, assuming `frame_bits` bits per character.
    ///
    /// Per-byte cost is `ceil(4000 / (baud_rate / frame_bits))` ms.
    pub fn serial(baud_rate: u32, frame_bits: u8) -> Self {
        let chars_per_sec = (baud_rate / u32::from(frame_bits.max(1))).max(1);
        Self::Serial {
            per_byte_ms: 4000u64.div_ceil(u64::from(chars_per_sec)),
        }
    }

    /// TCP model
    pub fn network() -> Self {
        Self::Network
    }

    /// Time allowed to transfer `n_bytes`
    pub fn per_size_timeout(&self, n_bytes: usize) -> Duration {
        let n = n_bytes as u64;
        let ms = match self {
            TimeoutModel::Serial { per_byte_ms } => 1 + per_byte_ms * n,
            // TODO: replace with a latency measured during the first rounds
            TimeoutModel::Network => 5 + n / 500,
        };
        Duration::from_millis(ms)
    }
}
