//! Byte Channels
//!
//! One trait, two real implementations (serial port, TCP server with a single
//! peer) and the in-memory [`crate::demo::DemoDevice`]. The channel is picked
//! once when the engine activates a transport; nothing downstream switches on
//! the channel kind.
//!
//! All I/O is non-blocking. [`Transport::poll`] moves whatever the OS has
//! ready in either direction and reports when a complete inbound burst is
//! waiting for [`Transport::read`].

mod activity;
mod error;
pub mod network;
pub mod serial;
mod timeout;

pub(crate) use activity::LinkActivity;
pub use error::TransportError;
pub use network::NetworkTransport;
pub use serial::{list_ports, PortInfo, SerialTransport};
pub use timeout::TimeoutModel;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::LinkConfig;

/// Size of a single read from the OS
pub const READ_BUFFER_SIZE: usize = 4096;

/// Channel selection tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// Serial port
    Serial,
    /// TCP
    Network,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Serial => write!(f, "serial"),
            ChannelKind::Network => write!(f, "network"),
        }
    }
}

/// Abstraction for half-duplex test channels (serial, TCP or simulated)
pub trait Transport: Send {
    /// Which channel this is
    fn kind(&self) -> ChannelKind;

    /// Human readable identifier (port name or listen address)
    fn name(&self) -> &str;

    /// Release the underlying channel. Pending output gets one last flush.
    fn close(&mut self);

    /// Whether the channel is open
    fn is_open(&self) -> bool;

    /// Submit `bytes` for sending.
    ///
    /// Fails when the channel is closed or has no peer, when the previous
    /// write stalled, or when the OS refuses the bytes outright. Bytes the OS
    /// cannot take right away stay queued and go out on later polls.
    fn write(&mut self, bytes: &[u8], now: Instant) -> Result<(), TransportError>;

    /// Return and clear everything received since the last read
    fn read(&mut self) -> Vec<u8>;

    /// Move ready bytes in both directions without blocking.
    ///
    /// Returns `true` when a complete inbound burst is ready for [`read`](Self::read).
    fn poll(&mut self, now: Instant) -> Result<bool, TransportError>;

    /// When the last write was submitted
    fn last_sent_at(&self) -> Option<Instant>;

    /// When the last inbound chunk arrived
    fn last_received_at(&self) -> Option<Instant>;

    /// Timeout model of this channel
    fn timeout_model(&self) -> TimeoutModel;

    /// Time allowed to move `n_bytes` over this channel
    fn per_size_timeout(&self, n_bytes: usize) -> Duration {
        self.timeout_model().per_size_timeout(n_bytes)
    }
}

/// Open the transport selected by `config`
pub fn open_transport(config: &LinkConfig) -> Result<Box<dyn Transport>, TransportError> {
    match config {
        LinkConfig::Serial(serial) => Ok(Box::new(SerialTransport::open(serial)?)),
        LinkConfig::Network(network) => Ok(Box::new(NetworkTransport::listen(network)?)),
    }
}
