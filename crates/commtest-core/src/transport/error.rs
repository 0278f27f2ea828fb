//! Transport errors

use thiserror::Error;

/// Errors raised by a byte channel
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Failed to listen on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Channel is not open")]
    NotOpen,

    #[error("No peer connected")]
    NotConnected,

    #[error("Only {written} of {expected} bytes could be written")]
    Incomplete { written: usize, expected: usize },

    #[error("Previous write timed out with bytes still pending")]
    WriteStalled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for TransportError {
    fn from(err: serialport::Error) -> Self {
        TransportError::Serial(err.to_string())
    }
}
