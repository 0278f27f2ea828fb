//! Configuration
//!
//! Test, serial and network settings. Everything is serde-friendly so the CLI
//! can load it from a JSON file and override single values from flags.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::protocol::{TEST_FRAME_TIMEOUT, TEST_INDEX_MAX};
use crate::transport::ChannelKind;

/// Default baud rate for the serial channel
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Port the device-side test drivers connect to
pub const DEFAULT_TCP_PORT: u16 = 6666;

/// Worst-case serial character size (start + 8 data + stop + margin)
pub const DEFAULT_FRAME_BITS: u8 = 12;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}

/// Test sequencing settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestConfig {
    /// Index at which a session is complete
    pub index_ceiling: u16,
    /// Margin added to every per-frame deadline, in milliseconds
    pub frame_margin_ms: u64,
    /// How often the engine polls the active transport, in milliseconds
    pub poll_interval_ms: u64,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            index_ceiling: TEST_INDEX_MAX,
            frame_margin_ms: TEST_FRAME_TIMEOUT.as_millis() as u64,
            poll_interval_ms: 1,
        }
    }
}

impl TestConfig {
    /// Deadline margin as a duration
    pub fn frame_margin(&self) -> Duration {
        Duration::from_millis(self.frame_margin_ms)
    }

    /// Poll interval as a duration (never zero)
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

/// Number of data bits per character
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum DataBits {
    Five,
    Six,
    Seven,
    #[default]
    Eight,
}

impl TryFrom<u8> for DataBits {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            other => Err(ConfigError::InvalidValue {
                field: "data_bits",
                value: other.to_string(),
            }),
        }
    }
}

impl From<DataBits> for u8 {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => 5,
            DataBits::Six => 6,
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Parity checking mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum StopBits {
    #[default]
    One,
    Two,
}

impl TryFrom<u8> for StopBits {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            other => Err(ConfigError::InvalidValue {
                field: "stop_bits",
                value: other.to_string(),
            }),
        }
    }
}

impl From<StopBits> for u8 {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Flow control mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowControl {
    #[default]
    None,
    /// XON/XOFF
    Software,
    /// RTS/CTS
    Hardware,
}

/// Serial channel configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port name (e.g. "/dev/ttyUSB0" or "COM3")
    pub port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits per character
    pub data_bits: DataBits,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Flow control
    pub flow_control: FlowControl,
    /// Bits per character assumed by the timeout model
    pub frame_bits: u8,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: DataBits::default(),
            parity: Parity::default(),
            stop_bits: StopBits::default(),
            flow_control: FlowControl::default(),
            frame_bits: DEFAULT_FRAME_BITS,
        }
    }
}

/// TCP server configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to listen on
    pub bind_address: String,
    /// Port to listen on
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_TCP_PORT,
        }
    }
}

impl NetworkConfig {
    /// `address:port` string suitable for binding
    pub fn socket_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Channel selection together with its settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "channel", rename_all = "lowercase")]
pub enum LinkConfig {
    /// Serial port
    Serial(SerialConfig),
    /// TCP server accepting one device
    Network(NetworkConfig),
}

impl LinkConfig {
    /// Which channel this configuration selects
    pub fn kind(&self) -> ChannelKind {
        match self {
            LinkConfig::Serial(_) => ChannelKind::Serial,
            LinkConfig::Network(_) => ChannelKind::Network,
        }
    }
}

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Test settings
    #[serde(default)]
    pub test: TestConfig,
    /// Link to open; the CLI may supply it instead
    #[serde(default)]
    pub link: Option<LinkConfig>,
}

impl AppConfig {
    /// Parse a configuration from JSON text
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    /// Load a configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}
