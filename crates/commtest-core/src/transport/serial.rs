//! Serial port channel
//!
//! Port enumeration plus a non-blocking [`Transport`] over `serialport`.
//! Reads only take what `bytes_to_read` reports, writes use a zero timeout
//! so a full kernel buffer leaves the rest pending instead of stalling.

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read};
use std::time::{Duration, Instant};

use super::{ChannelKind, LinkActivity, TimeoutModel, Transport, TransportError, READ_BUFFER_SIZE};
use crate::config::{DataBits, FlowControl, Parity, SerialConfig, StopBits};

/// A serial port the host can open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Device path or name, e.g. "/dev/ttyACM0" or "COM3"
    pub name: String,
    /// USB vendor and product id, for USB adapters
    pub usb_id: Option<(u16, u16)>,
    /// Product string, falling back to the manufacturer
    pub description: Option<String>,
}

impl PortInfo {
    fn enumerated(info: SerialPortInfo) -> Self {
        let (usb_id, description) = match info.port_type {
            SerialPortType::UsbPort(usb) => {
                (Some((usb.vid, usb.pid)), usb.product.or(usb.manufacturer))
            }
            _ => (None, None),
        };
        Self {
            name: info.port_name,
            usb_id,
            description,
        }
    }

    fn device_node(name: String) -> Self {
        Self {
            name,
            usb_id: None,
            description: None,
        }
    }

    /// CDC ACM devices, then USB adapters, then everything else; unit numbers
    /// compare numerically so ttyACM10 follows ttyACM2.
    fn order(&self) -> (u8, u32, &str) {
        let base = self.name.rsplit('/').next().unwrap_or(&self.name);
        let unit = |prefix: &str| {
            base.strip_prefix(prefix)
                .and_then(|n| n.parse::<u32>().ok())
        };
        match (unit("ttyACM"), unit("ttyUSB"), unit("COM")) {
            (Some(n), _, _) => (0, n, &self.name),
            (_, Some(n), _) => (1, n, &self.name),
            (_, _, Some(n)) => (2, n, &self.name),
            _ => (3, 0, &self.name),
        }
    }
}

/// List the serial ports the host reports, in a stable order.
///
/// On Linux, `/dev/ttyACM*` and `/dev/ttyUSB*` nodes the enumeration API
/// missed are added without USB details.
pub fn list_ports() -> Result<Vec<PortInfo>, TransportError> {
    let enumerated = serialport::available_ports()
        .map_err(|e| TransportError::Serial(format!("Port enumeration failed: {}", e)))?;
    let ports = merge_ports(
        enumerated.into_iter().map(PortInfo::enumerated).collect(),
        device_nodes(),
    );
    tracing::debug!(count = ports.len(), "Enumerated serial ports");
    Ok(ports)
}

/// Sorted union by name; an enumerated entry wins over a bare device node.
fn merge_ports(mut ports: Vec<PortInfo>, nodes: Vec<String>) -> Vec<PortInfo> {
    ports.extend(nodes.into_iter().map(PortInfo::device_node));
    // Stable sort keeps enumerated entries ahead of nodes with the same name
    ports.sort_by(|a, b| a.order().cmp(&b.order()));
    ports.dedup_by(|later, earlier| later.name == earlier.name);
    ports
}

#[cfg(target_os = "linux")]
fn device_nodes() -> Vec<String> {
    let Ok(entries) = fs::read_dir("/dev") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.starts_with("ttyACM") || name.starts_with("ttyUSB"))
        .map(|name| format!("/dev/{}", name))
        .collect()
}

#[cfg(not(target_os = "linux"))]
fn device_nodes() -> Vec<String> {
    Vec::new()
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

impl From<FlowControl> for serialport::FlowControl {
    fn from(flow: FlowControl) -> Self {
        match flow {
            FlowControl::None => serialport::FlowControl::None,
            FlowControl::Software => serialport::FlowControl::Software,
            FlowControl::Hardware => serialport::FlowControl::Hardware,
        }
    }
}

/// Serial port transport
pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
    timeout: TimeoutModel,
    activity: LinkActivity,
}

impl SerialTransport {
    /// Open the port described by `config` and apply its line settings
    pub fn open(config: &SerialConfig) -> Result<Self, TransportError> {
        tracing::info!(channel = %ChannelKind::Serial, "Opening {}", config.port_name);

        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(Duration::ZERO)
            .open()
            .map_err(|e| {
                tracing::warn!(channel = %ChannelKind::Serial, "Open error: {}", e);
                TransportError::from(e)
            })?;

        let mut transport = Self {
            port: Some(port),
            name: config.port_name.clone(),
            timeout: TimeoutModel::serial(config.baud_rate, config.frame_bits),
            activity: LinkActivity::new(),
        };
        transport.configure(config)?;

        if let Some(port) = transport.port.as_mut() {
            port.clear(serialport::ClearBuffer::All)?;
        }
        tracing::info!(channel = %ChannelKind::Serial, "Open");
        Ok(transport)
    }

    /// Apply line settings to the open port.
    ///
    /// Each setting that the driver rejects is logged and skipped; the rest
    /// still apply. DTR is always deasserted so boards that reset on DTR stay
    /// in their test program.
    pub fn configure(&mut self, config: &SerialConfig) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;

        if let Err(e) = port.set_baud_rate(config.baud_rate) {
            tracing::warn!(channel = %ChannelKind::Serial, "Baud rate error: {}", e);
        }
        if let Err(e) = port.set_data_bits(config.data_bits.into()) {
            tracing::warn!(channel = %ChannelKind::Serial, "Data bits error: {}", e);
        }
        if let Err(e) = port.set_flow_control(config.flow_control.into()) {
            tracing::warn!(channel = %ChannelKind::Serial, "Flow control error: {}", e);
        }
        if let Err(e) = port.set_parity(config.parity.into()) {
            tracing::warn!(channel = %ChannelKind::Serial, "Parity error: {}", e);
        }
        if let Err(e) = port.set_stop_bits(config.stop_bits.into()) {
            tracing::warn!(channel = %ChannelKind::Serial, "Stop bits error: {}", e);
        }
        if let Err(e) = port.write_data_terminal_ready(false) {
            tracing::warn!(channel = %ChannelKind::Serial, "DTR error: {}", e);
        }

        self.timeout = TimeoutModel::serial(config.baud_rate, config.frame_bits);
        tracing::debug!(
            "Baud timeout is {}ms per byte",
            self.timeout.per_size_timeout(1).as_millis().saturating_sub(1)
        );
        Ok(())
    }

    fn drain_port(&mut self, now: Instant) -> Result<(), TransportError> {
        let Some(port) = self.port.as_mut() else {
            return Ok(());
        };

        loop {
            let available = port.bytes_to_read()? as usize;
            if available == 0 {
                return Ok(());
            }

            let mut buf = vec![0u8; available.min(READ_BUFFER_SIZE)];
            match port.read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => {
                    tracing::trace!("{} bytes are available to read", n);
                    self.activity
                        .on_received(&buf[..n], now, self.timeout.per_size_timeout(n));
                }
                Err(e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock =>
                {
                    return Ok(())
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }
}

impl Transport for SerialTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Serial
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) {
        if let Some(mut port) = self.port.take() {
            let timeout = self.timeout;
            if self.activity.has_pending_output() {
                let _ = self.activity.flush_into(port.as_mut(), Instant::now(), |n| {
                    timeout.per_size_timeout(n)
                });
            }
            tracing::info!(channel = %ChannelKind::Serial, "Closed {}", self.name);
        }
        self.activity.reset();
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn write(&mut self, bytes: &[u8], now: Instant) -> Result<(), TransportError> {
        let timeout = self.timeout;
        let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;

        tracing::trace!("Bytes to write: {}", bytes.len());
        self.activity
            .begin_write(bytes, now, timeout.per_size_timeout(bytes.len()))?;
        self.activity
            .flush_into(port.as_mut(), now, |n| timeout.per_size_timeout(n))
    }

    fn read(&mut self) -> Vec<u8> {
        let data = self.activity.take_inbound();
        tracing::debug!(channel = %ChannelKind::Serial, "Read {} bytes", data.len());
        data
    }

    fn poll(&mut self, now: Instant) -> Result<bool, TransportError> {
        if self.port.is_none() {
            return Ok(false);
        }

        let timeout = self.timeout;
        if self.activity.has_pending_output() {
            if let Some(port) = self.port.as_mut() {
                self.activity
                    .flush_into(port.as_mut(), now, |n| timeout.per_size_timeout(n))?;
            }
        }
        self.activity.check_write_timer(now);

        self.drain_port(now)?;
        Ok(self.activity.inbound_ready(now))
    }

    fn last_sent_at(&self) -> Option<Instant> {
        self.activity.sent_at()
    }

    fn last_received_at(&self) -> Option<Instant> {
        self.activity.received_at()
    }

    fn timeout_model(&self) -> TimeoutModel {
        self.timeout
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}
