//! Demo Mode - Simulated device under test
//!
//! Plays the device-side test driver without any hardware: sends the start
//! frame, then echoes every frame it receives until the payload reaches the
//! index ceiling. Latency, jitter and faults are configurable so the whole
//! tool can be exercised offline.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use crate::protocol::{self, PROTOCOL_OVERHEAD, START_PAYLOAD, TEST_INDEX_MAX};
use crate::transport::{ChannelKind, LinkActivity, TimeoutModel, Transport, TransportError};

/// Fault injected into the echo of one round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemoFault {
    /// Never answer; the tool should time out
    Drop,
    /// Answer with a corrupted checksum
    CorruptChecksum,
    /// Answer with a valid frame one payload byte short
    Truncate,
}

/// Demo device settings
#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Base delay between receiving a frame and the echo arriving
    pub latency: Duration,
    /// Extra random delay, uniformly drawn from `0..=jitter`
    pub jitter: Duration,
    /// The device stops echoing at this payload length
    pub index_ceiling: u16,
    /// Probability of flipping one payload bit in any echo
    pub corruption_rate: f64,
    /// Seed for jitter and random corruption
    pub seed: u64,
    /// Channel timing the device pretends to have
    pub timeout: TimeoutModel,
    /// Faults keyed by the payload length of the frame being echoed
    pub faults: HashMap<u16, DemoFault>,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(1),
            jitter: Duration::ZERO,
            index_ceiling: TEST_INDEX_MAX,
            corruption_rate: 0.0,
            seed: 0,
            timeout: TimeoutModel::network(),
            faults: HashMap::new(),
        }
    }
}

impl DemoConfig {
    /// Add a fault for the echo of the frame carrying `index` payload bytes
    pub fn with_fault(mut self, index: u16, fault: DemoFault) -> Self {
        self.faults.insert(index, fault);
        self
    }
}

/// Simulated device implementing [`Transport`]
pub struct DemoDevice {
    config: DemoConfig,
    rng: StdRng,
    open: bool,
    started: bool,
    /// Bytes the tool wrote, as seen by the device
    wire: Vec<u8>,
    /// Frames in flight towards the tool
    in_flight: VecDeque<(Instant, Vec<u8>)>,
    activity: LinkActivity,
    echoes: usize,
}

impl DemoDevice {
    /// Create a device that sends its start frame on the first poll
    pub fn new(config: DemoConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            config,
            rng,
            open: true,
            started: false,
            wire: Vec::new(),
            in_flight: VecDeque::new(),
            activity: LinkActivity::new(),
            echoes: 0,
        }
    }

    /// Number of echoes sent so far (including faulty ones, excluding drops)
    pub fn echoes(&self) -> usize {
        self.echoes
    }

    /// Queue another start frame, as if the device program was restarted
    pub fn restart(&mut self, now: Instant) {
        let delay = self.delay();
        self.in_flight
            .push_back((now + delay, protocol::wrap(&START_PAYLOAD)));
        self.started = true;
    }

    fn delay(&mut self) -> Duration {
        let jitter_us = self.config.jitter.as_micros() as u64;
        let extra = if jitter_us > 0 {
            Duration::from_micros(self.rng.gen_range(0..=jitter_us))
        } else {
            Duration::ZERO
        };
        self.config.latency + extra
    }

    /// React to the frame the tool just wrote
    fn on_frame_from_tool(&mut self, now: Instant) {
        let frame = std::mem::take(&mut self.wire);
        if frame.len() <= PROTOCOL_OVERHEAD {
            return;
        }

        let index = (frame.len() - PROTOCOL_OVERHEAD) as u16;
        if index >= self.config.index_ceiling {
            tracing::debug!(index, "Demo device: final frame received");
            return;
        }

        let echo = match self.config.faults.get(&index).copied() {
            Some(DemoFault::Drop) => {
                tracing::debug!(index, "Demo device: dropping echo");
                return;
            }
            Some(DemoFault::CorruptChecksum) => {
                let mut echo = frame;
                if let Some(last) = echo.last_mut() {
                    *last ^= 0xFF;
                }
                echo
            }
            Some(DemoFault::Truncate) => match protocol::unwrap(&frame) {
                Ok(payload) if payload.len() > 1 => protocol::wrap(&payload[1..]),
                _ => frame,
            },
            None => frame,
        };

        let echo = self.maybe_corrupt(echo);
        let delay = self.delay();
        self.in_flight.push_back((now + delay, echo));
        self.echoes += 1;
    }

    fn maybe_corrupt(&mut self, mut echo: Vec<u8>) -> Vec<u8> {
        if self.config.corruption_rate > 0.0
            && echo.len() > PROTOCOL_OVERHEAD
            && self.rng.gen_bool(self.config.corruption_rate.min(1.0))
        {
            let at = self.rng.gen_range(protocol::HEADER_SIZE..echo.len() - 4);
            let bit = self.rng.gen_range(0..8);
            echo[at] ^= 1 << bit;
        }
        echo
    }
}

impl Transport for DemoDevice {
    fn kind(&self) -> ChannelKind {
        match self.config.timeout {
            TimeoutModel::Serial { .. } => ChannelKind::Serial,
            TimeoutModel::Network => ChannelKind::Network,
        }
    }

    fn name(&self) -> &str {
        "demo"
    }

    fn close(&mut self) {
        if self.open {
            tracing::info!("Demo device closed");
        }
        self.open = false;
        self.in_flight.clear();
        self.wire.clear();
        self.activity.reset();
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn write(&mut self, bytes: &[u8], now: Instant) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }

        let timeout = self.config.timeout;
        self.activity
            .begin_write(bytes, now, timeout.per_size_timeout(bytes.len()))?;
        self.activity
            .flush_into(&mut self.wire, now, |n| timeout.per_size_timeout(n))?;
        self.on_frame_from_tool(now);
        Ok(())
    }

    fn read(&mut self) -> Vec<u8> {
        self.activity.take_inbound()
    }

    fn poll(&mut self, now: Instant) -> Result<bool, TransportError> {
        if !self.open {
            return Ok(false);
        }
        if !self.started {
            self.restart(now);
        }

        while let Some((at, _)) = self.in_flight.front() {
            if *at > now {
                break;
            }
            if let Some((_, bytes)) = self.in_flight.pop_front() {
                let timeout = self.config.timeout.per_size_timeout(bytes.len());
                self.activity.on_received(&bytes, now, timeout);
            }
        }

        self.activity.check_write_timer(now);
        Ok(self.activity.inbound_ready(now))
    }

    fn last_sent_at(&self) -> Option<Instant> {
        self.activity.sent_at()
    }

    fn last_received_at(&self) -> Option<Instant> {
        self.activity.received_at()
    }

    fn timeout_model(&self) -> TimeoutModel {
        self.config.timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settle(device: &mut DemoDevice, now: &mut Instant) -> Vec<u8> {
        for _ in 0..100 {
            *now += Duration::from_millis(1);
            if device.poll(*now).expect("poll") {
                return device.read();
            }
        }
        Vec::new()
    }

    #[test]
    fn test_sends_start_frame() {
        let mut now = Instant::now();
        let mut device = DemoDevice::new(DemoConfig::default());
        assert_eq!(
            settle(&mut device, &mut now),
            vec![0x00, 0x00, 0x01, 0x00, 0xd2, 0x02, 0xef, 0x8d]
        );
    }

    #[test]
    fn test_echoes_frames_below_ceiling() {
        let mut now = Instant::now();
        let mut device = DemoDevice::new(DemoConfig {
            index_ceiling: 3,
            ..DemoConfig::default()
        });
        settle(&mut device, &mut now);

        let frame = protocol::wrap(&[2, 1]);
        device.write(&frame, now).expect("write");
        assert_eq!(settle(&mut device, &mut now), frame);

        device.write(&protocol::wrap(&[3, 2, 1]), now).expect("write");
        assert_eq!(settle(&mut device, &mut now), Vec::<u8>::new());
        assert_eq!(device.echoes(), 1);
    }

    #[test]
    fn test_truncate_fault() {
        let mut now = Instant::now();
        let mut device =
            DemoDevice::new(DemoConfig::default().with_fault(3, DemoFault::Truncate));
        settle(&mut device, &mut now);

        device.write(&protocol::wrap(&[3, 2, 1]), now).expect("write");
        let echo = settle(&mut device, &mut now);
        assert_eq!(protocol::unwrap(&echo), Ok(&[2u8, 1][..]));
    }

    #[test]
    fn test_closed_device_rejects_writes() {
        let mut device = DemoDevice::new(DemoConfig::default());
        device.close();
        assert!(matches!(
            device.write(&[0], Instant::now()),
            Err(TransportError::NotOpen)
        ));
    }
}
