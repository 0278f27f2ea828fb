//! Buffering and inactivity timers shared by the transports
//!
//! Inbound bytes accumulate until the read timer (restarted on every chunk)
//! expires; only then is the burst surfaced as one frame candidate. Outbound
//! bytes the OS did not take yet stay pending and are flushed on later polls.

use std::io::{self, Write};
use std::time::{Duration, Instant};

use super::TransportError;

#[derive(Debug, Default)]
pub(crate) struct LinkActivity {
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    rx_deadline: Option<Instant>,
    tx_deadline: Option<Instant>,
    tx_expected: usize,
    tx_written: usize,
    stalled: bool,
    received_at: Option<Instant>,
    sent_at: Option<Instant>,
}

impl LinkActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop buffers and timers, keep nothing from the previous peer
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn received_at(&self) -> Option<Instant> {
        self.received_at
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Append a received chunk and restart the read timer
    pub fn on_received(&mut self, chunk: &[u8], now: Instant, timeout: Duration) {
        if chunk.is_empty() {
            return;
        }
        self.inbound.extend_from_slice(chunk);
        self.received_at = Some(now);
        self.rx_deadline = Some(now + timeout);
        tracing::trace!(
            bytes = chunk.len(),
            buffered = self.inbound.len(),
            "Read timeout set to {}ms",
            timeout.as_millis()
        );
    }

    /// True once the read timer expired with data buffered
    pub fn inbound_ready(&mut self, now: Instant) -> bool {
        match self.rx_deadline {
            Some(deadline) if now >= deadline => {
                self.rx_deadline = None;
                !self.inbound.is_empty()
            }
            _ => false,
        }
    }

    /// Hand over everything received since the last call
    pub fn take_inbound(&mut self) -> Vec<u8> {
        self.rx_deadline = None;
        std::mem::take(&mut self.inbound)
    }

    /// Queue a new write and arm the write timer
    pub fn begin_write(
        &mut self,
        bytes: &[u8],
        now: Instant,
        timeout: Duration,
    ) -> Result<(), TransportError> {
        if self.stalled {
            return Err(TransportError::WriteStalled);
        }
        self.outbound.extend_from_slice(bytes);
        self.tx_expected = self.outbound.len();
        self.tx_written = 0;
        self.sent_at = Some(now);
        self.tx_deadline = Some(now + timeout);
        Ok(())
    }

    /// Push pending bytes into `writer` until it stops accepting them
    pub fn flush_into<W, F>(
        &mut self,
        writer: &mut W,
        now: Instant,
        timeout: F,
    ) -> Result<(), TransportError>
    where
        W: Write + ?Sized,
        F: Fn(usize) -> Duration,
    {
        let mut progressed = false;
        while !self.outbound.is_empty() {
            match writer.write(&self.outbound) {
                Ok(0) => {
                    return Err(TransportError::Incomplete {
                        written: self.tx_written,
                        expected: self.tx_expected,
                    });
                }
                Ok(n) => {
                    self.outbound.drain(..n);
                    self.tx_written += n;
                    progressed = true;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    break
                }
                Err(e) => return Err(e.into()),
            }
        }

        if self.outbound.is_empty() {
            if progressed {
                tracing::debug!("Written {} bytes", self.tx_written);
            }
            self.tx_deadline = None;
            self.stalled = false;
        } else if progressed {
            let remaining = self.outbound.len();
            tracing::trace!(
                "Written {}/{}, write timeout set for {} bytes",
                self.tx_written,
                self.tx_expected,
                remaining
            );
            self.tx_deadline = Some(now + timeout(remaining));
        }
        Ok(())
    }

    /// Flag a stalled write once the write timer expires with bytes pending
    pub fn check_write_timer(&mut self, now: Instant) {
        if let Some(deadline) = self.tx_deadline {
            if now >= deadline {
                self.tx_deadline = None;
                if !self.outbound.is_empty() {
                    tracing::warn!(
                        written = self.tx_written,
                        expected = self.tx_expected,
                        "Write operation timed out"
                    );
                    self.stalled = true;
                }
            }
        }
    }
}
