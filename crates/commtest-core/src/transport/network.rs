//! TCP server channel
//!
//! Listens for the device under test and keeps exactly one peer. A new
//! connection displaces the current one.

use std::io::{self, Read};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::time::Instant;

use super::{ChannelKind, LinkActivity, TimeoutModel, Transport, TransportError, READ_BUFFER_SIZE};
use crate::config::NetworkConfig;

/// TCP server transport with a single peer
pub struct NetworkTransport {
    listener: Option<TcpListener>,
    peer: Option<(TcpStream, SocketAddr)>,
    name: String,
    local_addr: SocketAddr,
    activity: LinkActivity,
}

impl NetworkTransport {
    /// Start listening as described by `config`
    pub fn listen(config: &NetworkConfig) -> Result<Self, TransportError> {
        let address = config.socket_address();
        let listener = TcpListener::bind(&address).map_err(|source| {
            tracing::warn!(channel = %ChannelKind::Network, "Start failed: {}", source);
            TransportError::Bind {
                address: address.clone(),
                source,
            }
        })?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        tracing::info!(
            channel = %ChannelKind::Network,
            "Started listening on port {}",
            local_addr.port()
        );

        Ok(Self {
            listener: Some(listener),
            peer: None,
            name: local_addr.to_string(),
            local_addr,
            activity: LinkActivity::new(),
        })
    }

    /// Address the server is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address of the connected device, if any
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer.as_ref().map(|(_, addr)| *addr)
    }

    /// Whether a device is connected
    pub fn is_client_connected(&self) -> bool {
        self.peer.is_some()
    }

    fn accept_pending(&mut self) -> Result<(), TransportError> {
        let Some(listener) = self.listener.as_ref() else {
            return Ok(());
        };

        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    if let Some((_, old)) = self.peer.take() {
                        tracing::info!(
                            channel = %ChannelKind::Network,
                            "Client {} displaced by {}",
                            old,
                            addr
                        );
                    }
                    self.activity.reset();
                    self.peer = Some((stream, addr));
                    tracing::info!(channel = %ChannelKind::Network, "Client connected: {}", addr);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn disconnect_peer(&mut self) {
        if let Some((_, addr)) = self.peer.take() {
            tracing::info!(channel = %ChannelKind::Network, "Client disconnected: {}", addr);
        }
    }

    fn drain_peer(&mut self, now: Instant) -> Result<(), TransportError> {
        let timeout = TimeoutModel::network();
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            let Some((stream, _)) = self.peer.as_mut() else {
                return Ok(());
            };

            match stream.read(&mut buf) {
                Ok(0) => {
                    self.disconnect_peer();
                    return Ok(());
                }
                Ok(n) => {
                    tracing::trace!("{} bytes are available to read", n);
                    self.activity
                        .on_received(&buf[..n], now, timeout.per_size_timeout(n));
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if e.kind() == io::ErrorKind::ConnectionReset
                        || e.kind() == io::ErrorKind::ConnectionAborted =>
                {
                    self.disconnect_peer();
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn flush_peer(&mut self, now: Instant) -> Result<(), TransportError> {
        let timeout = TimeoutModel::network();
        let Some((stream, _)) = self.peer.as_mut() else {
            return Ok(());
        };

        let result = self
            .activity
            .flush_into(stream, now, |n| timeout.per_size_timeout(n));
        if result.is_err() {
            self.disconnect_peer();
        }
        result
    }
}

impl Transport for NetworkTransport {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Network
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) {
        if self.listener.is_none() {
            return;
        }
        if self.activity.has_pending_output() {
            let _ = self.flush_peer(Instant::now());
        }
        self.disconnect_peer();
        self.listener = None;
        self.activity.reset();
        tracing::info!(channel = %ChannelKind::Network, "Stopped");
    }

    fn is_open(&self) -> bool {
        self.listener.is_some()
    }

    fn write(&mut self, bytes: &[u8], now: Instant) -> Result<(), TransportError> {
        if self.listener.is_none() {
            return Err(TransportError::NotOpen);
        }
        if self.peer.is_none() {
            return Err(TransportError::NotConnected);
        }

        tracing::trace!("Bytes to write: {}", bytes.len());
        let timeout = TimeoutModel::network();
        self.activity
            .begin_write(bytes, now, timeout.per_size_timeout(bytes.len()))?;
        self.flush_peer(now)
    }

    fn read(&mut self) -> Vec<u8> {
        let data = self.activity.take_inbound();
        tracing::debug!(channel = %ChannelKind::Network, "Read {} bytes", data.len());
        data
    }

    fn poll(&mut self, now: Instant) -> Result<bool, TransportError> {
        if self.listener.is_none() {
            return Ok(false);
        }

        self.accept_pending()?;
        if self.activity.has_pending_output() {
            self.flush_peer(now)?;
        }
        self.activity.check_write_timer(now);
        self.drain_peer(now)?;
        Ok(self.activity.inbound_ready(now))
    }

    fn last_sent_at(&self) -> Option<Instant> {
        self.activity.sent_at()
    }

    fn last_received_at(&self) -> Option<Instant> {
        self.activity.received_at()
    }

    fn timeout_model(&self) -> TimeoutModel {
        TimeoutModel::network()
    }
}

impl Drop for NetworkTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn loopback() -> NetworkTransport {
        NetworkTransport::listen(&NetworkConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 0,
        })
        .expect("bind loopback")
    }

    /// Poll until `cond` holds, advancing a fake clock so read timers expire
    fn poll_until<F>(transport: &mut NetworkTransport, mut cond: F) -> bool
    where
        F: FnMut(&mut NetworkTransport, bool) -> bool,
    {
        let start = Instant::now();
        for step in 0..500u64 {
            let now = start + Duration::from_millis(step * 10);
            let ready = transport.poll(now).expect("poll");
            if cond(transport, ready) {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        false
    }

    #[test]
    fn test_write_without_peer_fails() {
        let mut transport = loopback();
        assert!(matches!(
            transport.write(&[1, 2, 3], Instant::now()),
            Err(TransportError::NotConnected)
        ));
    }

    #[test]
    fn test_echo_over_loopback() {
        let mut transport = loopback();
        let mut client = TcpStream::connect(transport.local_addr()).expect("connect");

        assert!(poll_until(&mut transport, |t, _| t.is_client_connected()));

        client.write_all(&[0, 0, 1, 0, 0xd2, 0x02, 0xef, 0x8d]).expect("send");
        assert!(poll_until(&mut transport, |_, ready| ready));
        assert_eq!(
            transport.read(),
            vec![0, 0, 1, 0, 0xd2, 0x02, 0xef, 0x8d]
        );
        assert!(transport.last_received_at().is_some());

        transport.write(&[9, 8, 7], Instant::now()).expect("write");
        let mut reply = [0u8; 3];
        client
            .set_read_timeout(Some(Duration::from_secs(2)))
            .expect("timeout");
        client.read_exact(&mut reply).expect("reply");
        assert_eq!(reply, [9, 8, 7]);
    }

    #[test]
    fn test_second_client_displaces_first() {
        let mut transport = loopback();
        let first = TcpStream::connect(transport.local_addr()).expect("connect first");
        assert!(poll_until(&mut transport, |t, _| t.is_client_connected()));
        let first_addr = transport.peer_addr();

        let second = TcpStream::connect(transport.local_addr()).expect("connect second");
        assert!(poll_until(&mut transport, |t, _| t.peer_addr() != first_addr));
        assert_eq!(transport.peer_addr(), second.local_addr().ok());
        drop(first);
    }

    #[test]
    fn test_close_stops_listening() {
        let mut transport = loopback();
        assert!(transport.is_open());
        transport.close();
        assert!(!transport.is_open());
        assert!(matches!(
            transport.write(&[1], Instant::now()),
            Err(TransportError::NotOpen)
        ));
    }
}
