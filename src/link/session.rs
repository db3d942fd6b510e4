//! Single UDP channel to one peer.
//!
//! The channel handle lives behind an `RwLock`: sends and receive slices take
//! the read side, `open`/`close` take the write side. A blocked receive waits
//! in short slices and re-checks the channel between them, so closing the
//! session ends it within one slice instead of after the full timeout.

use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::codec::MAX_PAYLOAD;
use super::error::LinkError;

pub const DEFAULT_HOST: &str = "192.168.4.1";
pub const DEFAULT_PORT: u16 = 12345;
pub const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Upper bound on one blocking `recv_from`, and therefore on how long
/// `close` can be delayed by an in-flight receive.
const RECEIVE_SLICE: Duration = Duration::from_millis(50);

/// Remote vehicle address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: &str, port: u16) -> Result<Self, LinkError> {
        let host = host.trim();
        if host.is_empty() {
            return Err(LinkError::Configuration("peer host is empty".into()));
        }
        if host.chars().any(char::is_whitespace) {
            return Err(LinkError::Configuration(format!("peer host '{}' contains whitespace", host)));
        }
        if port == 0 {
            return Err(LinkError::Configuration("peer port must be in 1..=65535".into()));
        }
        Ok(Self { host: host.to_string(), port })
    }

    /// Parse a port typed by a user, e.g. from a text field.
    pub fn parse(host: &str, port: &str) -> Result<Self, LinkError> {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| LinkError::Configuration(format!("invalid port '{}'", port.trim())))?;
        Self::new(host, port)
    }

    fn resolve(&self) -> io::Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(ErrorKind::NotFound, format!("no address for {}", self.host)))
    }
}

impl Default for PeerAddress {
    fn default() -> Self {
        Self { host: DEFAULT_HOST.to_string(), port: DEFAULT_PORT }
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// An open socket plus the peer it was opened for.
struct Channel {
    socket: UdpSocket,
    peer: SocketAddr,
    generation: u64,
}

pub struct Session {
    peer: Mutex<PeerAddress>,
    channel: RwLock<Option<Channel>>,
    connected: AtomicBool,
    generation: AtomicU64,
    receive_timeout: Duration,
}

impl Session {
    /// Disconnected session for the default peer.
    pub fn new() -> Self {
        Self::with_receive_timeout(DEFAULT_RECEIVE_TIMEOUT)
    }

    pub fn with_receive_timeout(receive_timeout: Duration) -> Self {
        Self {
            peer: Mutex::new(PeerAddress::default()),
            channel: RwLock::new(None),
            connected: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            receive_timeout,
        }
    }

    /// Set the peer used by the next `open`. An open channel keeps its peer.
    pub fn configure(&self, host: &str, port: u16) -> Result<(), LinkError> {
        let peer = PeerAddress::new(host, port)?;
        log::debug!("Peer configured as {}", peer);
        *self.peer.lock().unwrap_or_else(PoisonError::into_inner) = peer;
        Ok(())
    }

    pub fn peer(&self) -> PeerAddress {
        self.peer.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn receive_timeout(&self) -> Duration {
        self.receive_timeout
    }

    /// Replace any existing channel with a fresh socket on an ephemeral port.
    pub fn open(&self) -> Result<bool, LinkError> {
        let peer = self.peer();
        let mut channel = self.channel.write().unwrap_or_else(PoisonError::into_inner);

        if channel.take().is_some() {
            log::debug!("Closing previous channel before reopening");
        }
        self.connected.store(false, Ordering::SeqCst);

        match Self::open_channel(&peer, self.generation.fetch_add(1, Ordering::SeqCst) + 1) {
            Ok(opened) => {
                log::info!(
                    "UDP channel open to {} ({}) from {}",
                    peer,
                    opened.peer,
                    opened.socket.local_addr().map(|a| a.to_string()).unwrap_or_default()
                );
                *channel = Some(opened);
                self.connected.store(true, Ordering::SeqCst);
                Ok(true)
            }
            Err(e) => {
                log::error!("Failed to open UDP channel to {}: {}", peer, e);
                Err(LinkError::Io(e))
            }
        }
    }

    fn open_channel(peer: &PeerAddress, generation: u64) -> io::Result<Channel> {
        let peer = peer.resolve()?;
        let local = if peer.is_ipv6() {
            SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
        } else {
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
        };
        let socket = UdpSocket::bind(local)?;
        socket.set_read_timeout(Some(RECEIVE_SLICE))?;
        Ok(Channel { socket, peer, generation })
    }

    /// Idempotent.
    pub fn close(&self) {
        let mut channel = self.channel.write().unwrap_or_else(PoisonError::into_inner);
        self.connected.store(false, Ordering::SeqCst);
        if channel.take().is_some() {
            log::info!("UDP channel closed");
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.channel.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    pub fn send_raw(&self, payload: &[u8]) -> Result<(), LinkError> {
        let failure = {
            let channel = self.channel.read().unwrap_or_else(PoisonError::into_inner);
            let channel = match channel.as_ref() {
                Some(c) if self.connected.load(Ordering::SeqCst) => c,
                _ => return Err(LinkError::NotConnected),
            };
            match channel.socket.send_to(payload, channel.peer) {
                Ok(_) => {
                    log::debug!("Sent {} bytes to {}", payload.len(), channel.peer);
                    return Ok(());
                }
                Err(e) => (e, channel.generation),
            }
        };

        let (e, generation) = failure;
        log::warn!("Transmit failed: {}", e);
        self.fail_channel(generation);
        Err(LinkError::Io(e))
    }

    /// Read exactly one datagram, waiting up to the receive timeout.
    pub fn receive_raw(&self) -> Result<Vec<u8>, LinkError> {
        let deadline = Instant::now() + self.receive_timeout;
        let mut buffer = vec![0u8; MAX_PAYLOAD];
        let mut generation = None;

        loop {
            let outcome = {
                let channel = self.channel.read().unwrap_or_else(PoisonError::into_inner);
                let channel = match channel.as_ref() {
                    Some(c) if self.connected.load(Ordering::SeqCst) => c,
                    _ if generation.is_some() => {
                        return Err(LinkError::Io(io::Error::new(ErrorKind::ConnectionAborted, "channel closed during receive")));
                    }
                    _ => return Err(LinkError::NotConnected),
                };
                if *generation.get_or_insert(channel.generation) != channel.generation {
                    return Err(LinkError::Io(io::Error::new(ErrorKind::ConnectionAborted, "channel reopened during receive")));
                }
                channel.socket.recv_from(&mut buffer)
            };

            match outcome {
                Ok((len, from)) => {
                    log::debug!("Received {} bytes from {}", len, from);
                    buffer.truncate(len);
                    return Ok(buffer);
                }
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {
                    if Instant::now() >= deadline {
                        return Err(LinkError::Timeout);
                    }
                }
                Err(e) => {
                    log::warn!("Receive failed: {}", e);
                    if let Some(generation) = generation {
                        self.fail_channel(generation);
                    }
                    return Err(LinkError::Io(e));
                }
            }
        }
    }

    /// Drop the channel after an unrecoverable error, unless it has already
    /// been replaced by a newer `open`.
    fn fail_channel(&self, generation: u64) {
        let mut channel = self.channel.write().unwrap_or_else(PoisonError::into_inner);
        if channel.as_ref().is_some_and(|c| c.generation == generation) {
            *channel = None;
            self.connected.store(false, Ordering::SeqCst);
            log::warn!("UDP channel dropped after error, session disconnected");
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn local_peer() -> UdpSocket {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        socket
    }

    fn session_for(peer: &UdpSocket, timeout: Duration) -> Session {
        let session = Session::with_receive_timeout(timeout);
        session.configure("127.0.0.1", peer.local_addr().unwrap().port()).unwrap();
        session
    }

    #[test]
    fn test_defaults() {
        let session = Session::new();
        assert_eq!(session.peer(), PeerAddress { host: "192.168.4.1".into(), port: 12345 });
        assert_eq!(session.receive_timeout(), Duration::from_secs(5));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_configure_rejects_bad_peer() {
        let session = Session::new();
        assert!(matches!(session.configure("", 1000), Err(LinkError::Configuration(_))));
        assert!(matches!(session.configure("10.0.0.1", 0), Err(LinkError::Configuration(_))));
        assert!(matches!(PeerAddress::parse("10.0.0.1", "70000"), Err(LinkError::Configuration(_))));
        assert!(matches!(PeerAddress::parse("10.0.0.1", "abc"), Err(LinkError::Configuration(_))));
        assert_eq!(PeerAddress::parse(" 10.0.0.1 ", " 8080 ").unwrap(), PeerAddress { host: "10.0.0.1".into(), port: 8080 });
        // failed configure keeps the previous peer
        assert_eq!(session.peer(), PeerAddress::default());
    }

    #[test]
    fn test_send_and_receive_before_open_fail_fast() {
        let session = Session::new();
        assert!(matches!(session.send_raw(b"{}"), Err(LinkError::NotConnected)));
        assert!(matches!(session.receive_raw(), Err(LinkError::NotConnected)));
    }

    #[test]
    fn test_open_send_receive() {
        let peer = local_peer();
        let session = session_for(&peer, Duration::from_millis(500));
        assert!(session.open().unwrap());
        assert!(session.is_connected());

        session.send_raw(b"ping").unwrap();
        let mut buf = [0u8; 64];
        let (len, from) = peer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"ping");

        peer.send_to(b"pong", from).unwrap();
        assert_eq!(session.receive_raw().unwrap(), b"pong".to_vec());
    }

    #[test]
    fn test_receive_times_out_and_stays_connected() {
        let peer = local_peer();
        let session = session_for(&peer, Duration::from_millis(200));
        session.open().unwrap();

        let started = Instant::now();
        assert!(matches!(session.receive_raw(), Err(LinkError::Timeout)));
        assert!(started.elapsed() >= Duration::from_millis(200));
        assert!(session.is_connected());
    }

    #[test]
    fn test_receive_returns_one_datagram_per_call() {
        let peer = local_peer();
        let session = session_for(&peer, Duration::from_millis(500));
        session.open().unwrap();
        session.send_raw(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let (_, from) = peer.recv_from(&mut buf).unwrap();

        peer.send_to(b"first", from).unwrap();
        peer.send_to(b"second", from).unwrap();
        assert_eq!(session.receive_raw().unwrap(), b"first".to_vec());
        assert_eq!(session.receive_raw().unwrap(), b"second".to_vec());
    }

    #[test]
    fn test_oversized_datagram_is_truncated() {
        let peer = local_peer();
        let session = session_for(&peer, Duration::from_millis(500));
        session.open().unwrap();
        session.send_raw(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let (_, from) = peer.recv_from(&mut buf).unwrap();

        peer.send_to(&vec![b'x'; MAX_PAYLOAD + 200], from).unwrap();
        assert_eq!(session.receive_raw().unwrap().len(), MAX_PAYLOAD);
    }

    #[test]
    fn test_close_is_idempotent() {
        let peer = local_peer();
        let session = session_for(&peer, Duration::from_millis(200));
        session.close();
        session.open().unwrap();
        session.close();
        session.close();
        assert!(!session.is_connected());
        assert!(matches!(session.send_raw(b"{}"), Err(LinkError::NotConnected)));
    }

    #[test]
    fn test_close_interrupts_blocked_receive() {
        let peer = local_peer();
        let session = Arc::new(session_for(&peer, Duration::from_secs(5)));
        session.open().unwrap();

        let receiver = {
            let session = Arc::clone(&session);
            thread::spawn(move || {
                let started = Instant::now();
                (session.receive_raw(), started.elapsed())
            })
        };
        thread::sleep(Duration::from_millis(150));
        session.close();

        let (result, elapsed) = receiver.join().unwrap();
        assert!(matches!(result, Err(LinkError::Io(_))));
        assert!(elapsed < Duration::from_secs(1), "receive lingered for {:?}", elapsed);
    }

    #[test]
    fn test_reopen_replaces_channel() {
        let peer = local_peer();
        let session = session_for(&peer, Duration::from_millis(300));
        session.open().unwrap();
        session.send_raw(b"a").unwrap();
        let mut buf = [0u8; 8];
        let (_, first) = peer.recv_from(&mut buf).unwrap();

        session.open().unwrap();
        session.send_raw(b"b").unwrap();
        let (_, second) = peer.recv_from(&mut buf).unwrap();
        assert_ne!(first.port(), second.port());
        assert!(session.is_connected());
    }

    #[test]
    fn test_configure_applies_on_next_open() {
        let first = local_peer();
        let second = local_peer();
        let session = session_for(&first, Duration::from_millis(300));
        session.open().unwrap();

        session.configure("127.0.0.1", second.local_addr().unwrap().port()).unwrap();
        session.send_raw(b"old").unwrap();
        let mut buf = [0u8; 8];
        let (len, _) = first.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"old");

        session.open().unwrap();
        session.send_raw(b"new").unwrap();
        let (len, _) = second.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"new");
    }

    #[test]
    fn test_open_unresolvable_host_leaves_session_disconnected() {
        let session = Session::new();
        session.configure("no-such-host.invalid", 9).unwrap();
        assert!(matches!(session.open(), Err(LinkError::Io(_))));
        assert!(!session.is_connected());
    }

    #[test]
    fn test_transmit_failure_forces_disconnect() {
        // Broadcast without SO_BROADCAST is refused by the OS.
        let session = Session::with_receive_timeout(Duration::from_millis(200));
        session.configure("255.255.255.255", 9).unwrap();
        assert!(session.open().unwrap());
        assert!(session.is_connected());

        assert!(matches!(session.send_raw(b"{}"), Err(LinkError::Io(_))));
        assert!(!session.is_connected());
        assert!(matches!(session.send_raw(b"{}"), Err(LinkError::NotConnected)));
        assert!(matches!(session.receive_raw(), Err(LinkError::NotConnected)));
    }
}
