//! TCP implementation of the transport abstraction.
//!
//! Peers are addressed by `ip:port`.  The listener binds the factory's
//! configured address; the service record is advertised in logs only, since
//! TCP has no service discovery of its own.
//!
//! # Cancellation
//!
//! `std::net` has no way to interrupt a blocked `connect` or `accept` from
//! another thread, so both are sliced:
//!
//! - `connect` retries `connect_timeout` in [`CONNECT_SLICE`] steps and checks
//!   the socket's closed flag between steps.  A refused connection fails
//!   immediately; an unreachable host keeps retrying until the socket is
//!   closed.
//! - `accept` runs on a non-blocking listener and polls every
//!   [`ACCEPT_POLL_INTERVAL`], checking the closed flag in between.
//!
//! The security variant is carried on every socket and connection.  TCP
//! applies no link-level authentication of its own for either variant.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use super::{
    closed_error, ConnectSocket, Connection, ListenSocket, ServiceRecord, TransportError,
    TransportFactory,
};
use crate::domain::peer::PeerIdentity;
use crate::domain::security::ChannelSecurity;

/// Length of one `connect_timeout` attempt.
pub const CONNECT_SLICE: Duration = Duration::from_millis(250);

/// How often a non-blocking listener is polled for new connections.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Default TCP port for the SPP-Link service.
pub const DEFAULT_PORT: u16 = 24850;

/// Creates TCP sockets.
#[derive(Debug, Clone)]
pub struct TcpTransportFactory {
    service: ServiceRecord,
    bind_addr: SocketAddr,
}

impl TcpTransportFactory {
    /// Creates a factory whose listeners bind `bind_addr`.
    pub fn new(service: ServiceRecord, bind_addr: SocketAddr) -> Self {
        Self { service, bind_addr }
    }

    pub fn service(&self) -> &ServiceRecord {
        &self.service
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }
}

impl TransportFactory for TcpTransportFactory {
    fn resolve_peer(
        &self,
        address: &str,
        name: Option<&str>,
    ) -> Result<PeerIdentity, TransportError> {
        let addr = parse_socket_addr(address)?;
        Ok(PeerIdentity::new(addr.to_string()).with_name(name))
    }

    fn create_socket(
        &self,
        peer: &PeerIdentity,
        security: ChannelSecurity,
    ) -> Result<Arc<dyn ConnectSocket>, TransportError> {
        let addr = parse_socket_addr(peer.address()).map_err(|e| TransportError::Create {
            peer: peer.to_string(),
            security,
            source: io::Error::new(io::ErrorKind::InvalidInput, e.to_string()),
        })?;
        debug!("created {security} socket for {peer} ({})", self.service.uuid);
        Ok(Arc::new(TcpConnectSocket {
            peer: peer.clone(),
            addr,
            security,
            closed: AtomicBool::new(false),
        }))
    }

    fn listen(&self, security: ChannelSecurity) -> Result<Arc<dyn ListenSocket>, TransportError> {
        let listen_err = |source| TransportError::Listen {
            service: self.service.name.clone(),
            security,
            source,
        };
        let listener = TcpListener::bind(self.bind_addr).map_err(listen_err)?;
        listener.set_nonblocking(true).map_err(listen_err)?;
        let local_addr = listener.local_addr().map_err(listen_err)?;
        info!(
            "listening for {} ({}) on {local_addr} [{security}]",
            self.service.name, self.service.uuid
        );
        Ok(Arc::new(TcpListenSocket {
            listener: Mutex::new(Some(listener)),
            local_addr,
            security,
            closed: AtomicBool::new(false),
        }))
    }
}

fn parse_socket_addr(address: &str) -> Result<SocketAddr, TransportError> {
    address
        .trim()
        .parse::<SocketAddr>()
        .map_err(|e| TransportError::InvalidPeer {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Outbound TCP socket.
#[derive(Debug)]
pub struct TcpConnectSocket {
    peer: PeerIdentity,
    addr: SocketAddr,
    security: ChannelSecurity,
    closed: AtomicBool,
}

impl ConnectSocket for TcpConnectSocket {
    fn connect(&self) -> io::Result<Arc<dyn Connection>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(closed_error("socket"));
            }
            match TcpStream::connect_timeout(&self.addr, CONNECT_SLICE) {
                Ok(stream) => {
                    if self.closed.load(Ordering::SeqCst) {
                        let _ = stream.shutdown(Shutdown::Both);
                        return Err(closed_error("socket"));
                    }
                    let _ = stream.set_nodelay(true);
                    return Ok(Arc::new(TcpConnection::new(
                        stream,
                        self.peer.clone(),
                        self.security,
                    )));
                }
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e),
            }
        }
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Listening TCP socket.
#[derive(Debug)]
pub struct TcpListenSocket {
    listener: Mutex<Option<TcpListener>>,
    local_addr: SocketAddr,
    security: ChannelSecurity,
    closed: AtomicBool,
}

impl TcpListenSocket {
    /// The address the listener is bound to (useful after binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn try_accept(&self) -> io::Result<Option<(TcpStream, SocketAddr)>> {
        let guard = self
            .listener
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "listener lock poisoned"))?;
        let Some(listener) = guard.as_ref() else {
            return Err(closed_error("listener"));
        };
        match listener.accept() {
            Ok(pair) => Ok(Some(pair)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl ListenSocket for TcpListenSocket {
    fn accept(&self) -> io::Result<Arc<dyn Connection>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(closed_error("listener"));
            }
            match self.try_accept()? {
                Some((stream, remote)) => {
                    stream.set_nonblocking(false)?;
                    let _ = stream.set_nodelay(true);
                    return Ok(Arc::new(TcpConnection::new(
                        stream,
                        PeerIdentity::new(remote.to_string()),
                        self.security,
                    )));
                }
                None => std::thread::sleep(ACCEPT_POLL_INTERVAL),
            }
        }
    }

    fn security(&self) -> ChannelSecurity {
        self.security
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the listener releases the port so a relist can rebind it.
        if let Ok(mut guard) = self.listener.lock() {
            guard.take();
        }
        Ok(())
    }
}

/// An established TCP connection.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: PeerIdentity,
    security: ChannelSecurity,
    closed: AtomicBool,
}

impl TcpConnection {
    pub fn new(stream: TcpStream, peer: PeerIdentity, security: ChannelSecurity) -> Self {
        Self {
            stream,
            peer,
            security,
            closed: AtomicBool::new(false),
        }
    }
}

impl Connection for TcpConnection {
    fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    fn security(&self) -> ChannelSecurity {
        self.security
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        (&self.stream).read(buf)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        (&self.stream).write_all(buf)
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    fn close_input(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Read)
    }

    fn close_output(&self) -> io::Result<()> {
        self.stream.shutdown(Shutdown::Write)
    }

    fn close(&self) -> io::Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.stream.shutdown(Shutdown::Both)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn loopback_factory() -> TcpTransportFactory {
        TcpTransportFactory::new(ServiceRecord::default(), "127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_resolve_peer_accepts_socket_address() {
        // Arrange
        let factory = loopback_factory();

        // Act
        let peer = factory.resolve_peer(" 127.0.0.1:24850 ", Some("desk")).unwrap();

        // Assert
        assert_eq!(peer.address(), "127.0.0.1:24850");
        assert_eq!(peer.display_name(), "desk");
    }

    #[test]
    fn test_resolve_peer_rejects_malformed_address() {
        let factory = loopback_factory();
        let result = factory.resolve_peer("not-an-address", None);
        assert!(matches!(result, Err(TransportError::InvalidPeer { .. })));
    }

    #[test]
    fn test_connect_and_accept_exchange_bytes() {
        // Arrange: bind a listener directly so the test knows its port.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 5];
            stream.read_exact(&mut buf).unwrap();
            stream.write_all(b"pong!").unwrap();
            buf
        });
        let factory = loopback_factory();
        let peer = factory.resolve_peer(&addr.to_string(), None).unwrap();

        // Act
        let socket = factory.create_socket(&peer, ChannelSecurity::Insecure).unwrap();
        let conn = socket.connect().unwrap();
        conn.write_all(b"ping!").unwrap();
        let mut reply = [0u8; 5];
        let mut filled = 0;
        while filled < reply.len() {
            filled += conn.read(&mut reply[filled..]).unwrap();
        }

        // Assert
        assert_eq!(&server.join().unwrap(), b"ping!");
        assert_eq!(&reply, b"pong!");
        assert_eq!(conn.security(), ChannelSecurity::Insecure);
    }

    #[test]
    fn test_connect_to_closed_port_is_refused() {
        // Arrange: grab a free port and release it so nothing listens there.
        let scratch = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = scratch.local_addr().unwrap();
        drop(scratch);
        let factory = loopback_factory();
        let peer = factory.resolve_peer(&addr.to_string(), None).unwrap();

        // Act
        let socket = factory.create_socket(&peer, ChannelSecurity::Secure).unwrap();
        let result = socket.connect();

        // Assert
        assert!(result.is_err());
    }

    #[test]
    fn test_connect_on_closed_socket_fails_immediately() {
        let factory = loopback_factory();
        let peer = PeerIdentity::new("127.0.0.1:9");
        let socket = factory.create_socket(&peer, ChannelSecurity::Secure).unwrap();
        socket.close().unwrap();
        let err = socket.connect().err().expect("closed socket must not connect");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn test_close_unblocks_pending_accept() {
        // Arrange
        let factory = loopback_factory();
        let listener = factory.listen(ChannelSecurity::Secure).unwrap();
        let accepting = Arc::clone(&listener);
        let started = Instant::now();
        let handle = thread::spawn(move || accepting.accept().is_err());

        // Act
        thread::sleep(Duration::from_millis(50));
        listener.close().unwrap();

        // Assert
        assert!(handle.join().unwrap(), "accept must fail after close");
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn test_read_timeout_surfaces_as_timeout_error() {
        // Arrange
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (_server_side, _) = listener.accept().unwrap();
        let conn = TcpConnection::new(client, PeerIdentity::new(addr.to_string()), ChannelSecurity::Secure);

        // Act
        conn.set_read_timeout(Some(Duration::from_millis(20))).unwrap();
        let mut buf = [0u8; 8];
        let err = conn.read(&mut buf).unwrap_err();

        // Assert
        assert!(super::super::is_timeout_error(&err), "got {err:?}");
    }

    #[test]
    fn test_close_is_idempotent() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let conn = TcpConnection::new(client, PeerIdentity::new(addr.to_string()), ChannelSecurity::Secure);
        assert!(conn.close().is_ok());
        assert!(conn.close().is_ok());
    }
}
