//! Transport abstraction driven by the session.
//!
//! The shape mirrors a bonded short-range radio socket API:
//!
//! - a [`TransportFactory`] creates an outbound [`ConnectSocket`] for a peer,
//!   or a [`ListenSocket`] bound to the factory's [`ServiceRecord`];
//! - `ConnectSocket::connect` and `ListenSocket::accept` block, and closing
//!   the socket from another thread makes the blocked call fail promptly;
//! - both produce an established [`Connection`], a reliable ordered byte
//!   stream that can be read on one thread while written on another.
//!
//! Every socket carries the [`ChannelSecurity`] variant it was created with.
//!
//! # Implementations
//!
//! - [`tcp`] – TCP/IP.  Peers are `ip:port` socket addresses.
//! - [`memory`] – an in-process hub, used by the test suites and for running
//!   both roles inside one process.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::domain::peer::PeerIdentity;
use crate::domain::security::ChannelSecurity;

pub mod memory;
pub mod tcp;

/// Serial Port Profile service class UUID, used as the default service record.
pub const DEFAULT_SERVICE_UUID: Uuid = Uuid::from_u128(0x0000_1101_0000_1000_8000_0080_5f9b_34fb);

/// Default service name advertised by a listener.
pub const DEFAULT_SERVICE_NAME: &str = "SppLink";

/// Errors raised while creating sockets or resolving peers.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer address is malformed for this transport.
    #[error("invalid peer address {address:?}: {reason}")]
    InvalidPeer { address: String, reason: String },
    /// The outbound socket could not be created.
    #[error("failed to create {security} socket for {peer}: {source}")]
    Create {
        peer: String,
        security: ChannelSecurity,
        #[source]
        source: io::Error,
    },
    /// The listening socket could not be created.
    #[error("failed to listen for {service} ({security}): {source}")]
    Listen {
        service: String,
        security: ChannelSecurity,
        #[source]
        source: io::Error,
    },
}

/// Identifier and name a listener is registered under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub uuid: Uuid,
    pub name: String,
}

impl Default for ServiceRecord {
    fn default() -> Self {
        Self {
            uuid: DEFAULT_SERVICE_UUID,
            name: DEFAULT_SERVICE_NAME.to_string(),
        }
    }
}

/// An established, bidirectional byte stream.
///
/// All methods take `&self` so that one thread can block in `read` while
/// another writes or closes.
pub trait Connection: Send + Sync + 'static {
    /// The remote end, as captured when the connection was established.
    fn peer(&self) -> &PeerIdentity;

    /// The variant the connection was created with.
    fn security(&self) -> ChannelSecurity;

    /// Reads into `buf`.  `Ok(0)` means the peer closed the stream.  When a
    /// read timeout is set, an expired wait fails with
    /// [`io::ErrorKind::WouldBlock`] or [`io::ErrorKind::TimedOut`].
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes all of `buf`.
    fn write_all(&self, buf: &[u8]) -> io::Result<()>;

    /// Bounds how long `read` may block.  `None` blocks indefinitely.
    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()>;

    /// Closes the inbound direction.
    fn close_input(&self) -> io::Result<()>;

    /// Closes the outbound direction.
    fn close_output(&self) -> io::Result<()>;

    /// Closes the connection.  Idempotent.
    fn close(&self) -> io::Result<()>;
}

/// A socket created for one outbound connect attempt.
pub trait ConnectSocket: Send + Sync + 'static {
    /// Blocks until the peer accepts or the attempt fails.  Ownership of the
    /// resulting connection moves to the caller; closing this socket later
    /// does not affect it.
    fn connect(&self) -> io::Result<Arc<dyn Connection>>;

    /// Aborts a pending `connect`.  Idempotent.
    fn close(&self) -> io::Result<()>;
}

/// A socket accepting inbound connections for the factory's service record.
pub trait ListenSocket: Send + Sync + 'static {
    /// Blocks until a peer connects.  Fails once the socket is closed.
    fn accept(&self) -> io::Result<Arc<dyn Connection>>;

    /// The variant inbound connections are accepted with.
    fn security(&self) -> ChannelSecurity;

    /// Stops listening and fails any blocked `accept`.  Idempotent.
    fn close(&self) -> io::Result<()>;
}

/// Creates sockets for the session's workers.
pub trait TransportFactory: Send + Sync + 'static {
    /// Validates `address` and builds a [`PeerIdentity`] for it.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::InvalidPeer`] if the address is malformed.
    fn resolve_peer(&self, address: &str, name: Option<&str>)
        -> Result<PeerIdentity, TransportError>;

    /// Creates an outbound socket to `peer` using the `security` variant.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Create`] if the socket cannot be built.
    fn create_socket(
        &self,
        peer: &PeerIdentity,
        security: ChannelSecurity,
    ) -> Result<Arc<dyn ConnectSocket>, TransportError>;

    /// Creates a listening socket bound to the factory's service record.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Listen`] if the socket cannot be bound.
    fn listen(&self, security: ChannelSecurity) -> Result<Arc<dyn ListenSocket>, TransportError>;

    /// Stops any peer discovery running on the shared adapter.  Called before
    /// every outbound connect because discovery slows connection setup.
    fn cancel_discovery(&self) {}
}

/// Returns `true` for read-timeout errors that should be retried.
pub fn is_timeout_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
    )
}

/// The error a blocked call fails with after its socket was closed.
pub(crate) fn closed_error(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, format!("{what} closed"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_service_uuid_is_serial_port_profile() {
        assert_eq!(
            DEFAULT_SERVICE_UUID.to_string(),
            "00001101-0000-1000-8000-00805f9b34fb"
        );
    }

    #[test]
    fn test_is_timeout_error_recognises_timed_out_and_would_block() {
        // Arrange
        let timed_out = io::Error::new(io::ErrorKind::TimedOut, "timed out");
        let would_block = io::Error::new(io::ErrorKind::WouldBlock, "would block");

        // Act / Assert
        assert!(is_timeout_error(&timed_out));
        assert!(is_timeout_error(&would_block));
    }

    #[test]
    fn test_is_timeout_error_returns_false_for_other_errors() {
        let e = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(!is_timeout_error(&e));
    }

    #[test]
    fn test_transport_error_messages_name_the_peer() {
        // Arrange
        let e = TransportError::Create {
            peer: "10.0.0.9:24850".into(),
            security: ChannelSecurity::Secure,
            source: io::Error::new(io::ErrorKind::Other, "boom"),
        };

        // Act
        let msg = e.to_string();

        // Assert
        assert!(msg.contains("secure socket for 10.0.0.9:24850"), "{msg}");
    }
}
