//! ActiveConnector: one outbound connect attempt.
//!
//! The socket is created when the connector is built, using the security
//! variant read at that moment.  The attempt itself runs on a thread named
//! `spp-connector`:
//!
//! ```text
//! cancel_discovery()
//! socket.connect()  ── Ok ──> session.promote(conn, ticket)
//!        │
//!        └── Err ──> close socket ──> Toast("Unable to connect device")
//!                                 ──> Listening
//! ```
//!
//! There is no automatic retry.  Closing the socket from another thread
//! (`Worker::cancel`) unblocks a pending connect; because the cancelling
//! caller has already taken the connector's slot, the failure is not reported
//! and a connection that completes anyway is refused by `promote`.  After a
//! successful promotion the connector stays in its slot until the next
//! `connect()`, `start()`, or `stop()` takes it.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use spp_core::{
    ChannelSecurity, ConnectSocket, ConnectionSession, ConnectionState, PeerIdentity, Promotion,
    TransportFactory, Worker, TOAST_CONNECT_FAILED,
};

/// A single outbound connect attempt.
pub struct ActiveConnector {
    peer: PeerIdentity,
    security: ChannelSecurity,
    socket: Option<Arc<dyn ConnectSocket>>,
    handle: Option<JoinHandle<()>>,
}

impl ActiveConnector {
    /// Creates the outbound socket for `peer`.
    ///
    /// A creation failure is logged and leaves the connector without a socket;
    /// its thread then fails immediately and reports a connect failure.
    pub fn new(factory: &dyn TransportFactory, peer: PeerIdentity, security: ChannelSecurity) -> Self {
        let socket = match factory.create_socket(&peer, security) {
            Ok(socket) => Some(socket),
            Err(e) => {
                error!("socket creation failed: {e}");
                None
            }
        };
        Self {
            peer,
            security,
            socket,
            handle: None,
        }
    }

    pub fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    pub fn security(&self) -> ChannelSecurity {
        self.security
    }

    /// `true` if the outbound socket was created.
    pub fn has_socket(&self) -> bool {
        self.socket.is_some()
    }

    /// Starts the attempt on its own thread.  `ticket` is the worker slot the
    /// session assigned to this connector.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread could not be spawned.
    pub fn spawn(
        mut self,
        session: Arc<ConnectionSession>,
        factory: Arc<dyn TransportFactory>,
        ticket: u64,
    ) -> io::Result<Box<dyn Worker>> {
        let socket = self.socket.clone();
        let peer = self.peer.clone();
        let handle = thread::Builder::new()
            .name("spp-connector".to_string())
            .spawn(move || run(&session, factory.as_ref(), socket, &peer, ticket))?;
        self.handle = Some(handle);
        Ok(Box::new(self))
    }
}

impl Worker for ActiveConnector {
    fn cancel(&self) {
        if let Some(socket) = &self.socket {
            if let Err(e) = socket.close() {
                debug!("closing connect socket for {}: {e}", self.peer);
            }
        }
    }

    fn join(mut self: Box<Self>) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("connector thread for {} panicked", self.peer);
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

fn run(
    session: &Arc<ConnectionSession>,
    factory: &dyn TransportFactory,
    socket: Option<Arc<dyn ConnectSocket>>,
    peer: &PeerIdentity,
    ticket: u64,
) {
    factory.cancel_discovery();

    let result = match &socket {
        Some(socket) => socket.connect(),
        None => Err(io::Error::new(
            io::ErrorKind::NotConnected,
            "no socket was created",
        )),
    };

    match result {
        Ok(conn) => {
            if let Err(conn) = session.promote(conn, Promotion::Outbound { ticket }) {
                debug!("connect to {peer} superseded or cancelled; closing");
                if let Err(e) = conn.close() {
                    debug!("closing link to {peer}: {e}");
                }
            }
        }
        Err(e) => {
            info!("connect to {peer} failed: {e}");
            if let Some(socket) = &socket {
                if let Err(e) = socket.close() {
                    debug!("closing connect socket for {peer}: {e}");
                }
            }
            session.worker_failed(ticket, TOAST_CONNECT_FAILED, ConnectionState::Listening);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
