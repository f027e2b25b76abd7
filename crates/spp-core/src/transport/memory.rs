//! In-process transport.
//!
//! A [`MemoryHub`] plays the role of the radio: listeners register under
//! their factory's local address, and outbound sockets look the target address
//! up in the hub.  Connecting to an address nobody listens on is refused; an
//! address marked [unresponsive](MemoryHub::set_unresponsive) makes `connect`
//! hang until its socket is closed.
//!
//! Every factory records the operations it performs in an ordered
//! [`TransportOp`] log, which the test suites use to check ordering properties
//! such as "the stale listener was closed before the new one was opened".

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::debug;

use super::{
    closed_error, ConnectSocket, Connection, ListenSocket, TransportError, TransportFactory,
};
use crate::domain::peer::PeerIdentity;
use crate::domain::security::ChannelSecurity;

/// How often blocked `accept` and hanging `connect` calls re-check their
/// closed flag.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One operation performed by a [`MemoryTransportFactory`] or its sockets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportOp {
    CancelDiscovery,
    CreateSocket {
        peer: String,
        security: ChannelSecurity,
    },
    Listen {
        id: usize,
        security: ChannelSecurity,
    },
    CloseListener {
        id: usize,
    },
}

enum HubEntry {
    Listening {
        listener_id: usize,
        name: Option<String>,
        security: ChannelSecurity,
        incoming: Sender<Arc<MemoryConnection>>,
    },
    Unresponsive,
}

/// Shared address space connecting memory factories.
#[derive(Default)]
pub struct MemoryHub {
    entries: Mutex<HashMap<String, HubEntry>>,
}

impl MemoryHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes connects to `address` hang until cancelled.
    pub fn set_unresponsive(&self, address: &str) {
        lock(&self.entries).insert(address.to_string(), HubEntry::Unresponsive);
    }

    /// Tears down the listener registered at `address` without closing it,
    /// so its pending `accept` fails as if the adapter went away.
    pub fn drop_listener(&self, address: &str) {
        let mut entries = lock(&self.entries);
        if let Some(HubEntry::Listening { .. }) = entries.get(address) {
            entries.remove(address);
        }
    }

    /// `true` if a listener is currently registered under `address`.
    pub fn is_listening(&self, address: &str) -> bool {
        matches!(
            lock(&self.entries).get(address),
            Some(HubEntry::Listening { .. })
        )
    }

    fn unregister(&self, address: &str, id: usize) {
        let mut entries = lock(&self.entries);
        if let Some(HubEntry::Listening { listener_id, .. }) = entries.get(address) {
            if *listener_id == id {
                entries.remove(address);
            }
        }
    }
}

/// Factory for in-memory sockets bound to one local identity.
pub struct MemoryTransportFactory {
    hub: Arc<MemoryHub>,
    local: PeerIdentity,
    ops: Arc<Mutex<Vec<TransportOp>>>,
    next_listener_id: AtomicUsize,
    fail_socket_creation: AtomicBool,
    fail_listen: AtomicBool,
}

impl MemoryTransportFactory {
    /// Creates a factory that listens as, and connects from, `local`.
    pub fn new(hub: Arc<MemoryHub>, local: PeerIdentity) -> Self {
        Self {
            hub,
            local,
            ops: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicUsize::new(0),
            fail_socket_creation: AtomicBool::new(false),
            fail_listen: AtomicBool::new(false),
        }
    }

    /// Makes subsequent `create_socket` calls fail.
    pub fn set_fail_socket_creation(&self, fail: bool) {
        self.fail_socket_creation.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent `listen` calls fail.
    pub fn set_fail_listen(&self, fail: bool) {
        self.fail_listen.store(fail, Ordering::SeqCst);
    }

    /// Snapshot of the operation log.
    pub fn operations(&self) -> Vec<TransportOp> {
        lock(&self.ops).clone()
    }

    pub fn hub(&self) -> &Arc<MemoryHub> {
        &self.hub
    }

    fn record(&self, op: TransportOp) {
        lock(&self.ops).push(op);
    }
}

impl TransportFactory for MemoryTransportFactory {
    fn resolve_peer(
        &self,
        address: &str,
        name: Option<&str>,
    ) -> Result<PeerIdentity, TransportError> {
        let address = address.trim();
        if address.is_empty() || address.chars().any(char::is_whitespace) {
            return Err(TransportError::InvalidPeer {
                address: address.to_string(),
                reason: "address must be a single non-empty token".to_string(),
            });
        }
        Ok(PeerIdentity::new(address).with_name(name))
    }

    fn create_socket(
        &self,
        peer: &PeerIdentity,
        security: ChannelSecurity,
    ) -> Result<Arc<dyn ConnectSocket>, TransportError> {
        self.record(TransportOp::CreateSocket {
            peer: peer.address().to_string(),
            security,
        });
        if self.fail_socket_creation.load(Ordering::SeqCst) {
            return Err(TransportError::Create {
                peer: peer.to_string(),
                security,
                source: io::Error::new(io::ErrorKind::Other, "socket creation disabled"),
            });
        }
        Ok(Arc::new(MemoryConnectSocket {
            hub: Arc::clone(&self.hub),
            peer: peer.clone(),
            local: self.local.clone(),
            security,
            closed: AtomicBool::new(false),
        }))
    }

    fn listen(&self, security: ChannelSecurity) -> Result<Arc<dyn ListenSocket>, TransportError> {
        let address = self.local.address().to_string();
        if self.fail_listen.load(Ordering::SeqCst) {
            return Err(TransportError::Listen {
                service: address,
                security,
                source: io::Error::new(io::ErrorKind::Other, "listening disabled"),
            });
        }
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel();
        {
            let mut entries = lock(&self.hub.entries);
            if let Some(HubEntry::Listening { .. }) = entries.get(&address) {
                return Err(TransportError::Listen {
                    service: address,
                    security,
                    source: io::Error::new(io::ErrorKind::AddrInUse, "address already listening"),
                });
            }
            entries.insert(
                address.clone(),
                HubEntry::Listening {
                    listener_id: id,
                    name: self.local.name().map(str::to_string),
                    security,
                    incoming: tx,
                },
            );
        }
        self.record(TransportOp::Listen { id, security });
        debug!("memory listener {id} registered at {address} [{security}]");
        Ok(Arc::new(MemoryListenSocket {
            id,
            hub: Arc::clone(&self.hub),
            address,
            security,
            incoming: Mutex::new(rx),
            closed: AtomicBool::new(false),
            ops: Arc::clone(&self.ops),
        }))
    }

    fn cancel_discovery(&self) {
        self.record(TransportOp::CancelDiscovery);
    }
}

/// Outbound in-memory socket.
pub struct MemoryConnectSocket {
    hub: Arc<MemoryHub>,
    peer: PeerIdentity,
    local: PeerIdentity,
    security: ChannelSecurity,
    closed: AtomicBool,
}

impl ConnectSocket for MemoryConnectSocket {
    fn connect(&self) -> io::Result<Arc<dyn Connection>> {
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(closed_error("socket"));
            }
            let delivered = {
                let entries = lock(&self.hub.entries);
                match entries.get(self.peer.address()) {
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::ConnectionRefused,
                            format!("nothing listening at {}", self.peer.address()),
                        ))
                    }
                    Some(HubEntry::Unresponsive) => None,
                    Some(HubEntry::Listening {
                        name,
                        security,
                        incoming,
                        ..
                    }) => {
                        let remote = match self.peer.name() {
                            Some(_) => self.peer.clone(),
                            None => self.peer.clone().with_name(name.as_deref()),
                        };
                        let (ours, theirs) = connection_pair_with(
                            remote,
                            self.security,
                            self.local.clone(),
                            *security,
                        );
                        incoming.send(theirs).map_err(|_| {
                            io::Error::new(io::ErrorKind::ConnectionRefused, "listener gone")
                        })?;
                        Some(ours)
                    }
                }
            };
            match delivered {
                Some(conn) => return Ok(conn),
                None => std::thread::sleep(POLL_INTERVAL),
            }
        }
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Listening in-memory socket.
pub struct MemoryListenSocket {
    id: usize,
    hub: Arc<MemoryHub>,
    address: String,
    security: ChannelSecurity,
    incoming: Mutex<Receiver<Arc<MemoryConnection>>>,
    closed: AtomicBool,
    ops: Arc<Mutex<Vec<TransportOp>>>,
}

impl ListenSocket for MemoryListenSocket {
    fn accept(&self) -> io::Result<Arc<dyn Connection>> {
        let incoming = lock(&self.incoming);
        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(closed_error("listener"));
            }
            match incoming.recv_timeout(POLL_INTERVAL) {
                Ok(conn) => return Ok(conn),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Err(closed_error("listener")),
            }
        }
    }

    fn security(&self) -> ChannelSecurity {
        self.security
    }

    fn close(&self) -> io::Result<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.hub.unregister(&self.address, self.id);
            lock(&self.ops).push(TransportOp::CloseListener { id: self.id });
            debug!("memory listener {} at {} closed", self.id, self.address);
        }
        Ok(())
    }
}

struct Inbound {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

/// One end of an in-memory byte stream.
pub struct MemoryConnection {
    peer: PeerIdentity,
    security: ChannelSecurity,
    inbound: Mutex<Inbound>,
    outbound: Mutex<Option<Sender<Vec<u8>>>>,
    read_timeout: Mutex<Option<Duration>>,
    input_closed: AtomicBool,
    closed: AtomicBool,
}

/// Creates two connected ends.  `a` sees `b_identity` as its peer and vice
/// versa.
pub fn connection_pair(
    a_identity: PeerIdentity,
    b_identity: PeerIdentity,
    security: ChannelSecurity,
) -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
    connection_pair_with(b_identity, security, a_identity, security)
}

fn connection_pair_with(
    a_peer: PeerIdentity,
    a_security: ChannelSecurity,
    b_peer: PeerIdentity,
    b_security: ChannelSecurity,
) -> (Arc<MemoryConnection>, Arc<MemoryConnection>) {
    let (a_tx, b_rx) = mpsc::channel();
    let (b_tx, a_rx) = mpsc::channel();
    let a = MemoryConnection::new(a_peer, a_security, a_rx, a_tx);
    let b = MemoryConnection::new(b_peer, b_security, b_rx, b_tx);
    (Arc::new(a), Arc::new(b))
}

impl MemoryConnection {
    fn new(
        peer: PeerIdentity,
        security: ChannelSecurity,
        rx: Receiver<Vec<u8>>,
        tx: Sender<Vec<u8>>,
    ) -> Self {
        Self {
            peer,
            security,
            inbound: Mutex::new(Inbound {
                rx,
                pending: Vec::new(),
            }),
            outbound: Mutex::new(Some(tx)),
            read_timeout: Mutex::new(None),
            input_closed: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// `true` once [`Connection::close`] has been called on this end.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for MemoryConnection {
    fn peer(&self) -> &PeerIdentity {
        &self.peer
    }

    fn security(&self) -> ChannelSecurity {
        self.security
    }

    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error("connection"));
        }
        if self.input_closed.load(Ordering::SeqCst) {
            return Ok(0);
        }
        let mut inbound = lock(&self.inbound);
        if inbound.pending.is_empty() {
            let timeout = *lock(&self.read_timeout);
            let chunk = match timeout {
                Some(t) => match inbound.rx.recv_timeout(t) {
                    Ok(chunk) => chunk,
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(io::Error::new(io::ErrorKind::WouldBlock, "read timed out"))
                    }
                    Err(RecvTimeoutError::Disconnected) => return Ok(0),
                },
                None => match inbound.rx.recv() {
                    Ok(chunk) => chunk,
                    Err(_) => return Ok(0),
                },
            };
            inbound.pending = chunk;
        }
        let n = buf.len().min(inbound.pending.len());
        buf[..n].copy_from_slice(&inbound.pending[..n]);
        inbound.pending.drain(..n);
        Ok(n)
    }

    fn write_all(&self, buf: &[u8]) -> io::Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(closed_error("connection"));
        }
        if buf.is_empty() {
            return Ok(());
        }
        match lock(&self.outbound).as_ref() {
            Some(tx) => tx
                .send(buf.to_vec())
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer closed")),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "output closed")),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        if timeout == Some(Duration::ZERO) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "zero read timeout",
            ));
        }
        *lock(&self.read_timeout) = timeout;
        Ok(())
    }

    fn close_input(&self) -> io::Result<()> {
        self.input_closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn close_output(&self) -> io::Result<()> {
        lock(&self.outbound).take();
        Ok(())
    }

    fn close(&self) -> io::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.outbound).take();
        Ok(())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
