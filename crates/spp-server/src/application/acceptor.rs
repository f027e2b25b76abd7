//! PassiveAcceptor: the server's listen/accept loop.
//!
//! The listening socket is opened when the acceptor is built.  The loop then
//! runs on a thread named `spp-acceptor` until it is cancelled or `accept`
//! fails:
//!
//! ```text
//! loop while active
//!  ├─ Connected      -> sleep, re-check
//!  ├─ Disconnecting  -> close stale listener, open a fresh one with the
//!  │                    current security, Disconnecting -> Listening
//!  └─ otherwise      -> accept()
//!                        ├─ Listening | Connecting -> promote
//!                        └─ None | Connected       -> close the newcomer
//! ```
//!
//! The listening socket is rebuilt after every lost link, and each rebuild
//! reads the security preference again.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use spp_core::{
    current_security, ChannelSecurity, ConnectionSession, ConnectionState, ListenSocket, Promotion,
    SecurityPreference, TransportFactory, Worker,
};

/// How long the loop idles between checks while a link is up.
pub const CONNECTED_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Granularity of that idle wait, bounding how late a cancel is noticed.
const PAUSE_SLICE: Duration = Duration::from_millis(25);

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    active: AtomicBool,
    listener: Mutex<Option<Arc<dyn ListenSocket>>>,
}

impl Shared {
    fn close_listener(&self) {
        if let Some(listener) = lock(&self.listener).take() {
            if let Err(e) = listener.close() {
                debug!("closing listener: {e}");
            }
        }
    }

    /// Stores `listener` unless the acceptor was cancelled meanwhile, in
    /// which case it is closed straight away.
    fn install_listener(&self, listener: Arc<dyn ListenSocket>) -> bool {
        let mut slot = lock(&self.listener);
        if !self.active.load(Ordering::SeqCst) {
            if let Err(e) = listener.close() {
                debug!("closing listener opened after cancel: {e}");
            }
            return false;
        }
        *slot = Some(listener);
        true
    }
}

/// The accept loop and its listening socket.
pub struct PassiveAcceptor {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl PassiveAcceptor {
    /// Opens the listening socket with `security`.
    ///
    /// A failure is logged; the loop then exits on its first iteration and
    /// the next `start()` builds a new acceptor.
    pub fn new(factory: &dyn TransportFactory, security: ChannelSecurity) -> Self {
        let listener = match factory.listen(security) {
            Ok(listener) => {
                info!("listening [{security}]");
                Some(listener)
            }
            Err(e) => {
                error!("listen failed: {e}");
                None
            }
        };
        Self {
            shared: Arc::new(Shared {
                active: AtomicBool::new(true),
                listener: Mutex::new(listener),
            }),
            handle: None,
        }
    }

    /// `true` if a listening socket is currently open.
    pub fn is_listening(&self) -> bool {
        lock(&self.shared.listener).is_some()
    }

    /// Starts the accept loop on its own thread.
    ///
    /// # Errors
    ///
    /// Returns the I/O error if the thread could not be spawned.
    pub fn spawn(
        mut self,
        session: Arc<ConnectionSession>,
        factory: Arc<dyn TransportFactory>,
        preference: Arc<dyn SecurityPreference>,
    ) -> io::Result<Box<dyn Worker>> {
        let shared = Arc::clone(&self.shared);
        let handle = thread::Builder::new()
            .name("spp-acceptor".to_string())
            .spawn(move || {
                run(&shared, &session, factory.as_ref(), preference.as_ref());
                shared.close_listener();
                debug!("accept loop exited");
            })?;
        self.handle = Some(handle);
        Ok(Box::new(self))
    }
}

impl Worker for PassiveAcceptor {
    fn cancel(&self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.close_listener();
    }

    fn join(mut self: Box<Self>) {
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!("acceptor thread panicked");
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

fn run(
    shared: &Shared,
    session: &Arc<ConnectionSession>,
    factory: &dyn TransportFactory,
    preference: &dyn SecurityPreference,
) {
    while shared.active.load(Ordering::SeqCst) {
        match session.state() {
            ConnectionState::Connected => {
                pause(&shared.active, CONNECTED_POLL_INTERVAL);
                continue;
            }
            ConnectionState::Disconnecting => {
                if !relist(shared, session, factory, preference) {
                    break;
                }
                continue;
            }
            _ => {}
        }

        let Some(listener) = lock(&shared.listener).clone() else {
            warn!("no listening socket; accept loop exiting");
            break;
        };

        match listener.accept() {
            Ok(conn) => {
                let peer = conn.peer().clone();
                match session.promote(conn, Promotion::Inbound) {
                    Ok(()) => info!("accepted {peer}"),
                    Err(conn) => {
                        info!("rejected {peer} while {}", session.state());
                        if let Err(e) = conn.close() {
                            debug!("closing rejected connection: {e}");
                        }
                    }
                }
            }
            Err(e) => {
                if shared.active.load(Ordering::SeqCst) {
                    warn!("accept failed: {e}");
                } else {
                    debug!("accept interrupted by cancel: {e}");
                }
                break;
            }
        }
    }
}

/// Replaces the listening socket after a lost link, then moves the session
/// from `Disconnecting` back to `Listening`.  Returns `false` if the loop
/// should exit.
fn relist(
    shared: &Shared,
    session: &ConnectionSession,
    factory: &dyn TransportFactory,
    preference: &dyn SecurityPreference,
) -> bool {
    shared.close_listener();
    if !shared.active.load(Ordering::SeqCst) {
        return false;
    }

    let security = current_security(preference);
    match factory.listen(security) {
        Ok(listener) => {
            if !shared.install_listener(listener) {
                return false;
            }
            info!("relisting [{security}]");
        }
        Err(e) => {
            error!("relisten failed: {e}");
            return false;
        }
    }

    if !session.compare_and_set_state(ConnectionState::Disconnecting, ConnectionState::Listening) {
        debug!("state moved to {} during relist", session.state());
    }
    true
}

fn pause(active: &AtomicBool, total: Duration) {
    let mut waited = Duration::ZERO;
    while waited < total && active.load(Ordering::SeqCst) {
        thread::sleep(PAUSE_SLICE);
        waited += PAUSE_SLICE;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use spp_core::transport::memory::{MemoryHub, MemoryTransportFactory, TransportOp};
    use spp_core::{PeerIdentity, SecurityFlag};
    use std::time::Instant;

    fn server_factory(hub: &Arc<MemoryHub>) -> Arc<MemoryTransportFactory> {
        Arc::new(MemoryTransportFactory::new(
            Arc::clone(hub),
            PeerIdentity::named("server", "Server"),
        ))
    }

    #[test]
    fn test_new_opens_listener_with_given_security() {
        // Arrange
        let hub = MemoryHub::new();
        let factory = server_factory(&hub);

        // Act
        let acceptor = PassiveAcceptor::new(factory.as_ref(), ChannelSecurity::Insecure);

        // Assert
        assert!(acceptor.is_listening());
        assert!(hub.is_listening("server"));
        assert_eq!(
            factory.operations(),
            vec![TransportOp::Listen { id: 0, security: ChannelSecurity::Insecure }]
        );
    }

    #[test]
    fn test_listen_failure_leaves_acceptor_without_listener() {
        let hub = MemoryHub::new();
        let factory = server_factory(&hub);
        let _occupant = PassiveAcceptor::new(factory.as_ref(), ChannelSecurity::Secure);

        let second = PassiveAcceptor::new(factory.as_ref(), ChannelSecurity::Secure);

        assert!(!second.is_listening());
    }

    #[test]
    fn test_cancel_closes_listener_and_loop_exits() {
        // Arrange
        let hub = MemoryHub::new();
        let factory = server_factory(&hub);
        let (session, _rx) = ConnectionSession::new("server");
        session.set_state(ConnectionState::Listening);
        let worker = PassiveAcceptor::new(factory.as_ref(), ChannelSecurity::Secure)
            .spawn(
                Arc::clone(&session),
                factory.clone(),
                Arc::new(SecurityFlag::default()),
            )
            .unwrap();

        // Act
        worker.cancel();
        let deadline = Instant::now() + Duration::from_secs(5);
        while !worker.is_finished() {
            assert!(Instant::now() < deadline, "accept loop did not exit");
            thread::sleep(Duration::from_millis(5));
        }
        worker.join();

        // Assert
        assert!(!hub.is_listening("server"));
        assert_eq!(
            factory.operations(),
            vec![
                TransportOp::Listen { id: 0, security: ChannelSecurity::Secure },
                TransportOp::CloseListener { id: 0 },
            ]
        );
    }

    #[test]
    fn test_pause_returns_early_when_cancelled() {
        let active = AtomicBool::new(false);
        let started = Instant::now();
        pause(&active, Duration::from_secs(10));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
