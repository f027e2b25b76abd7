//! ClientController: the client role's public surface.
//!
//! Owns the [`ConnectionSession`] and starts one [`ActiveConnector`] per
//! `connect` call.  Every method may be called from any thread.  Events are
//! delivered on the receiver returned by [`ClientController::new`].

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, info};

use spp_core::{
    current_security, ConnectionSession, ConnectionState, EventReceiver, PeerIdentity,
    SecurityPreference, TransportError, TransportFactory, WorkerPolicy, TOAST_CONNECT_FAILED,
};

use super::connector::ActiveConnector;

/// Errors returned by controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The peer address could not be resolved.  The session is unchanged.
    #[error("invalid peer: {0}")]
    InvalidPeer(#[source] TransportError),

    /// A worker thread could not be started.
    #[error("failed to spawn {worker} thread: {source}")]
    Spawn {
        worker: &'static str,
        #[source]
        source: io::Error,
    },
}

/// Drives the client side of the link.
pub struct ClientController {
    session: Arc<ConnectionSession>,
    factory: Arc<dyn TransportFactory>,
    preference: Arc<dyn SecurityPreference>,
}

impl ClientController {
    /// Creates an idle controller (state `None`) and the observer's event
    /// receiver.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        preference: Arc<dyn SecurityPreference>,
    ) -> (Self, EventReceiver) {
        let (session, events) = ConnectionSession::new("client");
        (
            Self {
                session,
                factory,
                preference,
            },
            events,
        )
    }

    /// Cancels any connect attempt and data pump, then enters `Listening`.
    pub fn start(&self) {
        self.session
            .reset(Some(ConnectionState::Listening), WorkerPolicy::Cancel);
    }

    /// Cancels everything, waits for the worker threads, and forces `None`.
    /// Idempotent.
    pub fn stop(&self) {
        self.session.shutdown();
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    /// Sends `bytes` to the peer if connected; otherwise drops them.
    pub fn send_data(&self, bytes: &[u8]) {
        self.session.send_data(bytes);
    }

    /// Resolves `address` through the transport factory and connects to it.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::InvalidPeer`] without touching the session
    /// if the address is malformed.
    pub fn connect_to(&self, address: &str, name: Option<&str>) -> Result<(), ControllerError> {
        let peer = self
            .factory
            .resolve_peer(address, name)
            .map_err(ControllerError::InvalidPeer)?;
        self.connect(peer)
    }

    /// Abandons any pending attempt and live connection, then starts a new
    /// attempt to `peer` and enters `Connecting`.  The security variant is read
    /// from the preference now.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Spawn`] if the connector thread could not be
    /// started; the session is then back in `Listening` with a toast posted.
    pub fn connect(&self, peer: PeerIdentity) -> Result<(), ControllerError> {
        let security = current_security(self.preference.as_ref());
        info!("connecting to {peer} [{security}]");

        self.session.reset(None, WorkerPolicy::Cancel);

        let connector = ActiveConnector::new(self.factory.as_ref(), peer, security);
        let session = Arc::clone(&self.session);
        let factory = Arc::clone(&self.factory);
        let installed = self
            .session
            .install_worker(Some(ConnectionState::Connecting), |ticket| {
                connector.spawn(session, factory, ticket)
            });

        if let Err(source) = installed {
            error!("could not start connector: {source}");
            self.session.events().toast(TOAST_CONNECT_FAILED);
            self.session.set_state(ConnectionState::Listening);
            return Err(ControllerError::Spawn {
                worker: "connector",
                source,
            });
        }
        Ok(())
    }
}

impl Drop for ClientController {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use spp_core::transport::memory::{MemoryHub, MemoryTransportFactory, TransportOp};
    use spp_core::{LinkEvent, SecurityFlag};

    fn controller(hub: &Arc<MemoryHub>) -> (ClientController, EventReceiver, Arc<MemoryTransportFactory>) {
        let factory = Arc::new(MemoryTransportFactory::new(
            Arc::clone(hub),
            PeerIdentity::named("client", "Client"),
        ));
        let (controller, rx) = ClientController::new(factory.clone(), Arc::new(SecurityFlag::default()));
        (controller, rx, factory)
    }

    #[test]
    fn test_new_controller_is_idle() {
        let hub = MemoryHub::new();
        let (controller, mut rx, _) = controller(&hub);
        assert_eq!(controller.state(), ConnectionState::None);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_start_enters_listening() {
        // Arrange
        let hub = MemoryHub::new();
        let (controller, mut rx, _) = controller(&hub);

        // Act
        controller.start();

        // Assert
        assert_eq!(controller.state(), ConnectionState::Listening);
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::StateChanged(ConnectionState::Listening)
        );
    }

    #[test]
    fn test_connect_to_invalid_address_leaves_session_untouched() {
        // Arrange
        let hub = MemoryHub::new();
        let (controller, mut rx, factory) = controller(&hub);
        controller.start();
        let _ = rx.try_recv();

        // Act
        let result = controller.connect_to("not an address", None);

        // Assert
        assert!(matches!(result, Err(ControllerError::InvalidPeer(_))));
        assert_eq!(controller.state(), ConnectionState::Listening);
        assert!(rx.try_recv().is_err());
        assert!(factory.operations().is_empty());
    }

    #[test]
    fn test_connect_enters_connecting_with_preferred_security() {
        // Arrange
        let hub = MemoryHub::new();
        hub.set_unresponsive("server");
        let (controller, _rx, factory) = controller(&hub);
        controller.start();

        // Act
        controller.connect_to("server", None).unwrap();

        // Assert
        assert_eq!(controller.state(), ConnectionState::Connecting);
        assert_eq!(
            factory.operations()[0],
            TransportOp::CreateSocket {
                peer: "server".into(),
                security: spp_core::ChannelSecurity::Secure,
            }
        );
        controller.stop();
        assert_eq!(controller.state(), ConnectionState::None);
    }
}
