//! ServerController: the server role's public surface.
//!
//! Owns the [`ConnectionSession`] and at most one [`PassiveAcceptor`].  The
//! acceptor keeps running across disconnects; `start()` only builds a new one
//! if none is running, for example after an accept failure ended the loop.

use std::io;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use spp_core::{
    current_security, ConnectionSession, ConnectionState, EventReceiver, SecurityPreference,
    TransportFactory, WorkerPolicy,
};

use super::acceptor::PassiveAcceptor;

/// Errors returned by controller operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// The accept thread could not be started.
    #[error("failed to spawn acceptor thread: {0}")]
    Spawn(#[source] io::Error),
}

/// Drives the server side of the link.
pub struct ServerController {
    session: Arc<ConnectionSession>,
    factory: Arc<dyn TransportFactory>,
    preference: Arc<dyn SecurityPreference>,
}

impl ServerController {
    /// Creates an idle controller (state `None`) and the observer's event
    /// receiver.
    pub fn new(
        factory: Arc<dyn TransportFactory>,
        preference: Arc<dyn SecurityPreference>,
    ) -> (Self, EventReceiver) {
        let (session, events) = ConnectionSession::new("server");
        (
            Self {
                session,
                factory,
                preference,
            },
            events,
        )
    }

    /// Cancels any data pump, enters `Listening`, and starts the accept loop
    /// if none is running.
    ///
    /// # Errors
    ///
    /// Returns [`ControllerError::Spawn`] if the accept thread could not be
    /// started.
    pub fn start(&self) -> Result<(), ControllerError> {
        self.session
            .reset(Some(ConnectionState::Listening), WorkerPolicy::Keep);
        if self.session.has_live_worker() {
            return Ok(());
        }

        let security = current_security(self.preference.as_ref());
        info!("starting accept loop [{security}]");
        let acceptor = PassiveAcceptor::new(self.factory.as_ref(), security);
        let session = Arc::clone(&self.session);
        let factory = Arc::clone(&self.factory);
        let preference = Arc::clone(&self.preference);
        self.session
            .install_worker(None, |_ticket| acceptor.spawn(session, factory, preference))
            .map_err(ControllerError::Spawn)?;
        Ok(())
    }

    /// Cancels the accept loop and the data pump, waits for their threads,
    /// and forces `None`.  Idempotent.
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

    /// `true` while the accept loop thread is running.
    pub fn is_accepting(&self) -> bool {
        self.session.has_live_worker()
    }

    /// Restarts the accept loop if it exited on its own while the server is
    /// still serving (`Listening` or `Disconnecting`).  Returns `true` if a
    /// new loop was started.  A stopped server is left alone.
    ///
    /// # Errors
    ///
    /// Same as [`start`](Self::start).
    pub fn ensure_accepting(&self) -> Result<bool, ControllerError> {
        let state = self.session.state();
        if !matches!(
            state,
            ConnectionState::Listening | ConnectionState::Disconnecting
        ) || self.is_accepting()
        {
            return Ok(false);
        }
        warn!("accept loop is not running while {state}; restarting");
        self.start()?;
        Ok(true)
    }
}

impl Drop for ServerController {
    fn drop(&mut self) {
        self.session.shutdown();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
