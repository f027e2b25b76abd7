//! Observer event surface.
//!
//! Producers (the caller thread, the connector, the acceptor, and the pump)
//! post [`LinkEvent`]s on one unbounded channel owned by the session.  The
//! channel preserves emission order, and posting never blocks, so a state
//! change made under the session lock never waits on the observer.
//!
//! The receiving half is handed to the embedding application, which consumes
//! it on whichever thread or task it likes: `recv().await` inside a Tokio
//! runtime, or `blocking_recv()` on a plain thread.

use tokio::sync::mpsc;
use tracing::trace;

use crate::domain::state::ConnectionState;

/// Notice posted when an outbound connect attempt fails.
pub const TOAST_CONNECT_FAILED: &str = "Unable to connect device";

/// Notice posted when an established connection drops.
pub const TOAST_CONNECTION_LOST: &str = "Device connection was lost";

/// An event delivered to the observer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    /// The session entered `state`.  Emitted on every transition, including
    /// transitions to the current state.
    StateChanged(ConnectionState),
    /// One read's worth of bytes from the peer.  Chunk boundaries do not
    /// necessarily match the peer's write boundaries.
    DataReceived(Vec<u8>),
    /// A connection was established with the named peer.
    PeerConnected(String),
    /// An advisory, non-fatal notice for the user.
    Toast(String),
}

/// Receiving half of the event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// Sending half of the event channel.  Cloned into each worker.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<LinkEvent>,
}

impl EventSender {
    /// Posts `event`.  If the observer has gone away the event is dropped.
    pub fn emit(&self, event: LinkEvent) {
        if let Err(mpsc::error::SendError(event)) = self.tx.send(event) {
            trace!("observer gone; dropping {event:?}");
        }
    }

    pub fn state_changed(&self, state: ConnectionState) {
        self.emit(LinkEvent::StateChanged(state));
    }

    pub fn toast(&self, text: &str) {
        self.emit(LinkEvent::Toast(text.to_string()));
    }
}

/// Creates a connected event sender/receiver pair.
pub fn event_channel() -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (EventSender { tx }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_are_received_in_emission_order() {
        // Arrange
        let (tx, mut rx) = event_channel();

        // Act
        tx.state_changed(ConnectionState::Listening);
        tx.emit(LinkEvent::PeerConnected("peer".into()));
        tx.toast(TOAST_CONNECTION_LOST);

        // Assert
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::StateChanged(ConnectionState::Listening)
        );
        assert_eq!(rx.try_recv().unwrap(), LinkEvent::PeerConnected("peer".into()));
        assert_eq!(
            rx.try_recv().unwrap(),
            LinkEvent::Toast("Device connection was lost".into())
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_emit_after_receiver_dropped_does_not_panic() {
        let (tx, rx) = event_channel();
        drop(rx);
        tx.toast(TOAST_CONNECT_FAILED);
    }

    #[test]
    fn test_events_from_several_threads_all_arrive() {
        // Arrange
        let (tx, mut rx) = event_channel();

        // Act
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let tx = tx.clone();
                std::thread::spawn(move || tx.emit(LinkEvent::DataReceived(vec![i])))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Assert
        let mut seen = Vec::new();
        while let Ok(LinkEvent::DataReceived(bytes)) = rx.try_recv() {
            seen.extend(bytes);
        }
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3]);
    }
}
