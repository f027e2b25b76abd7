//! # spp-core
//!
//! Shared library for SPP-Link containing the connection-lifecycle state
//! machine, the bidirectional data pump, and the transport abstraction.
//!
//! This crate is used by both the client and the server applications.  The
//! role-specific workers (the outbound connector and the accept loop) live in
//! `spp-client` and `spp-server`; everything they have in common lives here.
//!
//! # Architecture overview
//!
//! SPP-Link keeps exactly one ordered, reliable byte stream open between two
//! peers.  One side actively connects (the *client*), the other passively
//! listens (the *server*).  Once connected, bytes written on one side arrive,
//! in order, on the other.
//!
//! - **`domain`** – Plain data: the five connection states, peer identities,
//!   and the secure/insecure channel selection.
//!
//! - **`event`** – The observer surface.  Every state change, received chunk,
//!   connected peer name, and advisory notice is posted on one ordered channel.
//!
//! - **`transport`** – The socket-like primitive the session drives: connect,
//!   listen, accept, read, write, close.  A TCP implementation and an
//!   in-memory implementation are provided.
//!
//! - **`session`** – The `ConnectionSession` state machine and the `DataPump`
//!   worker that relays bytes over an established connection.

pub mod domain;
pub mod event;
pub mod session;
pub mod transport;

pub use domain::peer::PeerIdentity;
pub use domain::security::{current_security, ChannelSecurity, SecurityFlag, SecurityPreference};
pub use domain::state::ConnectionState;
pub use event::{
    event_channel, EventReceiver, EventSender, LinkEvent, TOAST_CONNECTION_LOST, TOAST_CONNECT_FAILED,
};
pub use session::pump::{PumpWriter, READ_BUFFER_SIZE, READ_POLL_INTERVAL};
pub use session::{ConnectionSession, Promotion, Worker, WorkerPolicy};
pub use transport::{
    ConnectSocket, Connection, ListenSocket, ServiceRecord, TransportError, TransportFactory,
};
