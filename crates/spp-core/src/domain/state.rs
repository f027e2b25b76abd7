//! Connection lifecycle states.
//!
//! ```text
//!            start()            connect()            established
//!   None ──────────► Listening ──────────► Connecting ──────────► Connected
//!    ▲                  ▲  ▲                    │                    │
//!    │                  │  └──── connect failed ┘          read error │
//!    │                  │                                             ▼
//!    │                  └────────────── server relists ──────── Disconnecting
//!    └──────────────────────────── stop() (from any state) ───────────┘
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current state of a session's connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Nothing is running.
    #[default]
    None,
    /// Ready: the server is accepting, the client is waiting for `connect`.
    Listening,
    /// An outbound connect attempt is in flight.
    Connecting,
    /// A data pump is relaying bytes to and from a peer.
    Connected,
    /// The peer was lost; the server will relist, the client waits.
    Disconnecting,
}

impl ConnectionState {
    /// Returns the variant name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::None => "None",
            ConnectionState::Listening => "Listening",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnecting => "Disconnecting",
        }
    }

    /// Collapses the state into the three labels a status display shows.
    pub fn status_label(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::None
            | ConnectionState::Listening
            | ConnectionState::Disconnecting => "disconnected",
        }
    }

    /// `true` if bytes handed to `send_data` will be written.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
