//! Domain types with no I/O: connection states, peer identities, and the
//! channel-security selection.

pub mod peer;
pub mod security;
pub mod state;
