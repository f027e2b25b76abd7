//! spp-server library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The *server* is the side that passively listens.  Once started it:
//!
//! 1. Opens a listening socket for its service record, using the security
//!    variant preferred at that moment.
//! 2. Accepts one peer at a time and hands the connection to the shared
//!    `DataPump`.
//! 3. When the link drops, closes the stale listening socket, opens a fresh
//!    one (re-reading the security preference) and goes back to `Listening`.

/// Application layer: the accept loop and the server controller.
pub mod application;

/// Infrastructure layer: configuration persistence.
pub mod infrastructure;
