//! spp-client library entry point.
//!
//! Re-exports all public modules so that integration tests in `tests/`
//! and the binary entry point in `main.rs` share the same module tree.
//!
//! The *client* is the side that actively connects.  Given a peer address it:
//!
//! 1. Reads the channel-security preference and creates an outbound socket.
//! 2. Runs one connect attempt on a background thread (no automatic retry).
//! 3. On success hands the connection to the shared `DataPump`, which relays
//!    bytes in both directions until the link drops or `stop()` is called.
//! 4. On failure posts "Unable to connect device" and returns to `Listening`.

/// Application layer: the outbound connector and the client controller.
pub mod application;

/// Infrastructure layer: configuration persistence.
pub mod infrastructure;
