//! Application layer for the server.
//!
//! - **`acceptor`** – `PassiveAcceptor`, the listen/accept/relist loop on its
//!   own thread.
//! - **`controller`** – `ServerController`: `start`, `send_data`, `stop`.

pub mod acceptor;
pub mod controller;
