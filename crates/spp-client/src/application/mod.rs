//! Application layer for the client.
//!
//! - **`connector`** – `ActiveConnector`, one outbound connect attempt on its
//!   own thread.
//! - **`controller`** – `ClientController`, the façade the binary (or any
//!   embedding code) drives: `start`, `connect`, `send_data`, `stop`.

pub mod connector;
pub mod controller;
