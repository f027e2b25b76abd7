//! Infrastructure layer for the server application.
//!
//! **Dependency rule**: this layer may depend on `application` and `spp_core`,
//! but MUST NOT be imported by the `application` layer.

pub mod storage;
