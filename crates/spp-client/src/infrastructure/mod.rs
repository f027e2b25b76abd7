//! Infrastructure layer for the client application.
//!
//! **Dependency rule**: this layer may depend on `application` and `spp_core`,
//! but MUST NOT be imported by the `application` layer.

pub mod storage;
