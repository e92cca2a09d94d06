//! HTTP server for the academy game engine.
//!
//! Exposed as a library so integration tests can build the router against
//! an in-memory store and drive it without a running server.

pub mod api;
pub mod config;
pub mod logging;
