//! The `rps` provisioning server.
//!
//! Wires the provisioning engine to the outside world: configuration,
//! logging, the WebSocket endpoints devices and the Enterprise Assistant
//! connect to, and HTTP clients for the remote collaborators.

pub mod cli;
pub mod config;
pub mod http_collaborators;
pub mod logging;
pub mod server;
