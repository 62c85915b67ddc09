//! msgr chat server — routes point-to-point messages between
//! authenticated users by account name.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Server side of the login handshake.
pub mod auth;
/// CLI argument parsing and server configuration.
pub mod config;
mod connection;
/// Error types for server operations.
pub mod error;
/// Prometheus metrics collection and HTTP endpoint.
pub mod metrics;
/// Account-name → session routing table.
pub mod registry;
/// Accept loop and shared server state.
pub mod server;
/// Storage adapter contract and in-memory reference implementation.
pub mod storage;

pub use server::{run, run_with_shutdown, ServerState};
