//! msgr client transport — a single authenticated connection to the chat
//! server with synchronous request helpers and an event stream for
//! unsolicited traffic.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Transport configuration and login credentials.
pub mod config;
/// Local cache of known users and contacts.
pub mod directory;
/// Error types surfaced by the transport.
pub mod error;
/// Connection, handshake, and the socket pump.
pub mod transport;

pub use config::{ClientConfig, Credentials};
pub use error::ClientError;
pub use transport::{ConnStatus, Event, Transport};
