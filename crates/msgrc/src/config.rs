use std::net::SocketAddr;
use std::time::Duration;

/// Runtime configuration for the client transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address to connect to.
    pub server: SocketAddr,
    /// Number of TCP connect attempts before giving up.
    pub connect_attempts: u32,
    /// Fixed pause between connect attempts.
    pub retry_delay: Duration,
    /// Per-attempt connect timeout.
    pub connect_timeout: Duration,
    /// Timeout for a synchronous request's reply.
    pub request_timeout: Duration,
}

impl ClientConfig {
    /// Configuration with protocol-default timeouts for the given server.
    #[must_use]
    pub fn new(server: SocketAddr) -> Self {
        Self {
            server,
            connect_attempts: 5,
            retry_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// Login identity for one transport.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// Account name to log in as.
    pub username: String,
    /// Plaintext password; hashed once at connection-init.
    pub password: String,
    /// Public key string announced to the server (opaque to the
    /// transport; peers fetch it for payload encryption).
    pub public_key: String,
}
