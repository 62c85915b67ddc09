use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// CLI arguments for the chat server.
#[derive(Parser, Debug, Clone)]
#[command(name = "msgrs")]
#[command(about = "msgr chat server")]
#[command(version)]
pub struct Args {
    /// Socket address to listen on.
    #[arg(long, default_value = "127.0.0.1:7777", env = "MSGRS_LISTEN")]
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    #[arg(long, default_value = "127.0.0.1:9090", env = "MSGRS_METRICS")]
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent connections.
    #[arg(long, default_value = "1024", env = "MSGRS_MAX_CONNS")]
    pub max_conns: usize,
    /// Login handshake timeout in seconds.
    #[arg(long, default_value = "5", env = "MSGRS_AUTH_TIMEOUT")]
    pub auth_timeout: u64,
    /// Per-session delivery queue depth.
    #[arg(long, default_value = "256", env = "MSGRS_DELIVERY_QUEUE")]
    pub delivery_queue: usize,
    /// Path to a `name:password` account seed file.
    #[arg(long, env = "MSGRS_USERS")]
    pub users: Option<PathBuf>,
}

/// Runtime configuration derived from [`Args`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Socket address to listen on.
    pub listen: SocketAddr,
    /// Socket address for the metrics endpoint.
    pub metrics_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_conns: usize,
    /// Login handshake timeout in seconds.
    pub auth_timeout: u64,
    /// Per-session delivery queue depth.
    pub delivery_queue: usize,
}

impl ServerConfig {
    /// Validates the configuration values are within acceptable bounds.
    ///
    /// # Errors
    ///
    /// Returns a description of the first out-of-bounds value.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_conns == 0 {
            return Err("max_conns must be greater than 0".to_string());
        }
        if self.max_conns > 100_000 {
            return Err("max_conns exceeds reasonable limit (100,000)".to_string());
        }

        if self.auth_timeout == 0 {
            return Err("auth_timeout must be greater than 0".to_string());
        }
        if self.auth_timeout > 300 {
            return Err("auth_timeout exceeds reasonable limit (300 seconds)".to_string());
        }

        if self.delivery_queue == 0 {
            return Err("delivery_queue must be greater than 0".to_string());
        }
        if self.delivery_queue > 65_536 {
            return Err("delivery_queue exceeds reasonable limit (65,536)".to_string());
        }
        Ok(())
    }
}

impl From<Args> for ServerConfig {
    fn from(args: Args) -> Self {
        Self {
            listen: args.listen,
            metrics_addr: args.metrics_addr,
            max_conns: args.max_conns,
            auth_timeout: args.auth_timeout,
            delivery_queue: args.delivery_queue,
        }
    }
}
