use msgr_common::{DecodeError, FramingError};
use thiserror::Error;

/// Errors surfaced by the client transport.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The server rejected a request; carries the server's error text.
    #[error("server error: {0}")]
    Server(String),
    /// All connection attempts were exhausted.
    #[error("could not connect to server")]
    ConnectFailed,
    /// The connection died; the transport is unusable and must be rebuilt.
    #[error("connection to server lost")]
    ConnectionLost,
    /// No reply arrived within the request timeout.
    #[error("request timed out")]
    RequestTimeout,
    /// Corrupt framing on the wire.
    #[error("framing error: {0}")]
    Framing(FramingError),
    /// A frame body that does not decode into a message.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<FramingError> for ClientError {
    fn from(e: FramingError) -> Self {
        match e {
            // A clean peer close is a lost connection from the client's
            // point of view, not a protocol fault.
            FramingError::Closed => Self::ConnectionLost,
            other => Self::Framing(other),
        }
    }
}
