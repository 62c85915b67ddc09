use msgr_common::{DecodeError, FramingError};
use thiserror::Error;

/// Errors that can occur during server operation.
#[derive(Error, Debug)]
pub enum MsgrsError {
    /// Corrupt or oversize framing on the wire.
    #[error("framing error: {0}")]
    Framing(#[from] FramingError),
    /// Frame body that does not decode into a message.
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The login handshake was rejected.
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    /// The requested account name is already registered on a live session.
    #[error("account name already in use")]
    NameTaken,
    /// The peer did not complete the handshake in time.
    #[error("handshake timed out")]
    HandshakeTimeout,
    /// The connection was closed by the remote peer.
    #[error("connection closed")]
    ConnectionClosed,
}
