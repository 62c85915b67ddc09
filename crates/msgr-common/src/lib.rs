//! Wire protocol shared by the msgr server and client.
//!
//! This crate provides:
//! - Typed wire messages and their JSON encoding ([`message`])
//! - Length-prefixed stream framing ([`codec`])
//! - Password KDF and handshake digest helpers ([`crypto`])
//! - Protocol field tokens, actions, and response codes ([`proto`])

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod codec;
pub mod crypto;
pub mod message;
pub mod proto;

pub use codec::{FrameBuffer, FramingError};
pub use message::{DecodeError, Message, Response};
