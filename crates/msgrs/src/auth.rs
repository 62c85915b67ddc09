//! Server side of the challenge-response login handshake.
//!
//! Sequence per new connection: the client opens with a `presence`
//! carrying its account name and public key; the server answers with a
//! `511` challenge nonce; the client replies with a `511` digest of that
//! nonce keyed by its password hash; on a constant-time match the caller
//! admits the session and answers `200`. Every rejection is a `400` with
//! error text followed by connection teardown — there is no retry.

use crate::error::MsgrsError;
use crate::registry::Registry;
use crate::storage::Storage;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use msgr_common::message::{Message, Response};
use msgr_common::proto::code;
use msgr_common::{codec, crypto};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

/// Identity established by a completed handshake.
#[derive(Debug, Clone)]
pub struct AuthedUser {
    /// Authenticated account name.
    pub username: String,
    /// Public key string announced in the presence message.
    pub public_key: String,
}

async fn reject<W>(writer: &mut W, reason: &str)
where
    W: AsyncWrite + Unpin,
{
    // Best effort: the connection is being torn down either way.
    let reply = Message::Reply(Response::bad_request(reason));
    if let Err(e) = codec::write_message(writer, &reply).await {
        debug!("failed to send rejection: {e}");
    }
}

/// Runs the handshake on a fresh connection up to (but not including)
/// registration and the final `200`.
///
/// # Errors
///
/// Returns [`MsgrsError::NameTaken`] when the account is already online,
/// [`MsgrsError::AuthFailed`] for every other rejection, and the
/// underlying framing error when the socket dies mid-handshake.
pub async fn authenticate<R, W>(
    reader: &mut R,
    writer: &mut W,
    registry: &Registry,
    storage: &dyn Storage,
) -> Result<AuthedUser, MsgrsError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let opening = codec::read_frame(reader).await?;
    let (account_name, public_key) = match Message::from_slice(&opening) {
        Ok(Message::Presence {
            account_name,
            public_key,
            ..
        }) => (account_name, public_key),
        Ok(other) => {
            debug!(?other, "expected presence as first frame");
            reject(writer, "bad request").await;
            return Err(MsgrsError::AuthFailed("presence expected".into()));
        }
        Err(e) => {
            reject(writer, "bad request").await;
            return Err(MsgrsError::AuthFailed(format!("unreadable presence: {e}")));
        }
    };

    if registry.lookup(&account_name).is_some() {
        reject(writer, "name taken").await;
        return Err(MsgrsError::NameTaken);
    }

    let Some(hash_hex) = storage
        .check_user(&account_name)
        .then(|| storage.get_hash(&account_name))
        .flatten()
    else {
        reject(writer, "user not registered").await;
        return Err(MsgrsError::AuthFailed(format!(
            "unknown account {account_name}"
        )));
    };

    let nonce = crypto::issue_nonce();
    codec::write_message(writer, &Message::Reply(Response::auth(nonce.clone()))).await?;

    let answer = codec::read_frame(reader).await?;
    let digest = match Message::from_slice(&answer) {
        Ok(Message::Reply(reply)) if reply.code == code::AUTH => reply
            .data
            .as_deref()
            .and_then(|data| BASE64.decode(data).ok()),
        _ => None,
    };

    let verified = digest.is_some_and(|digest| {
        crypto::verify_digest(&hash_hex, nonce.as_bytes(), &digest)
    });
    if !verified {
        reject(writer, "bad password").await;
        return Err(MsgrsError::AuthFailed(format!(
            "digest mismatch for {account_name}"
        )));
    }

    Ok(AuthedUser {
        username: account_name,
        public_key,
    })
}
