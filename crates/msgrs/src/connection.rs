use crate::auth::authenticate;
use crate::error::MsgrsError;
use crate::metrics::{counters, gauges, histograms};
use crate::registry::SessionHandle;
use crate::server::ServerState;
use msgr_common::codec::{self, FrameBuffer, FramingError};
use msgr_common::message::{Message, Response};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Drive one client connection: handshake, admission, then the session
/// loop until the peer exits or the connection dies.
pub async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), MsgrsError> {
    let (mut reader, mut writer) = stream.into_split();

    let auth_timeout = Duration::from_secs(state.config.auth_timeout);
    let authed = match timeout(
        auth_timeout,
        authenticate(
            &mut reader,
            &mut writer,
            &state.registry,
            state.storage.as_ref(),
        ),
    )
    .await
    {
        Ok(Ok(authed)) => authed,
        Ok(Err(e)) => {
            counters::logins_total("rejected");
            return Err(e);
        }
        Err(_) => {
            counters::logins_total("timeout");
            let reply = Message::Reply(Response::bad_request("handshake timed out"));
            let _ = codec::write_message(&mut writer, &reply).await;
            return Err(MsgrsError::HandshakeTimeout);
        }
    };

    let (deliver_tx, mut deliver_rx) = mpsc::channel(state.config.delivery_queue);
    let connected_at = Instant::now();
    let username = authed.username;
    let handle = SessionHandle {
        tx: deliver_tx,
        username: username.clone(),
        connected_at,
    };

    // The handshake checked the name, but a concurrent login of the same
    // account can still win the race; the atomic insert settles it.
    if state.registry.register(handle).is_err() {
        counters::logins_total("rejected");
        let reply = Message::Reply(Response::bad_request("name taken"));
        let _ = codec::write_message(&mut writer, &reply).await;
        return Err(MsgrsError::NameTaken);
    }

    state
        .storage
        .user_login(&username, peer_addr.ip(), peer_addr.port(), &authed.public_key);
    counters::logins_total("ok");
    gauges::inc_sessions_active();
    info!(user = %username, peer = %peer_addr, "session admitted");

    let mut lists_rx = state.subscribe_lists_changed();
    let result = async {
        codec::write_message(&mut writer, &Message::Reply(Response::ok())).await?;
        run_session(
            &mut reader,
            &mut writer,
            &mut deliver_rx,
            &mut lists_rx,
            &state,
            &username,
        )
        .await
    }
    .await;

    state.registry.unregister_if(&username, connected_at);
    state.storage.user_logout(&username);
    gauges::dec_sessions_active();
    info!(user = %username, "session closed");
    result
}

/// The per-session event loop: inbound frames, queued deliveries, and
/// lists-changed notices, multiplexed over one socket.
async fn run_session<R, W>(
    reader: &mut R,
    writer: &mut W,
    deliver_rx: &mut mpsc::Receiver<Vec<u8>>,
    lists_rx: &mut broadcast::Receiver<()>,
    state: &ServerState,
    username: &str,
) -> Result<(), MsgrsError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut inbound = FrameBuffer::new();
    let mut chunk = [0u8; 4096];

    loop {
        // Drain complete frames before risking another await; reads feed
        // the buffer so a select cancellation never loses partial data.
        while let Some(bytes) = inbound.next_frame()? {
            match Message::from_slice(&bytes) {
                Ok(message) => {
                    let start = Instant::now();
                    let flow = dispatch(message, writer, state, username).await?;
                    histograms::dispatch_seconds(start.elapsed().as_secs_f64());
                    if flow == Flow::Exit {
                        return Ok(());
                    }
                }
                Err(e) if e.is_request_error() => {
                    debug!(user = %username, error = %e, "malformed request");
                    reply(writer, Response::bad_request("bad request")).await?;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tokio::select! {
            read = reader.read(&mut chunk) => {
                match read {
                    Ok(0) => {
                        return if inbound.has_partial() {
                            Err(FramingError::Truncated.into())
                        } else {
                            Ok(())
                        };
                    }
                    Ok(n) => inbound.extend(&chunk[..n]),
                    Err(e) => return Err(e.into()),
                }
            }
            delivery = deliver_rx.recv() => {
                match delivery {
                    Some(frame) => {
                        writer.write_all(&frame).await?;
                        writer.flush().await?;
                    }
                    // All senders gone: the registry entry was evicted by a
                    // failed delivery, so this session is already dead.
                    None => return Err(MsgrsError::ConnectionClosed),
                }
            }
            notice = lists_rx.recv() => {
                match notice {
                    Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                        reply(writer, Response::lists_changed()).await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(MsgrsError::ConnectionClosed);
                    }
                }
            }
        }
    }
}

async fn reply<W>(writer: &mut W, response: Response) -> Result<(), MsgrsError>
where
    W: AsyncWrite + Unpin,
{
    codec::write_message(writer, &Message::Reply(response))
        .await
        .map_err(Into::into)
}

/// Apply one authenticated request. Any request that claims an identity
/// must claim the one this session authenticated as; a mismatch is
/// answered like any other malformed request.
async fn dispatch<W>(
    message: Message,
    writer: &mut W,
    state: &ServerState,
    username: &str,
) -> Result<Flow, MsgrsError>
where
    W: AsyncWrite + Unpin,
{
    match message {
        Message::Text {
            sender,
            destination,
            time,
            text,
        } => {
            if sender != username {
                debug!(user = %username, claimed = %sender, "sender spoof rejected");
                reply(writer, Response::bad_request("bad request")).await?;
                return Ok(Flow::Continue);
            }
            let Some(dest) = state.registry.lookup(&destination) else {
                counters::messages_dropped_total("offline");
                reply(writer, Response::bad_request("user is not online")).await?;
                return Ok(Flow::Continue);
            };

            state.storage.process_message(&sender, &destination);
            let forwarded = Message::Text {
                sender,
                destination: destination.clone(),
                time,
                text,
            };
            let frame = codec::encode_frame(&forwarded.to_bytes())?;
            if dest.tx.try_send(frame).is_err() {
                // Full queue or dead task both mean the destination is
                // lost; dropping its registry entry closes its session.
                counters::messages_dropped_total("connection_lost");
                state.registry.unregister_if(&destination, dest.connected_at);
                state.storage.user_logout(&destination);
                debug!(dest = %destination, "delivery failed, destination removed");
            } else {
                counters::messages_routed_total();
            }
            reply(writer, Response::ok()).await?;
            Ok(Flow::Continue)
        }

        Message::Exit { account_name, .. } => {
            if account_name != username {
                reply(writer, Response::bad_request("bad request")).await?;
                return Ok(Flow::Continue);
            }
            Ok(Flow::Exit)
        }

        Message::GetContacts { user, .. } => {
            if user != username {
                reply(writer, Response::bad_request("bad request")).await?;
                return Ok(Flow::Continue);
            }
            let contacts = state.storage.get_contacts(&user);
            reply(writer, Response::accepted(contacts)).await?;
            Ok(Flow::Continue)
        }

        Message::AddContact {
            user, account_name, ..
        } => {
            if user != username {
                reply(writer, Response::bad_request("bad request")).await?;
                return Ok(Flow::Continue);
            }
            state.storage.add_contact(&user, &account_name);
            reply(writer, Response::ok()).await?;
            Ok(Flow::Continue)
        }

        Message::RemoveContact {
            user, account_name, ..
        } => {
            if user != username {
                reply(writer, Response::bad_request("bad request")).await?;
                return Ok(Flow::Continue);
            }
            state.storage.remove_contact(&user, &account_name);
            reply(writer, Response::ok()).await?;
            Ok(Flow::Continue)
        }

        Message::UsersRequest { account_name, .. } => {
            if account_name != username {
                reply(writer, Response::bad_request("bad request")).await?;
                return Ok(Flow::Continue);
            }
            let users = state
                .storage
                .users_list()
                .into_iter()
                .map(|(name, _)| name)
                .collect();
            reply(writer, Response::accepted(users)).await?;
            Ok(Flow::Continue)
        }

        // Deliberately no sender check: any authenticated user may look up
        // any public key.
        Message::PublicKeyRequest { account_name, .. } => {
            match state.storage.get_pubkey(&account_name) {
                Some(pubkey) => reply(writer, Response::auth(pubkey)).await?,
                None => {
                    reply(writer, Response::bad_request("no public key for user")).await?;
                }
            }
            Ok(Flow::Continue)
        }

        Message::Presence { .. } | Message::Reply(_) => {
            debug!(user = %username, "unexpected frame post-login");
            reply(writer, Response::bad_request("bad request")).await?;
            Ok(Flow::Continue)
        }
    }
}
