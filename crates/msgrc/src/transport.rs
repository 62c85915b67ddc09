//! Client transport: connect with retry, authenticate, then multiplex
//! synchronous requests and unsolicited inbound traffic over one socket.
//!
//! After the handshake a single pump task owns the socket. Request
//! helpers hand it a message plus a oneshot reply slot; the pump writes
//! the frame and queues the slot, so every inbound reply pairs with the
//! oldest outstanding request and can never be stolen by the background
//! read. Unsolicited frames (routed messages, `205` notices) surface
//! through a broadcast event channel.
//!
//! Any socket error while online is fatal: the pump stops, the status
//! watch flips to `Closed`, and one `ConnectionLost` event is emitted.
//! The transport never reconnects on its own.

use crate::config::{ClientConfig, Credentials};
use crate::directory::Directory;
use crate::error::ClientError;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use msgr_common::codec::{self, FrameBuffer};
use msgr_common::crypto;
use msgr_common::message::{Message, Response};
use msgr_common::proto::code;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, info, warn};

/// Lifecycle of the transport's single server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnStatus {
    /// Not yet connected.
    Disconnected,
    /// TCP connect attempts in progress.
    Connecting,
    /// Connected, login handshake in flight.
    Handshaking,
    /// Admitted; requests and deliveries flowing.
    Online,
    /// Exit notice sent, pump stopping.
    ShuttingDown,
    /// Pump stopped; the transport is unusable.
    Closed,
}

/// Unsolicited traffic surfaced to the consumer.
#[derive(Debug, Clone)]
pub enum Event {
    /// A routed message addressed to this account.
    Message {
        /// Sending account name.
        sender: String,
        /// Message body (opaque; may be payload-encrypted by the peers).
        text: String,
        /// Sender's timestamp.
        time: u64,
    },
    /// The server asked us to re-pull the user and contact lists.
    ListsChanged,
    /// The connection died; no further requests will succeed.
    ConnectionLost,
}

enum Command {
    Request {
        message: Message,
        reply_tx: oneshot::Sender<Response>,
    },
    Shutdown,
}

/// Handle to one authenticated server connection.
#[derive(Debug)]
pub struct Transport {
    username: String,
    cmd_tx: mpsc::Sender<Command>,
    events_tx: broadcast::Sender<Event>,
    status_rx: watch::Receiver<ConnStatus>,
    directory: Arc<Directory>,
    request_timeout: Duration,
}

impl Transport {
    /// Connect, authenticate, and perform the initial list sync.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectFailed`] after exhausting connect attempts,
    /// [`ClientError::Server`] with the server's text when login is
    /// rejected, or the underlying transport error.
    pub async fn connect(
        config: &ClientConfig,
        credentials: Credentials,
    ) -> Result<Self, ClientError> {
        let (status_tx, status_rx) = watch::channel(ConnStatus::Disconnected);

        status_tx.send_replace(ConnStatus::Connecting);
        let stream = connect_with_retry(config).await?;

        status_tx.send_replace(ConnStatus::Handshaking);
        let (mut reader, mut writer) = stream.into_split();
        // Derived once per connection, not per handshake step.
        let hash_hex = crypto::password_hash_hex(&credentials.password, &credentials.username);
        handshake(&mut reader, &mut writer, &credentials, hash_hex.as_bytes()).await?;
        status_tx.send_replace(ConnStatus::Online);
        info!(user = %credentials.username, "logged in to {}", config.server);

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (events_tx, _) = broadcast::channel(64);
        tokio::spawn(run_pump(
            reader,
            writer,
            cmd_rx,
            events_tx.clone(),
            status_tx,
            credentials.username.clone(),
        ));

        let transport = Self {
            username: credentials.username,
            cmd_tx,
            events_tx,
            status_rx,
            directory: Arc::new(Directory::new()),
            request_timeout: config.request_timeout,
        };

        transport.refresh_users().await?;
        transport.refresh_contacts().await?;
        Ok(transport)
    }

    /// The account this transport is logged in as.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Subscribe to unsolicited events (messages, notices, loss).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events_tx.subscribe()
    }

    /// Watch the connection lifecycle.
    #[must_use]
    pub fn status(&self) -> watch::Receiver<ConnStatus> {
        self.status_rx.clone()
    }

    /// The local users/contacts cache.
    #[must_use]
    pub fn directory(&self) -> Arc<Directory> {
        Arc::clone(&self.directory)
    }

    async fn request(&self, message: Message) -> Result<Response, ClientError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Request { message, reply_tx })
            .await
            .map_err(|_| ClientError::ConnectionLost)?;
        match timeout(self.request_timeout, reply_rx).await {
            Err(_) => Err(ClientError::RequestTimeout),
            Ok(Err(_)) => Err(ClientError::ConnectionLost),
            Ok(Ok(reply)) => Ok(reply),
        }
    }

    /// Send a text message to another account.
    ///
    /// # Errors
    ///
    /// [`ClientError::Server`] with the server's text when the
    /// destination is rejected (offline or unknown).
    pub async fn send_message(&self, to: &str, text: &str) -> Result<(), ClientError> {
        let message = Message::Text {
            sender: self.username.clone(),
            destination: to.to_owned(),
            time: crypto::unix_now(),
            text: text.to_owned(),
        };
        expect_ok(self.request(message).await?)
    }

    /// Add a contact; updates the local cache on success.
    ///
    /// # Errors
    ///
    /// [`ClientError::Server`] when the server rejects the edge.
    pub async fn add_contact(&self, contact: &str) -> Result<(), ClientError> {
        let message = Message::AddContact {
            time: crypto::unix_now(),
            user: self.username.clone(),
            account_name: contact.to_owned(),
        };
        expect_ok(self.request(message).await?)?;
        self.directory.add_contact(contact);
        Ok(())
    }

    /// Remove a contact; updates the local cache on success.
    ///
    /// # Errors
    ///
    /// [`ClientError::Server`] when the server rejects the removal.
    pub async fn remove_contact(&self, contact: &str) -> Result<(), ClientError> {
        let message = Message::RemoveContact {
            time: crypto::unix_now(),
            user: self.username.clone(),
            account_name: contact.to_owned(),
        };
        expect_ok(self.request(message).await?)?;
        self.directory.remove_contact(contact);
        Ok(())
    }

    /// Re-pull the contact list into the local cache.
    ///
    /// # Errors
    ///
    /// [`ClientError::Server`] on an unexpected reply.
    pub async fn refresh_contacts(&self) -> Result<Vec<String>, ClientError> {
        let message = Message::GetContacts {
            time: crypto::unix_now(),
            user: self.username.clone(),
        };
        let reply = self.request(message).await?;
        if reply.code != code::ACCEPTED {
            return Err(unexpected(reply));
        }
        let contacts = reply.list_info.unwrap_or_default();
        self.directory.set_contacts(contacts.clone());
        Ok(contacts)
    }

    /// Re-pull the known-user list into the local cache.
    ///
    /// # Errors
    ///
    /// [`ClientError::Server`] on an unexpected reply.
    pub async fn refresh_users(&self) -> Result<Vec<String>, ClientError> {
        let message = Message::UsersRequest {
            time: crypto::unix_now(),
            account_name: self.username.clone(),
        };
        let reply = self.request(message).await?;
        if reply.code != code::ACCEPTED {
            return Err(unexpected(reply));
        }
        let users = reply.list_info.unwrap_or_default();
        self.directory.set_users(users.clone());
        Ok(users)
    }

    /// Fetch another user's stored public key. `Ok(None)` when the server
    /// has none on record.
    ///
    /// # Errors
    ///
    /// [`ClientError::Server`] on an unexpected reply.
    pub async fn key_request(&self, user: &str) -> Result<Option<String>, ClientError> {
        let message = Message::PublicKeyRequest {
            time: crypto::unix_now(),
            account_name: user.to_owned(),
        };
        let reply = self.request(message).await?;
        match reply.code {
            code::AUTH => Ok(reply.data),
            code::BAD_REQUEST => {
                debug!(user, "no public key on record");
                Ok(None)
            }
            _ => Err(unexpected(reply)),
        }
    }

    /// Log out: send the exit notice best-effort, give it a moment to
    /// flush, and stop the pump.
    pub async fn close(&self) {
        let _ = self.cmd_tx.send(Command::Shutdown).await;
        sleep(Duration::from_millis(500)).await;
    }
}

fn expect_ok(reply: Response) -> Result<(), ClientError> {
    match reply.code {
        code::OK => Ok(()),
        code::BAD_REQUEST => Err(ClientError::Server(
            reply.error.unwrap_or_else(|| "request rejected".to_owned()),
        )),
        _ => Err(unexpected(reply)),
    }
}

fn unexpected(reply: Response) -> ClientError {
    ClientError::Server(format!("unexpected reply {}", reply.code))
}

async fn connect_with_retry(config: &ClientConfig) -> Result<TcpStream, ClientError> {
    for attempt in 1..=config.connect_attempts {
        debug!(attempt, server = %config.server, "connecting");
        match timeout(config.connect_timeout, TcpStream::connect(config.server)).await {
            Ok(Ok(stream)) => return Ok(stream),
            Ok(Err(e)) => debug!(attempt, "connect failed: {e}"),
            Err(_) => debug!(attempt, "connect timed out"),
        }
        if attempt < config.connect_attempts {
            sleep(config.retry_delay).await;
        }
    }
    warn!(server = %config.server, "all connect attempts failed");
    Err(ClientError::ConnectFailed)
}

async fn read_reply(reader: &mut OwnedReadHalf) -> Result<Response, ClientError> {
    let bytes = codec::read_frame(reader).await?;
    match Message::from_slice(&bytes)? {
        Message::Reply(reply) => Ok(reply),
        other => {
            debug!(?other, "expected a reply during handshake");
            Err(ClientError::Server("unexpected frame during login".to_owned()))
        }
    }
}

async fn handshake(
    reader: &mut OwnedReadHalf,
    writer: &mut OwnedWriteHalf,
    credentials: &Credentials,
    hash_hex: &[u8],
) -> Result<(), ClientError> {
    let presence = Message::Presence {
        time: crypto::unix_now(),
        account_name: credentials.username.clone(),
        public_key: credentials.public_key.clone(),
    };
    codec::write_message(writer, &presence).await?;

    let reply = read_reply(reader).await?;
    match reply.code {
        code::AUTH => {
            let Some(nonce) = reply.data else {
                return Err(ClientError::Server("challenge without nonce".to_owned()));
            };
            let digest = crypto::challenge_digest(hash_hex, nonce.as_bytes());
            let answer = Message::Reply(Response::auth(BASE64.encode(digest)));
            codec::write_message(writer, &answer).await?;

            let verdict = read_reply(reader).await?;
            match verdict.code {
                code::OK => Ok(()),
                code::BAD_REQUEST => Err(ClientError::Server(
                    verdict.error.unwrap_or_else(|| "login rejected".to_owned()),
                )),
                _ => Err(unexpected(verdict)),
            }
        }
        code::BAD_REQUEST => Err(ClientError::Server(
            reply.error.unwrap_or_else(|| "login rejected".to_owned()),
        )),
        _ => Err(unexpected(reply)),
    }
}

fn handle_inbound(
    bytes: &[u8],
    pending: &mut VecDeque<oneshot::Sender<Response>>,
    events_tx: &broadcast::Sender<Event>,
    username: &str,
) -> Result<(), ClientError> {
    match Message::from_slice(bytes) {
        Ok(Message::Reply(reply)) => {
            // 205 is always server-initiated; it never answers a request.
            if reply.code == code::LISTS_CHANGED {
                let _ = events_tx.send(Event::ListsChanged);
                return Ok(());
            }
            if let Some(reply_tx) = pending.pop_front() {
                let _ = reply_tx.send(reply);
                return Ok(());
            }
            match reply.code {
                code::OK => Ok(()),
                code::BAD_REQUEST => Err(ClientError::Server(
                    reply.error.unwrap_or_else(|| "bad request".to_owned()),
                )),
                other => {
                    debug!(code = other, "unsolicited reply ignored");
                    Ok(())
                }
            }
        }
        Ok(Message::Text {
            sender,
            destination,
            time,
            text,
        }) if destination == username => {
            if events_tx
                .send(Event::Message { sender, text, time })
                .is_err()
            {
                debug!("inbound message dropped: no active subscribers");
            }
            Ok(())
        }
        Ok(other) => {
            debug!(?other, "unexpected frame");
            Ok(())
        }
        // A peer speaking garbage is indistinguishable from a broken
        // stream; give up rather than resynchronize.
        Err(e) => Err(e.into()),
    }
}

async fn run_pump(
    mut reader: OwnedReadHalf,
    mut writer: OwnedWriteHalf,
    mut cmd_rx: mpsc::Receiver<Command>,
    events_tx: broadcast::Sender<Event>,
    status_tx: watch::Sender<ConnStatus>,
    username: String,
) {
    let mut inbound = FrameBuffer::new();
    let mut chunk = [0u8; 4096];
    let mut pending: VecDeque<oneshot::Sender<Response>> = VecDeque::new();

    let result: Result<(), ClientError> = 'pump: loop {
        loop {
            match inbound.next_frame() {
                Ok(Some(bytes)) => {
                    if let Err(e) = handle_inbound(&bytes, &mut pending, &events_tx, &username) {
                        break 'pump Err(e);
                    }
                }
                Ok(None) => break,
                Err(e) => break 'pump Err(e.into()),
            }
        }

        tokio::select! {
            read = reader.read(&mut chunk) => {
                match read {
                    Ok(0) => break Err(ClientError::ConnectionLost),
                    Ok(n) => inbound.extend(&chunk[..n]),
                    Err(e) => break Err(e.into()),
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Request { message, reply_tx }) => {
                        if let Err(e) = codec::write_message(&mut writer, &message).await {
                            break Err(e.into());
                        }
                        pending.push_back(reply_tx);
                    }
                    Some(Command::Shutdown) => {
                        status_tx.send_replace(ConnStatus::ShuttingDown);
                        let exit = Message::Exit {
                            time: crypto::unix_now(),
                            account_name: username.clone(),
                        };
                        // Best effort; the server does not acknowledge it.
                        let _ = codec::write_message(&mut writer, &exit).await;
                        break Ok(());
                    }
                    None => break Ok(()),
                }
            }
        }
    };

    if let Err(e) = result {
        warn!(error = %e, "connection lost");
        let _ = events_tx.send(Event::ConnectionLost);
    }
    // Dropping `pending` wakes every outstanding request with a closed
    // channel, which the helpers surface as ConnectionLost.
    status_tx.send_replace(ConnStatus::Closed);
}
