use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use msgr_common::codec;
use msgr_common::crypto;
use msgr_common::message::{Message, Response};
use msgr_common::proto::code;
use msgrs::config::ServerConfig;
use msgrs::server::ServerState;
use msgrs::storage::MemoryStorage;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};

pub fn test_config(listen: SocketAddr) -> ServerConfig {
    ServerConfig {
        listen,
        metrics_addr: "127.0.0.1:0".parse().unwrap(),
        max_conns: 100,
        auth_timeout: 5,
        delivery_queue: 256,
    }
}

fn make_state(config: ServerConfig) -> (Arc<ServerState>, Arc<MemoryStorage>) {
    let storage = Arc::new(MemoryStorage::new());
    storage.add_user("alice", "alicepw");
    storage.add_user("bob", "bobpw");
    storage.add_user("carol", "carolpw");
    let state = Arc::new(ServerState::new(config, storage.clone()));
    (state, storage)
}

async fn spawn_server(config_for: impl FnOnce(SocketAddr) -> ServerConfig) -> (SocketAddr, Arc<ServerState>, Arc<MemoryStorage>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (state, storage) = make_state(config_for(addr));

    let state_clone = state.clone();
    tokio::spawn(async move {
        if let Err(e) = msgrs::run(listener, state_clone).await {
            eprintln!("server error in test: {e}");
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    (addr, state, storage)
}

pub async fn start_server() -> (SocketAddr, Arc<ServerState>, Arc<MemoryStorage>) {
    spawn_server(test_config).await
}

pub async fn start_server_with_auth_timeout(
    auth_timeout: u64,
) -> (SocketAddr, Arc<ServerState>, Arc<MemoryStorage>) {
    spawn_server(|addr| {
        let mut config = test_config(addr);
        config.auth_timeout = auth_timeout;
        config
    })
    .await
}

/// Poll until the set of online users matches, or panic after ~2s.
pub async fn wait_for_online(state: &ServerState, mut expected: Vec<&str>) {
    expected.sort_unstable();
    for _ in 0..40 {
        let mut online = state.online_users();
        online.sort();
        if online == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("online users never became {expected:?}, got {:?}", state.online_users());
}

pub struct TestClient {
    pub stream: TcpStream,
    pub username: String,
}

/// Drive the login handshake on a raw stream. `nonce_override` lets a
/// test digest something other than the issued nonce.
pub async fn login(
    stream: &mut TcpStream,
    username: &str,
    password: &str,
    nonce_override: Option<String>,
) -> Response {
    let presence = Message::Presence {
        time: crypto::unix_now(),
        account_name: username.to_owned(),
        public_key: format!("PUB:{username}"),
    };
    codec::write_message(stream, &presence).await.unwrap();

    let challenge = recv_on(stream).await;
    let Message::Reply(challenge) = challenge else {
        panic!("expected a reply to presence, got {challenge:?}");
    };
    if challenge.code != code::AUTH {
        return challenge; // rejected before the challenge
    }

    let nonce = nonce_override.unwrap_or_else(|| challenge.data.unwrap());
    let hash = crypto::password_hash_hex(password, username);
    let digest = crypto::challenge_digest(hash.as_bytes(), nonce.as_bytes());
    let answer = Message::Reply(Response::auth(BASE64.encode(digest)));
    codec::write_message(stream, &answer).await.unwrap();

    let Message::Reply(verdict) = recv_on(stream).await else {
        panic!("expected a login verdict");
    };
    verdict
}

async fn recv_on(stream: &mut TcpStream) -> Message {
    let bytes = tokio::time::timeout(Duration::from_secs(5), codec::read_frame(stream))
        .await
        .expect("timeout waiting for frame")
        .unwrap();
    Message::from_slice(&bytes).unwrap()
}

impl TestClient {
    pub async fn connect(addr: &SocketAddr, username: &str, password: &str) -> Self {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let verdict = login(&mut stream, username, password, None).await;
        assert_eq!(verdict.code, code::OK, "login failed: {verdict:?}");
        Self {
            stream,
            username: username.to_owned(),
        }
    }

    /// Attempt a login that is expected to fail; returns the 400 reply.
    pub async fn connect_rejected(
        addr: &SocketAddr,
        username: &str,
        password: &str,
        nonce_override: Option<String>,
    ) -> Response {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let verdict = login(&mut stream, username, password, nonce_override).await;
        assert_eq!(verdict.code, code::BAD_REQUEST, "expected rejection: {verdict:?}");
        verdict
    }

    pub async fn send(&mut self, message: &Message) {
        codec::write_message(&mut self.stream, message).await.unwrap();
    }

    pub async fn send_raw(&mut self, body: &[u8]) {
        codec::write_frame(&mut self.stream, body).await.unwrap();
    }

    pub async fn send_text(&mut self, to: &str, text: &str) {
        let message = Message::Text {
            sender: self.username.clone(),
            destination: to.to_owned(),
            time: crypto::unix_now(),
            text: text.to_owned(),
        };
        self.send(&message).await;
    }

    pub async fn recv(&mut self) -> Message {
        recv_on(&mut self.stream).await
    }

    pub async fn recv_reply(&mut self) -> Response {
        match self.recv().await {
            Message::Reply(reply) => reply,
            other => panic!("expected a reply, got {other:?}"),
        }
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Message> {
        tokio::time::timeout(timeout, self.recv()).await.ok()
    }

    /// True once the server has dropped this connection.
    pub async fn assert_disconnected(&mut self) {
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            codec::read_frame(&mut self.stream),
        )
        .await;
        match result {
            Ok(Err(_)) => {}
            Ok(Ok(frame)) => panic!("expected disconnect, got frame {frame:?}"),
            Err(_) => panic!("connection still open after 2s"),
        }
    }

    pub async fn exit(&mut self) {
        let message = Message::Exit {
            time: crypto::unix_now(),
            account_name: self.username.clone(),
        };
        self.send(&message).await;
    }
}
