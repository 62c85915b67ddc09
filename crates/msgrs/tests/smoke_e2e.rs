//! End-to-end smoke tests driving the real client transport against the
//! server.

mod common;

use common::{start_server, wait_for_online};
use msgrc::{ClientConfig, ConnStatus, Credentials, Event, Transport};
use std::time::Duration;

fn credentials(username: &str, password: &str) -> Credentials {
    Credentials {
        username: username.to_owned(),
        password: password.to_owned(),
        public_key: format!("PUB:{username}"),
    }
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timeout waiting for event")
        .expect("event channel closed")
}

#[tokio::test]
async fn transports_exchange_a_message() {
    let (addr, state, _storage) = start_server().await;
    let config = ClientConfig::new(addr);

    let alice = Transport::connect(&config, credentials("alice", "alicepw"))
        .await
        .unwrap();
    let bob = Transport::connect(&config, credentials("bob", "bobpw"))
        .await
        .unwrap();
    wait_for_online(&state, vec!["alice", "bob"]).await;
    assert_eq!(*alice.status().borrow(), ConnStatus::Online);

    let mut bob_events = bob.subscribe();
    alice.send_message("bob", "hi").await.unwrap();

    match next_event(&mut bob_events).await {
        Event::Message { sender, text, .. } => {
            assert_eq!(sender, "alice");
            assert_eq!(text, "hi");
        }
        other => panic!("expected a message event, got {other:?}"),
    }
}

#[tokio::test]
async fn initial_sync_fills_the_directory() {
    let (addr, _state, _storage) = start_server().await;
    let config = ClientConfig::new(addr);

    let alice = Transport::connect(&config, credentials("alice", "alicepw"))
        .await
        .unwrap();

    let mut users = alice.directory().users();
    users.sort();
    assert_eq!(users, ["alice", "bob", "carol"]);
    assert!(alice.directory().contacts().is_empty());

    alice.add_contact("bob").await.unwrap();
    assert!(alice.directory().is_contact("bob"));

    let contacts = alice.refresh_contacts().await.unwrap();
    assert_eq!(contacts, ["bob"]);

    alice.remove_contact("bob").await.unwrap();
    assert!(alice.refresh_contacts().await.unwrap().is_empty());
}

#[tokio::test]
async fn send_to_offline_user_surfaces_server_error() {
    let (addr, _state, _storage) = start_server().await;
    let config = ClientConfig::new(addr);

    let alice = Transport::connect(&config, credentials("alice", "alicepw"))
        .await
        .unwrap();

    let err = alice.send_message("carol", "hello?").await.unwrap_err();
    assert!(matches!(err, msgrc::ClientError::Server(_)));
}

#[tokio::test]
async fn key_request_returns_stored_key_or_none() {
    let (addr, _state, _storage) = start_server().await;
    let config = ClientConfig::new(addr);

    let alice = Transport::connect(&config, credentials("alice", "alicepw"))
        .await
        .unwrap();
    let _bob = Transport::connect(&config, credentials("bob", "bobpw"))
        .await
        .unwrap();

    assert_eq!(
        alice.key_request("bob").await.unwrap().as_deref(),
        Some("PUB:bob")
    );
    assert_eq!(alice.key_request("carol").await.unwrap(), None);
}

#[tokio::test]
async fn close_logs_out_and_peers_see_the_user_gone() {
    let (addr, state, _storage) = start_server().await;
    let config = ClientConfig::new(addr);

    let alice = Transport::connect(&config, credentials("alice", "alicepw"))
        .await
        .unwrap();
    let bob = Transport::connect(&config, credentials("bob", "bobpw"))
        .await
        .unwrap();
    wait_for_online(&state, vec!["alice", "bob"]).await;

    bob.close().await;
    wait_for_online(&state, vec!["alice"]).await;
    assert_eq!(*bob.status().borrow(), ConnStatus::Closed);

    let err = alice.send_message("bob", "gone?").await.unwrap_err();
    assert!(matches!(err, msgrc::ClientError::Server(_)));
}

#[tokio::test]
async fn wrong_password_surfaces_server_text() {
    let (addr, _state, _storage) = start_server().await;
    let config = ClientConfig::new(addr);

    let err = Transport::connect(&config, credentials("alice", "wrong"))
        .await
        .unwrap_err();
    match err {
        msgrc::ClientError::Server(text) => assert_eq!(text, "bad password"),
        other => panic!("expected a server rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn connect_to_dead_server_fails_after_retries() {
    // Nothing listens on this port; keep the retry schedule short.
    let mut config = ClientConfig::new("127.0.0.1:9".parse().unwrap());
    config.connect_attempts = 2;
    config.retry_delay = Duration::from_millis(50);
    config.connect_timeout = Duration::from_millis(250);

    let err = Transport::connect(&config, credentials("alice", "alicepw"))
        .await
        .unwrap_err();
    assert!(matches!(err, msgrc::ClientError::ConnectFailed));
}

#[tokio::test]
async fn lists_changed_notice_becomes_an_event() {
    let (addr, state, _storage) = start_server().await;
    let config = ClientConfig::new(addr);

    let alice = Transport::connect(&config, credentials("alice", "alicepw"))
        .await
        .unwrap();
    let mut events = alice.subscribe();
    wait_for_online(&state, vec!["alice"]).await;

    state.broadcast_lists_changed();

    match next_event(&mut events).await {
        Event::ListsChanged => {}
        other => panic!("expected a lists-changed event, got {other:?}"),
    }
}
