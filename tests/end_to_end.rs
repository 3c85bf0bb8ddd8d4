//! Server and client talking over real TCP sockets.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use boardgame_protocol::config::{ClientConfig, ServerConfig};
use boardgame_protocol::core::codec::AvailableCodecs;
use boardgame_protocol::error::{ProtocolError, Result};
use boardgame_protocol::protocol::keystore::{KeyStore, MemoryKeyStore};
use boardgame_protocol::protocol::message::{ChoiceMessage, ChoiceResponseMessage, InfoMessage};
use boardgame_protocol::protocol::registry::TypeRegistry;
use boardgame_protocol::service::client;
use boardgame_protocol::service::server::{Server, ServerSession};
use boardgame_protocol::utils::crypto::KeyPair;
use boardgame_protocol::utils::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct Running {
    address: String,
    metrics: Arc<Metrics>,
    shutdown: mpsc::Sender<()>,
    handle: JoinHandle<Result<()>>,
}

/// Offers a choice, then confirms whatever the client picked.
async fn pick_a_game(session: ServerSession) -> Result<()> {
    session
        .send(&ChoiceMessage::new("What next?", ["new_game", "quit"]))
        .await?;
    let answer: ChoiceResponseMessage = session.receive().await?;
    session
        .send(&InfoMessage::new(format!(
            "{} chose {}",
            session.username(),
            answer.choice
        )))
        .await
}

async fn start(config: ServerConfig) -> Running {
    start_with(config, None).await
}

async fn start_with(config: ServerConfig, store: Option<Arc<dyn KeyStore>>) -> Running {
    let registry = Arc::new(TypeRegistry::with_defaults().unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    let mut server = Server::new(config, registry).unwrap();
    if let Some(store) = store {
        server = server.with_key_store(store);
    }
    let metrics = server.metrics();
    let (shutdown, shutdown_rx) = mpsc::channel(1);
    let handle = tokio::spawn(server.serve(listener, pick_a_game, shutdown_rx));
    Running {
        address,
        metrics,
        shutdown,
        handle,
    }
}

fn client_config(address: &str, username: &str, codec: &str) -> ClientConfig {
    ClientConfig {
        address: address.to_string(),
        username: username.to_string(),
        codec: codec.to_string(),
        connection_timeout: Duration::from_secs(2),
    }
}

fn server_config() -> ServerConfig {
    ServerConfig {
        shutdown_timeout: Duration::from_secs(2),
        ..ServerConfig::default()
    }
}

async fn play(config: &ClientConfig) -> String {
    let registry = Arc::new(TypeRegistry::with_defaults().unwrap());
    let session = client::connect(config, registry, &AvailableCodecs::with_defaults())
        .await
        .unwrap();
    let offer: ChoiceMessage = session.receive().await.unwrap();
    assert_eq!(offer.choices, vec!["new_game", "quit"]);
    session
        .send(&ChoiceResponseMessage::new("new_game"))
        .await
        .unwrap();
    let reply: InfoMessage = session.receive().await.unwrap();
    reply.text
}

#[tokio::test]
async fn test_choice_round_trip_over_tcp() {
    let server = start(server_config()).await;

    // Each connect generates fresh keys; the default server must not hold alice to the first.
    for codec in ["JSON", "MSGPACK"] {
        let text = play(&client_config(&server.address, "alice", codec)).await;
        assert_eq!(text, "alice chose new_game");
    }

    server.shutdown.send(()).await.unwrap();
    server.handle.await.unwrap().unwrap();

    let snapshot = server.metrics.snapshot();
    assert_eq!(snapshot.handshakes_success, 2);
    assert_eq!(snapshot.handshakes_failed, 0);
    assert_eq!(snapshot.connections_total, 2);
    assert_eq!(snapshot.connections_active, 0);
}

#[tokio::test]
async fn test_returning_player_reuses_key() {
    let store: Arc<dyn KeyStore> = Arc::new(MemoryKeyStore::new());
    let server = start_with(server_config(), Some(store)).await;
    let config = client_config(&server.address, "bob", "JSON");
    let secret = [42u8; 32];

    for _ in 0..2 {
        let registry = Arc::new(TypeRegistry::with_defaults().unwrap());
        let session = client::connect_with_keys(
            &config,
            registry,
            &AvailableCodecs::with_defaults(),
            KeyPair::from_secret_bytes(secret),
        )
        .await
        .unwrap();
        let _: ChoiceMessage = session.receive().await.unwrap();
        session.send(&ChoiceResponseMessage::new("quit")).await.unwrap();
        let reply: InfoMessage = session.receive().await.unwrap();
        assert_eq!(reply.text, "bob chose quit");
    }

    // A different key for the same name is refused by the client.
    let registry = Arc::new(TypeRegistry::with_defaults().unwrap());
    let result = client::connect_with_keys(
        &config,
        registry,
        &AvailableCodecs::with_defaults(),
        KeyPair::from_secret_bytes([7u8; 32]),
    )
    .await;
    assert!(matches!(result, Err(ProtocolError::HandshakeError(_))));

    server.shutdown.send(()).await.unwrap();
    server.handle.await.unwrap().unwrap();

    let snapshot = server.metrics.snapshot();
    assert_eq!(snapshot.handshakes_total, 3);
    assert_eq!(snapshot.handshakes_success, 2);
    assert_eq!(snapshot.handshakes_failed, 1);
}

#[tokio::test]
async fn test_unknown_codec_fails_before_connecting() {
    let registry = Arc::new(TypeRegistry::with_defaults().unwrap());
    // Nothing listens here; an attempted dial would be ConnectFailed.
    let config = client_config("127.0.0.1:9", "carol", "XML");
    let result = client::connect(&config, registry, &AvailableCodecs::with_defaults()).await;
    assert!(matches!(result, Err(ProtocolError::UnknownCodec(name)) if name == "XML"));
}

#[tokio::test]
async fn test_connection_limit_refuses_extra_clients() {
    let server = start(ServerConfig {
        max_connections: 1,
        ..server_config()
    })
    .await;

    // Holds the only slot: the handler waits for a response that never comes.
    let registry = Arc::new(TypeRegistry::with_defaults().unwrap());
    let first = client::connect(
        &client_config(&server.address, "dave", "JSON"),
        registry.clone(),
        &AvailableCodecs::with_defaults(),
    )
    .await
    .unwrap();
    let _: ChoiceMessage = first.receive().await.unwrap();

    let second = client::connect(
        &client_config(&server.address, "erin", "JSON"),
        registry,
        &AvailableCodecs::with_defaults(),
    )
    .await;
    assert!(second.is_err());
    assert_eq!(server.metrics.snapshot().connections_rejected, 1);

    drop(first);
    server.shutdown.send(()).await.unwrap();
    server.handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_dropping_shutdown_sender_stops_server() {
    let server = start(server_config()).await;
    drop(server.shutdown);
    let result = tokio::time::timeout(Duration::from_secs(5), server.handle).await;
    assert!(result.unwrap().unwrap().is_ok());
}
