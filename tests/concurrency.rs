//! Concurrent use of one established session from many tasks.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use boardgame_protocol::core::codec::AvailableCodecs;
use boardgame_protocol::protocol::handshake::{ClientLogin, ServerHandshake};
use boardgame_protocol::protocol::keystore::MemoryKeyStore;
use boardgame_protocol::protocol::message::{ChoiceResponseMessage, InfoMessage};
use boardgame_protocol::protocol::registry::TypeRegistry;
use boardgame_protocol::service::PeerSession;
use boardgame_protocol::transport::FrameTransport;
use boardgame_protocol::utils::crypto::KeyPair;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::io::DuplexStream;
use tokio::task::JoinSet;

type Session = PeerSession<FrameTransport<DuplexStream>>;

async fn session_pair(codec: &str) -> (Session, Session) {
    let registry = Arc::new(TypeRegistry::with_defaults().unwrap());
    let codecs = Arc::new(AvailableCodecs::with_defaults());
    let (server_side, client_side) = FrameTransport::memory_pair();

    let server = ServerHandshake::new(
        server_side,
        "memory",
        Arc::new(KeyPair::generate().unwrap()),
        codecs.clone(),
        registry.clone(),
    );
    let client = ClientLogin::new(
        client_side,
        "alice",
        codecs.get(codec).unwrap(),
        registry,
    )
    .unwrap();

    let store = MemoryKeyStore::new();
    let (server, client) = tokio::join!(server.run(&store), client.login());
    (server.unwrap(), client.unwrap())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_sends_arrive_intact() {
    let tasks_count = 16usize;
    let per_task = 50usize;
    let (server, client) = session_pair("MSGPACK").await;
    let client = Arc::new(client);

    let mut tasks = JoinSet::new();
    for t in 0..tasks_count {
        let client = client.clone();
        tasks.spawn(async move {
            for i in 0..per_task {
                let msg = InfoMessage::new(format!("task-{t}-msg-{i}"));
                client.send(&msg).await.unwrap();
            }
        });
    }

    let receiver = tokio::spawn(async move {
        let mut seen = HashSet::new();
        for _ in 0..tasks_count * per_task {
            let msg: InfoMessage = server.receive().await.unwrap();
            assert!(seen.insert(msg.text), "duplicate message");
        }
        seen
    });

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
    let seen = receiver.await.unwrap();
    assert_eq!(seen.len(), tasks_count * per_task);
    assert!(seen.contains("task-0-msg-0"));
    assert!(seen.contains(&format!("task-{}-msg-{}", tasks_count - 1, per_task - 1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_task_order_is_preserved() {
    let (server, client) = session_pair("JSON").await;
    let client = Arc::new(client);

    let mut tasks = JoinSet::new();
    for t in 0..4 {
        let client = client.clone();
        tasks.spawn(async move {
            for i in 0..100 {
                client
                    .send(&ChoiceResponseMessage::new(format!("{t}:{i}")))
                    .await
                    .unwrap();
            }
        });
    }

    let mut next = [0usize; 4];
    for _ in 0..400 {
        let msg: ChoiceResponseMessage = server.receive().await.unwrap();
        let (t, i) = msg.choice.split_once(':').unwrap();
        let t: usize = t.parse().unwrap();
        let i: usize = i.parse().unwrap();
        assert_eq!(i, next[t], "messages from task {t} reordered");
        next[t] += 1;
    }
    assert_eq!(next, [100; 4]);

    while let Some(res) = tasks.join_next().await {
        res.unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn both_directions_at_once() {
    let (server, client) = session_pair("JSON").await;
    let server = Arc::new(server);
    let client = Arc::new(client);

    let s = server.clone();
    let server_sender = tokio::spawn(async move {
        for i in 0..200 {
            s.send(&InfoMessage::new(format!("to-client-{i}"))).await.unwrap();
        }
    });
    let c = client.clone();
    let client_sender = tokio::spawn(async move {
        for i in 0..200 {
            c.send(&InfoMessage::new(format!("to-server-{i}"))).await.unwrap();
        }
    });

    let server_reader = tokio::spawn(async move {
        for i in 0..200 {
            let msg: InfoMessage = server.receive().await.unwrap();
            assert_eq!(msg.text, format!("to-server-{i}"));
        }
    });
    for i in 0..200 {
        let msg: InfoMessage = client.receive().await.unwrap();
        assert_eq!(msg.text, format!("to-client-{i}"));
    }

    server_sender.await.unwrap();
    client_sender.await.unwrap();
    server_reader.await.unwrap();
}
