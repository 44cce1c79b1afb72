//! Chat sessions against a real relay.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use roomcast_client::{ChatSession, ClientConfig, RelayClient, SessionUpdate};
use roomcast_protocol::{Ack, RoomId};
use roomcast_server::{run_with_listener, serve_connection, AppState, Config};
use roomcast_transport::memory::{self, MemoryConnector};
use roomcast_transport::{Transport, WebSocketConnector};

const TIMEOUT: Duration = Duration::from_secs(5);

fn config() -> ClientConfig {
    ClientConfig::default()
        .with_reconnect_delay(Duration::from_millis(20))
        .with_request_timeout(Duration::from_secs(2))
}

/// Run a relay behind an in-memory listener. Each accepted connection's
/// task handle is reported so tests can kill it.
fn boot_memory_relay() -> (Arc<AppState>, MemoryConnector, mpsc::UnboundedReceiver<JoinHandle<()>>) {
    let state = Arc::new(AppState::new(Config::default()));
    let (listener, connector) = memory::listener();
    let (handles_tx, handles_rx) = mpsc::unbounded_channel();

    let accept_state = state.clone();
    tokio::spawn(async move {
        while let Ok(conn) = listener.accept().await {
            let handle = tokio::spawn(serve_connection(conn, accept_state.clone()));
            if handles_tx.send(handle).is_err() {
                break;
            }
        }
    });

    (state, connector, handles_rx)
}

async fn update(session: &mut ChatSession) -> SessionUpdate {
    timeout(TIMEOUT, session.next_update())
        .await
        .expect("timed out waiting for update")
        .expect("session ended")
}

async fn connected(session: &mut ChatSession) -> (String, Option<RoomId>) {
    match update(session).await {
        SessionUpdate::Connected {
            connection_id,
            rejoined,
        } => (connection_id, rejoined),
        other => panic!("expected connected, got {:?}", other),
    }
}

async fn message_text(session: &mut ChatSession) -> String {
    match update(session).await {
        SessionUpdate::Message(message) => message.text,
        other => panic!("expected message, got {:?}", other),
    }
}

fn start(connector: MemoryConnector) -> ChatSession {
    let (client, events) = RelayClient::start(connector, config());
    ChatSession::new(client, events)
}

#[tokio::test]
async fn rejoins_room_after_reconnect() {
    let (state, connector, mut handles) = boot_memory_relay();

    let mut alice = start(connector.clone());
    let (first_id, rejoined) = connected(&mut alice).await;
    assert_eq!(rejoined, None);
    let alice_task = handles.recv().await.unwrap();

    let mut bob = start(connector);
    connected(&mut bob).await;
    let _bob_task = handles.recv().await.unwrap();

    alice.select_room("general").await.unwrap();
    bob.select_room("general").await.unwrap();
    assert!(alice.controller().is_active_member());
    assert_eq!(state.relay.member_count("general"), 2);

    // Kill alice's connection on the relay side.
    alice_task.abort();
    assert_eq!(update(&mut alice).await, SessionUpdate::Disconnected);
    assert!(!alice.controller().is_active_member());
    assert_eq!(alice.controller().joined().map(RoomId::as_str), Some("general"));

    let (second_id, rejoined) = connected(&mut alice).await;
    assert_ne!(first_id, second_id);
    assert_eq!(rejoined.as_ref().map(RoomId::as_str), Some("general"));
    assert!(alice.controller().is_active_member());
    assert_eq!(state.relay.member_count("general"), 2);

    assert_eq!(bob.send("welcome back").await.unwrap(), Some(Ack::Ok));
    assert_eq!(message_text(&mut alice).await, "welcome back");
    assert_eq!(message_text(&mut bob).await, "welcome back");
}

#[tokio::test]
async fn switching_rooms_leaves_the_old_one() {
    let (state, connector, _handles) = boot_memory_relay();

    let mut alice = start(connector.clone());
    let mut bob = start(connector);
    let (alice_id, _) = connected(&mut alice).await;
    connected(&mut bob).await;

    alice.select_room("general").await.unwrap();
    bob.select_room("general").await.unwrap();
    alice.select_room("random").await.unwrap();

    assert_eq!(state.relay.member_count("general"), 1);
    assert_eq!(state.relay.member_count("random"), 1);
    assert!(state.relay.members("random").iter().any(|c| c.as_str() == alice_id));

    bob.send("anyone in general?").await.unwrap();
    assert_eq!(message_text(&mut bob).await, "anyone in general?");
    assert!(
        timeout(Duration::from_millis(100), alice.next_update()).await.is_err(),
        "alice should not hear general any more"
    );
}

#[tokio::test]
async fn display_name_travels_with_messages() {
    let (_state, connector, _handles) = boot_memory_relay();

    let mut alice = start(connector);
    let (alice_id, _) = connected(&mut alice).await;
    alice.set_display_name(Some("Alice".to_string()));
    alice.select_room("team").await.unwrap();

    alice.send("  standup in 5  ").await.unwrap();
    match update(&mut alice).await {
        SessionUpdate::Message(message) => {
            assert_eq!(message.text, "standup in 5");
            assert_eq!(message.from, alice_id);
            assert_eq!(message.from_name.as_deref(), Some("Alice"));
            assert!(alice.controller().is_mine(&message));
        }
        other => panic!("expected message, got {:?}", other),
    }
    assert_eq!(alice.controller().messages().len(), 1);
}

#[tokio::test]
async fn chat_over_websocket() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = Arc::new(AppState::new(Config::default()));
    tokio::spawn(run_with_listener(listener, state.clone()));

    let url = format!("ws://{addr}/ws");
    let (client, events) = RelayClient::start(WebSocketConnector::new(url.clone()), config());
    let mut alice = ChatSession::new(client, events);
    let (client, events) = RelayClient::start(WebSocketConnector::new(url), config());
    let mut bob = ChatSession::new(client, events);

    connected(&mut alice).await;
    connected(&mut bob).await;
    alice.select_room("gaming").await.unwrap();
    bob.select_room("gaming").await.unwrap();

    alice.send("gg").await.unwrap();
    assert_eq!(message_text(&mut alice).await, "gg");
    assert_eq!(message_text(&mut bob).await, "gg");

    alice.shutdown().await;
    timeout(TIMEOUT, async {
        while state.relay.member_count("gaming") != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("relay kept a closed connection");
}
