//! End-to-end relay tests over the in-memory transport and a real websocket.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use roomcast_protocol::{Ack, ChatMessage, Frame};
use roomcast_server::{run_with_listener, serve_connection, AppState, Config};
use roomcast_transport::memory::{self, MemoryConnection};
use roomcast_transport::{Connection, Connector, WebSocketConnector};

const TIMEOUT: Duration = Duration::from_secs(5);

fn state() -> Arc<AppState> {
    Arc::new(AppState::new(Config::default()))
}

/// Attach an in-memory client and return it with its connection id.
async fn attach(state: &Arc<AppState>) -> (MemoryConnection, String) {
    let (server, mut client) = memory::pair();
    tokio::spawn(serve_connection(Box::new(server), state.clone()));

    match next(&mut client).await {
        Frame::Connected { connection_id, .. } => (client, connection_id),
        other => panic!("expected connected frame, got {:?}", other),
    }
}

async fn next(conn: &mut dyn Connection) -> Frame {
    timeout(TIMEOUT, conn.recv())
        .await
        .expect("timed out waiting for frame")
        .unwrap()
        .expect("connection closed")
}

async fn request(conn: &mut dyn Connection, frame: Frame) -> Ack {
    let id = frame.request_id().unwrap();
    conn.send(frame).await.unwrap();
    match next(conn).await {
        Frame::Ack { id: acked, ack } => {
            assert_eq!(acked, id);
            ack
        }
        other => panic!("expected ack, got {:?}", other),
    }
}

async fn message(conn: &mut dyn Connection) -> ChatMessage {
    match next(conn).await {
        Frame::MessageNew { message } => message,
        other => panic!("expected message:new, got {:?}", other),
    }
}

async fn assert_silent(conn: &mut dyn Connection) {
    assert!(
        timeout(Duration::from_millis(100), conn.recv()).await.is_err(),
        "unexpected frame"
    );
}

/// Boot a relay on an ephemeral port and return its address.
async fn boot_server() -> (std::net::SocketAddr, Arc<AppState>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let state = state();
    tokio::spawn(run_with_listener(listener, state.clone()));
    (addr, state)
}

#[tokio::test]
async fn hi_and_bye_between_two_clients() {
    let state = state();
    let (mut c1, c1_id) = attach(&state).await;
    let (mut c2, _) = attach(&state).await;

    assert_eq!(request(&mut c1, Frame::join(1, "general")).await, Ack::Ok);
    assert_eq!(request(&mut c2, Frame::join(1, "general")).await, Ack::Ok);

    assert_eq!(
        request(&mut c1, Frame::send(2, "general", "hi", Some("Ada".to_string()))).await,
        Ack::Ok
    );
    let at_c1 = message(&mut c1).await;
    let at_c2 = message(&mut c2).await;
    assert_eq!(at_c1, at_c2);
    assert_eq!(at_c2.text, "hi");
    assert_eq!(at_c2.from, c1_id);
    assert_eq!(at_c2.from_name.as_deref(), Some("Ada"));
    assert_eq!(at_c2.conversation_id, "general");

    assert_eq!(request(&mut c2, Frame::leave(2, "general")).await, Ack::Ok);
    assert_eq!(request(&mut c1, Frame::send(3, "general", "bye", None)).await, Ack::Ok);
    assert_eq!(message(&mut c1).await.text, "bye");
    assert_silent(&mut c2).await;
}

#[tokio::test]
async fn non_members_receive_nothing() {
    let state = state();
    let (mut member, _) = attach(&state).await;
    let (mut other, _) = attach(&state).await;

    request(&mut member, Frame::join(1, "dev")).await;
    request(&mut other, Frame::join(1, "music")).await;

    request(&mut member, Frame::send(2, "dev", "ship it", None)).await;
    assert_eq!(message(&mut member).await.text, "ship it");
    assert_silent(&mut other).await;
}

#[tokio::test]
async fn validation_failures_are_acked() {
    let state = state();
    let (mut conn, _) = attach(&state).await;

    assert_eq!(
        request(&mut conn, Frame::join(1, "   ")).await,
        Ack::error("conversationId missing")
    );
    assert_eq!(
        request(&mut conn, Frame::send(2, "", "hello", None)).await,
        Ack::error("conversationId missing")
    );
    assert_eq!(
        request(&mut conn, Frame::send(3, "general", "  \n ", None)).await,
        Ack::error("empty message")
    );
    assert_eq!(state.relay.stats().total_memberships, 0);

    // The connection is still usable.
    assert_eq!(request(&mut conn, Frame::join(4, "general")).await, Ack::Ok);
    assert_eq!(request(&mut conn, Frame::leave(5, "random")).await, Ack::Ok);
}

#[tokio::test]
async fn disconnect_removes_from_every_room() {
    let state = state();
    let (mut leaving, leaving_id) = attach(&state).await;
    let (mut staying, _) = attach(&state).await;

    request(&mut leaving, Frame::join(1, "general")).await;
    request(&mut leaving, Frame::join(2, "random")).await;
    request(&mut staying, Frame::join(1, "general")).await;

    leaving.close().await.unwrap();
    drop(leaving);

    timeout(TIMEOUT, async {
        while state.relay.member_count("general") != 1 || state.relay.member_count("random") != 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("membership not cleaned up");

    request(&mut staying, Frame::send(2, "general", "anyone?", None)).await;
    let echoed = message(&mut staying).await;
    assert_ne!(echoed.from, leaving_id);
    assert_silent(&mut staying).await;
}

#[tokio::test]
async fn ping_is_answered() {
    let state = state();
    let (mut conn, _) = attach(&state).await;

    conn.send(Frame::ping_with_timestamp(42)).await.unwrap();
    assert_eq!(next(&mut conn).await, Frame::pong(Some(42)));
}

#[tokio::test]
async fn health_endpoint() {
    let (addr, _state) = boot_server().await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream
        .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();

    let mut response = String::new();
    timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();

    assert!(response.starts_with("HTTP/1.1 200"));
    assert!(response.ends_with(r#"{"ok":true}"#));
}

#[tokio::test]
async fn websocket_clients_share_a_room() {
    let (addr, state) = boot_server().await;
    let connector = WebSocketConnector::new(format!("ws://{addr}/ws"));

    let mut c1 = connector.connect().await.unwrap();
    let mut c2 = connector.connect().await.unwrap();
    assert!(matches!(next(c1.as_mut()).await, Frame::Connected { .. }));
    assert!(matches!(next(c2.as_mut()).await, Frame::Connected { .. }));

    assert_eq!(request(c1.as_mut(), Frame::join(1, "general")).await, Ack::Ok);
    assert_eq!(request(c2.as_mut(), Frame::join(1, "general")).await, Ack::Ok);
    assert_eq!(state.relay.member_count("general"), 2);

    assert_eq!(
        request(c2.as_mut(), Frame::send(2, "general", "over the wire", None)).await,
        Ack::Ok
    );
    assert_eq!(message(c1.as_mut()).await.text, "over the wire");
    assert_eq!(message(c2.as_mut()).await.text, "over the wire");

    c2.close().await.unwrap();
    timeout(TIMEOUT, async {
        while state.relay.member_count("general") != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("websocket disconnect not cleaned up");
}

#[tokio::test]
async fn json_text_clients_get_json_replies() {
    let (addr, _state) = boot_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();

    // The greeting goes out before the client has spoken, as binary.
    let greeting = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    assert!(matches!(greeting, Message::Binary(_)));

    let join = json!({ "type": "conversation:join", "id": 7, "conversationId": "general" });
    ws.send(Message::Text(join.to_string())).await.unwrap();

    let reply = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = reply else {
        panic!("expected a text reply, got {:?}", reply);
    };
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(value, json!({ "type": "ack", "id": 7, "ack": { "ok": true } }));

    let send = json!({
        "type": "message:send",
        "id": 8,
        "conversationId": "general",
        "text": "  ",
    });
    ws.send(Message::Text(send.to_string())).await.unwrap();
    let reply = timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();
    let Message::Text(text) = reply else {
        panic!("expected a text reply, got {:?}", reply);
    };
    let value: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(
        value,
        json!({ "type": "ack", "id": 8, "ack": { "ok": false, "error": "empty message" } })
    );
}

#[tokio::test]
async fn incomplete_requests_still_get_one_ack() {
    let (addr, state) = boot_server().await;
    let (mut ws, _) = connect_async(format!("ws://{addr}/ws")).await.unwrap();
    timeout(TIMEOUT, ws.next()).await.unwrap().unwrap().unwrap();

    let cases = [
        (
            json!({ "type": "message:send", "id": 9, "conversationId": "general" }),
            "empty message",
        ),
        (
            json!({ "type": "message:send", "id": 10, "conversationId": "general", "text": null }),
            "empty message",
        ),
        (
            json!({ "type": "conversation:join", "id": 11, "conversationId": null }),
            "conversationId missing",
        ),
        (
            json!({ "type": "conversation:join", "id": 12 }),
            "conversationId missing",
        ),
        (
            json!({ "type": "conversation:leave", "id": 13 }),
            "conversationId missing",
        ),
        (
            json!({ "type": "message:send", "id": 14, "text": "hi" }),
            "conversationId missing",
        ),
    ];

    for (request, reason) in cases {
        let id = request["id"].clone();
        ws.send(Message::Text(request.to_string())).await.unwrap();

        let reply = timeout(TIMEOUT, ws.next())
            .await
            .expect("request went unanswered")
            .unwrap()
            .unwrap();
        let Message::Text(text) = reply else {
            panic!("expected a text reply, got {:?}", reply);
        };
        let value: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(
            value,
            json!({ "type": "ack", "id": id, "ack": { "ok": false, "error": reason } })
        );
    }

    assert_eq!(state.relay.stats().room_count, 0);
}
