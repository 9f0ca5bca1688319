//! End-to-end gateway tests against an in-process websocket server.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

use chatwire_client::{Client, GatewayConfig, ReconnectConfig};
use chatwire_shared::{CapabilityFlags, Snowflake};

type ServerSocket = WebSocketStream<TcpStream>;

const WAIT: Duration = Duration::from_secs(5);

async fn accept(listener: &TcpListener) -> ServerSocket {
    let (stream, _) = timeout(WAIT, listener.accept())
        .await
        .expect("timed out waiting for a connection")
        .unwrap();
    timeout(WAIT, accept_async(stream)).await.unwrap().unwrap()
}

async fn recv_json(socket: &mut ServerSocket) -> Value {
    loop {
        let message = timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client closed the socket")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            _ => continue,
        }
    }
}

async fn send_json(socket: &mut ServerSocket, value: Value) {
    socket.send(Message::text(value.to_string())).await.unwrap();
}

/// Sends Hello and returns the client's first two frames: the immediate
/// heartbeat and the identify/resume that follows it.
async fn handshake(socket: &mut ServerSocket, interval_ms: u64) -> (Value, Value) {
    send_json(socket, json!({"op": 10, "d": {"heartbeat_interval": interval_ms}})).await;
    let beat = recv_json(socket).await;
    let next = recv_json(socket).await;
    (beat, next)
}

fn ready_frame(session_id: &str, sequence: u64) -> Value {
    json!({
        "op": 0,
        "t": "READY",
        "s": sequence,
        "d": {
            "user": {"id": 7, "username": "me", "discriminator": "0001"},
            "session_id": session_id
        }
    })
}

fn test_client(addr: std::net::SocketAddr) -> Arc<Client> {
    let config = GatewayConfig {
        capabilities: CapabilityFlags::standard(),
        reconnect: ReconnectConfig {
            max_attempts: 0,
            initial_delay_ms: 10,
            max_delay_ms: 50,
            backoff_multiplier: 1.0,
        },
        gateway_url: Some(format!("ws://{addr}")),
        ..GatewayConfig::default()
    };
    Arc::new(Client::with_config("test-token", config))
}

async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..1000 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn hello_triggers_immediate_heartbeat_then_identify() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = test_client(listener.local_addr().unwrap());
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    let mut socket = accept(&listener).await;
    let (beat, identify) = handshake(&mut socket, 41_250).await;

    assert_eq!(beat, json!({"op": 1, "d": null}));
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "test-token");
    assert_eq!(identify["d"]["intents"], CapabilityFlags::standard().bits());
    assert!(identify["d"]["properties"]["$os"].is_string());

    send_json(&mut socket, ready_frame("sess-1", 1)).await;
    wait_until("the session to connect", || {
        let client = client.clone();
        async move { client.state().is_connected() }
    })
    .await;
    assert!(client.own_account().await.is_some());

    client.shutdown();
    let result = timeout(WAIT, runner).await.unwrap().unwrap();
    assert!(result.is_ok());
    assert!(client.state().is_closed());
}

#[tokio::test]
async fn reconnect_demand_resumes_with_session_and_sequence() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = test_client(listener.local_addr().unwrap());
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    let mut first = accept(&listener).await;
    let (_, identify) = handshake(&mut first, 41_250).await;
    assert_eq!(identify["op"], 2);

    send_json(&mut first, ready_frame("sess-9", 1)).await;
    wait_until("the session to connect", || {
        let client = client.clone();
        async move { client.state().is_connected() }
    })
    .await;

    // The server demands a fresh connection; the prior session must be
    // continued with Resume, not Identify.
    send_json(&mut first, json!({"op": 7, "d": null})).await;

    let mut second = accept(&listener).await;
    let (beat, resume) = handshake(&mut second, 41_250).await;
    assert_eq!(beat, json!({"op": 1, "d": 1}));
    assert_eq!(resume["op"], 6);
    assert_eq!(resume["d"]["session_id"], "sess-9");
    assert_eq!(resume["d"]["seq"], 1);
    assert_eq!(resume["d"]["token"], "test-token");

    send_json(&mut second, json!({"op": 0, "t": "RESUMED", "s": 2, "d": {}})).await;
    wait_until("the session to resume", || {
        let client = client.clone();
        async move { client.state().is_connected() }
    })
    .await;
    // Resuming reuses the cache.
    assert!(client.own_account().await.is_some());

    client.shutdown();
    assert!(timeout(WAIT, runner).await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn non_resumable_invalid_session_clears_the_cache() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = test_client(listener.local_addr().unwrap());
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    let mut socket = accept(&listener).await;
    let (_, identify) = handshake(&mut socket, 41_250).await;
    assert_eq!(identify["op"], 2);

    send_json(&mut socket, ready_frame("sess-1", 1)).await;
    send_json(
        &mut socket,
        json!({
            "op": 0,
            "t": "GUILD_CREATE",
            "s": 2,
            "d": {
                "id": 10,
                "name": "den",
                "roles": [{"id": 10, "name": "everyone", "position": 0}]
            }
        }),
    )
    .await;
    wait_until("the server to be cached", || {
        let client = client.clone();
        async move { client.server(Snowflake::new(10)).await.is_some() }
    })
    .await;

    send_json(&mut socket, json!({"op": 9, "d": false})).await;

    // The client re-identifies on the same socket, after dropping the
    // entire cache.
    let identify = recv_json(&mut socket).await;
    assert_eq!(identify["op"], 2);
    assert!(client.server(Snowflake::new(10)).await.is_none());
    assert!(client.own_account().await.is_none());

    send_json(&mut socket, ready_frame("sess-2", 1)).await;
    wait_until("the fresh session to connect", || {
        let client = client.clone();
        async move { client.state().is_connected() }
    })
    .await;

    client.shutdown();
    assert!(timeout(WAIT, runner).await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn missed_heartbeat_ack_forces_a_reconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = test_client(listener.local_addr().unwrap());
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    let mut first = accept(&listener).await;
    // Short interval, and nobody ever acks the heartbeat.
    let _ = handshake(&mut first, 50).await;

    // The next scheduled beat detects the missing ack and reconnects.
    let mut second = accept(&listener).await;
    let (_, identify) = handshake(&mut second, 41_250).await;
    // No session was ever established, so the client identifies again.
    assert_eq!(identify["op"], 2);

    client.shutdown();
    assert!(timeout(WAIT, runner).await.unwrap().unwrap().is_ok());
}

#[tokio::test]
async fn heartbeat_demand_is_answered_immediately() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let client = test_client(listener.local_addr().unwrap());
    let runner = {
        let client = client.clone();
        tokio::spawn(async move { client.connect().await })
    };

    let mut socket = accept(&listener).await;
    let _ = handshake(&mut socket, 41_250).await;
    send_json(&mut socket, ready_frame("sess-1", 3)).await;
    wait_until("the session to connect", || {
        let client = client.clone();
        async move { client.state().is_connected() }
    })
    .await;

    send_json(&mut socket, json!({"op": 1, "d": null})).await;
    let beat = recv_json(&mut socket).await;
    assert_eq!(beat, json!({"op": 1, "d": 3}));

    client.shutdown();
    assert!(timeout(WAIT, runner).await.unwrap().unwrap().is_ok());
}
