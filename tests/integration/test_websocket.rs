//! Integration tests for WebSocket dialogue events.
//!
//! These tests validate that an observer connected to `/ws` sees the
//! current problem on connect and follows problem updates and turns live.

mod common;

use std::time::Duration;

use common::{
    ollama_lines, spawn_ndjson_upstream, spawn_server, test_config, unreachable_url,
};
use futures::SinkExt;
use futures::StreamExt;
use pupil_orchestrator::{Expression, TurnEvent};
use serde_json::json;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tungstenite::Message;

/// Helper type for WebSocket client
type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connects a WebSocket client to the server at `addr`.
async fn connect_client(addr: &str) -> WsClient {
    let (ws_stream, _) = connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("Failed to connect to WebSocket");
    ws_stream
}

/// Receives the next text message from the WebSocket and parses it as a
/// `TurnEvent`. Automatically handles ping frames by responding with pong.
async fn receive_event(client: &mut WsClient) -> TurnEvent {
    loop {
        let msg = timeout(Duration::from_secs(5), client.next())
            .await
            .expect("Timeout waiting for message")
            .expect("Stream ended")
            .expect("WebSocket error");

        match msg {
            Message::Text(text) => {
                return serde_json::from_str(&text).expect("Failed to parse event");
            }
            Message::Ping(data) => {
                client
                    .send(Message::Pong(data))
                    .await
                    .expect("Failed to send pong");
            }
            Message::Pong(_) => {}
            other => panic!("Expected text message, got: {other:?}"),
        }
    }
}

/// Waits until the server has registered `count` subscribers.
async fn wait_for_subscribers(state: &pupil_orchestrator::AppState, count: usize) {
    for _ in 0..100 {
        if state.broadcaster.receiver_count() >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Subscribers never reached {count}");
}

// ============================================================================
// Connection Tests
// ============================================================================

#[tokio::test]
async fn test_client_receives_connected_event_with_empty_problem() {
    let (addr, _state) = spawn_server(test_config(&unreachable_url())).await;

    let mut client = connect_client(&addr).await;
    let event = receive_event(&mut client).await;

    match event {
        TurnEvent::Connected(payload) => assert_eq!(payload.problem, ""),
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_connected_event_contains_current_problem() {
    let (addr, state) = spawn_server(test_config(&unreachable_url())).await;
    state.problems.set("分数のたし算").await;

    let mut client = connect_client(&addr).await;

    match receive_event(&mut client).await {
        TurnEvent::Connected(payload) => assert_eq!(payload.problem, "分数のたし算"),
        other => panic!("Expected Connected event, got: {other:?}"),
    }
}

// ============================================================================
// Event Flow Tests
// ============================================================================

#[tokio::test]
async fn test_problem_set_is_broadcast() {
    let (addr, state) = spawn_server(test_config(&unreachable_url())).await;
    let mut client = connect_client(&addr).await;
    receive_event(&mut client).await;
    wait_for_subscribers(&state, 1).await;

    reqwest::Client::new()
        .post(format!("http://{addr}/problem"))
        .json(&json!({"problem": "かけ算"}))
        .send()
        .await
        .expect("Request failed");

    match receive_event(&mut client).await {
        TurnEvent::ProblemSet(payload) => assert_eq!(payload.problem, "かけ算"),
        other => panic!("Expected ProblemSet event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_turn_events_in_order() {
    let upstream = spawn_ndjson_upstream(ollama_lines(&["な", "るほ", "ど！"])).await;
    let (addr, state) = spawn_server(test_config(&upstream.url)).await;
    let mut client = connect_client(&addr).await;
    receive_event(&mut client).await;
    wait_for_subscribers(&state, 1).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/turn"))
        .json(&json!({"message": "分母をそろえます"}))
        .send()
        .await
        .expect("Request failed");
    assert!(response.status().is_success());

    match receive_event(&mut client).await {
        TurnEvent::TurnStarted(payload) => assert_eq!(payload.message, "分母をそろえます"),
        other => panic!("Expected TurnStarted event, got: {other:?}"),
    }
    match receive_event(&mut client).await {
        TurnEvent::TurnComplete(payload) => {
            assert_eq!(payload.response, "なるほど！");
            assert_eq!(payload.expression, Expression::Happy);
        }
        other => panic!("Expected TurnComplete event, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_turn_broadcasts_error() {
    let (addr, state) = spawn_server(test_config(&unreachable_url())).await;
    let mut client = connect_client(&addr).await;
    receive_event(&mut client).await;
    wait_for_subscribers(&state, 1).await;

    reqwest::Client::new()
        .post(format!("http://{addr}/turn"))
        .json(&json!({"message": "hi"}))
        .send()
        .await
        .expect("Request failed");

    assert!(matches!(
        receive_event(&mut client).await,
        TurnEvent::TurnStarted(_)
    ));
    match receive_event(&mut client).await {
        TurnEvent::Error(payload) => assert!(payload.message.contains("unavailable")),
        other => panic!("Expected Error event, got: {other:?}"),
    }
}

// ============================================================================
// Multiple Client Tests
// ============================================================================

#[tokio::test]
async fn test_multiple_clients_receive_same_events() {
    let (addr, state) = spawn_server(test_config(&unreachable_url())).await;

    let mut client1 = connect_client(&addr).await;
    let mut client2 = connect_client(&addr).await;
    receive_event(&mut client1).await;
    receive_event(&mut client2).await;
    wait_for_subscribers(&state, 2).await;

    state
        .broadcaster
        .send(TurnEvent::problem_set("わり算"));

    for client in [&mut client1, &mut client2] {
        match receive_event(client).await {
            TurnEvent::ProblemSet(payload) => assert_eq!(payload.problem, "わり算"),
            other => panic!("Expected ProblemSet event, got: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_client_disconnect_releases_subscriber() {
    let (addr, state) = spawn_server(test_config(&unreachable_url())).await;

    let mut client = connect_client(&addr).await;
    receive_event(&mut client).await;
    wait_for_subscribers(&state, 1).await;

    client.close(None).await.expect("Failed to close");
    drop(client);

    for _ in 0..100 {
        if state.broadcaster.receiver_count() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("Subscriber was not released after disconnect");
}
