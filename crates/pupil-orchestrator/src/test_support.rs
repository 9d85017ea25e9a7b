//! Mock generation endpoints for unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

const GENERATE_PATH: &str = "/api/generate";

/// A running mock endpoint that streams fixed NDJSON lines.
pub struct MockUpstream {
    /// URL of the generate endpoint.
    pub url: String,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
}

impl MockUpstream {
    /// Request bodies received so far.
    pub async fn requests(&self) -> Vec<serde_json::Value> {
        self.requests.lock().await.clone()
    }
}

#[derive(Clone)]
struct NdjsonState {
    lines: Arc<Vec<String>>,
    requests: Arc<Mutex<Vec<serde_json::Value>>>,
}

async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}{GENERATE_PATH}")
}

/// Spawns an endpoint answering every request with `lines`, each sent as
/// its own body chunk.
pub async fn spawn_ndjson_upstream(lines: Vec<String>) -> MockUpstream {
    async fn handler(
        State(state): State<NdjsonState>,
        Json(body): Json<serde_json::Value>,
    ) -> Response {
        state.requests.lock().await.push(body);
        let chunks: Vec<Result<String, std::io::Error>> =
            state.lines.iter().map(|l| Ok(format!("{l}\n"))).collect();
        Body::from_stream(futures::stream::iter(chunks)).into_response()
    }

    let requests = Arc::new(Mutex::new(Vec::new()));
    let state = NdjsonState {
        lines: Arc::new(lines),
        requests: Arc::clone(&requests),
    };
    let router = Router::new()
        .route(GENERATE_PATH, post(handler))
        .with_state(state);

    MockUpstream {
        url: serve(router).await,
        requests,
    }
}

/// Spawns an endpoint that accepts requests but never answers.
pub async fn spawn_silent_upstream() -> String {
    async fn handler() -> StatusCode {
        tokio::time::sleep(Duration::from_secs(600)).await;
        StatusCode::OK
    }

    serve(Router::new().route(GENERATE_PATH, post(handler))).await
}

/// Spawns an endpoint answering every request with `status` and `body`.
pub async fn spawn_status_upstream(status: u16, body: &'static str) -> String {
    let status = StatusCode::from_u16(status).unwrap();
    let router = Router::new().route(GENERATE_PATH, post(move || async move { (status, body) }));
    serve(router).await
}

/// A URL nothing is listening on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}{GENERATE_PATH}")
}

/// How a [`ConnectionCounter`] endpoint behaves once a request arrives.
#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// Never answer.
    Silent,
    /// Send headers and one NDJSON record, then stall.
    Stall,
}

/// A raw TCP endpoint that tracks how many client connections are open.
pub struct ConnectionCounter {
    /// URL of the generate endpoint.
    pub url: String,
    accepted: Arc<AtomicUsize>,
    open: Arc<AtomicUsize>,
}

impl ConnectionCounter {
    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Waits up to `within` for every accepted connection to be closed by
    /// the client. Returns `false` if one is still open.
    pub async fn wait_until_closed(&self, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.open.load(Ordering::SeqCst) == 0 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.open.load(Ordering::SeqCst) == 0
    }
}

/// Spawns an endpoint that holds each connection until the client closes it.
pub async fn spawn_counting_upstream(behavior: Behavior) -> ConnectionCounter {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let open = Arc::new(AtomicUsize::new(0));

    let (accepted_task, open_task) = (Arc::clone(&accepted), Arc::clone(&open));
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else {
                return;
            };
            accepted_task.fetch_add(1, Ordering::SeqCst);
            open_task.fetch_add(1, Ordering::SeqCst);
            let open = Arc::clone(&open_task);
            tokio::spawn(async move {
                hold_connection(socket, behavior).await;
                open.fetch_sub(1, Ordering::SeqCst);
            });
        }
    });

    ConnectionCounter {
        url: format!("http://{addr}{GENERATE_PATH}"),
        accepted,
        open,
    }
}

/// Reads the request head, optionally answers, then drains until EOF.
async fn hold_connection(mut socket: TcpStream, behavior: Behavior) {
    let mut seen = Vec::new();
    let mut buf = [0u8; 4096];

    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => seen.extend_from_slice(&buf[..n]),
        }
        if seen.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }

    if matches!(behavior, Behavior::Stall) {
        let record = "{\"response\":\"A\"}\n";
        let head = format!(
            "HTTP/1.1 200 OK\r\ncontent-type: application/x-ndjson\r\ntransfer-encoding: chunked\r\n\r\n{:x}\r\n{record}\r\n",
            record.len()
        );
        if socket.write_all(head.as_bytes()).await.is_err() {
            return;
        }
    }

    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
