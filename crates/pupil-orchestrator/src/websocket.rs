//! WebSocket event types and broadcasting for live dialogue observation.
//!
//! An avatar UI connects to `/ws` and follows the dialogue as it happens.
//! Events are broadcast to all connected clients; nothing is replayed for
//! clients that connect later beyond the current problem.
//!
//! # Event Types
//!
//! - `connected` - Sent when a client connects, includes the current problem
//! - `problem_set` - The teacher replaced the problem
//! - `turn_started` - A teacher message was submitted
//! - `turn_complete` - The student replied
//! - `error` - A turn failed
//!
//! # Example
//!
//! ```no_run
//! use pupil_orchestrator::websocket::{EventBroadcaster, TurnEvent};
//!
//! # async fn example() {
//! let broadcaster = EventBroadcaster::new(100);
//! let mut receiver = broadcaster.subscribe();
//!
//! broadcaster.send(TurnEvent::problem_set("分数のたし算"));
//!
//! if let Ok(event) = receiver.recv().await {
//!     println!("Received: {:?}", event);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
};
use chrono::{DateTime, Utc};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::AppState;
use crate::expression::Expression;

// ============================================================================
// Event Payloads
// ============================================================================

/// Payload for the `connected` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectedPayload {
    /// The current problem text.
    pub problem: String,
}

/// Payload for the `problem_set` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemSetPayload {
    /// The new problem text.
    pub problem: String,
    /// When the problem was replaced.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `turn_started` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnStartedPayload {
    /// The teacher's message.
    pub message: String,
    /// When the turn started.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `turn_complete` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnCompletePayload {
    /// The student's reply.
    pub response: String,
    /// The derived expression label.
    pub expression: Expression,
    /// When the reply was finished.
    pub timestamp: DateTime<Utc>,
}

/// Payload for the `error` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable error message.
    pub message: String,
}

// ============================================================================
// Event Enum
// ============================================================================

/// WebSocket event types for dialogue observation.
///
/// All events are serialized as JSON objects with "event" and "payload" fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum TurnEvent {
    /// Sent when a client connects.
    Connected(ConnectedPayload),
    /// Sent when the problem changes.
    ProblemSet(ProblemSetPayload),
    /// Sent when a teacher message is submitted.
    TurnStarted(TurnStartedPayload),
    /// Sent when the student replies.
    TurnComplete(TurnCompletePayload),
    /// Sent when a turn fails.
    Error(ErrorPayload),
}

impl TurnEvent {
    /// Creates a `Connected` event with the current problem.
    #[must_use]
    pub fn connected(problem: impl Into<String>) -> Self {
        Self::Connected(ConnectedPayload {
            problem: problem.into(),
        })
    }

    /// Creates a `ProblemSet` event.
    #[must_use]
    pub fn problem_set(problem: impl Into<String>) -> Self {
        Self::ProblemSet(ProblemSetPayload {
            problem: problem.into(),
            timestamp: Utc::now(),
        })
    }

    /// Creates a `TurnStarted` event.
    #[must_use]
    pub fn turn_started(message: impl Into<String>) -> Self {
        Self::TurnStarted(TurnStartedPayload {
            message: message.into(),
            timestamp: Utc::now(),
        })
    }

    /// Creates a `TurnComplete` event.
    #[must_use]
    pub fn turn_complete(response: impl Into<String>, expression: Expression) -> Self {
        Self::TurnComplete(TurnCompletePayload {
            response: response.into(),
            expression,
            timestamp: Utc::now(),
        })
    }

    /// Creates an `Error` event.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
        })
    }

    /// Returns the event name as a string.
    #[must_use]
    pub const fn event_name(&self) -> &'static str {
        match self {
            Self::Connected(_) => "connected",
            Self::ProblemSet(_) => "problem_set",
            Self::TurnStarted(_) => "turn_started",
            Self::TurnComplete(_) => "turn_complete",
            Self::Error(_) => "error",
        }
    }
}

// ============================================================================
// Event Broadcaster
// ============================================================================

/// Broadcasts dialogue events to all connected WebSocket clients.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<TurnEvent>,
}

impl EventBroadcaster {
    /// Creates a new `EventBroadcaster` with the specified buffer capacity.
    ///
    /// If a subscriber falls more than `capacity` events behind, it skips
    /// the oldest ones.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Creates a new subscriber for receiving events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<TurnEvent> {
        self.sender.subscribe()
    }

    /// Broadcasts an event and returns the number of receivers.
    pub fn send(&self, event: TurnEvent) -> usize {
        // send() returns Err only if there are no receivers, which is fine
        self.sender.send(event).unwrap_or(0)
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}

// ============================================================================
// WebSocket Handler
// ============================================================================

/// Interval between heartbeat pings.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Maximum number of missed pong responses before disconnecting.
const MAX_MISSED_PONGS: u8 = 3;

/// WebSocket upgrade handler for `GET /ws`.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("Observer connecting");
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// What the session loop should do after one input.
#[derive(Debug, PartialEq)]
enum Step {
    /// Nothing to send.
    Idle,
    /// Write this frame to the client.
    Send(Message),
    /// End the session.
    Close(&'static str),
}

/// Counts pings the client has left unanswered.
#[derive(Debug, Default)]
struct Heartbeat {
    unanswered: u8,
}

impl Heartbeat {
    fn pong(&mut self) {
        self.unanswered = 0;
    }

    fn tick(&mut self) -> Step {
        if self.unanswered >= MAX_MISSED_PONGS {
            return Step::Close("client stopped answering pings");
        }
        self.unanswered += 1;
        Step::Send(Message::Ping(Vec::new()))
    }
}

/// Serializes a dialogue event into a text frame.
fn event_frame(event: &TurnEvent) -> Step {
    match serde_json::to_string(event) {
        Ok(json) => Step::Send(Message::Text(json)),
        Err(e) => {
            warn!(event = event.event_name(), error = %e, "Failed to serialize event");
            Step::Idle
        }
    }
}

/// Reacts to a frame (or the end of the stream) from the client.
fn on_client_frame(
    frame: Option<std::result::Result<Message, axum::Error>>,
    heartbeat: &mut Heartbeat,
) -> Step {
    match frame {
        Some(Ok(Message::Pong(_))) => {
            heartbeat.pong();
            Step::Idle
        }
        Some(Ok(Message::Ping(data))) => Step::Send(Message::Pong(data)),
        // Observers are read-only; anything they send is ignored
        Some(Ok(Message::Text(_) | Message::Binary(_))) => Step::Idle,
        Some(Ok(Message::Close(_))) => Step::Close("client requested close"),
        Some(Err(e)) => {
            debug!(error = %e, "WebSocket read failed");
            Step::Close("read error")
        }
        None => Step::Close("stream ended"),
    }
}

/// Reacts to the next item from the broadcast channel.
fn on_broadcast(received: std::result::Result<TurnEvent, broadcast::error::RecvError>) -> Step {
    match received {
        Ok(event) => event_frame(&event),
        Err(broadcast::error::RecvError::Lagged(skipped)) => {
            warn!(skipped, "Observer lagged, skipping events");
            Step::Idle
        }
        Err(broadcast::error::RecvError::Closed) => Step::Close("broadcaster closed"),
    }
}

/// Runs one observer session.
///
/// The client gets `connected` with the current problem, then every
/// broadcast event. It is pinged every 30 seconds and dropped after 3
/// unanswered pings.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();

    // Subscribe before reading the problem so no update falls in between
    let mut events = state.broadcaster.subscribe();
    let greeting = event_frame(&TurnEvent::connected(state.problems.get().await));

    let mut heartbeat = Heartbeat::default();
    let mut ticker = interval(HEARTBEAT_INTERVAL);
    // The first tick is immediate; the first ping goes out one interval in
    ticker.tick().await;

    let mut step = greeting;
    let reason = loop {
        match step {
            Step::Idle => {}
            Step::Send(frame) => {
                if sender.send(frame).await.is_err() {
                    break "write failed";
                }
            }
            Step::Close(reason) => break reason,
        }

        step = tokio::select! {
            frame = receiver.next() => on_client_frame(frame, &mut heartbeat),
            received = events.recv() => on_broadcast(received),
            _ = ticker.tick() => heartbeat.tick(),
        };
    };

    info!(reason, "Observer disconnected");
}

// ============================================================================
// Tests
// ============================================================================
