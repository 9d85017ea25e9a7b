//! HTTP API endpoints for the Pupil server.
//!
//! # Endpoints
//!
//! - `GET /` - Liveness message naming the model
//! - `POST /problem` - Replace the current problem
//! - `GET /problem` - Read the current problem
//! - `POST /turn` - Send a teacher message, receive the student's reply
//! - `GET /ws` - WebSocket event stream
//!
//! The same operations are also served under their older names:
//! `POST /api/set_problem`, `GET /api/get_problem` and `POST /api/ai_response`.
//!
//! # Example
//!
//! ```no_run
//! use pupil_orchestrator::{create_router, AppState, Config};
//!
//! # async fn example() -> pupil_orchestrator::Result<()> {
//! let state = AppState::new(Config::default())?;
//! let router = create_router(state);
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8000").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{PupilError, Result};
use crate::problem::ProblemStore;
use crate::turn::{TurnOrchestrator, TurnRequest, TurnResponse};
use crate::websocket::{ws_handler, EventBroadcaster, TurnEvent};

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for replacing the problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemRequest {
    /// The new problem text. May be empty.
    pub problem: String,
}

/// Response body after replacing the problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProblemResponse {
    /// Always `"ok"`.
    pub status: String,
    /// The stored problem text.
    pub problem: String,
}

/// Response body for reading the problem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetProblemResponse {
    /// The current problem text, empty if never set.
    pub problem: String,
}

/// Response body for the liveness endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Human-readable liveness message.
    pub message: String,
}

/// Error response body returned on failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Description of the error.
    pub error: String,
}

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for the HTTP server.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Configuration the server was started with.
    pub config: Config,
    /// The shared problem slot.
    pub problems: ProblemStore,
    /// Runs dialogue turns against `problems`.
    pub turns: TurnOrchestrator,
    /// Fans dialogue events out to WebSocket clients.
    pub broadcaster: EventBroadcaster,
}

impl AppState {
    /// Creates a new `AppState` with an empty problem.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client or the expression rules cannot be
    /// built from `config`.
    pub fn new(config: Config) -> Result<Self> {
        let problems = ProblemStore::new();
        let turns = TurnOrchestrator::from_config(&config, problems.clone())?;
        let broadcaster = EventBroadcaster::new(config.event_buffer_size);

        Ok(Self {
            config,
            problems,
            turns,
            broadcaster,
        })
    }
}

// ============================================================================
// API Error Type
// ============================================================================

/// Wraps a [`PupilError`] so handlers can return it directly.
#[derive(Debug)]
struct ApiError(PupilError);

impl From<PupilError> for ApiError {
    fn from(err: PupilError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self.0 {
            PupilError::UpstreamUnavailable { .. } | PupilError::UpstreamRejected { .. } => {
                StatusCode::BAD_GATEWAY
            }
            PupilError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(ErrorResponse {
            error: self.0.to_string(),
        });
        (status, body).into_response()
    }
}

// ============================================================================
// Router Setup
// ============================================================================

/// Creates the HTTP router with all endpoints.
///
/// The router is configured with:
/// - The primary routes at the root
/// - The older route names under `/api`
/// - CORS middleware allowing any origin
/// - Tracing middleware for request logging
pub fn create_router(state: AppState) -> Router {
    // Any origin may call the API; this is not a security boundary
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let legacy_routes = Router::new()
        .route("/set_problem", post(handle_set_problem))
        .route("/get_problem", get(handle_get_problem))
        .route("/ai_response", post(handle_turn));

    Router::new()
        .route("/", get(handle_health))
        .route("/problem", get(handle_get_problem).post(handle_set_problem))
        .route("/turn", post(handle_turn))
        .route("/ws", get(ws_handler))
        .nest("/api", legacy_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(Arc::new(state))
}

// ============================================================================
// Handlers
// ============================================================================

/// Handler for `GET /`.
async fn handle_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        message: format!("Pupil + Ollama + {} running!", state.config.model),
    })
}

/// Handler for `POST /problem` and `POST /api/set_problem`.
async fn handle_set_problem(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ProblemRequest>,
) -> Json<ProblemResponse> {
    let problem = state.problems.set(request.problem).await;
    state.broadcaster.send(TurnEvent::problem_set(problem.clone()));

    Json(ProblemResponse {
        status: "ok".to_string(),
        problem,
    })
}

/// Handler for `GET /problem` and `GET /api/get_problem`.
async fn handle_get_problem(State(state): State<Arc<AppState>>) -> Json<GetProblemResponse> {
    Json(GetProblemResponse {
        problem: state.problems.get().await,
    })
}

/// Handler for `POST /turn` and `POST /api/ai_response`.
///
/// If the client disconnects, axum drops this future and the in-flight
/// generation request with it.
async fn handle_turn(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TurnRequest>,
) -> std::result::Result<Json<TurnResponse>, ApiError> {
    info!(
        message_chars = request.message.chars().count(),
        "Received teacher message"
    );
    state
        .broadcaster
        .send(TurnEvent::turn_started(request.message.clone()));

    match state.turns.next_turn(&request.message).await {
        Ok(response) => {
            state.broadcaster.send(TurnEvent::turn_complete(
                response.response_text.clone(),
                response.expression,
            ));
            Ok(Json(response))
        }
        Err(e) => {
            warn!(error = %e, "Returning error for turn");
            state.broadcaster.send(TurnEvent::error(e.to_string()));
            Err(e.into())
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
