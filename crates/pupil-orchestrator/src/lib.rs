//! Pupil Orchestrator
//!
//! Simulates an elementary-school student answering a teacher: holds the
//! shared problem, builds persona prompts, streams replies from a local
//! generation endpoint and labels them with an expression. Served over an
//! HTTP API with WebSocket events.

pub mod api;
pub mod config;
pub mod error;
pub mod expression;
pub mod problem;
pub mod prompt;
pub mod stream;
pub mod turn;
pub mod websocket;

#[cfg(test)]
mod test_support;

pub use api::{
    create_router, AppState, ErrorResponse, GetProblemResponse, HealthResponse, ProblemRequest,
    ProblemResponse,
};
pub use config::{Config, ExpressionConfig, PersonaTemplate};
pub use error::{PupilError, Result};
pub use expression::{Expression, ExpressionClassifier};
pub use problem::ProblemStore;
pub use prompt::PromptBuilder;
pub use stream::{accumulate, parse_line, LineOutcome, SkipReason, StreamClient};
pub use turn::{TurnOrchestrator, TurnRequest, TurnResponse};
pub use websocket::{EventBroadcaster, TurnEvent};
