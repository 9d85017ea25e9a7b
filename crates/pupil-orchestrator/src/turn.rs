//! One dialogue turn: problem → prompt → generation → expression.

use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::expression::{Expression, ExpressionClassifier};
use crate::problem::ProblemStore;
use crate::prompt::PromptBuilder;
use crate::stream::StreamClient;

/// Request body for a turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnRequest {
    /// What the teacher said.
    #[serde(alias = "teacherMessage")]
    pub message: String,
}

/// The student's reply to one teacher message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnResponse {
    /// Trimmed reply text; empty if the model produced nothing.
    #[serde(rename = "response")]
    pub response_text: String,
    /// Label derived from the reply.
    pub expression: Expression,
}

/// Runs dialogue turns against the shared problem.
///
/// Holds no conversation history: every turn sees only the current problem
/// and the one teacher message.
#[derive(Debug, Clone)]
pub struct TurnOrchestrator {
    problems: ProblemStore,
    prompts: PromptBuilder,
    client: StreamClient,
    classifier: ExpressionClassifier,
}

impl TurnOrchestrator {
    /// Assembles an orchestrator from its parts.
    #[must_use]
    pub const fn new(
        problems: ProblemStore,
        prompts: PromptBuilder,
        client: StreamClient,
        classifier: ExpressionClassifier,
    ) -> Self {
        Self {
            problems,
            prompts,
            client,
            classifier,
        }
    }

    /// Builds an orchestrator from `config` around an existing store.
    pub fn from_config(config: &Config, problems: ProblemStore) -> Result<Self> {
        Ok(Self::new(
            problems,
            PromptBuilder::new(config.persona.clone()),
            StreamClient::from_config(config)?,
            ExpressionClassifier::from_config(&config.expressions)?,
        ))
    }

    /// The problem store this orchestrator reads from.
    #[must_use]
    pub const fn problems(&self) -> &ProblemStore {
        &self.problems
    }

    /// The stream client used for generation.
    #[must_use]
    pub const fn client(&self) -> &StreamClient {
        &self.client
    }

    /// Runs one turn for `message`.
    ///
    /// Generation failures are returned unchanged; nothing is retried.
    pub async fn next_turn(&self, message: &str) -> Result<TurnResponse> {
        let prompt = self.prepare(message).await;
        let text = self.client.generate(&prompt).await;
        self.finish(text)
    }

    /// Like [`next_turn`](Self::next_turn), abandoning generation as soon
    /// as `cancel` completes.
    pub async fn next_turn_with_cancel<F>(&self, message: &str, cancel: F) -> Result<TurnResponse>
    where
        F: Future<Output = ()>,
    {
        let prompt = self.prepare(message).await;
        let text = self.client.generate_with_cancel(&prompt, cancel).await;
        self.finish(text)
    }

    async fn prepare(&self, message: &str) -> String {
        let problem = self.problems.get().await;
        info!(
            problem_chars = problem.chars().count(),
            message_chars = message.chars().count(),
            "Starting turn"
        );
        self.prompts.full_prompt(&problem, message)
    }

    fn finish(&self, text: Result<String>) -> Result<TurnResponse> {
        let response_text = match text {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Turn failed");
                return Err(e);
            }
        };
        let expression = self.classifier.classify(&response_text);

        info!(
            %expression,
            response_chars = response_text.chars().count(),
            "Turn complete"
        );
        Ok(TurnResponse {
            response_text,
            expression,
        })
    }
}
