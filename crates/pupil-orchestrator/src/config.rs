//! Configuration types for the Pupil orchestrator.
//!
//! This module provides all configuration structures used to control the
//! server: the generation upstream, the persona template the student is
//! conditioned with, and the keyword lists behind expression labels.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PupilError, Result};
use crate::expression::ExpressionClassifier;

/// The default config file name.
const CONFIG_FILE_NAME: &str = "pupil.json";

/// Default model identifier sent to the generation endpoint.
fn default_model() -> String {
    "gemma3:latest".to_string()
}

/// Default streaming generation endpoint (local Ollama).
fn default_upstream_url() -> String {
    "http://127.0.0.1:11434/api/generate".to_string()
}

/// Default ceiling in seconds for waiting on upstream data.
const fn default_timeout_seconds() -> u64 {
    60
}

/// Default per-subscriber buffer for WebSocket events.
const fn default_event_buffer_size() -> usize {
    100
}

/// Main configuration for the Pupil server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Model identifier passed to the generation endpoint.
    #[serde(default = "default_model")]
    pub model: String,

    /// URL of the streaming generation endpoint.
    #[serde(default = "default_upstream_url")]
    pub upstream_url: String,

    /// Ceiling in seconds for connecting and for each wait on streamed data.
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Buffer size for each WebSocket subscriber.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Persona the simulated student is conditioned with.
    #[serde(default)]
    pub persona: PersonaTemplate,

    /// Keyword lists used to derive expression labels.
    #[serde(default)]
    pub expressions: ExpressionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: default_model(),
            upstream_url: default_upstream_url(),
            timeout_seconds: default_timeout_seconds(),
            event_buffer_size: default_event_buffer_size(),
            persona: PersonaTemplate::default(),
            expressions: ExpressionConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `pupil.json` in the current directory. If not found, returns
    /// the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            PupilError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from `pupil.json` in a specific directory.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `PupilError::ConfigParseError` if the file exists but contains
    /// invalid JSON, and `PupilError::ConfigValidationError` if the values
    /// are invalid.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(PupilError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| PupilError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Returns the upstream ceiling as a `Duration`.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `PupilError::ConfigValidationError` if any check fails.
    pub fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(PupilError::config_validation(
                "model must not be empty",
                "Set model to an installed Ollama model in your pupil.json (e.g. \"gemma3:latest\")",
            ));
        }

        let url = self.upstream_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(PupilError::config_validation(
                format!("upstreamUrl must be an http(s) URL, got '{}'", self.upstream_url),
                "Set upstreamUrl to the generate endpoint in your pupil.json (e.g. \"http://127.0.0.1:11434/api/generate\")",
            ));
        }

        if self.timeout_seconds == 0 {
            return Err(PupilError::config_validation(
                "timeoutSeconds must be greater than 0",
                "Set timeoutSeconds to at least 1 in your pupil.json",
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(PupilError::config_validation(
                "eventBufferSize must be greater than 0",
                "Set eventBufferSize to at least 1 in your pupil.json",
            ));
        }

        self.persona.validate()?;
        ExpressionClassifier::from_config(&self.expressions)?;

        Ok(())
    }
}

/// The instruction text conditioning the model to play the student.
///
/// One value replaces the near-identical per-persona prompt functions: each
/// persona is a different configuration of the same template.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonaTemplate {
    /// Who the model is.
    pub identity: String,
    /// Opening instruction describing the task.
    pub instruction: String,
    /// Heading above the numbered rules.
    pub rules_heading: String,
    /// Numbered behavior contract.
    pub rules: Vec<String>,
    /// Heading above the prohibitions.
    pub prohibitions_heading: String,
    /// Things the student must never do.
    pub prohibitions: Vec<String>,
    /// Lead-in for the emotion tag rule; the tags are appended to it.
    pub emotion_rule: String,
    /// Tags the student may end a reply with.
    pub emotion_tags: Vec<String>,
    /// Label introducing the problem slot.
    pub problem_label: String,
    /// Speaker label for the teacher's turn.
    pub teacher_label: String,
    /// Speaker label cueing the student's reply.
    pub student_label: String,
}

impl Default for PersonaTemplate {
    fn default() -> Self {
        Self {
            identity: "あなたは「小学校高学年の児童」です。".to_string(),
            instruction:
                "先生が出した問題に対して、最初はわからないふりをして先生に質問を返してください。"
                    .to_string(),
            rules_heading: "ルール：".to_string(),
            rules: vec![
                "児童として振る舞う".to_string(),
                "先生の説明に対して「わからないふり」をして質問を返す".to_string(),
                "先生の回答が間違っていたら質問の難易度を下げる".to_string(),
                "先生の回答が合っていたら少し難しい質問にする".to_string(),
                "質問は1つずつ行う".to_string(),
                "あなた自身が答えを言わない".to_string(),
                "返事は短く、1〜2文にする".to_string(),
            ],
            prohibitions_heading: "禁止事項：".to_string(),
            prohibitions: vec![
                "むずかしい専門用語を使わない".to_string(),
                "長い説明をしない".to_string(),
            ],
            emotion_rule: "気持ちを伝えたいときは、文の最後に次のタグを1つだけつけてよい："
                .to_string(),
            emotion_tags: vec![
                "[考え中]".to_string(),
                "[うれしい]".to_string(),
                "[かなしい]".to_string(),
            ],
            problem_label: "先生の問題：".to_string(),
            teacher_label: "先生".to_string(),
            student_label: "児童".to_string(),
        }
    }
}

impl PersonaTemplate {
    fn validate(&self) -> Result<()> {
        if self.teacher_label.trim().is_empty() || self.student_label.trim().is_empty() {
            return Err(PupilError::config_validation(
                "persona.teacherLabel and persona.studentLabel must not be empty",
                "Provide speaker labels (e.g. \"先生\" and \"児童\") in your pupil.json",
            ));
        }

        if self.teacher_label == self.student_label {
            return Err(PupilError::config_validation(
                "persona.teacherLabel and persona.studentLabel must differ",
                "Use distinct speaker labels so turns can be told apart",
            ));
        }

        if self.identity.trim().is_empty() {
            return Err(PupilError::config_validation(
                "persona.identity must not be empty",
                "Describe who the student is in persona.identity in your pupil.json",
            ));
        }

        Ok(())
    }
}

/// Keyword lists for each expression rule, checked in field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExpressionConfig {
    /// Phrases signalling a question or confusion.
    pub thinking: Vec<String>,
    /// Phrases signalling understanding.
    pub happy: Vec<String>,
    /// Phrases signalling difficulty.
    pub sad: Vec<String>,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        let words = |list: &[&str]| list.iter().map(|s| (*s).to_string()).collect();
        Self {
            thinking: words(&[
                "?",
                "？",
                "どういうこと",
                "どういう意味",
                "what do you mean",
                "[考え中]",
            ]),
            happy: words(&[
                "わかった",
                "わかりました",
                "なるほど",
                "そうか",
                "i understand",
                "i see",
                "[うれしい]",
            ]),
            sad: words(&[
                "難しい",
                "むずかしい",
                "わからない",
                "わかりません",
                "difficult",
                "i don't know",
                "i don't understand",
                "[かなしい]",
            ]),
        }
    }
}
