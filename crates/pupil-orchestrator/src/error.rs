//! Error types for the Pupil orchestrator.
//!
//! This module defines the error hierarchy for configuration loading and
//! the generation upstream. Malformed stream lines are deliberately absent:
//! they are skipped inside the stream client and never surface as errors.

use std::path::PathBuf;
use std::time::Duration;

/// A specialized `Result` type for Pupil orchestrator operations.
pub type Result<T> = std::result::Result<T, PupilError>;

/// Errors that can occur while serving dialogue turns.
///
/// Error variants are organized by subsystem and include actionable suggestions
/// where possible to help operators resolve issues.
#[derive(Debug, thiserror::Error)]
pub enum PupilError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your pupil.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Upstream Generation Errors
    // ========================================================================
    /// The generation endpoint could not be reached (connection refused,
    /// DNS failure) or the connection dropped mid-stream.
    #[error("Generation endpoint unavailable at '{url}': {message}\n\nSuggestion: Make sure Ollama is running (try 'ollama serve') and the upstreamUrl is correct")]
    UpstreamUnavailable {
        /// The endpoint URL that was called.
        url: String,
        /// Description of the transport failure.
        message: String,
    },

    /// No data arrived from the generation endpoint within the ceiling.
    #[error("Generation endpoint timed out after {timeout:?} without sending data\n\nSuggestion: The model may still be loading; retry, or raise timeoutSeconds in pupil.json")]
    UpstreamTimeout {
        /// The configured ceiling that was exceeded.
        timeout: Duration,
    },

    /// The generation endpoint answered with a non-success HTTP status.
    #[error("Generation endpoint returned {status}: {message}\n\nSuggestion: Check that the model is pulled (try 'ollama pull <model>')")]
    UpstreamRejected {
        /// HTTP status code returned by the endpoint.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// The caller cancelled an in-flight generation.
    #[error("Generation cancelled by caller")]
    Cancelled,

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PupilError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `UpstreamUnavailable` error.
    #[must_use]
    pub fn upstream_unavailable(url: impl Into<String>, message: impl Into<String>) -> Self {
        Self::UpstreamUnavailable {
            url: url.into(),
            message: message.into(),
        }
    }

    /// Creates a new `UpstreamTimeout` error.
    #[must_use]
    pub const fn upstream_timeout(timeout: Duration) -> Self {
        Self::UpstreamTimeout { timeout }
    }

    /// Creates a new `UpstreamRejected` error.
    #[must_use]
    pub fn upstream_rejected(status: u16, message: impl Into<String>) -> Self {
        Self::UpstreamRejected {
            status,
            message: message.into(),
        }
    }

    /// Returns `true` if this error came from the generation upstream.
    #[must_use]
    pub const fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. }
                | Self::UpstreamTimeout { .. }
                | Self::UpstreamRejected { .. }
        )
    }

    /// Returns `true` if resubmitting the same turn may succeed.
    ///
    /// Nothing in the pipeline retries on its own; this only informs callers.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::UpstreamUnavailable { .. } | Self::UpstreamTimeout { .. }
        )
    }

    /// Returns `true` if this error should abort startup.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError { .. } | Self::ConfigValidationError { .. }
        )
    }
}
