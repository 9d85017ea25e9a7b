//! Streaming client for the generation endpoint.
//!
//! The endpoint (Ollama's `/api/generate`) answers a `stream: true` request
//! with newline-delimited JSON, one record per generated fragment:
//!
//! ```text
//! {"model":"gemma3:latest","response":"な","done":false}
//! {"model":"gemma3:latest","response":"るほ","done":false}
//! {"model":"gemma3:latest","response":"ど！","done":true}
//! ```
//!
//! Each line becomes a [`LineOutcome`]. Fragments are concatenated in arrival
//! order; blank, malformed, and text-less lines are skipped without error.
//! The body is always read until the connection closes.

use std::future::Future;
use std::time::Duration;

use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{PupilError, Result};

/// Timeout for the startup reachability check.
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Request body sent to the generation endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct GenerateRequest<'a> {
    /// Model identifier.
    pub model: &'a str,
    /// The full prompt.
    pub prompt: &'a str,
    /// Always `true`: fragments are delivered incrementally.
    pub stream: bool,
}

/// One streamed record from the generation endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenerationChunk {
    /// Incremental text fragment, if this record carries one.
    #[serde(default)]
    pub response: Option<String>,
    /// Ollama's end-of-generation flag. Logged, never used to stop reading.
    #[serde(default)]
    pub done: bool,
}

/// Why a streamed line contributed no text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Empty or whitespace-only line.
    Blank,
    /// Not a JSON record (partial chunk, garbage, wrong shape).
    Malformed,
    /// A valid record without a text fragment.
    NoText,
}

/// Result of interpreting one streamed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// A text fragment to append.
    Fragment(String),
    /// A line that contributes nothing.
    Skipped(SkipReason),
}

/// Interprets one line of the response body.
#[must_use]
pub fn parse_line(line: &str) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() {
        return LineOutcome::Skipped(SkipReason::Blank);
    }

    match serde_json::from_str::<GenerationChunk>(line) {
        Ok(GenerationChunk {
            response: Some(text),
            ..
        }) => LineOutcome::Fragment(text),
        Ok(chunk) => {
            if chunk.done {
                debug!("Upstream reported done");
            }
            LineOutcome::Skipped(SkipReason::NoText)
        }
        Err(_) => LineOutcome::Skipped(SkipReason::Malformed),
    }
}

/// Longest line held while waiting for its newline.
const MAX_LINE_BYTES: usize = 1024 * 1024;

/// Splits a byte stream into lines.
///
/// Bytes are held until a newline arrives, so a multi-byte character split
/// across network chunks is decoded whole. A line growing past `max_line`
/// bytes is dropped up to its newline.
#[derive(Debug)]
struct LineSplitter {
    buffer: Vec<u8>,
    max_line: usize,
    discarding: bool,
}

impl Default for LineSplitter {
    fn default() -> Self {
        Self::with_limit(MAX_LINE_BYTES)
    }
}

impl LineSplitter {
    const fn with_limit(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
        }
    }

    /// Appends bytes and returns every line completed by them.
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        // Bytes already buffered hold no newline
        let mut cursor = self.buffer.len();
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        let mut line_start = 0;
        while let Some(offset) = self.buffer[cursor..].iter().position(|&b| b == b'\n') {
            let line_end = cursor + offset;
            if self.discarding {
                self.discarding = false;
            } else {
                lines.push(String::from_utf8_lossy(&self.buffer[line_start..line_end]).into_owned());
            }
            line_start = line_end + 1;
            cursor = line_start;
        }
        self.buffer.drain(..line_start);

        if self.buffer.len() > self.max_line {
            warn!(
                limit = self.max_line,
                "Stream line exceeds limit without a newline, dropping it"
            );
            self.buffer.clear();
            self.discarding = true;
        }
        lines
    }

    /// Returns the trailing unterminated line, if any.
    fn finish(self) -> Option<String> {
        if self.discarding || self.buffer.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&self.buffer).into_owned())
        }
    }
}

/// Folds a line outcome into the accumulator.
fn fold_line(accumulated: &mut String, line: &str, skipped: &mut usize) {
    match parse_line(line) {
        LineOutcome::Fragment(text) => accumulated.push_str(&text),
        LineOutcome::Skipped(SkipReason::Blank) => {}
        LineOutcome::Skipped(reason) => {
            *skipped += 1;
            debug!(?reason, line_len = line.len(), "Skipped stream line");
        }
    }
}

/// Consumes a byte stream to completion and returns the trimmed text.
///
/// `idle_timeout` bounds each wait for the next chunk. Transport errors
/// yielded by the stream are returned unchanged.
pub async fn accumulate<S, B>(stream: S, idle_timeout: Duration) -> Result<String>
where
    S: Stream<Item = Result<B>>,
    B: AsRef<[u8]>,
{
    let mut stream = std::pin::pin!(stream);
    let mut splitter = LineSplitter::default();
    let mut accumulated = String::new();
    let mut skipped = 0usize;

    loop {
        let next = timeout(idle_timeout, stream.next())
            .await
            .map_err(|_| PupilError::upstream_timeout(idle_timeout))?;
        let Some(chunk) = next else { break };

        for line in splitter.push(chunk?.as_ref()) {
            fold_line(&mut accumulated, &line, &mut skipped);
        }
    }

    if let Some(line) = splitter.finish() {
        fold_line(&mut accumulated, &line, &mut skipped);
    }

    debug!(
        chars = accumulated.chars().count(),
        skipped, "Stream consumed"
    );
    Ok(accumulated.trim().to_string())
}

/// HTTP client for the streaming generation endpoint.
#[derive(Debug, Clone)]
pub struct StreamClient {
    http: reqwest::Client,
    url: String,
    model: String,
    timeout: Duration,
}

impl StreamClient {
    /// Creates a client for `url` using `model`, with `timeout` as the
    /// ceiling for connecting and for each wait on streamed data.
    ///
    /// # Errors
    ///
    /// Returns `PupilError::ConfigValidationError` if the HTTP client cannot
    /// be built.
    pub fn new(url: impl Into<String>, model: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| {
                PupilError::config_validation(
                    format!("cannot build HTTP client: {e}"),
                    "Check the TLS setup of this machine",
                )
            })?;

        Ok(Self {
            http,
            url: url.into(),
            model: model.into(),
            timeout,
        })
    }

    /// Creates a client from the upstream settings in `config`.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.upstream_url, &config.model, config.timeout())
    }

    /// The endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The model identifier.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Streams a generation for `prompt` and returns the trimmed text.
    ///
    /// # Errors
    ///
    /// - `UpstreamUnavailable` if the endpoint cannot be reached or the
    ///   connection drops mid-stream
    /// - `UpstreamTimeout` if no data arrives within the ceiling
    /// - `UpstreamRejected` if the endpoint answers with a non-2xx status
    pub async fn generate(&self, prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            model: &self.model,
            prompt,
            stream: true,
        };

        let response = timeout(self.timeout, self.http.post(&self.url).json(&body).send())
            .await
            .map_err(|_| PupilError::upstream_timeout(self.timeout))?
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let message = timeout(self.timeout, response.text())
                .await
                .ok()
                .and_then(std::result::Result::ok)
                .unwrap_or_default();
            warn!(status = status.as_u16(), "Generation endpoint rejected request");
            return Err(PupilError::upstream_rejected(status.as_u16(), message));
        }

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| self.transport_error(&e)));
        accumulate(chunks, self.timeout).await
    }

    /// Like [`generate`](Self::generate), but gives up as soon as `cancel`
    /// completes. The in-flight request is dropped and its connection
    /// released.
    ///
    /// # Errors
    ///
    /// Returns `PupilError::Cancelled` if `cancel` wins the race, otherwise
    /// the same errors as [`generate`](Self::generate).
    pub async fn generate_with_cancel<F>(&self, prompt: &str, cancel: F) -> Result<String>
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            result = self.generate(prompt) => result,
            () = cancel => {
                debug!("Generation cancelled");
                Err(PupilError::Cancelled)
            }
        }
    }

    /// Returns `true` if the endpoint accepts connections.
    ///
    /// Any HTTP answer counts, including 404 or 405 for a GET on the
    /// generate path.
    pub async fn is_reachable(&self) -> bool {
        self.http
            .get(&self.url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .is_ok()
    }

    fn transport_error(&self, error: &reqwest::Error) -> PupilError {
        if error.is_timeout() {
            PupilError::upstream_timeout(self.timeout)
        } else {
            PupilError::upstream_unavailable(&self.url, error.to_string())
        }
    }
}
