//! The shared problem slot.
//!
//! A single problem text is shared by every caller of the server. Writes
//! replace it unconditionally and are visible to the next reader; there is
//! no per-conversation isolation, and a write racing an in-flight turn is
//! not ordered against it. Clones of [`ProblemStore`] share the same slot.

use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

/// Handle to the process-wide problem slot.
#[derive(Debug, Clone, Default)]
pub struct ProblemStore {
    text: Arc<RwLock<String>>,
}

impl ProblemStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the stored problem and returns the stored value.
    ///
    /// No validation is applied; the empty string is a valid problem.
    pub async fn set(&self, text: impl Into<String>) -> String {
        let text = text.into();
        let mut slot = self.text.write().await;
        slot.clone_from(&text);
        drop(slot);

        info!(chars = text.chars().count(), "Problem updated");
        text
    }

    /// Returns the current problem, or the empty string if none was set.
    pub async fn get(&self) -> String {
        self.text.read().await.clone()
    }
}
