//! Failures of a coaching turn.

use dentcoach_core::error::{KnowledgeError, ProviderError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoachError {
    /// The knowledge store could not be read.
    #[error("Knowledge context unavailable: {0}")]
    ContextUnavailable(#[source] KnowledgeError),

    /// The completion call failed or returned a non-success status.
    #[error("Completion service error: {0}")]
    CompletionService(#[from] ProviderError),

    /// The caller sent a history the coach cannot answer.
    #[error("Invalid conversation: {0}")]
    InvalidConversation(String),
}

impl CoachError {
    /// Message safe to show an end user. Details stay in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            Self::InvalidConversation(_) => "The conversation must end with a user message.",
            _ => "Something went wrong. Please try again.",
        }
    }
}
