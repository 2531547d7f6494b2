//! The coaching core: turns the knowledge base into grounding context,
//! assembles the instruction prompt, and parses model output against the
//! structured response contract.
//!
//! A chat turn flows through:
//! 1. [`context::KnowledgeContextBuilder`] reads active entries into a [`ContextBlock`]
//! 2. [`prompt::PromptTemplate`] prepends the instruction message to the history
//! 3. the provider streams the completion, drained by [`collector::collect_stream`]
//! 4. [`response::StructuredAssistantResponse::parse`] applies the contract or falls back to prose

pub mod coach;
pub mod collector;
pub mod context;
pub mod error;
pub mod prompt;
pub mod response;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use coach::{Coach, CoachReply, CoachStream, PreparedPrompt};
pub use collector::collect_stream;
pub use context::{ContextBlock, GroundingStatus, KnowledgeContextBuilder, build_from_entries};
pub use error::CoachError;
pub use prompt::PromptTemplate;
pub use response::{
    LearningCheck, MalformedResponseShape, ParsedResponse, RelevantSource, ResponseShape,
    StructuredAssistantResponse, render_plain,
};
