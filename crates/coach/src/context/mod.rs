//! Grounding context for the instruction prompt.

pub mod builder;
pub mod token;

pub use builder::{
    ContextBlock, EMPTY_MARKER, GroundingStatus, KnowledgeContextBuilder, UNAVAILABLE_MARKER,
    build_from_entries, build_with_budget,
};
