//! # DentCoach Core
//!
//! Domain types, traits, and error definitions for the DentCoach coaching
//! service. This crate has **zero framework dependencies**; it defines the
//! domain model that all other crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here:
//! - [`Provider`]: the hosted completion service
//! - [`KnowledgeStore`]: the administrator-curated knowledge base
//! - [`ResourceStore`]: the catalog of courses, guides and templates
//!
//! Implementations live in their respective crates, so the coach can be
//! exercised against in-memory stores and scripted providers in tests.

pub mod error;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod resource;

// Re-export key types at crate root for ergonomics
pub use error::{KnowledgeError, ProviderError};
pub use knowledge::{
    KnowledgeEntry, KnowledgeStore, KnowledgeType, KnowledgeUpdate, NewKnowledgeEntry,
};
pub use message::{Message, Role};
pub use provider::{
    ChunkReceiver, GenerationParams, Provider, ProviderRequest, ProviderResponse, StreamChunk,
    Usage,
};
pub use resource::{NewResource, Resource, ResourceStatus, ResourceStore};
