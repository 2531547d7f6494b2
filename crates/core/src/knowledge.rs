//! Knowledge base domain: the grounding content available to the coach.
//!
//! Entries are created and removed by administrators. The chat path only
//! ever reads them, and only entries flagged active take part in prompt
//! grounding. Deactivation is a soft delete; `delete` is irreversible.

use crate::error::KnowledgeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category tag of a knowledge entry.
///
/// Unknown tags are preserved as `Other` so new categories can be added by
/// administrators without a release.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum KnowledgeType {
    Text,
    Document,
    Youtube,
    Other(String),
}

impl KnowledgeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Document => "document",
            Self::Youtube => "youtube",
            Self::Other(tag) => tag,
        }
    }

    /// Whether entries of this type may carry a `source_url`.
    pub fn carries_url(&self) -> bool {
        !matches!(self, Self::Text | Self::Document)
    }

    /// Whether entries of this type must carry a `source_url`.
    pub fn requires_url(&self) -> bool {
        matches!(self, Self::Youtube)
    }
}

impl From<String> for KnowledgeType {
    fn from(tag: String) -> Self {
        match tag.trim().to_lowercase().as_str() {
            "text" => Self::Text,
            "document" => Self::Document,
            "youtube" => Self::Youtube,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<&str> for KnowledgeType {
    fn from(tag: &str) -> Self {
        Self::from(tag.to_string())
    }
}

impl From<KnowledgeType> for String {
    fn from(kind: KnowledgeType) -> Self {
        kind.as_str().to_string()
    }
}

impl std::fmt::Display for KnowledgeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of grounding content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeEntry {
    /// Assigned by the store at creation, immutable
    pub id: String,

    /// Short human-readable label
    pub title: String,

    /// Free-text body
    pub content: String,

    /// Category tag
    #[serde(rename = "type")]
    pub kind: KnowledgeType,

    /// Link for URL-bearing types (e.g. a YouTube video)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,

    /// Identifier of the creating actor
    pub added_by: String,

    /// Only active entries participate in grounding
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied by an administrator when creating an entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewKnowledgeEntry {
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type")]
    pub kind: KnowledgeType,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub added_by: Option<String>,
}

/// Actor recorded when the creator does not identify themselves.
pub const DEFAULT_ADDED_BY: &str = "admin";

impl NewKnowledgeEntry {
    pub fn new(title: impl Into<String>, content: impl Into<String>, kind: KnowledgeType) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
            kind,
            source_url: None,
            added_by: None,
        }
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_added_by(mut self, actor: impl Into<String>) -> Self {
        self.added_by = Some(actor.into());
        self
    }

    /// Validate and normalise the entry before it reaches a store.
    ///
    /// Trims the title, drops blank or non-applicable URLs, and rejects
    /// URL-requiring types without one.
    pub fn normalized(mut self) -> Result<Self, KnowledgeError> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(KnowledgeError::InvalidEntry("title must not be empty".into()));
        }

        self.source_url = normalize_url(&self.kind, self.source_url.take());
        if self.kind.requires_url() && self.source_url.is_none() {
            return Err(KnowledgeError::InvalidEntry(format!(
                "entries of type '{}' require a sourceUrl",
                self.kind
            )));
        }

        self.added_by = self
            .added_by
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty());
        Ok(self)
    }

    /// Actor to record on the stored entry.
    pub fn actor(&self) -> &str {
        self.added_by.as_deref().unwrap_or(DEFAULT_ADDED_BY)
    }
}

/// A partial update. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeUpdate {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl KnowledgeUpdate {
    pub fn activate(active: bool) -> Self {
        Self {
            is_active: Some(active),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.source_url.is_none()
            && self.is_active.is_none()
    }

    /// Apply the update to an existing entry, enforcing the same rules as
    /// creation. Does not touch `updated_at`; stores stamp it.
    pub fn apply_to(&self, entry: &mut KnowledgeEntry) -> Result<(), KnowledgeError> {
        if let Some(title) = &self.title {
            let title = title.trim();
            if title.is_empty() {
                return Err(KnowledgeError::InvalidEntry("title must not be empty".into()));
            }
            entry.title = title.to_string();
        }
        if let Some(content) = &self.content {
            entry.content = content.clone();
        }
        if self.source_url.is_some() {
            let url = normalize_url(&entry.kind, self.source_url.clone());
            if entry.kind.requires_url() && url.is_none() {
                return Err(KnowledgeError::InvalidEntry(format!(
                    "entries of type '{}' require a sourceUrl",
                    entry.kind
                )));
            }
            entry.source_url = url;
        }
        if let Some(active) = self.is_active {
            entry.is_active = active;
        }
        Ok(())
    }
}

fn normalize_url(kind: &KnowledgeType, url: Option<String>) -> Option<String> {
    if !kind.carries_url() {
        return None;
    }
    url.map(|u| u.trim().to_string()).filter(|u| !u.is_empty())
}

/// Storage for knowledge entries.
///
/// Implementations: SQLite and in-memory.
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// All active entries in creation order (oldest first).
    async fn list_active(&self) -> Result<Vec<KnowledgeEntry>, KnowledgeError>;

    /// Every entry, active or not, newest first.
    async fn list_all(&self) -> Result<Vec<KnowledgeEntry>, KnowledgeError>;

    /// Get an entry by ID.
    async fn get(&self, id: &str) -> Result<Option<KnowledgeEntry>, KnowledgeError>;

    /// Create an active entry and return it as stored.
    async fn create(&self, entry: NewKnowledgeEntry) -> Result<KnowledgeEntry, KnowledgeError>;

    /// Apply a partial update. Returns `None` when the ID is unknown.
    async fn update(
        &self,
        id: &str,
        update: KnowledgeUpdate,
    ) -> Result<Option<KnowledgeEntry>, KnowledgeError>;

    /// Permanently delete an entry. Returns whether it existed.
    async fn delete(&self, id: &str) -> Result<bool, KnowledgeError>;

    /// Total number of stored entries.
    async fn count(&self) -> Result<usize, KnowledgeError>;
}
