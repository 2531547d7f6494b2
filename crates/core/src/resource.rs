//! Resource catalog: courses, guides, templates and videos that the
//! coach can point users at through `suggestedResources`.
//!
//! Administrators create resources as drafts. The catalog is listed
//! newest first.

use crate::error::KnowledgeError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Draft,
    Published,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Published => "published",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "draft" => Some(Self::Draft),
            "published" => Some(Self::Published),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Free-form tag such as "course", "guide", "template" or "video"
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
    pub status: ResourceStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewResource {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: String,
}

impl NewResource {
    pub fn new(title: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: String::new(),
            kind: kind.into(),
            content: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = content.into();
        self
    }

    /// Trim the title and lowercase the type tag; both must be non-empty.
    pub fn normalized(mut self) -> Result<Self, KnowledgeError> {
        self.title = self.title.trim().to_string();
        if self.title.is_empty() {
            return Err(KnowledgeError::InvalidEntry("title must not be empty".into()));
        }
        self.kind = self.kind.trim().to_lowercase();
        if self.kind.is_empty() {
            return Err(KnowledgeError::InvalidEntry("type must not be empty".into()));
        }
        Ok(self)
    }
}

/// Persistence for the resource catalog.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Every resource, newest first.
    async fn list_resources(&self) -> Result<Vec<Resource>, KnowledgeError>;

    /// Store a new resource with status `draft`.
    async fn create_resource(&self, resource: NewResource) -> Result<Resource, KnowledgeError>;
}
