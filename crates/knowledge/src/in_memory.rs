//! In-memory store, useful for testing and demo deployments.

use crate::now;
use async_trait::async_trait;
use dentcoach_core::error::KnowledgeError;
use dentcoach_core::knowledge::{KnowledgeEntry, KnowledgeStore, KnowledgeUpdate, NewKnowledgeEntry};
use dentcoach_core::resource::{NewResource, Resource, ResourceStatus, ResourceStore};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Keeps entries and resources in Vecs in insertion order.
/// Nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryKnowledgeStore {
    entries: Arc<RwLock<Vec<KnowledgeEntry>>>,
    resources: Arc<RwLock<Vec<Resource>>>,
}

impl InMemoryKnowledgeStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with pre-built entries, e.g. fixtures.
    pub fn with_entries(entries: Vec<KnowledgeEntry>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
            ..Self::default()
        }
    }
}

#[async_trait]
impl KnowledgeStore for InMemoryKnowledgeStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn list_active(&self) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let entries = self.entries.read().await;
        let mut active: Vec<KnowledgeEntry> =
            entries.iter().filter(|e| e.is_active).cloned().collect();
        // Stable sort keeps insertion order for equal timestamps
        active.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(active)
    }

    async fn list_all(&self) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let entries = self.entries.read().await;
        let mut all: Vec<KnowledgeEntry> = entries.iter().rev().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn get(&self, id: &str) -> Result<Option<KnowledgeEntry>, KnowledgeError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().find(|e| e.id == id).cloned())
    }

    async fn create(&self, entry: NewKnowledgeEntry) -> Result<KnowledgeEntry, KnowledgeError> {
        let entry = entry.normalized()?;
        let timestamp = now();
        let stored = KnowledgeEntry {
            id: Uuid::new_v4().to_string(),
            added_by: entry.actor().to_string(),
            title: entry.title,
            content: entry.content,
            kind: entry.kind,
            source_url: entry.source_url,
            is_active: true,
            created_at: timestamp,
            updated_at: timestamp,
        };
        self.entries.write().await.push(stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        id: &str,
        update: KnowledgeUpdate,
    ) -> Result<Option<KnowledgeEntry>, KnowledgeError> {
        let mut entries = self.entries.write().await;
        let Some(slot) = entries.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };

        // Validate on a copy so a rejected update leaves the entry untouched
        let mut updated = slot.clone();
        update.apply_to(&mut updated)?;
        updated.updated_at = now();
        *slot = updated.clone();
        Ok(Some(updated))
    }

    async fn delete(&self, id: &str) -> Result<bool, KnowledgeError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        Ok(entries.len() < before)
    }

    async fn count(&self) -> Result<usize, KnowledgeError> {
        Ok(self.entries.read().await.len())
    }
}

#[async_trait]
impl ResourceStore for InMemoryKnowledgeStore {
    async fn list_resources(&self) -> Result<Vec<Resource>, KnowledgeError> {
        let resources = self.resources.read().await;
        let mut all: Vec<Resource> = resources.iter().rev().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }

    async fn create_resource(&self, resource: NewResource) -> Result<Resource, KnowledgeError> {
        let resource = resource.normalized()?;
        let timestamp = now();
        let stored = Resource {
            id: Uuid::new_v4().to_string(),
            title: resource.title,
            description: resource.description,
            kind: resource.kind,
            content: resource.content,
            status: ResourceStatus::Draft,
            created_at: timestamp,
            updated_at: timestamp,
        };
        self.resources.write().await.push(stored.clone());
        Ok(stored)
    }
}
