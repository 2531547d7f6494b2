//! Knowledge base and resource catalog storage for DentCoach.

pub mod in_memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryKnowledgeStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteKnowledgeStore;

use chrono::{DateTime, SubsecRound, Utc};
use dentcoach_core::error::KnowledgeError;
use dentcoach_core::knowledge::KnowledgeStore;
use dentcoach_core::resource::ResourceStore;
use std::path::Path;
use std::sync::Arc;

/// Current time at the precision the stores persist.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Both views of one opened backend.
#[derive(Clone)]
pub struct Stores {
    pub knowledge: Arc<dyn KnowledgeStore>,
    pub resources: Arc<dyn ResourceStore>,
}

impl Stores {
    fn shared<S>(store: S) -> Self
    where
        S: KnowledgeStore + ResourceStore + 'static,
    {
        let store = Arc::new(store);
        Self {
            knowledge: store.clone(),
            resources: store,
        }
    }
}

/// Open the configured store backend.
///
/// `"in_memory"` ignores `path`. `"sqlite"` accepts either a file path (the
/// parent directory is created) or a `sqlite:` URL passed through as-is.
pub async fn open_store(backend: &str, path: &Path) -> Result<Stores, KnowledgeError> {
    match backend {
        "in_memory" => Ok(Stores::shared(InMemoryKnowledgeStore::new())),
        #[cfg(feature = "sqlite")]
        "sqlite" => {
            let raw = path.to_string_lossy();
            let url = if raw.starts_with("sqlite:") {
                raw.into_owned()
            } else {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent).map_err(|e| {
                        KnowledgeError::Storage(format!(
                            "Cannot create {}: {e}",
                            parent.display()
                        ))
                    })?;
                }
                format!("sqlite://{}", path.display())
            };
            Ok(Stores::shared(SqliteKnowledgeStore::new(&url).await?))
        }
        other => Err(KnowledgeError::Storage(format!(
            "Unknown knowledge backend: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_memory_backend() {
        let stores = open_store("in_memory", Path::new("ignored")).await.unwrap();
        assert_eq!(stores.knowledge.count().await.unwrap(), 0);
        assert!(stores.resources.list_resources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn both_views_share_one_backend() {
        use dentcoach_core::resource::NewResource;

        let stores = open_store("in_memory", Path::new("ignored")).await.unwrap();
        stores
            .resources
            .create_resource(NewResource::new("Growth Guide", "guide"))
            .await
            .unwrap();
        let again = stores.clone();
        assert_eq!(again.resources.list_resources().await.unwrap().len(), 1);
        assert_eq!(again.knowledge.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let err = open_store("postgres", Path::new("x")).await.err().unwrap();
        assert!(err.to_string().contains("Unknown knowledge backend"));
    }

    #[cfg(feature = "sqlite")]
    #[tokio::test]
    async fn sqlite_backend_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("kb.sqlite");
        let stores = open_store("sqlite", &path).await.unwrap();
        assert_eq!(stores.knowledge.count().await.unwrap(), 0);
        assert!(path.exists());
    }
}
