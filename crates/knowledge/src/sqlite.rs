//! SQLite knowledge store.
//!
//! Knowledge entries live in `knowledge_entries` and the resource catalog in
//! `resources`. The integer `iid` column keeps a stable creation order when
//! two rows share a timestamp.

use crate::now;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use dentcoach_core::error::KnowledgeError;
use dentcoach_core::knowledge::{KnowledgeEntry, KnowledgeStore, KnowledgeUpdate, NewKnowledgeEntry};
use dentcoach_core::resource::{NewResource, Resource, ResourceStatus, ResourceStore};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

/// Knowledge entries persisted in SQLite.
pub struct SqliteKnowledgeStore {
    pool: SqlitePool,
}

impl SqliteKnowledgeStore {
    /// Open (or create) the database at `path`.
    ///
    /// The schema is created automatically.
    /// Pass `"sqlite::memory:"` for an in-process ephemeral database.
    pub async fn new(path: &str) -> Result<Self, KnowledgeError> {
        let options = SqliteConnectOptions::from_str(path)
            .map_err(|e| KnowledgeError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        // An in-memory database lives per connection, so keep exactly one.
        let max_connections = if path.contains(":memory:") { 1 } else { 4 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| KnowledgeError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite knowledge store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, KnowledgeError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), KnowledgeError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS knowledge_entries (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                title        TEXT NOT NULL,
                content      TEXT NOT NULL DEFAULT '',
                kind         TEXT NOT NULL,
                source_url   TEXT,
                added_by     TEXT NOT NULL,
                is_active    INTEGER NOT NULL DEFAULT 1,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| KnowledgeError::MigrationFailed(format!("knowledge_entries table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_knowledge_active_created \
             ON knowledge_entries(is_active, created_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| KnowledgeError::MigrationFailed(format!("active index: {e}")))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS resources (
                iid          INTEGER PRIMARY KEY AUTOINCREMENT,
                id           TEXT UNIQUE NOT NULL,
                title        TEXT NOT NULL,
                description  TEXT NOT NULL DEFAULT '',
                kind         TEXT NOT NULL,
                content      TEXT NOT NULL DEFAULT '',
                status       TEXT NOT NULL,
                created_at   TEXT NOT NULL,
                updated_at   TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| KnowledgeError::MigrationFailed(format!("resources table: {e}")))?;

        debug!("SQLite migrations complete");
        Ok(())
    }

    /// Parse a `KnowledgeEntry` from a SQLite row.
    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<KnowledgeEntry, KnowledgeError> {
        let column = |name: &str, e: sqlx::Error| {
            KnowledgeError::QueryFailed(format!("{name} column: {e}"))
        };

        let id: String = row.try_get("id").map_err(|e| column("id", e))?;
        let title: String = row.try_get("title").map_err(|e| column("title", e))?;
        let content: String = row.try_get("content").map_err(|e| column("content", e))?;
        let kind: String = row.try_get("kind").map_err(|e| column("kind", e))?;
        let source_url: Option<String> =
            row.try_get("source_url").map_err(|e| column("source_url", e))?;
        let added_by: String = row.try_get("added_by").map_err(|e| column("added_by", e))?;
        let is_active: bool = row.try_get("is_active").map_err(|e| column("is_active", e))?;
        let created_at: String = row.try_get("created_at").map_err(|e| column("created_at", e))?;
        let updated_at: String = row.try_get("updated_at").map_err(|e| column("updated_at", e))?;

        Ok(KnowledgeEntry {
            id,
            title,
            content,
            kind: kind.into(),
            source_url,
            added_by,
            is_active,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}

fn row_to_resource(row: &sqlx::sqlite::SqliteRow) -> Result<Resource, KnowledgeError> {
    let column =
        |name: &str, e: sqlx::Error| KnowledgeError::QueryFailed(format!("{name} column: {e}"));

    let status: String = row.try_get("status").map_err(|e| column("status", e))?;
    let created_at: String = row.try_get("created_at").map_err(|e| column("created_at", e))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| column("updated_at", e))?;

    Ok(Resource {
        id: row.try_get("id").map_err(|e| column("id", e))?,
        title: row.try_get("title").map_err(|e| column("title", e))?,
        description: row.try_get("description").map_err(|e| column("description", e))?,
        kind: row.try_get("kind").map_err(|e| column("kind", e))?,
        content: row.try_get("content").map_err(|e| column("content", e))?,
        status: ResourceStatus::parse(&status)
            .ok_or_else(|| KnowledgeError::QueryFailed(format!("unknown status '{status}'")))?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

/// Fixed-width RFC 3339 so lexical order matches chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, KnowledgeError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| KnowledgeError::QueryFailed(format!("bad timestamp '{raw}': {e}")))
}

#[async_trait]
impl KnowledgeStore for SqliteKnowledgeStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn list_active(&self) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let rows = sqlx::query(
            "SELECT * FROM knowledge_entries WHERE is_active = 1 ORDER BY created_at ASC, iid ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| KnowledgeError::QueryFailed(format!("list_active: {e}")))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn list_all(&self) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        let rows = sqlx::query("SELECT * FROM knowledge_entries ORDER BY created_at DESC, iid DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KnowledgeError::QueryFailed(format!("list_all: {e}")))?;

        rows.iter().map(Self::row_to_entry).collect()
    }

    async fn get(&self, id: &str) -> Result<Option<KnowledgeEntry>, KnowledgeError> {
        let row = sqlx::query("SELECT * FROM knowledge_entries WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| KnowledgeError::QueryFailed(format!("get: {e}")))?;

        row.as_ref().map(Self::row_to_entry).transpose()
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

        sqlx::query(
            r#"
            INSERT INTO knowledge_entries
                (id, title, content, kind, source_url, added_by, is_active, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.title)
        .bind(&stored.content)
        .bind(stored.kind.as_str())
        .bind(&stored.source_url)
        .bind(&stored.added_by)
        .bind(stored.is_active)
        .bind(format_timestamp(&stored.created_at))
        .bind(format_timestamp(&stored.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| KnowledgeError::Storage(format!("INSERT failed: {e}")))?;

        debug!(id = %stored.id, kind = %stored.kind, "Created knowledge entry");
        Ok(stored)
    }

    async fn update(
        &self,
        id: &str,
        update: KnowledgeUpdate,
    ) -> Result<Option<KnowledgeEntry>, KnowledgeError> {
        let Some(mut entry) = self.get(id).await? else {
            return Ok(None);
        };

        update.apply_to(&mut entry)?;
        entry.updated_at = now();

        sqlx::query(
            r#"
            UPDATE knowledge_entries
            SET title = ?2, content = ?3, source_url = ?4, is_active = ?5, updated_at = ?6
            WHERE id = ?1
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.title)
        .bind(&entry.content)
        .bind(&entry.source_url)
        .bind(entry.is_active)
        .bind(format_timestamp(&entry.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| KnowledgeError::Storage(format!("UPDATE failed: {e}")))?;

        debug!(id = %entry.id, active = entry.is_active, "Updated knowledge entry");
        Ok(Some(entry))
    }

    async fn delete(&self, id: &str) -> Result<bool, KnowledgeError> {
        let result = sqlx::query("DELETE FROM knowledge_entries WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| KnowledgeError::Storage(format!("DELETE failed: {e}")))?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<usize, KnowledgeError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM knowledge_entries")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| KnowledgeError::QueryFailed(format!("count: {e}")))?;

        let n: i64 = row
            .try_get("n")
            .map_err(|e| KnowledgeError::QueryFailed(format!("count column: {e}")))?;
        Ok(n as usize)
    }
}

#[async_trait]
impl ResourceStore for SqliteKnowledgeStore {
    async fn list_resources(&self) -> Result<Vec<Resource>, KnowledgeError> {
        let rows = sqlx::query("SELECT * FROM resources ORDER BY created_at DESC, iid DESC")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| KnowledgeError::QueryFailed(format!("list_resources: {e}")))?;

        rows.iter().map(row_to_resource).collect()
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

        sqlx::query(
            r#"
            INSERT INTO resources
                (id, title, description, kind, content, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&stored.id)
        .bind(&stored.title)
        .bind(&stored.description)
        .bind(&stored.kind)
        .bind(&stored.content)
        .bind(stored.status.as_str())
        .bind(format_timestamp(&stored.created_at))
        .bind(format_timestamp(&stored.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| KnowledgeError::Storage(format!("INSERT failed: {e}")))?;

        debug!(id = %stored.id, kind = %stored.kind, "Created resource");
        Ok(stored)
    }
}
