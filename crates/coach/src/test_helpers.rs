//! Shared test fixtures: entries, a broken store, and a scripted provider.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dentcoach_core::error::{KnowledgeError, ProviderError};
use dentcoach_core::knowledge::{
    KnowledgeEntry, KnowledgeStore, KnowledgeType, KnowledgeUpdate, NewKnowledgeEntry,
};
use dentcoach_core::message::Message;
use dentcoach_core::provider::{
    ChunkReceiver, Provider, ProviderRequest, ProviderResponse, StreamChunk,
};
use std::sync::Mutex;

fn epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()
}

/// An active text entry created `minutes` after a fixed epoch.
pub fn entry_at(id: &str, title: &str, minutes: i64) -> KnowledgeEntry {
    let ts = epoch() + Duration::minutes(minutes);
    KnowledgeEntry {
        id: id.into(),
        title: title.into(),
        content: format!("{title} body"),
        kind: KnowledgeType::Text,
        source_url: None,
        added_by: "admin".into(),
        is_active: true,
        created_at: ts,
        updated_at: ts,
    }
}

/// A store whose every operation fails, as if the database were down.
pub struct FailingStore;

fn down() -> KnowledgeError {
    KnowledgeError::Storage("database is locked".into())
}

#[async_trait]
impl KnowledgeStore for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }
    async fn list_active(&self) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        Err(down())
    }
    async fn list_all(&self) -> Result<Vec<KnowledgeEntry>, KnowledgeError> {
        Err(down())
    }
    async fn get(&self, _id: &str) -> Result<Option<KnowledgeEntry>, KnowledgeError> {
        Err(down())
    }
    async fn create(&self, _entry: NewKnowledgeEntry) -> Result<KnowledgeEntry, KnowledgeError> {
        Err(down())
    }
    async fn update(
        &self,
        _id: &str,
        _update: KnowledgeUpdate,
    ) -> Result<Option<KnowledgeEntry>, KnowledgeError> {
        Err(down())
    }
    async fn delete(&self, _id: &str) -> Result<bool, KnowledgeError> {
        Err(down())
    }
    async fn count(&self) -> Result<usize, KnowledgeError> {
        Err(down())
    }
}

/// What the scripted provider does when asked to stream.
pub enum Script {
    /// Emit these deltas, then a done chunk
    Deltas(Vec<String>),
    /// Emit these deltas, then an error chunk
    BreakAfter(Vec<String>),
    /// Refuse the request before streaming
    Fail(ProviderError),
}

/// A provider that streams a fixed script and records the requests it saw.
pub struct ScriptedProvider {
    script: Mutex<Option<Script>>,
    pub requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script: Mutex::new(Some(script)),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Stream `text` split into a few deltas.
    pub fn replying(text: &str) -> Self {
        let mid = text.char_indices().nth(text.chars().count() / 2).map_or(0, |(i, _)| i);
        Self::new(Script::Deltas(vec![
            text[..mid].to_string(),
            text[mid..].to_string(),
        ]))
    }

    pub fn failing(err: ProviderError) -> Self {
        Self::new(Script::Fail(err))
    }

    pub fn last_request(&self) -> ProviderRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut rx = self.stream(request).await?;
        let mut text = String::new();
        while let Some(chunk) = rx.recv().await {
            let chunk = chunk?;
            text.push_str(chunk.content.as_deref().unwrap_or_default());
            if chunk.done {
                break;
            }
        }
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: None,
            model: "scripted".into(),
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self
            .script
            .lock()
            .unwrap()
            .take()
            .expect("ScriptedProvider called more than once");

        let (deltas, error) = match script {
            Script::Fail(e) => return Err(e),
            Script::Deltas(d) => (d, None),
            Script::BreakAfter(d) => (
                d,
                Some(ProviderError::StreamInterrupted("connection reset".into())),
            ),
        };

        let (tx, rx) = tokio::sync::mpsc::channel(deltas.len() + 2);
        for delta in deltas {
            tx.send(Ok(StreamChunk {
                content: Some(delta),
                ..StreamChunk::default()
            }))
            .await
            .unwrap();
        }
        let last = match error {
            Some(e) => Err(e),
            None => Ok(StreamChunk {
                done: true,
                ..StreamChunk::default()
            }),
        };
        tx.send(last).await.unwrap();
        Ok(rx)
    }
}
