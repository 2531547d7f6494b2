//! The coaching service: one chat turn from history to parsed reply.
//!
//! Stateless per call. Store and provider handles are passed in by the
//! process entry point; nothing is cached between turns.

use crate::collector::collect_stream;
use crate::context::token::estimate_messages_tokens;
use crate::context::{ContextBlock, GroundingStatus, KnowledgeContextBuilder};
use crate::error::CoachError;
use crate::prompt::PromptTemplate;
use crate::response::{ResponseShape, StructuredAssistantResponse};
use dentcoach_config::AppConfig;
use dentcoach_core::knowledge::KnowledgeStore;
use dentcoach_core::message::{Message, Role};
use dentcoach_core::provider::{ChunkReceiver, GenerationParams, Provider, ProviderRequest};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The message sequence for one turn, ready to send.
#[derive(Debug, Clone)]
pub struct PreparedPrompt {
    pub messages: Vec<Message>,
    pub context: ContextBlock,
}

/// A streaming turn: the raw model deltas plus how the turn was grounded.
#[derive(Debug)]
pub struct CoachStream {
    pub chunks: ChunkReceiver,
    pub grounding: GroundingStatus,
}

/// A completed turn.
#[derive(Debug, Clone, Serialize)]
pub struct CoachReply {
    pub response: StructuredAssistantResponse,
    pub shape: ResponseShape,
    /// The model's text exactly as streamed
    #[serde(skip)]
    pub raw: String,
    pub grounding: GroundingStatus,
}

impl CoachReply {
    pub fn is_structured(&self) -> bool {
        self.shape == ResponseShape::Structured
    }
}

/// Answers chat turns grounded in the knowledge base.
#[derive(Clone)]
pub struct Coach {
    provider: Arc<dyn Provider>,
    model: String,
    params: GenerationParams,
    builder: KnowledgeContextBuilder,
    template: PromptTemplate,
}

impl Coach {
    pub fn new(
        store: Arc<dyn KnowledgeStore>,
        provider: Arc<dyn Provider>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            model: model.into(),
            params: GenerationParams::default(),
            builder: KnowledgeContextBuilder::new(store),
            template: PromptTemplate::default(),
        }
    }

    /// Wire a coach from configuration: model, sampling knobs, context
    /// budget and persona.
    pub fn from_config(
        config: &AppConfig,
        store: Arc<dyn KnowledgeStore>,
        provider: Arc<dyn Provider>,
    ) -> Self {
        Self::new(store, provider, config.model())
            .with_params(config.generation_params())
            .with_context_budget(config.knowledge.context_budget())
            .with_template(PromptTemplate::with_persona(config.coach.persona.as_deref()))
    }

    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_template(mut self, template: PromptTemplate) -> Self {
        self.template = template;
        self
    }

    /// Token budget for the knowledge block. `None` means unlimited.
    pub fn with_context_budget(mut self, budget: Option<usize>) -> Self {
        self.builder = self.builder.with_budget(budget);
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.provider
    }

    pub fn store(&self) -> &Arc<dyn KnowledgeStore> {
        self.builder.store()
    }

    /// Validate the history, build grounding and assemble the messages.
    ///
    /// The history must be non-empty and end with a user message. A store
    /// failure degrades to ungrounded context rather than failing.
    pub async fn prepare(&self, history: &[Message]) -> Result<PreparedPrompt, CoachError> {
        match history.last() {
            None => {
                return Err(CoachError::InvalidConversation(
                    "conversation has no messages".into(),
                ));
            }
            Some(last) if last.role != Role::User => {
                return Err(CoachError::InvalidConversation(format!(
                    "last message must be from the user, got {}",
                    last.role.as_str()
                )));
            }
            Some(last) if last.content.trim().is_empty() => {
                return Err(CoachError::InvalidConversation(
                    "last user message is empty".into(),
                ));
            }
            Some(_) => {}
        }

        let context = self.builder.build_or_degrade().await;
        let messages = self.template.assemble(&context, history);
        debug!(
            messages = messages.len(),
            prompt_tokens = estimate_messages_tokens(&messages),
            grounding = context.status.as_str(),
            "Prepared coach prompt"
        );
        Ok(PreparedPrompt { messages, context })
    }

    fn request(&self, prepared: &PreparedPrompt) -> ProviderRequest {
        let mut request =
            ProviderRequest::new(&self.model, prepared.messages.clone(), self.params.clone());
        request.stream = true;
        request
    }

    /// Start a streaming turn.
    ///
    /// Dropping the returned receiver cancels the upstream read.
    pub async fn stream(&self, history: &[Message]) -> Result<CoachStream, CoachError> {
        let prepared = self.prepare(history).await?;
        let request = self.request(&prepared);

        info!(
            provider = self.provider.name(),
            model = %self.model,
            grounding = prepared.context.status.as_str(),
            "Starting coach completion"
        );

        let chunks = self.provider.stream(request).await.map_err(|e| {
            warn!(error = %e, provider = self.provider.name(), "Completion request failed");
            CoachError::CompletionService(e)
        })?;

        Ok(CoachStream {
            chunks,
            grounding: prepared.context.status,
        })
    }

    /// Run a full turn: stream, drain, then parse against the contract.
    pub async fn respond(&self, history: &[Message]) -> Result<CoachReply, CoachError> {
        let CoachStream { chunks, grounding } = self.stream(history).await?;
        let raw = collect_stream(chunks).await.inspect_err(|e| {
            warn!(error = %e, "Completion stream failed");
        })?;

        let parsed = StructuredAssistantResponse::parse(&raw);
        info!(
            shape = ?parsed.shape,
            grounding = grounding.as_str(),
            len = raw.len(),
            "Coach reply complete"
        );

        Ok(CoachReply {
            response: parsed.response,
            shape: parsed.shape,
            raw,
            grounding,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{FailingStore, Script, ScriptedProvider};
    use dentcoach_core::error::ProviderError;
    use dentcoach_core::knowledge::{KnowledgeType, NewKnowledgeEntry};
    use dentcoach_knowledge::InMemoryKnowledgeStore;

    async fn seeded_store() -> Arc<InMemoryKnowledgeStore> {
        let store = Arc::new(InMemoryKnowledgeStore::new());
        store
            .create(NewKnowledgeEntry::new(
                "Insurance Basics",
                "Verify eligibility two business days before the appointment.",
                KnowledgeType::Text,
            ))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn structured_reply_is_parsed() {
        let provider = Arc::new(ScriptedProvider::replying(
            r#"{"response":"Verify two days ahead.","suggestedResources":["Insurance Basics"]}"#,
        ));
        let coach = Coach::new(seeded_store().await, provider.clone(), "gpt-4o-mini");

        let reply = coach
            .respond(&[Message::user("When do I check insurance?")])
            .await
            .unwrap();
        assert!(reply.is_structured());
        assert_eq!(reply.response.response, "Verify two days ahead.");
        assert_eq!(reply.grounding, GroundingStatus::Available);

        let request = provider.last_request();
        assert_eq!(request.model, "gpt-4o-mini");
        assert!(request.stream);
        assert_eq!(request.messages[0].role, Role::System);
        assert!(request.messages[0].content.contains("Insurance Basics"));
        assert_eq!(request.messages[1].content, "When do I check insurance?");
    }

    #[tokio::test]
    async fn prose_reply_falls_back() {
        let provider = Arc::new(ScriptedProvider::replying("Plain text answer."));
        let coach = Coach::new(seeded_store().await, provider, "m");
        let reply = coach.respond(&[Message::user("Hi")]).await.unwrap();
        assert_eq!(reply.shape, ResponseShape::Fallback);
        assert_eq!(reply.response.response, "Plain text answer.");
        assert_eq!(reply.raw, "Plain text answer.");
    }

    #[tokio::test]
    async fn upstream_failure_is_completion_service_error() {
        let provider = Arc::new(ScriptedProvider::failing(ProviderError::ApiError {
            status_code: 503,
            message: "overloaded".into(),
        }));
        let coach = Coach::new(seeded_store().await, provider, "m");
        let err = coach.respond(&[Message::user("Hi")]).await.unwrap_err();
        assert!(matches!(err, CoachError::CompletionService(_)));
        assert_eq!(err.public_message(), "Something went wrong. Please try again.");
    }

    #[tokio::test]
    async fn mid_stream_failure_is_completion_service_error() {
        let provider = Arc::new(ScriptedProvider::new(Script::BreakAfter(vec![
            "{\"response\":".into(),
        ])));
        let coach = Coach::new(seeded_store().await, provider, "m");
        let err = coach.respond(&[Message::user("Hi")]).await.unwrap_err();
        assert!(matches!(
            err,
            CoachError::CompletionService(ProviderError::StreamInterrupted(_))
        ));
    }

    #[tokio::test]
    async fn store_outage_degrades_instead_of_failing() {
        let provider = Arc::new(ScriptedProvider::replying(r#"{"response":"General advice."}"#));
        let coach = Coach::new(Arc::new(FailingStore), provider.clone(), "m");
        let reply = coach.respond(&[Message::user("Hi")]).await.unwrap();
        assert_eq!(reply.grounding, GroundingStatus::Unavailable);
        assert!(
            provider.last_request().messages[0]
                .content
                .contains("knowledge base is currently unavailable")
        );
    }

    #[tokio::test]
    async fn empty_store_marks_grounding_empty() {
        let provider = Arc::new(ScriptedProvider::replying(r#"{"response":"ok"}"#));
        let coach = Coach::new(Arc::new(InMemoryKnowledgeStore::new()), provider, "m");
        let reply = coach.respond(&[Message::user("Hi")]).await.unwrap();
        assert_eq!(reply.grounding, GroundingStatus::Empty);
    }

    #[tokio::test]
    async fn invalid_histories_rejected() {
        let coach = Coach::new(
            Arc::new(InMemoryKnowledgeStore::new()),
            Arc::new(ScriptedProvider::replying("unused")),
            "m",
        );
        for history in [
            vec![],
            vec![Message::user("Hi"), Message::assistant("Hello!")],
            vec![Message::user("   ")],
        ] {
            let err = coach.prepare(&history).await.unwrap_err();
            assert!(matches!(err, CoachError::InvalidConversation(_)));
        }
    }

    #[tokio::test]
    async fn from_config_applies_params_and_persona() {
        let mut config = AppConfig::default();
        config.default_model = "gpt-4o".into();
        config.frequency_penalty = Some(0.5);
        config.coach.persona = Some("You coach pediatric dental offices.".into());

        let provider = Arc::new(ScriptedProvider::replying(r#"{"response":"ok"}"#));
        let coach = Coach::from_config(&config, seeded_store().await, provider.clone());
        coach.respond(&[Message::user("Hi")]).await.unwrap();

        let request = provider.last_request();
        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.params.frequency_penalty, Some(0.5));
        assert_eq!(request.params.max_tokens, Some(1024));
        assert!(request.messages[0].content.starts_with("You coach pediatric dental offices."));
    }
}
