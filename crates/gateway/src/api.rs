//! HTTP API: chat, knowledge administration and the resource catalog.
//!
//! Endpoints (nested under `/api`, all behind bearer auth):
//!
//! | Method | Path                     | Purpose                                        |
//! |--------|--------------------------|------------------------------------------------|
//! | POST   | `/api/chat`              | stream the raw model reply as text/plain       |
//! | POST   | `/api/chat/structured`   | full turn, parsed against the response contract |
//! | GET    | `/api/knowledge`         | every entry, newest first                      |
//! | POST   | `/api/knowledge`         | create an entry                                |
//! | GET    | `/api/knowledge/{id}`    | one entry                                      |
//! | PATCH  | `/api/knowledge/{id}`    | partial update, including (de)activation       |
//! | DELETE | `/api/knowledge/{id}`    | permanent delete                               |
//! | GET    | `/api/resources`         | every resource, newest first                   |
//! | POST   | `/api/resources`         | create a resource as a draft                   |

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
};
use dentcoach_coach::{CoachError, CoachStream, GroundingStatus, StructuredAssistantResponse};
use dentcoach_core::error::KnowledgeError;
use dentcoach_core::knowledge::{KnowledgeEntry, KnowledgeUpdate, NewKnowledgeEntry};
use dentcoach_core::message::Message;
use dentcoach_core::resource::{NewResource, Resource};
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, info, warn};

use crate::SharedState;

/// Response header reporting how the turn was grounded.
pub const GROUNDING_HEADER: &str = "x-dentcoach-grounding";

/// Build the API router. Nest this under "/api" in the main router.
pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/structured", post(structured_chat_handler))
        .route(
            "/knowledge",
            get(list_knowledge_handler).post(create_knowledge_handler),
        )
        .route(
            "/knowledge/{id}",
            get(get_knowledge_handler)
                .patch(update_knowledge_handler)
                .delete(delete_knowledge_handler),
        )
        .route(
            "/resources",
            get(list_resources_handler).post(create_resource_handler),
        )
        .with_state(state)
}

// ── DTOs ──────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StructuredChatResponse {
    pub response: StructuredAssistantResponse,
    pub structured: bool,
    pub grounding: GroundingStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

fn coach_error(err: CoachError) -> ApiError {
    match &err {
        CoachError::InvalidConversation(reason) => {
            warn!(reason = %reason, "Rejected chat request");
            api_error(StatusCode::BAD_REQUEST, err.to_string())
        }
        _ => {
            error!(error = %err, "Chat request failed");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, err.public_message())
        }
    }
}

fn knowledge_error(err: KnowledgeError) -> ApiError {
    match err {
        KnowledgeError::InvalidEntry(reason) => api_error(StatusCode::BAD_REQUEST, reason),
        other => {
            error!(error = %other, "Knowledge store operation failed");
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Something went wrong. Please try again.",
            )
        }
    }
}

fn not_found(id: &str) -> ApiError {
    api_error(
        StatusCode::NOT_FOUND,
        format!("Knowledge entry '{id}' not found"),
    )
}

// ── Chat ──────────────────────────────────────────────────────────────────

/// `POST /api/chat`: stream the model's raw text.
///
/// The fully assembled body is expected to satisfy the response contract.
/// A failure before streaming starts yields a JSON error; a failure after
/// that terminates the body.
async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, ApiError> {
    info!(messages = payload.messages.len(), "api/chat request");

    let CoachStream { chunks, grounding } = state
        .coach
        .stream(&payload.messages)
        .await
        .map_err(coach_error)?;

    let body = ReceiverStream::new(chunks).filter_map(|chunk| match chunk {
        Ok(chunk) => chunk.content.map(|text| Ok(Bytes::from(text))),
        Err(e) => {
            warn!(error = %e, "Completion stream broke mid-response");
            Some(Err(std::io::Error::other(e.to_string())))
        }
    });

    Ok((
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (
                header::HeaderName::from_static(GROUNDING_HEADER),
                grounding.as_str(),
            ),
        ],
        Body::from_stream(body),
    )
        .into_response())
}

/// `POST /api/chat/structured`: run the turn to completion and return the
/// parsed contract.
async fn structured_chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<StructuredChatResponse>, ApiError> {
    info!(messages = payload.messages.len(), "api/chat/structured request");

    let reply = state
        .coach
        .respond(&payload.messages)
        .await
        .map_err(coach_error)?;

    Ok(Json(StructuredChatResponse {
        structured: reply.is_structured(),
        grounding: reply.grounding,
        response: reply.response,
    }))
}

// ── Knowledge ─────────────────────────────────────────────────────────────

async fn list_knowledge_handler(
    State(state): State<SharedState>,
) -> Result<Json<Vec<KnowledgeEntry>>, ApiError> {
    let entries = state
        .coach
        .store()
        .list_all()
        .await
        .map_err(knowledge_error)?;
    Ok(Json(entries))
}

async fn create_knowledge_handler(
    State(state): State<SharedState>,
    Json(entry): Json<NewKnowledgeEntry>,
) -> Result<(StatusCode, Json<KnowledgeEntry>), ApiError> {
    let created = state
        .coach
        .store()
        .create(entry)
        .await
        .map_err(knowledge_error)?;
    info!(id = %created.id, kind = %created.kind, "Knowledge entry created");
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_knowledge_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<KnowledgeEntry>, ApiError> {
    state
        .coach
        .store()
        .get(&id)
        .await
        .map_err(knowledge_error)?
        .map(Json)
        .ok_or_else(|| not_found(&id))
}

async fn update_knowledge_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(update): Json<KnowledgeUpdate>,
) -> Result<Json<KnowledgeEntry>, ApiError> {
    if update.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "No fields to update"));
    }

    let updated = state
        .coach
        .store()
        .update(&id, update)
        .await
        .map_err(knowledge_error)?
        .ok_or_else(|| not_found(&id))?;
    info!(id = %updated.id, active = updated.is_active, "Knowledge entry updated");
    Ok(Json(updated))
}

async fn delete_knowledge_handler(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if state
        .coach
        .store()
        .delete(&id)
        .await
        .map_err(knowledge_error)?
    {
        info!(id = %id, "Knowledge entry deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(&id))
    }
}

// ── Resources ─────────────────────────────────────────────────────────────

async fn list_resources_handler(
    State(state): State<SharedState>,
) -> Result<Json<Vec<Resource>>, ApiError> {
    let resources = state
        .resources
        .list_resources()
        .await
        .map_err(knowledge_error)?;
    Ok(Json(resources))
}

async fn create_resource_handler(
    State(state): State<SharedState>,
    Json(resource): Json<NewResource>,
) -> Result<(StatusCode, Json<Resource>), ApiError> {
    let created = state
        .resources
        .create_resource(resource)
        .await
        .map_err(knowledge_error)?;
    info!(id = %created.id, kind = %created.kind, "Resource created");
    Ok((StatusCode::CREATED, Json(created)))
}
