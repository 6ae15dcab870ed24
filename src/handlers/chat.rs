use std::convert::Infallible;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::models::{Chat, Message, Source};
use crate::services::agent::StreamEvent;
use crate::services::response_cache::ResponseCache;
use crate::state::AppState;
use crate::utils::error::{CoreError, CoreResult};

#[derive(Debug, Deserialize)]
pub struct CreateChatRequest {
    pub title: Option<String>,
    pub initial_message: Option<String>,
}

pub async fn create_chat(State(state): State<AppState>, Json(req): Json<CreateChatRequest>) -> CoreResult<Json<Chat>> {
    let chat = state
        .conversations
        .create_chat(req.title, req.initial_message.as_deref(), &state.text_model)
        .await?;
    Ok(Json(chat))
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub branch: Option<String>,
    pub upto_message_id: Option<Uuid>,
    pub max: Option<i64>,
}

pub async fn get_history(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Query(params): Query<HistoryParams>,
) -> CoreResult<Json<Vec<Message>>> {
    let history = state
        .conversations
        .get_history(chat_id, params.branch.as_deref(), params.upto_message_id, params.max)
        .await?;
    Ok(Json(history))
}

pub async fn delete_chat(State(state): State<AppState>, Path(chat_id): Path<Uuid>) -> CoreResult<axum::http::StatusCode> {
    let removed = state.conversations.delete_chat(chat_id).await?;
    if !removed {
        return Err(CoreError::ChatNotFound(chat_id.to_string()));
    }
    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct CreateBranchRequest {
    pub name: String,
    pub from_message_id: Option<Uuid>,
}

pub async fn create_branch(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<CreateBranchRequest>,
) -> CoreResult<Json<Chat>> {
    let chat = state.conversations.create_branch(chat_id, &req.name, req.from_message_id).await?;
    Ok(Json(chat))
}

pub async fn switch_branch(State(state): State<AppState>, Path((chat_id, name)): Path<(Uuid, String)>) -> CoreResult<Json<Chat>> {
    let chat = state.conversations.switch_branch(chat_id, &name).await?;
    Ok(Json(chat))
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct SendMessageResponse {
    pub message: Message,
    pub cached: bool,
}

fn rag_chunk_ids(sources: &[Source]) -> Vec<Uuid> {
    sources
        .iter()
        .filter_map(|s| match s {
            Source::Rag { chunk_id: Some(id), .. } => Some(*id),
            _ => None,
        })
        .collect()
}

/// POST /api/chats/:id/messages — non-streaming turn: appends the user
/// message, runs the agent loop (served from the Response Cache when the
/// query/citation-set pair has been seen before), and persists the
/// assistant's reply with its sources.
pub async fn send_message(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> CoreResult<Json<SendMessageResponse>> {
    if req.content.trim().is_empty() {
        return Err(CoreError::Validation("message content must not be empty".to_string()));
    }

    state.conversations.add_message(chat_id, &req.content, "user", None, "text", Vec::new()).await?;
    let history = state.conversations.get_history(chat_id, None, None, None).await?;

    let cache_key = ResponseCache::key_for(&req.content, &[]);
    let (response_text, sources, cached) = if let Some(cached_response) = state.cache.get(&cache_key) {
        (cached_response, Vec::new(), true)
    } else {
        let result = state.agent.process_message(&req.content, &history).await?;
        let chunk_ids = rag_chunk_ids(&result.sources);
        let scoped_key = ResponseCache::key_for(&req.content, &chunk_ids);
        state.cache.put(scoped_key, result.response.clone());
        (result.response, result.sources, false)
    };

    let message = state
        .conversations
        .add_message(chat_id, &response_text, "assistant", None, "text", sources)
        .await?;

    info!(chat_id = %chat_id, cached, "chat turn completed");
    Ok(Json(SendMessageResponse { message, cached }))
}

fn to_sse_event(event: StreamEvent) -> Event {
    match event {
        StreamEvent::Message { token, iteration } => {
            Event::default().event("message").data(serde_json::json!({ "token": token, "iteration": iteration }).to_string())
        }
        StreamEvent::Thought { thought, action } => {
            Event::default().event("thought").data(serde_json::json!({ "thought": thought, "action": action }).to_string())
        }
        StreamEvent::ToolStart { tool, input } => {
            Event::default().event("tool_start").data(serde_json::json!({ "tool": tool, "input": input }).to_string())
        }
        StreamEvent::ToolEnd { tool, success, result_preview } => Event::default()
            .event("tool_end")
            .data(serde_json::json!({ "tool": tool, "success": success, "result_preview": result_preview }).to_string()),
        StreamEvent::Done { response, sources, iterations } => Event::default()
            .event("done")
            .data(serde_json::json!({ "response": response, "sources": sources, "iterations": iterations }).to_string()),
        StreamEvent::Error { tool, error } => {
            Event::default().event("error").data(serde_json::json!({ "tool": tool, "error": error }).to_string())
        }
    }
}

/// POST /api/chats/:id/messages/stream — same turn as `send_message`, but
/// drives the agent loop's SSE events straight through to the client in
/// strict causal order, persisting the assistant's final message once the
/// `done` event is produced.
pub async fn send_message_stream(
    State(state): State<AppState>,
    Path(chat_id): Path<Uuid>,
    Json(req): Json<SendMessageRequest>,
) -> CoreResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    if req.content.trim().is_empty() {
        return Err(CoreError::Validation("message content must not be empty".to_string()));
    }

    state.conversations.add_message(chat_id, &req.content, "user", None, "text", Vec::new()).await?;
    let history = state.conversations.get_history(chat_id, None, None, None).await?;

    let conversations = state.conversations.clone();
    let content = req.content.clone();

    let stream = async_stream::stream! {
        let agent_stream = state.agent.process_message_stream(&content, &history);
        futures::pin_mut!(agent_stream);

        while let Some(event) = agent_stream.next().await {
            match event {
                Ok(event) => {
                    if let StreamEvent::Done { ref response, ref sources, .. } = event {
                        let _ = conversations
                            .add_message(chat_id, response, "assistant", None, "text", sources.clone())
                            .await;
                    }
                    yield Ok(to_sse_event(event));
                }
                Err(err) => {
                    yield Ok(Event::default().event("error").data(serde_json::json!({ "error": err.to_string() }).to_string()));
                    break;
                }
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
