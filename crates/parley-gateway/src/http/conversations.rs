use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use parley_conversations::{
    Conversation, ConversationFilters, ConversationStatus, Message,
};
use parley_core::types::Channel;
use parley_core::PlatformError;

use crate::app::AppState;
use crate::http::{ApiError, ApiResult};

#[derive(Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub channel: Option<String>,
    pub agent: Option<String>,
    pub contact: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Conversation>>> {
    let status = query
        .status
        .map(|s| ConversationStatus::from_str(&s))
        .transpose()
        .map_err(|e| ApiError(PlatformError::InvalidInput(e)))?;
    let channel = query
        .channel
        .map(|c| Channel::from_str(&c))
        .transpose()
        .map_err(|e| ApiError(PlatformError::InvalidInput(e)))?;

    let filters = ConversationFilters {
        status,
        channel,
        current_agent_id: query.agent,
        contact_id: query.contact,
        ..Default::default()
    };
    Ok(Json(
        state
            .conversations
            .find(filters)
            .await
            .map_err(PlatformError::from)?,
    ))
}

pub async fn stats(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<HashMap<String, usize>>> {
    let counts = state
        .conversations
        .stats()
        .await
        .map_err(PlatformError::from)?;
    Ok(Json(
        counts
            .into_iter()
            .map(|(status, count)| (status.as_str().to_string(), count))
            .collect(),
    ))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(
        state
            .conversations
            .get(&id)
            .await
            .map_err(PlatformError::from)?,
    ))
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

pub async fn history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    Ok(Json(
        state
            .conversations
            .get_history(&id, query.limit)
            .await
            .map_err(PlatformError::from)?,
    ))
}

pub async fn handoff(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.engine.handle_handoff(&id).await?))
}

pub async fn resume(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.engine.resume_ai(&id).await?))
}

pub async fn pause(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.engine.pause(&id).await?))
}

#[derive(Deserialize)]
pub struct CloseBody {
    pub reason: Option<String>,
}

pub async fn close(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<CloseBody>,
) -> ApiResult<Json<Conversation>> {
    let reason = body.reason.as_deref().unwrap_or("closed via api");
    Ok(Json(state.engine.close_conversation(&id, reason).await?))
}

pub async fn reopen(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Conversation>> {
    Ok(Json(state.engine.reopen(&id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HumanReplyBody {
    pub human_id: String,
    pub content: String,
}

pub async fn human_reply(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<HumanReplyBody>,
) -> ApiResult<Json<Message>> {
    Ok(Json(
        state
            .engine
            .handle_human_reply(&id, &body.human_id, &body.content)
            .await?,
    ))
}
