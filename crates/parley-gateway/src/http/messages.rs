use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use parley_agents::RoutingDecision;
use parley_conversations::Message;
use parley_core::types::{AgentType, Channel, InboundEvent};
use parley_core::PlatformError;

use crate::app::AppState;
use crate::http::{ApiError, ApiResult};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomingReply {
    pub outgoing: Option<Message>,
    pub conversation_id: String,
    pub contact_id: String,
    pub routing: Option<RoutingDecision>,
    pub agent_type: AgentType,
}

/// POST /messages/incoming — the direct inbound seam (used by the web
/// widget and by tests; signed transports come in via /webhooks).
pub async fn incoming(
    State(state): State<Arc<AppState>>,
    Json(event): Json<InboundEvent>,
) -> ApiResult<Json<IncomingReply>> {
    let outcome = state.engine.handle_incoming(event).await?;
    Ok(Json(IncomingReply {
        outgoing: outcome.outgoing,
        conversation_id: outcome.conversation.id,
        contact_id: outcome.contact.id,
        routing: outcome.routing,
        agent_type: outcome.agent_type,
    }))
}

/// POST /webhooks/{channel} — verify the adapter's signature, parse the
/// payload into inbound events, and run each through the engine exactly
/// once.
pub async fn webhook(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<Json<Vec<IncomingReply>>> {
    let channel = Channel::from_str(&channel)
        .map_err(|e| ApiError(PlatformError::InvalidInput(e)))?;
    let adapter = state
        .channels
        .get(channel)
        .ok_or_else(|| ApiError(PlatformError::NotFound(format!("channel adapter {channel}"))))?;

    let signature = headers
        .get("x-signature")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !adapter.verify_webhook(&body, signature) {
        return Err(ApiError(PlatformError::InvalidInput(
            "webhook signature verification failed".to_string(),
        )));
    }

    let raw: serde_json::Value =
        serde_json::from_slice(&body).map_err(|e| ApiError(PlatformError::Parse(e.to_string())))?;
    let events = adapter
        .parse_incoming(&raw)
        .map_err(PlatformError::from)?;

    let mut replies = Vec::with_capacity(events.len());
    for event in events {
        let outcome = state.engine.handle_incoming(event).await?;
        replies.push(IncomingReply {
            outgoing: outcome.outgoing,
            conversation_id: outcome.conversation.id,
            contact_id: outcome.contact.id,
            routing: outcome.routing,
            agent_type: outcome.agent_type,
        });
    }
    Ok(Json(replies))
}
