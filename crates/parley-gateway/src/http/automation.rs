use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use parley_broadcast::{Broadcast, BroadcastTarget, CreateBroadcast};
use parley_core::types::{Channel, Metadata};
use parley_core::PlatformError;
use parley_flows::{Flow, FlowExecution, FlowStep, TriggerKind};
use parley_templates::Template;

use crate::app::AppState;
use crate::http::{ApiError, ApiResult};

// --- flows ------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFlowBody {
    pub name: String,
    pub trigger: TriggerKind,
    #[serde(default)]
    pub trigger_config: Metadata,
    pub steps: Vec<FlowStep>,
    #[serde(default)]
    pub active: bool,
}

pub async fn create_flow(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateFlowBody>,
) -> ApiResult<Json<Flow>> {
    let mut flow = Flow::new(body.name, body.trigger, body.steps);
    flow.trigger_config = body.trigger_config;
    flow.active = body.active;

    let flow = state
        .flows
        .register(flow)
        .await
        .map_err(PlatformError::from)?;

    if flow.active && flow.trigger == TriggerKind::Scheduled {
        state
            .scheduler
            .register(&flow)
            .map_err(PlatformError::from)?;
    }
    Ok(Json(flow))
}

pub async fn list_flows(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Flow>>> {
    Ok(Json(
        state.flows.list_flows().await.map_err(PlatformError::from)?,
    ))
}

pub async fn get_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Flow>> {
    Ok(Json(
        state.flows.get_flow(&id).await.map_err(PlatformError::from)?,
    ))
}

pub async fn activate_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Flow>> {
    let flow = state
        .flows
        .set_active(&id, true)
        .await
        .map_err(PlatformError::from)?;
    if flow.trigger == TriggerKind::Scheduled {
        state
            .scheduler
            .register(&flow)
            .map_err(PlatformError::from)?;
    }
    Ok(Json(flow))
}

pub async fn deactivate_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Flow>> {
    let flow = state
        .flows
        .set_active(&id, false)
        .await
        .map_err(PlatformError::from)?;
    state.scheduler.unregister(&flow.id);
    Ok(Json(flow))
}

pub async fn delete_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    state.scheduler.unregister(&id);
    let deleted = state
        .flows
        .delete_flow(&id)
        .await
        .map_err(PlatformError::from)?;
    if !deleted {
        return Err(ApiError(PlatformError::NotFound(format!("flow {id}"))));
    }
    Ok(Json(serde_json::json!({"deleted": true})))
}

#[derive(Deserialize, Default)]
pub struct ExecuteBody {
    #[serde(default)]
    pub context: serde_json::Value,
}

pub async fn execute_flow(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ExecuteBody>,
) -> ApiResult<Json<FlowExecution>> {
    let context = if body.context.is_object() {
        body.context
    } else {
        serde_json::json!({})
    };
    Ok(Json(
        state
            .flows
            .execute(&id, context)
            .await
            .map_err(PlatformError::from)?,
    ))
}

pub async fn get_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<FlowExecution>> {
    Ok(Json(
        state
            .flows
            .get_execution(&id)
            .await
            .map_err(PlatformError::from)?,
    ))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeBody {
    pub step_id: String,
}

pub async fn resume_execution(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ResumeBody>,
) -> ApiResult<Json<FlowExecution>> {
    Ok(Json(
        state
            .flows
            .resume(&id, &body.step_id)
            .await
            .map_err(PlatformError::from)?,
    ))
}

// --- broadcasts -------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBroadcastBody {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub channel: Option<Channel>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub schedule: Option<DateTime<Utc>>,
}

pub async fn create_broadcast(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateBroadcastBody>,
) -> ApiResult<Json<Broadcast>> {
    let config = CreateBroadcast {
        name: body.name,
        content: body.content,
        message_type: body.message_type,
        target: BroadcastTarget {
            channel: body.channel,
            tags: body.tags,
        },
        schedule: body.schedule,
    };
    Ok(Json(
        state
            .broadcasts
            .create(config, None)
            .await
            .map_err(PlatformError::from)?,
    ))
}

pub async fn list_broadcasts(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Broadcast>>> {
    Ok(Json(
        state.broadcasts.list().await.map_err(PlatformError::from)?,
    ))
}

pub async fn get_broadcast(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Broadcast>> {
    Ok(Json(
        state.broadcasts.get(&id).await.map_err(PlatformError::from)?,
    ))
}

pub async fn send_broadcast(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Broadcast>> {
    Ok(Json(
        state.broadcasts.send(&id).await.map_err(PlatformError::from)?,
    ))
}

pub async fn cancel_broadcast(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Broadcast>> {
    Ok(Json(
        state
            .broadcasts
            .cancel(&id)
            .await
            .map_err(PlatformError::from)?,
    ))
}

// --- templates --------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTemplateBody {
    pub name: String,
    pub content: String,
    #[serde(default)]
    pub variables: Option<Vec<String>>,
    #[serde(default)]
    pub channel: Option<Channel>,
}

pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateTemplateBody>,
) -> ApiResult<Json<Template>> {
    Ok(Json(
        state
            .templates
            .create(&body.name, &body.content, body.variables, body.channel)
            .await
            .map_err(PlatformError::from)?,
    ))
}

pub async fn list_templates(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<Vec<Template>>> {
    Ok(Json(
        state.templates.list().await.map_err(PlatformError::from)?,
    ))
}

pub async fn get_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Template>> {
    Ok(Json(
        state.templates.get(&id).await.map_err(PlatformError::from)?,
    ))
}

pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let deleted = state
        .templates
        .delete(&id)
        .await
        .map_err(PlatformError::from)?;
    if !deleted {
        return Err(ApiError(PlatformError::NotFound(format!("template {id}"))));
    }
    Ok(Json(serde_json::json!({"deleted": true})))
}

#[derive(Deserialize)]
pub struct RenderBody {
    #[serde(default)]
    pub values: HashMap<String, String>,
}

#[derive(Serialize)]
pub struct Rendered {
    pub rendered: String,
}

pub async fn render_template(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RenderBody>,
) -> ApiResult<Json<Rendered>> {
    Ok(Json(Rendered {
        rendered: state
            .templates
            .render(&id, &body.values)
            .await
            .map_err(PlatformError::from)?,
    }))
}

// --- knowledge --------------------------------------------------------------

#[derive(Serialize)]
pub struct ReloadResult {
    pub docs: usize,
}

pub async fn reload_knowledge(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<ReloadResult>> {
    state
        .knowledge
        .reload()
        .map_err(|e| ApiError(PlatformError::Internal(e.to_string())))?;
    Ok(Json(ReloadResult {
        docs: state.knowledge.len(),
    }))
}

#[derive(Deserialize)]
pub struct ListExecutionsQuery {
    pub flow: Option<String>,
}

pub async fn list_executions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListExecutionsQuery>,
) -> ApiResult<Json<Vec<FlowExecution>>> {
    Ok(Json(
        state
            .flows
            .list_executions(query.flow.as_deref())
            .await
            .map_err(PlatformError::from)?,
    ))
}
