use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::app::AppState;

#[derive(Serialize)]
pub struct Health {
    status: &'static str,
    knowledge_docs: usize,
    scheduled_flows: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        knowledge_docs: state.knowledge.len(),
        scheduled_flows: state.scheduler.len(),
    })
}
