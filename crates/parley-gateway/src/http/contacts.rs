use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use parley_contacts::Contact;
use parley_core::PlatformError;

use crate::app::AppState;
use crate::http::ApiResult;

#[derive(Deserialize)]
pub struct ListQuery {
    /// Substring search over name/email/channel-user-id/tags.
    pub q: Option<String>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<Contact>>> {
    let contacts = match query.q {
        Some(q) => state.contacts.search(&q).await.map_err(PlatformError::from)?,
        None => state.contacts.all().await.map_err(PlatformError::from)?,
    };
    Ok(Json(contacts))
}

pub async fn get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Contact>> {
    Ok(Json(
        state.contacts.get(&id).await.map_err(PlatformError::from)?,
    ))
}

#[derive(Deserialize)]
pub struct TagBody {
    pub tag: String,
}

pub async fn add_tag(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<TagBody>,
) -> ApiResult<Json<Contact>> {
    Ok(Json(
        state
            .contacts
            .add_tag(&id, &body.tag)
            .await
            .map_err(PlatformError::from)?,
    ))
}

pub async fn remove_tag(
    State(state): State<Arc<AppState>>,
    Path((id, tag)): Path<(String, String)>,
) -> ApiResult<Json<Contact>> {
    Ok(Json(
        state
            .contacts
            .remove_tag(&id, &tag)
            .await
            .map_err(PlatformError::from)?,
    ))
}
