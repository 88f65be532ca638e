//! Playbook 管理 API

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiResult;
use crate::middleware::RequireApiKey;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreatePlaybook {
    pub filename: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlaybook {
    pub content: String,
}

#[derive(Debug, Serialize)]
pub struct PlaybookList {
    pub playbooks: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct PlaybookResponse {
    pub success: bool,
    pub name: String,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/playbooks", get(list_playbooks).post(create_playbook))
        .route("/playbooks/:name", put(update_playbook).delete(delete_playbook))
}

/// GET /playbooks
async fn list_playbooks(State(state): State<Arc<AppState>>) -> ApiResult<Json<PlaybookList>> {
    Ok(Json(PlaybookList {
        playbooks: state.playbooks.list().await?,
    }))
}

/// POST /playbooks
async fn create_playbook(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreatePlaybook>,
) -> ApiResult<(StatusCode, Json<PlaybookResponse>)> {
    state
        .playbooks
        .create(&request.filename, &request.content)
        .await?;

    info!(playbook = %request.filename, "Created playbook");
    Ok((
        StatusCode::CREATED,
        Json(PlaybookResponse {
            success: true,
            name: request.filename,
        }),
    ))
}

/// PUT /playbooks/:name
async fn update_playbook(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Json(request): Json<UpdatePlaybook>,
) -> ApiResult<Json<PlaybookResponse>> {
    state.playbooks.update(&name, &request.content).await?;

    info!(playbook = %name, "Updated playbook");
    Ok(Json(PlaybookResponse {
        success: true,
        name,
    }))
}

/// DELETE /playbooks/:name
async fn delete_playbook(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<PlaybookResponse>> {
    state.playbooks.delete(&name).await?;

    info!(playbook = %name, "Deleted playbook");
    Ok(Json(PlaybookResponse {
        success: true,
        name,
    }))
}
