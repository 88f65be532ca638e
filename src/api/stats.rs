//! 统计 API

use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use std::sync::Arc;

use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/stats", get(latest_stats))
}

/// GET /stats
/// 还没有快照时返回空对象
async fn latest_stats(State(state): State<Arc<AppState>>) -> ApiResult<Response> {
    let response = match state.hosts.latest_stats().await? {
        Some(snapshot) => Json(snapshot).into_response(),
        None => Json(serde_json::json!({})).into_response(),
    };
    Ok(response)
}
