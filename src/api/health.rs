//! 健康检查 API

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::error::ApiResult;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_secs: i64,
    pub host_count: usize,
    pub running_jobs: usize,
    pub event_subscribers: usize,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// GET /health
/// 无需认证
async fn health_check(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    let host_count = state.hosts.list_all().await?.len();

    Ok(Json(HealthResponse {
        status: "ok",
        service: "linsec-deploy",
        version: VERSION,
        timestamp: Utc::now().to_rfc3339(),
        uptime_secs: state.uptime_secs(),
        host_count,
        running_jobs: state.jobs.active_count().await,
        event_subscribers: state.events.subscriber_count(),
    }))
}
