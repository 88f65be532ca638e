//! 部署 API
//!
//! 包含 /deploy, /jobs/recent, /jobs/:id 端点

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::domain::deploy::{DeployRequest, DeploymentJob, JobAccepted};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 任务历史查询参数
#[derive(Debug, Deserialize)]
pub struct JobHistoryQuery {
    #[serde(default = "default_limit")]
    pub limit: usize,
    pub environment: Option<String>,
    /// pending / success / failure
    pub outcome: Option<String>,
}

fn default_limit() -> usize {
    20
}

/// 任务历史响应
#[derive(Debug, Serialize)]
pub struct JobHistoryResponse {
    pub jobs: Vec<DeploymentJob>,
    pub total: usize,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deploy", post(deploy))
        .route("/jobs/recent", get(recent_jobs))
        .route("/jobs/:id", get(get_job))
}

/// 发起部署
///
/// POST /deploy
/// 立即返回任务 ID，结果通过事件流、任务查询和主机状态获取
async fn deploy(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<(StatusCode, Json<JobAccepted>)> {
    tracing::info!(
        environment = %request.environment,
        playbook = %request.playbook,
        group = ?request.group,
        hosts = ?request.hosts,
        "Received deployment request"
    );

    let accepted = state.dispatcher.request_deployment(request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /jobs/:id
/// 运行中与已归档的任务都可以查到
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeploymentJob>> {
    let job = state
        .jobs
        .get_any(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Job '{}'", id)))?;
    Ok(Json(job))
}

/// GET /jobs/recent
/// 运行中的任务在前，然后是历史记录
async fn recent_jobs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobHistoryQuery>,
) -> Json<JobHistoryResponse> {
    let environment = query.environment.as_deref();
    let outcome = query.outcome.as_deref();

    let mut jobs: Vec<DeploymentJob> = state
        .jobs
        .running()
        .await
        .into_iter()
        .filter(|job| {
            environment.map_or(true, |e| job.environment == e)
                && outcome.map_or(true, |o| job.outcome.as_str() == o)
        })
        .collect();

    jobs.extend(
        state
            .jobs
            .get_history(query.limit, environment, outcome)
            .await,
    );
    jobs.truncate(query.limit);

    let total = jobs.len();
    Json(JobHistoryResponse { jobs, total })
}
