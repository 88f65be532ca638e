//! 主机管理 API
//!
//! 注册与删除会同步更新对应环境的 inventory 文件并刷新统计

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::host::{Host, HostId, HostStatus, NewHost};
use crate::error::{ApiError, ApiResult};
use crate::middleware::RequireApiKey;
use crate::state::AppState;

/// 修改状态请求
#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: String,
}

/// 删除响应
#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
    pub host: Host,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/hosts", get(list_hosts).post(create_host))
        .route("/hosts/:id", delete(delete_host))
        .route("/hosts/:id/status", put(update_status))
}

/// GET /hosts
/// 无需认证，按加入时间倒序
async fn list_hosts(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Host>>> {
    Ok(Json(state.hosts.list_all().await?))
}

/// POST /hosts
async fn create_host(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewHost>,
) -> ApiResult<(StatusCode, Json<Host>)> {
    request.validate().map_err(ApiError::bad_request)?;

    let host = state.hosts.insert(request).await?;

    // inventory 写入失败时撤销注册，避免仓库与 inventory 不一致
    if let Err(e) = state.inventory.upsert_host(&host).await {
        warn!(host = %host.name, error = %e, "Inventory update failed, rolling back");
        if let Err(rollback) = state.hosts.delete(host.id).await {
            warn!(host = %host.name, error = %rollback, "Rollback failed");
        }
        return Err(e.into());
    }

    state.refresh_stats().await;

    info!(
        id = host.id,
        host = %host.name,
        environment = %host.environment,
        "Registered host"
    );
    Ok((StatusCode::CREATED, Json(host)))
}

/// DELETE /hosts/:id
///
/// 正在部署的主机返回 409
async fn delete_host(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<HostId>,
) -> ApiResult<Json<DeleteResponse>> {
    let host = state.hosts.delete(id).await?;

    if let Err(e) = state.inventory.remove_host(&host).await {
        warn!(host = %host.name, error = %e, "Failed to remove host from inventory");
    }

    state.refresh_stats().await;

    info!(id, host = %host.name, environment = %host.environment, "Removed host");
    Ok(Json(DeleteResponse {
        deleted: true,
        host,
    }))
}

/// PUT /hosts/:id/status
///
/// 只能改为 pending/secured/error，部署中的主机不可修改
async fn update_status(
    _auth: RequireApiKey,
    State(state): State<Arc<AppState>>,
    Path(id): Path<HostId>,
    Json(update): Json<StatusUpdate>,
) -> ApiResult<Json<Host>> {
    let status = HostStatus::parse(update.status.trim())
        .ok_or_else(|| ApiError::bad_request(format!("Unknown status '{}'", update.status)))?;

    let host = state.hosts.get(id).await?;
    state
        .hosts
        .set_status(&host.environment, &[host.name.clone()], status)
        .await?;

    state.refresh_stats().await;

    info!(id, host = %host.name, status = %status, "Host status changed by administrator");
    Ok(Json(state.hosts.get(id).await?))
}
