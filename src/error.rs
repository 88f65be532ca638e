//! 统一错误处理
//!
//! `ApiError` 实现 `IntoResponse`，各层错误通过 `From` 转换为对应的 HTTP 状态码

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::infra::inventory::InventoryError;
use crate::infra::playbooks::PlaybookError;
use crate::services::dispatcher::DeployError;
use crate::state::host_store::RepositoryError;

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// 统一 API 错误类型
#[derive(Debug, Error)]
pub enum ApiError {
    /// 401 - API Key 无效或缺失
    #[error("Unauthorized")]
    Unauthorized,
    /// 404
    #[error("Not found: {0}")]
    NotFound(String),
    /// 400
    #[error("Bad request: {0}")]
    BadRequest(String),
    /// 409 - 主机正在部署、重复注册等
    #[error("Conflict: {0}")]
    Conflict(String),
    /// 500
    #[error("Internal error: {0}")]
    Internal(String),
    /// 503 - 主机仓库不可用
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl ApiError {
    pub fn unauthorized() -> Self {
        Self::Unauthorized
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable(message.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_type, message) = match self {
            ApiError::Unauthorized => ("unauthorized", "Invalid or missing API key".to_string()),
            ApiError::NotFound(resource) => ("not_found", format!("{} not found", resource)),
            ApiError::BadRequest(msg) => ("bad_request", msg),
            ApiError::Conflict(msg) => ("conflict", msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal error");
                ("internal_error", msg)
            }
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg),
        };

        (status, Json(ErrorResponse::new(error_type, message))).into_response()
    }
}

impl From<RepositoryError> for ApiError {
    fn from(e: RepositoryError) -> Self {
        match e {
            RepositoryError::NotFound(id) => ApiError::NotFound(format!("Host {}", id)),
            RepositoryError::MissingHosts { .. } | RepositoryError::InvalidTransition(_) => {
                ApiError::BadRequest(e.to_string())
            }
            RepositoryError::Duplicate { .. } | RepositoryError::Conflict(_) => {
                ApiError::Conflict(e.to_string())
            }
            RepositoryError::Unavailable(_) => ApiError::ServiceUnavailable(e.to_string()),
        }
    }
}

impl From<PlaybookError> for ApiError {
    fn from(e: PlaybookError) -> Self {
        match e {
            PlaybookError::InvalidName(_) => ApiError::BadRequest(e.to_string()),
            PlaybookError::NotFound(name) => ApiError::NotFound(format!("Playbook '{}'", name)),
            PlaybookError::AlreadyExists(_) => ApiError::Conflict(e.to_string()),
            PlaybookError::Io(_) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<InventoryError> for ApiError {
    fn from(e: InventoryError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<DeployError> for ApiError {
    fn from(e: DeployError) -> Self {
        match e {
            DeployError::NoTargets | DeployError::UnknownHosts(_) => {
                ApiError::BadRequest(e.to_string())
            }
            DeployError::UnknownPlaybook(name) => ApiError::NotFound(format!("Playbook '{}'", name)),
            DeployError::HostConflict(_) => ApiError::Conflict(e.to_string()),
            DeployError::Repository(_) => ApiError::ServiceUnavailable(e.to_string()),
            DeployError::ExecutionAdapter(_) => ApiError::Internal(e.to_string()),
        }
    }
}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_new() {
        let resp = ErrorResponse::new("conflict", "Hosts already deploying: a");
        assert_eq!(resp.error, "conflict");
        assert_eq!(resp.message, "Hosts already deploying: a");
    }

    #[test]
    fn test_deploy_error_status_mapping() {
        let cases = [
            (DeployError::NoTargets, StatusCode::BAD_REQUEST),
            (DeployError::UnknownHosts(vec!["x".into()]), StatusCode::BAD_REQUEST),
            (DeployError::UnknownPlaybook("x.yml".into()), StatusCode::NOT_FOUND),
            (DeployError::HostConflict(vec!["x".into()]), StatusCode::CONFLICT),
            (
                DeployError::Repository(RepositoryError::Unavailable("down".into())),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (error, status) in cases {
            assert_eq!(ApiError::from(error).status(), status);
        }
    }

    #[test]
    fn test_repository_error_status_mapping() {
        assert_eq!(
            ApiError::from(RepositoryError::NotFound("7".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(RepositoryError::Conflict(vec!["a".into()])).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from(RepositoryError::InvalidTransition("no".into())).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::not_found("Job abc").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
