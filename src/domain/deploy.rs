//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 部署任务结果
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Pending,
    Success,
    Failure,
}

impl JobOutcome {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            JobOutcome::Pending => "pending",
            JobOutcome::Success => "success",
            JobOutcome::Failure => "failure",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobOutcome::Success | JobOutcome::Failure)
    }
}

/// 部署任务
///
/// 目标主机列表在创建后不可变
#[derive(Clone, Debug, Serialize)]
pub struct DeploymentJob {
    pub id: String,
    pub environment: String,
    pub playbook: String,
    pub targets: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: JobOutcome,
    /// 执行引擎的原始退出码
    pub exit_code: Option<i32>,
    /// 本次运行的日志文件
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
    /// 失败原因（适配器错误、超时等）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeploymentJob {
    /// 创建新任务
    pub fn new(id: String, environment: String, playbook: String, targets: Vec<String>) -> Self {
        Self {
            id,
            environment,
            playbook,
            targets,
            started_at: Utc::now(),
            finished_at: None,
            outcome: JobOutcome::Pending,
            exit_code: None,
            log_path: None,
            error: None,
        }
    }

    /// 设置任务完成
    pub fn complete(&mut self, report: &JobReport) {
        self.outcome = if report.success {
            JobOutcome::Success
        } else {
            JobOutcome::Failure
        };
        self.exit_code = report.exit_code;
        self.log_path = report.log_path.clone();
        self.error = report.error.clone();
        self.finished_at = Some(Utc::now());
    }
}

/// 一次运行的最终报告（由调度器汇总适配器结果后生成）
#[derive(Clone, Debug, Default)]
pub struct JobReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub log_path: Option<PathBuf>,
    pub error: Option<String>,
}

impl JobReport {
    /// 失败报告
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            ..Default::default()
        }
    }
}

/// 部署请求
#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_playbook")]
    pub playbook: String,
    /// 显式指定的主机
    #[serde(default)]
    pub hosts: Option<Vec<String>>,
    /// 按分组选择主机（优先于 hosts）
    #[serde(default)]
    pub group: Option<String>,
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_playbook() -> String {
    "site.yml".to_string()
}

/// 部署已受理
#[derive(Debug, Clone, Serialize)]
pub struct JobAccepted {
    pub job_accepted: bool,
    pub job_id: String,
    pub target_count: usize,
}
