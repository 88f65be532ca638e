//! 实时事件
//!
//! 序列化为 `{"type": "...", "data": ...}`，供 SSE 订阅者消费

use serde::Serialize;

use super::host::{Host, HostStatus};
use super::stats::StatsSnapshot;

/// 事件
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Event {
    /// 最新统计快照
    Stats(Option<StatsSnapshot>),
    /// 全部主机
    Hosts(Vec<Host>),
    /// 部署生命周期
    Deployment(DeploymentEvent),
}

impl Event {
    /// 事件类型名
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Stats(_) => "stats",
            Event::Hosts(_) => "hosts",
            Event::Deployment(_) => "deployment",
        }
    }
}

/// 部署阶段
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    Started,
    Completed,
}

/// 部署事件负载
#[derive(Clone, Debug, Serialize)]
pub struct DeploymentEvent {
    pub job_id: String,
    pub environment: String,
    pub playbook: String,
    pub phase: DeploymentPhase,
    /// 目标主机进入的状态
    pub status: HostStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub hosts: Vec<String>,
    pub message: String,
}

impl DeploymentEvent {
    /// 部署开始
    pub fn started(job_id: &str, environment: &str, playbook: &str, hosts: &[String]) -> Self {
        Self {
            job_id: job_id.to_string(),
            environment: environment.to_string(),
            playbook: playbook.to_string(),
            phase: DeploymentPhase::Started,
            status: HostStatus::Deploying,
            success: None,
            exit_code: None,
            hosts: hosts.to_vec(),
            message: format!(
                "Deployment of {} started on {} host(s)",
                playbook,
                hosts.len()
            ),
        }
    }

    /// 部署结束
    pub fn completed(
        job_id: &str,
        environment: &str,
        playbook: &str,
        hosts: &[String],
        success: bool,
        exit_code: Option<i32>,
    ) -> Self {
        let message = if success {
            format!(
                "Deployment of {} completed successfully on {} host(s)",
                playbook,
                hosts.len()
            )
        } else {
            format!("Deployment of {} failed on {} host(s)", playbook, hosts.len())
        };

        Self {
            job_id: job_id.to_string(),
            environment: environment.to_string(),
            playbook: playbook.to_string(),
            phase: DeploymentPhase::Completed,
            status: if success {
                HostStatus::Secured
            } else {
                HostStatus::Error
            },
            success: Some(success),
            exit_code,
            hosts: hosts.to_vec(),
            message,
        }
    }
}
