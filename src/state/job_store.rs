//! 部署任务存储
//!
//! 管理运行中的任务和历史记录，自动清理过期任务

use chrono::{Duration, Utc};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::config::env::constants::{JOB_RETENTION_HOURS, MAX_JOB_HISTORY};
use crate::domain::deploy::{DeploymentJob, JobReport};

/// 任务存储
///
/// 运行中的任务按 ID 索引；完成后移入有界历史记录
pub struct JobStore {
    /// 运行中的任务
    active: RwLock<HashMap<String, DeploymentJob>>,
    /// 历史记录，最新在前
    history: RwLock<VecDeque<DeploymentJob>>,
    /// 最大历史记录数
    max_history: usize,
    /// 任务保留时间
    retention: Duration,
}

impl JobStore {
    /// 创建新的任务存储
    pub fn new() -> Self {
        Self::with_config(MAX_JOB_HISTORY, JOB_RETENTION_HOURS)
    }

    /// 使用自定义配置创建
    pub fn with_config(max_history: usize, retention_hours: i64) -> Self {
        Self {
            active: RwLock::new(HashMap::new()),
            history: RwLock::new(VecDeque::new()),
            max_history,
            retention: Duration::hours(retention_hours),
        }
    }

    /// 登记新任务
    pub async fn create(&self, job: DeploymentJob) -> String {
        let job_id = job.id.clone();
        let mut active = self.active.write().await;
        active.insert(job_id.clone(), job);
        job_id
    }

    /// 获取运行中的任务
    pub async fn get(&self, job_id: &str) -> Option<DeploymentJob> {
        let active = self.active.read().await;
        active.get(job_id).cloned()
    }

    /// 获取任务（优先运行中的任务，然后查历史记录）
    pub async fn get_any(&self, job_id: &str) -> Option<DeploymentJob> {
        if let Some(job) = self.get(job_id).await {
            return Some(job);
        }
        let history = self.history.read().await;
        history.iter().find(|j| j.id == job_id).cloned()
    }

    /// 所有运行中的任务
    pub async fn running(&self) -> Vec<DeploymentJob> {
        let active = self.active.read().await;
        let mut jobs: Vec<DeploymentJob> = active.values().cloned().collect();
        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        jobs
    }

    /// 完成任务并移到历史记录
    pub async fn finish(&self, job_id: &str, report: &JobReport) -> Option<DeploymentJob> {
        let job = {
            let mut active = self.active.write().await;
            active.remove(job_id).map(|mut job| {
                job.complete(report);
                job
            })
        };

        if let Some(ref job) = job {
            self.add_to_history(job.clone()).await;
        }
        job
    }

    /// 添加任务到历史记录
    pub async fn add_to_history(&self, job: DeploymentJob) {
        let mut history = self.history.write().await;
        history.push_front(job);

        while history.len() > self.max_history {
            history.pop_back();
        }
    }

    /// 获取历史记录
    pub async fn get_history(
        &self,
        limit: usize,
        environment: Option<&str>,
        outcome: Option<&str>,
    ) -> Vec<DeploymentJob> {
        let history = self.history.read().await;

        history
            .iter()
            .filter(|job| {
                let env_match = environment.map_or(true, |e| job.environment == e);
                let outcome_match = outcome.map_or(true, |o| job.outcome.as_str() == o);
                env_match && outcome_match
            })
            .take(limit)
            .cloned()
            .collect()
    }

    /// 获取历史记录总数
    pub async fn history_count(&self) -> usize {
        let history = self.history.read().await;
        history.len()
    }

    /// 清理历史记录中超过保留时间的任务
    ///
    /// 运行中的任务不受影响
    pub async fn cleanup_stale(&self) -> usize {
        let cutoff = Utc::now() - self.retention;
        let mut history = self.history.write().await;
        let before = history.len();
        history.retain(|job| job.finished_at.map_or(true, |t| t > cutoff));
        before - history.len()
    }

    /// 运行中的任务数量
    pub async fn active_count(&self) -> usize {
        let active = self.active.read().await;
        active.len()
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
