//! 主机仓库
//!
//! `HostRepository` 是调度器访问主机数据的唯一入口。`HostStore` 为默认实现：
//! 数据常驻内存，可选地以 JSON 文件持久化（临时文件 + 原子重命名）。
//!
//! 所有批量写操作都先在副本上修改、落盘成功后再替换内存状态，
//! 因此一批状态变更要么全部生效，要么完全不生效。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::env::constants::MAX_STATS_HISTORY;
use crate::domain::host::{Host, HostId, HostStatus, NewHost};
use crate::domain::stats::StatsSnapshot;

/// 仓库错误
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Host {0} not found")]
    NotFound(String),

    #[error("Unknown hosts in environment '{environment}': {}", .names.join(", "))]
    MissingHosts {
        environment: String,
        names: Vec<String>,
    },

    #[error("Host '{name}' already exists in environment '{environment}'")]
    Duplicate { name: String, environment: String },

    #[error("Hosts already deploying: {}", .0.join(", "))]
    Conflict(Vec<String>),

    #[error("Invalid status change: {0}")]
    InvalidTransition(String),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// 主机仓库接口
#[async_trait]
pub trait HostRepository: Send + Sync {
    /// 全部主机，按加入时间倒序
    async fn list_all(&self) -> RepositoryResult<Vec<Host>>;

    /// 指定环境的主机
    async fn list_by_environment(&self, environment: &str) -> RepositoryResult<Vec<Host>>;

    /// 指定环境中属于某分组的主机（精确匹配分组名）
    async fn list_by_group(&self, group: &str, environment: &str) -> RepositoryResult<Vec<Host>>;

    async fn get(&self, id: HostId) -> RepositoryResult<Host>;

    /// 注册主机，同一环境内主机名唯一
    async fn insert(&self, host: NewHost) -> RepositoryResult<Host>;

    /// 删除主机，部署中的主机不可删除
    async fn delete(&self, id: HostId) -> RepositoryResult<Host>;

    /// 管理员修改状态
    ///
    /// 不能设置为 `deploying`，也不能修改正在部署的主机
    async fn set_status(
        &self,
        environment: &str,
        names: &[String],
        status: HostStatus,
    ) -> RepositoryResult<()>;

    /// 原子地检查冲突并把目标主机切换到 `deploying`
    async fn begin_deployment(&self, environment: &str, names: &[String]) -> RepositoryResult<()>;

    /// 把仍处于 `deploying` 的目标主机切换到终态，返回实际变更的主机名
    async fn finish_deployment(
        &self,
        environment: &str,
        names: &[String],
        status: HostStatus,
    ) -> RepositoryResult<Vec<String>>;

    /// 追加统计快照
    async fn record_stats(&self, snapshot: StatsSnapshot) -> RepositoryResult<()>;

    /// 最新统计快照
    async fn latest_stats(&self) -> RepositoryResult<Option<StatsSnapshot>>;
}

/// 持久化数据
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct HostData {
    /// 下一个可用 ID
    next_id: HostId,
    hosts: Vec<Host>,
    /// 统计快照，最新在前
    stats: VecDeque<StatsSnapshot>,
}

impl HostData {
    fn find(&self, environment: &str, name: &str) -> Option<usize> {
        self.hosts
            .iter()
            .position(|h| h.environment == environment && h.name == name)
    }

    /// 解析一批主机名，任何一个不存在都返回错误
    fn resolve(&self, environment: &str, names: &[String]) -> RepositoryResult<Vec<usize>> {
        let mut indexes = Vec::with_capacity(names.len());
        let mut missing = Vec::new();
        for name in names {
            match self.find(environment, name) {
                Some(i) => indexes.push(i),
                None => missing.push(name.clone()),
            }
        }
        if missing.is_empty() {
            Ok(indexes)
        } else {
            Err(RepositoryError::MissingHosts {
                environment: environment.to_string(),
                names: missing,
            })
        }
    }

    fn deploying_among(&self, indexes: &[usize]) -> Vec<String> {
        indexes
            .iter()
            .map(|&i| &self.hosts[i])
            .filter(|h| h.status == HostStatus::Deploying)
            .map(|h| h.name.clone())
            .collect()
    }
}

/// 主机存储
pub struct HostStore {
    data: RwLock<HostData>,
    /// 持久化文件，None 表示仅内存
    path: Option<PathBuf>,
}

impl HostStore {
    /// 创建仅内存的存储
    pub fn in_memory() -> Self {
        Self {
            data: RwLock::new(HostData {
                next_id: 1,
                ..Default::default()
            }),
            path: None,
        }
    }

    /// 打开（或创建）文件存储
    ///
    /// 上次进程退出时仍处于 `deploying` 的主机会被置为 `error`，
    /// 因为它们的部署任务已不存在
    pub async fn open(path: impl Into<PathBuf>) -> RepositoryResult<Self> {
        let path = path.into();
        let mut data = load_data(&path).await?;

        let interrupted: Vec<String> = data
            .hosts
            .iter_mut()
            .filter(|h| h.status == HostStatus::Deploying)
            .map(|h| {
                h.status = HostStatus::Error;
                format!("{}/{}", h.environment, h.name)
            })
            .collect();

        if !interrupted.is_empty() {
            warn!(
                hosts = ?interrupted,
                "Hosts were deploying when the service stopped, marking as error"
            );
            save_data(&path, &data).await?;
        }

        info!(
            path = %path.display(),
            hosts = data.hosts.len(),
            "Opened host store"
        );

        Ok(Self {
            data: RwLock::new(data),
            path: Some(path),
        })
    }

    /// 在副本上执行修改，持久化成功后替换
    async fn mutate<T>(
        &self,
        f: impl FnOnce(&mut HostData) -> RepositoryResult<T>,
    ) -> RepositoryResult<T> {
        let mut guard = self.data.write().await;
        let mut next = guard.clone();
        let result = f(&mut next)?;

        if let Some(ref path) = self.path {
            save_data(path, &next).await?;
        }

        *guard = next;
        Ok(result)
    }
}

impl Default for HostStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

#[async_trait]
impl HostRepository for HostStore {
    async fn list_all(&self) -> RepositoryResult<Vec<Host>> {
        let data = self.data.read().await;
        let mut hosts = data.hosts.clone();
        hosts.sort_by(|a, b| b.added_at.cmp(&a.added_at).then(b.id.cmp(&a.id)));
        Ok(hosts)
    }

    async fn list_by_environment(&self, environment: &str) -> RepositoryResult<Vec<Host>> {
        let data = self.data.read().await;
        Ok(data
            .hosts
            .iter()
            .filter(|h| h.environment == environment)
            .cloned()
            .collect())
    }

    async fn list_by_group(&self, group: &str, environment: &str) -> RepositoryResult<Vec<Host>> {
        let data = self.data.read().await;
        Ok(data
            .hosts
            .iter()
            .filter(|h| h.environment == environment && h.in_group(group))
            .cloned()
            .collect())
    }

    async fn get(&self, id: HostId) -> RepositoryResult<Host> {
        let data = self.data.read().await;
        data.hosts
            .iter()
            .find(|h| h.id == id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(id.to_string()))
    }

    async fn insert(&self, host: NewHost) -> RepositoryResult<Host> {
        self.mutate(|data| {
            let name = host.name.trim();
            let environment = host.environment.trim();
            if data.find(environment, name).is_some() {
                return Err(RepositoryError::Duplicate {
                    name: name.to_string(),
                    environment: environment.to_string(),
                });
            }

            let id = data.next_id.max(1);
            data.next_id = id + 1;
            let record = host.into_host(id);
            data.hosts.push(record.clone());
            Ok(record)
        })
        .await
    }

    async fn delete(&self, id: HostId) -> RepositoryResult<Host> {
        self.mutate(|data| {
            let index = data
                .hosts
                .iter()
                .position(|h| h.id == id)
                .ok_or_else(|| RepositoryError::NotFound(id.to_string()))?;

            if data.hosts[index].status == HostStatus::Deploying {
                return Err(RepositoryError::Conflict(vec![data.hosts[index].name.clone()]));
            }

            Ok(data.hosts.remove(index))
        })
        .await
    }

    async fn set_status(
        &self,
        environment: &str,
        names: &[String],
        status: HostStatus,
    ) -> RepositoryResult<()> {
        if status == HostStatus::Deploying {
            return Err(RepositoryError::InvalidTransition(
                "deploying can only be entered by starting a deployment".to_string(),
            ));
        }

        self.mutate(|data| {
            let indexes = data.resolve(environment, names)?;
            let busy = data.deploying_among(&indexes);
            if !busy.is_empty() {
                return Err(RepositoryError::Conflict(busy));
            }
            for i in indexes {
                data.hosts[i].status = status;
            }
            Ok(())
        })
        .await
    }

    async fn begin_deployment(&self, environment: &str, names: &[String]) -> RepositoryResult<()> {
        self.mutate(|data| {
            let indexes = data.resolve(environment, names)?;
            let busy = data.deploying_among(&indexes);
            if !busy.is_empty() {
                return Err(RepositoryError::Conflict(busy));
            }
            for i in indexes {
                data.hosts[i].status = HostStatus::Deploying;
            }
            Ok(())
        })
        .await
    }

    async fn finish_deployment(
        &self,
        environment: &str,
        names: &[String],
        status: HostStatus,
    ) -> RepositoryResult<Vec<String>> {
        if !status.is_terminal() {
            return Err(RepositoryError::InvalidTransition(format!(
                "deployment cannot finish as {}",
                status
            )));
        }

        self.mutate(|data| {
            let mut changed = Vec::new();
            for name in names {
                if let Some(i) = data.find(environment, name) {
                    let host = &mut data.hosts[i];
                    if host.status == HostStatus::Deploying {
                        host.status = status;
                        changed.push(host.name.clone());
                    }
                }
            }
            Ok(changed)
        })
        .await
    }

    async fn record_stats(&self, snapshot: StatsSnapshot) -> RepositoryResult<()> {
        self.mutate(|data| {
            data.stats.push_front(snapshot);
            while data.stats.len() > MAX_STATS_HISTORY {
                data.stats.pop_back();
            }
            Ok(())
        })
        .await
    }

    async fn latest_stats(&self) -> RepositoryResult<Option<StatsSnapshot>> {
        let data = self.data.read().await;
        Ok(data.stats.front().cloned())
    }
}

/// 从文件加载，文件不存在时返回空数据
async fn load_data(path: &Path) -> RepositoryResult<HostData> {
    if !fs::try_exists(path).await.unwrap_or(false) {
        return Ok(HostData {
            next_id: 1,
            ..Default::default()
        });
    }

    let content = fs::read_to_string(path)
        .await
        .map_err(|e| RepositoryError::Unavailable(format!("read {}: {}", path.display(), e)))?;

    serde_json::from_str(&content)
        .map_err(|e| RepositoryError::Unavailable(format!("parse {}: {}", path.display(), e)))
}

/// 原子写入：先写临时文件再重命名
async fn save_data(path: &Path, data: &HostData) -> RepositoryResult<()> {
    let unavailable = |e: std::io::Error| RepositoryError::Unavailable(e.to_string());

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(unavailable)?;
    }

    let content = serde_json::to_string_pretty(data)
        .map_err(|e| RepositoryError::Unavailable(e.to_string()))?;

    let temp_path = path.with_extension("json.tmp");
    fs::write(&temp_path, &content).await.map_err(unavailable)?;
    fs::rename(&temp_path, path).await.map_err(unavailable)?;

    Ok(())
}
