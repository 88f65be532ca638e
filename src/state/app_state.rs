//! 应用状态
//!
//! 启动时一次性装配所有组件，handler 通过 `State<Arc<AppState>>` 访问

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::env::constants::WATCHDOG_GRACE_SECS;
use crate::config::env::EnvConfig;
use crate::infra::inventory::{InventoryWriter, YamlInventory};
use crate::infra::playbooks::PlaybookLibrary;
use crate::services::dispatcher::Dispatcher;
use crate::services::executor::{AnsibleExecutor, ExecutionAdapter};
use crate::services::stats::StatsAggregator;

use super::event_hub::EventHub;
use super::host_store::{HostRepository, HostStore, RepositoryResult};
use super::job_store::JobStore;

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// API 密钥（用于验证请求）
    pub api_key: String,
    /// 环境配置
    pub config: EnvConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 数据 ==========
    /// 主机仓库
    pub hosts: Arc<dyn HostRepository>,
    /// Inventory 文件
    pub inventory: Arc<dyn InventoryWriter>,
    /// Playbook 目录
    pub playbooks: Arc<PlaybookLibrary>,

    // ========== 任务与事件 ==========
    /// 任务存储
    pub jobs: Arc<JobStore>,
    /// 事件中心
    pub events: Arc<EventHub>,
    /// 部署调度器
    pub dispatcher: Dispatcher,

    /// 关闭信号，后台任务与 SSE 连接监听它退出
    pub shutdown: CancellationToken,
}

impl AppState {
    /// 按配置创建：打开主机仓库文件，使用 ansible-playbook 执行
    pub async fn from_config(config: EnvConfig) -> RepositoryResult<Self> {
        let store = HostStore::open(config.host_store_path()).await?;
        let executor = AnsibleExecutor::new(config.engine.clone());

        tracing::info!(
            api_key_len = config.api_key.len(),
            port = config.port,
            engine = %config.engine.program,
            playbooks = %config.engine.playbooks_dir.display(),
            inventories = %config.engine.inventory_dir.display(),
            timeout_secs = config.engine.timeout.as_secs(),
            "Loaded configuration"
        );

        Ok(Self::with_components(
            config,
            Arc::new(store),
            Arc::new(executor),
        ))
    }

    /// 使用指定的仓库与执行器装配
    pub fn with_components(
        config: EnvConfig,
        hosts: Arc<dyn HostRepository>,
        executor: Arc<dyn ExecutionAdapter>,
    ) -> Self {
        let inventory: Arc<dyn InventoryWriter> =
            Arc::new(YamlInventory::new(config.engine.inventory_dir.clone()));
        let playbooks = Arc::new(PlaybookLibrary::new(config.engine.playbooks_dir.clone()));
        let jobs = Arc::new(JobStore::new());
        let events = Arc::new(EventHub::new());

        // 看门狗比引擎自身的超时多留一段宽限
        let watchdog = config.engine.timeout + Duration::from_secs(WATCHDOG_GRACE_SECS);

        let dispatcher = Dispatcher::new(
            hosts.clone(),
            inventory.clone(),
            playbooks.clone(),
            executor,
            events.clone(),
            jobs.clone(),
            watchdog,
        );

        Self {
            api_key: config.api_key.clone(),
            config,
            started_at: Utc::now(),
            hosts,
            inventory,
            playbooks,
            jobs,
            events,
            dispatcher,
            shutdown: CancellationToken::new(),
        }
    }

    /// 重新计算统计，失败只记录日志
    pub async fn refresh_stats(&self) {
        if let Err(e) = StatsAggregator::refresh(self.hosts.as_ref()).await {
            tracing::warn!(error = %e, "Failed to refresh stats");
        }
    }

    /// 触发关闭
    pub fn trigger_shutdown(&self) {
        self.shutdown.cancel();
    }

    /// 运行时长（秒）
    pub fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }
}
