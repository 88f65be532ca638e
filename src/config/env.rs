//! 环境变量配置加载

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use constants::{DEPLOY_TIMEOUT_SECS, EVENT_ACTIVE_INTERVAL_SECS, EVENT_IDLE_INTERVAL_SECS};

/// 环境配置
#[derive(Clone, Debug)]
pub struct EnvConfig {
    /// API 密钥
    pub api_key: String,
    /// 服务监听端口
    pub port: u16,
    /// 数据目录（主机仓库文件）
    pub data_dir: PathBuf,
    /// 执行引擎配置
    pub engine: EngineConfig,
    /// 事件推送配置
    pub events: EventConfig,
}

/// 执行引擎配置
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// 引擎可执行文件（默认 ansible-playbook）
    pub program: String,
    /// 引擎工作目录
    pub work_dir: PathBuf,
    /// Playbook 目录
    pub playbooks_dir: PathBuf,
    /// Inventory 根目录（每个环境一个子目录）
    pub inventory_dir: PathBuf,
    /// 运行日志与临时变量文件目录
    pub log_dir: PathBuf,
    /// 单次运行超时
    pub timeout: Duration,
}

/// 事件推送节奏
#[derive(Clone, Debug)]
pub struct EventConfig {
    /// 有订阅者时的快照间隔
    pub active_interval: Duration,
    /// 无订阅者时的轮询间隔
    pub idle_interval: Duration,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            active_interval: Duration::from_secs(EVENT_ACTIVE_INTERVAL_SECS),
            idle_interval: Duration::from_secs(EVENT_IDLE_INTERVAL_SECS),
        }
    }
}

impl EnvConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        // API Key - 支持旧名称兼容
        let api_key = load_with_fallback("LINSEC_API_KEY", "API_KEY")
            .unwrap_or_else(|| "change-me-in-production".to_string());
        if env::var("API_KEY").is_ok() {
            warn!("Deprecated environment variable API_KEY detected. Please use LINSEC_API_KEY");
        }

        let port = parse_var("PORT").unwrap_or(5000);

        let data_dir = env::var("LINSEC_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/opt/linsec/data"));

        Self {
            api_key,
            port,
            data_dir,
            engine: EngineConfig::from_env(),
            events: EventConfig::from_env(),
        }
    }

    /// 主机仓库文件路径
    pub fn host_store_path(&self) -> PathBuf {
        self.data_dir.join(constants::HOST_STORE_FILE)
    }
}

impl EngineConfig {
    /// 从环境变量加载引擎配置
    pub fn from_env() -> Self {
        let work_dir = env::var("LINSEC_ANSIBLE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/opt/linsec/taskengine"));

        let playbooks_dir = env::var("LINSEC_PLAYBOOKS_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| work_dir.join("playbooks"));

        let inventory_dir = env::var("LINSEC_INVENTORY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| work_dir.join("inventories"));

        let log_dir = env::var("LINSEC_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/opt/linsec/logs"));

        let program = env::var("LINSEC_ENGINE").unwrap_or_else(|_| "ansible-playbook".to_string());

        let timeout_secs = parse_var("LINSEC_DEPLOY_TIMEOUT_SECS").unwrap_or(DEPLOY_TIMEOUT_SECS);

        Self {
            program,
            work_dir,
            playbooks_dir,
            inventory_dir,
            log_dir,
            timeout: Duration::from_secs(timeout_secs),
        }
    }
}

impl EventConfig {
    pub fn from_env() -> Self {
        let active = parse_var("LINSEC_EVENT_INTERVAL_SECS").unwrap_or(EVENT_ACTIVE_INTERVAL_SECS);
        let idle = parse_var("LINSEC_EVENT_IDLE_SECS").unwrap_or(EVENT_IDLE_INTERVAL_SECS);

        Self {
            active_interval: Duration::from_secs(active.max(1)),
            idle_interval: Duration::from_secs(idle.max(1)),
        }
    }
}

/// 加载环境变量，支持 fallback
fn load_with_fallback(primary: &str, fallback: &str) -> Option<String> {
    env::var(primary).ok().or_else(|| env::var(fallback).ok())
}

/// 解析数值型环境变量，无法解析时返回 None
fn parse_var<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// 常量
pub mod constants {
    /// 部署超时（秒）
    pub const DEPLOY_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 看门狗在引擎超时之上额外等待的时间（秒）
    pub const WATCHDOG_GRACE_SECS: u64 = 30;

    /// 有订阅者时的快照推送间隔（秒）
    pub const EVENT_ACTIVE_INTERVAL_SECS: u64 = 1;

    /// 无订阅者时的轮询间隔（秒）
    pub const EVENT_IDLE_INTERVAL_SECS: u64 = 5;

    /// 事件广播通道容量（每个订阅者最多积压的事件数）
    pub const EVENT_CHANNEL_CAPACITY: usize = 256;

    /// 任务历史最大保存数量
    pub const MAX_JOB_HISTORY: usize = 100;

    /// 已完成任务保留时间（小时）
    pub const JOB_RETENTION_HOURS: i64 = 24;

    /// 统计快照最大保存数量
    pub const MAX_STATS_HISTORY: usize = 1000;

    /// 终态写入失败时的重试次数
    pub const STATUS_RETRY_ATTEMPTS: u32 = 5;

    /// 维护任务间隔（秒）
    pub const MAINTENANCE_INTERVAL_SECS: u64 = 3600;

    /// 主机仓库文件名
    pub const HOST_STORE_FILE: &str = "linsec.json";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
