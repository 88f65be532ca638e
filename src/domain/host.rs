//! 主机相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::net::Ipv4Addr;

/// 主机 ID（由仓库分配）
pub type HostId = u64;

/// 主机安全状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    Pending,
    Deploying,
    Secured,
    Error,
}

impl HostStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Pending => "pending",
            HostStatus::Deploying => "deploying",
            HostStatus::Secured => "secured",
            HostStatus::Error => "error",
        }
    }

    /// 从字符串解析
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(HostStatus::Pending),
            "deploying" => Some(HostStatus::Deploying),
            "secured" => Some(HostStatus::Secured),
            "error" => Some(HostStatus::Error),
            _ => None,
        }
    }

    /// 是否为部署终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, HostStatus::Secured | HostStatus::Error)
    }
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 受管主机
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Host {
    pub id: HostId,
    pub name: String,
    pub ip: String,
    pub environment: String,
    pub security_level: String,
    /// 所属分组
    pub groups: BTreeSet<String>,
    pub status: HostStatus,
    pub added_at: DateTime<Utc>,
}

impl Host {
    /// 是否属于指定分组（精确匹配，区分大小写）
    pub fn in_group(&self, group: &str) -> bool {
        self.groups.contains(group)
    }
}

/// 注册主机请求
#[derive(Clone, Debug, Deserialize)]
pub struct NewHost {
    pub name: String,
    pub ip: String,
    pub environment: String,
    #[serde(default = "default_security_level")]
    pub security_level: String,
    #[serde(default)]
    pub groups: Vec<String>,
}

fn default_security_level() -> String {
    "standard".to_string()
}

impl NewHost {
    /// 校验主机名、环境与 IP，失败时返回错误描述
    pub fn validate(&self) -> Result<(), String> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err("Host name must not be empty".to_string());
        }
        if name.chars().any(char::is_whitespace) {
            return Err(format!("Host name '{}' must not contain whitespace", name));
        }
        if !is_valid_environment(self.environment.trim()) {
            return Err(format!("Invalid environment name: '{}'", self.environment));
        }
        if !is_valid_ipv4(&self.ip) {
            return Err(format!("Invalid IP address: {}", self.ip));
        }
        Ok(())
    }

    /// 规范化分组列表：去掉空白项并去重
    pub fn normalized_groups(&self) -> BTreeSet<String> {
        self.groups
            .iter()
            .map(|g| g.trim())
            .filter(|g| !g.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// 转换为主机记录
    pub fn into_host(self, id: HostId) -> Host {
        let groups = self.normalized_groups();
        Host {
            id,
            name: self.name.trim().to_string(),
            ip: self.ip.trim().to_string(),
            environment: self.environment.trim().to_string(),
            security_level: self.security_level,
            groups,
            status: HostStatus::Pending,
            added_at: Utc::now(),
        }
    }
}

/// 点分十进制 IPv4 校验
pub fn is_valid_ipv4(ip: &str) -> bool {
    ip.trim().parse::<Ipv4Addr>().is_ok()
}

/// 环境名会作为 inventory 目录名使用，只允许字母、数字、`-`、`_`、`.`
pub fn is_valid_environment(environment: &str) -> bool {
    !environment.is_empty()
        && environment != "."
        && environment != ".."
        && environment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}
