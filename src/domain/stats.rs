//! 统计快照

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 统计快照
///
/// 写入后不再修改，最新一条为权威数据
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StatsSnapshot {
    pub host_count: usize,
    pub secured_count: usize,
    pub vulnerabilities_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl StatsSnapshot {
    /// 由主机计数构建快照
    pub fn from_counts(host_count: usize, secured_count: usize) -> Self {
        let unsecured = host_count.saturating_sub(secured_count);
        Self {
            host_count,
            secured_count,
            vulnerabilities_count: vulnerability_estimate(unsecured),
            timestamp: Utc::now(),
        }
    }

    /// 未加固主机数
    pub fn unsecured_count(&self) -> usize {
        self.host_count - self.secured_count
    }
}

/// 漏洞估算：每三台未加固主机计一个，至少为 1
pub fn vulnerability_estimate(unsecured: usize) -> usize {
    if unsecured == 0 {
        0
    } else {
        (unsecured / 3).max(1)
    }
}
