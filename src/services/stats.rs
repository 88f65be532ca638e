//! 统计聚合

use tracing::debug;

use crate::domain::host::{Host, HostStatus};
use crate::domain::stats::StatsSnapshot;
use crate::state::host_store::{HostRepository, RepositoryResult};

pub struct StatsAggregator;

impl StatsAggregator {
    /// 由主机列表计算快照
    pub fn compute(hosts: &[Host]) -> StatsSnapshot {
        let secured = hosts
            .iter()
            .filter(|h| h.status == HostStatus::Secured)
            .count();
        StatsSnapshot::from_counts(hosts.len(), secured)
    }

    /// 重新计算并记录快照
    pub async fn refresh(repository: &dyn HostRepository) -> RepositoryResult<StatsSnapshot> {
        let hosts = repository.list_all().await?;
        let snapshot = Self::compute(&hosts);
        repository.record_stats(snapshot.clone()).await?;

        debug!(
            hosts = snapshot.host_count,
            secured = snapshot.secured_count,
            vulnerabilities = snapshot.vulnerabilities_count,
            "Recorded stats snapshot"
        );
        Ok(snapshot)
    }
}
