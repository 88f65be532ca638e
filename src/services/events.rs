//! 后台推送与维护任务
//!
//! - 快照推送：有订阅者时每个活跃间隔发布一次 `stats` 与 `hosts` 事件，
//!   否则按空闲间隔轮询
//! - 维护任务：定期清理过期的任务历史
//!
//! 两者都在 shutdown token 取消后退出

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EventConfig;
use crate::domain::event::Event;
use crate::state::event_hub::EventHub;
use crate::state::host_store::{HostRepository, RepositoryResult};
use crate::state::job_store::JobStore;

/// 当前快照事件（统计 + 主机列表）
pub async fn snapshot_events(hosts: &dyn HostRepository) -> RepositoryResult<[Event; 2]> {
    let stats = hosts.latest_stats().await?;
    let all = hosts.list_all().await?;
    Ok([Event::Stats(stats), Event::Hosts(all)])
}

/// 启动快照推送任务
pub fn spawn_snapshot_ticker(
    hosts: Arc<dyn HostRepository>,
    events: Arc<EventHub>,
    config: EventConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            active_ms = config.active_interval.as_millis() as u64,
            idle_ms = config.idle_interval.as_millis() as u64,
            "Snapshot ticker started"
        );

        loop {
            let wait = if events.has_subscribers() {
                match snapshot_events(hosts.as_ref()).await {
                    Ok(snapshot) => {
                        for event in snapshot {
                            events.publish(event);
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to read snapshot"),
                }
                config.active_interval
            } else {
                config.idle_interval
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Snapshot ticker stopped");
    })
}

/// 启动维护任务
pub fn spawn_maintenance(
    jobs: Arc<JobStore>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = jobs.cleanup_stale().await;
                    if removed > 0 {
                        info!(removed, "Cleaned up stale jobs");
                    } else {
                        debug!("No stale jobs to clean up");
                    }
                }
            }
        }
    })
}
