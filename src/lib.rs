//! linsec-deploy - 主机安全加固部署服务
//!
//! 管理主机清单，按环境/分组调度 playbook 执行，并实时推送主机状态与统计

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod middleware;
pub mod services;
pub mod state;

use anyhow::Context;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use config::env::constants::{MAINTENANCE_INTERVAL_SECS, VERSION};
use config::EnvConfig;
use services::events::{spawn_maintenance, spawn_snapshot_ticker};
use state::AppState;

/// 命令行覆盖项
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    /// 覆盖 PORT 环境变量
    pub port_override: Option<u16>,
}

/// 加载配置、启动后台任务并运行 HTTP 服务，直到收到 ctrl-c
pub async fn init_and_run_with_config(runtime: RuntimeConfig) -> anyhow::Result<()> {
    let mut config = EnvConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    let port = config.port;
    let events_config = config.events.clone();

    let state = Arc::new(
        AppState::from_config(config)
            .await
            .context("Failed to open host store")?,
    );
    state.refresh_stats().await;

    let ticker = spawn_snapshot_ticker(
        state.hosts.clone(),
        state.events.clone(),
        events_config,
        state.shutdown.clone(),
    );
    let maintenance = spawn_maintenance(
        state.jobs.clone(),
        Duration::from_secs(MAINTENANCE_INTERVAL_SECS),
        state.shutdown.clone(),
    );

    let signal_state = state.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
        }
        signal_state.trigger_shutdown();
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(%addr, version = VERSION, "linsec-deploy listening");

    let shutdown = state.shutdown.clone();
    axum::serve(listener, api::router(state.clone()))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("HTTP server error")?;

    let _ = tokio::join!(ticker, maintenance);

    let running = state.jobs.active_count().await;
    if running > 0 {
        tracing::warn!(
            running,
            "Exiting with deployments in flight, their hosts will be marked error on next start"
        );
    }

    info!("linsec-deploy stopped");
    Ok(())
}
