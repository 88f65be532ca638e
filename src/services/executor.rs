//! Playbook 执行
//!
//! 为单个部署任务运行配置管理引擎。适配器只报告执行结果，
//! 主机状态由调度器负责

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::infra::command::{CommandError, CommandRunner};

/// 导致执行拿不到退出码的错误
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Failed to prepare run files: {0}")]
    Prepare(#[from] std::io::Error),

    #[error("Failed to render extra vars: {0}")]
    Vars(#[from] serde_yaml::Error),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// 执行请求
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub job_id: String,
    pub environment: String,
    pub playbook: String,
    pub playbook_path: PathBuf,
    pub inventory_path: PathBuf,
    pub targets: Vec<String>,
}

/// 执行结果
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub log_path: PathBuf,
}

/// 调度器使用的执行后端
#[async_trait]
pub trait ExecutionAdapter: Send + Sync {
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError>;
}

#[derive(Serialize)]
struct EnvVars<'a> {
    linsec_env: &'a str,
}

#[derive(Serialize)]
struct TargetVars<'a> {
    target_hosts: &'a [String],
}

/// 单次执行的 extra-vars 临时文件，drop 时删除
struct ScratchFiles {
    env_file: PathBuf,
    hosts_file: PathBuf,
}

impl ScratchFiles {
    async fn create(dir: &Path, request: &ExecutionRequest) -> Result<Self, ExecutionError> {
        let files = Self {
            env_file: dir.join(format!("env-{}.yml", request.job_id)),
            hosts_file: dir.join(format!("hosts-{}.yml", request.job_id)),
        };

        let env_vars = serde_yaml::to_string(&EnvVars {
            linsec_env: &request.environment,
        })?;
        let target_vars = serde_yaml::to_string(&TargetVars {
            target_hosts: &request.targets,
        })?;

        // 守卫已持有两个路径，第二次写入失败时第一个文件也会被清理
        fs::write(&files.env_file, env_vars).await?;
        fs::write(&files.hosts_file, target_vars).await?;
        Ok(files)
    }
}

impl Drop for ScratchFiles {
    fn drop(&mut self) {
        for path in [&self.env_file, &self.hosts_file] {
            if let Err(e) = std::fs::remove_file(path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove scratch file");
                }
            }
        }
    }
}

/// 基于 `ansible-playbook` 的适配器
pub struct AnsibleExecutor {
    config: EngineConfig,
}

impl AnsibleExecutor {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    fn log_path(&self, request: &ExecutionRequest) -> PathBuf {
        let stem = Path::new(&request.playbook)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| request.playbook.clone());
        let short_id: String = request.job_id.chars().take(8).collect();

        self.config.log_dir.join(format!(
            "deploy-{}-{}-{}-{}.log",
            request.environment,
            stem,
            Utc::now().format("%Y%m%d-%H%M%S"),
            short_id
        ))
    }

    fn args(request: &ExecutionRequest, scratch: &ScratchFiles) -> Vec<String> {
        vec![
            "-i".to_string(),
            request.inventory_path.display().to_string(),
            request.playbook_path.display().to_string(),
            "--extra-vars".to_string(),
            format!("@{}", scratch.env_file.display()),
            "--extra-vars".to_string(),
            format!("@{}", scratch.hosts_file.display()),
        ]
    }
}

#[async_trait]
impl ExecutionAdapter for AnsibleExecutor {
    async fn run(&self, request: &ExecutionRequest) -> Result<ExecutionOutcome, ExecutionError> {
        fs::create_dir_all(&self.config.log_dir).await?;

        let scratch = ScratchFiles::create(&self.config.log_dir, request).await?;
        let args = Self::args(request, &scratch);
        let log_path = self.log_path(request);

        let header = format!(
            "=== Deployment {} ===\nStarted: {}\nEnvironment: {}\nTargets: {}\nCommand: {} {}\n\n",
            request.job_id,
            Utc::now().to_rfc3339(),
            request.environment,
            request.targets.join(", "),
            self.config.program,
            args.join(" ")
        );
        fs::write(&log_path, header).await?;

        let log = std::fs::OpenOptions::new().append(true).open(&log_path)?;

        info!(
            job_id = %request.job_id,
            playbook = %request.playbook,
            log = %log_path.display(),
            "Running playbook"
        );

        let result = CommandRunner::run_to_log(
            &self.config.program,
            &args,
            &self.config.work_dir,
            log,
            self.config.timeout,
        )
        .await?;

        let exit = match result.exit_code {
            Some(code) => code.to_string(),
            None => "none".to_string(),
        };
        let footer = if result.timed_out {
            format!(
                "\n=== Timed out after {}s at {} (exit code {}) ===\n",
                self.config.timeout.as_secs(),
                Utc::now().to_rfc3339(),
                exit
            )
        } else {
            format!("\n=== Finished at {} (exit code {}) ===\n", Utc::now().to_rfc3339(), exit)
        };

        let mut file = fs::OpenOptions::new().append(true).open(&log_path).await?;
        file.write_all(footer.as_bytes()).await?;
        file.flush().await?;

        debug!(job_id = %request.job_id, success = result.success, "Playbook run finished");

        Ok(ExecutionOutcome {
            success: result.success,
            exit_code: result.exit_code,
            timed_out: result.timed_out,
            log_path,
        })
    }
}
