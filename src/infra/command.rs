//! 命令执行器
//!
//! 以子进程运行外部程序：
//! - stdout/stderr 合并写入日志文件
//! - 超时后强制终止
//! - future 被丢弃时子进程随之终止

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{error, warn};

/// 命令执行错误
#[derive(Debug, Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("Failed to spawn command: {0}")]
    SpawnFailed(#[source] std::io::Error),
    /// 等待命令完成失败
    #[error("Failed to wait for command: {0}")]
    WaitFailed(#[source] std::io::Error),
    /// 日志文件不可用
    #[error("Failed to attach log file: {0}")]
    LogUnavailable(#[source] std::io::Error),
}

/// 命令执行结果
#[derive(Debug, Clone)]
pub struct CommandResult {
    /// 退出码（被信号终止时为 None）
    pub exit_code: Option<i32>,
    /// 是否以 0 退出
    pub success: bool,
    /// 是否因超时而终止
    pub timed_out: bool,
}

/// 命令执行器
pub struct CommandRunner;

impl CommandRunner {
    /// 执行命令，输出写入日志文件
    ///
    /// # Arguments
    /// * `program` - 要执行的程序
    /// * `args` - 命令行参数
    /// * `work_dir` - 工作目录
    /// * `log` - 接收 stdout 与 stderr 的文件
    /// * `timeout` - 超时时间
    pub async fn run_to_log(
        program: &str,
        args: &[String],
        work_dir: &Path,
        log: std::fs::File,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        let stderr_log = log.try_clone().map_err(CommandError::LogUnavailable)?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(stderr_log))
            .kill_on_drop(true)
            .spawn()
            .map_err(CommandError::SpawnFailed)?;

        // 等待命令完成，支持超时
        match tokio::time::timeout(timeout, child.wait()).await {
            Ok(status) => {
                let status = status.map_err(CommandError::WaitFailed)?;
                Ok(CommandResult {
                    exit_code: status.code(),
                    success: status.success(),
                    timed_out: false,
                })
            }
            Err(_) => {
                error!(program, "Command timed out after {:?}", timeout);
                if let Err(e) = child.kill().await {
                    warn!(program, error = %e, "Failed to kill timed out command");
                }
                // 等待进程实际终止
                let status = child.wait().await.map_err(CommandError::WaitFailed)?;
                Ok(CommandResult {
                    exit_code: status.code(),
                    success: false,
                    timed_out: true,
                })
            }
        }
    }
}
