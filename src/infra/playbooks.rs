//! Playbook 文件管理
//!
//! Playbook 内容不做解析，只管理 playbooks 目录下的 `.yml` / `.yaml` 文件

use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

/// Playbook 错误
#[derive(Debug, Error)]
pub enum PlaybookError {
    #[error("Invalid playbook name '{0}': expected a file name ending in .yml or .yaml")]
    InvalidName(String),

    #[error("Playbook '{0}' not found")]
    NotFound(String),

    #[error("Playbook '{0}' already exists")]
    AlreadyExists(String),

    #[error("Playbook I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Playbook 目录
pub struct PlaybookLibrary {
    dir: PathBuf,
}

impl PlaybookLibrary {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// 校验 playbook 名：单一文件名，以 .yml / .yaml 结尾
    pub fn validate_name(name: &str) -> Result<(), PlaybookError> {
        let plain = !name.is_empty()
            && !name.starts_with('.')
            && !name.contains('/')
            && !name.contains('\\');
        let yaml = name.ends_with(".yml") || name.ends_with(".yaml");
        if plain && yaml {
            Ok(())
        } else {
            Err(PlaybookError::InvalidName(name.to_string()))
        }
    }

    /// 解析 playbook 路径，文件必须存在
    pub async fn resolve(&self, name: &str) -> Result<PathBuf, PlaybookError> {
        Self::validate_name(name)?;
        let path = self.dir.join(name);
        match fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(PlaybookError::NotFound(name.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PlaybookError::NotFound(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// 列出全部 playbook（按名称排序）
    pub async fn list(&self) -> Result<Vec<String>, PlaybookError> {
        fs::create_dir_all(&self.dir).await?;

        let mut entries = fs::read_dir(&self.dir).await?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if Self::validate_name(&name).is_ok() {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// 创建 playbook，已存在时报错
    pub async fn create(&self, name: &str, content: &str) -> Result<(), PlaybookError> {
        Self::validate_name(name)?;
        fs::create_dir_all(&self.dir).await?;

        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(self.dir.join(name))
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => PlaybookError::AlreadyExists(name.to_string()),
                _ => PlaybookError::Io(e),
            })?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// 覆盖已有 playbook 的内容
    pub async fn update(&self, name: &str, content: &str) -> Result<(), PlaybookError> {
        let path = self.resolve(name).await?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// 删除 playbook
    pub async fn delete(&self, name: &str) -> Result<(), PlaybookError> {
        let path = self.resolve(name).await?;
        fs::remove_file(path).await?;
        Ok(())
    }
}
