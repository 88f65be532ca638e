//! Ansible inventory 维护
//!
//! 每个环境一个 `<inventory_dir>/<environment>/hosts.yml`：
//!
//! ```yaml
//! all:
//!   children:
//!     web:
//!       hosts:
//!         web-01:
//!           ansible_host: 10.0.0.1
//!           linsec_security_level: high
//! ```
//!
//! 未知字段（组变量等手工配置）在重写时保留

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::domain::host::Host;

/// 没有分组的主机放入 Ansible 内置的 ungrouped 组
const UNGROUPED: &str = "ungrouped";

const INVENTORY_FILE: &str = "hosts.yml";

/// Inventory 错误
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("Inventory I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed inventory {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Inventory 写入接口
#[async_trait]
pub trait InventoryWriter: Send + Sync {
    /// 环境对应的 inventory 文件
    fn inventory_path(&self, environment: &str) -> PathBuf;

    /// 在主机所属的每个分组下写入（或更新）主机条目
    async fn upsert_host(&self, host: &Host) -> Result<(), InventoryError>;

    /// 从所有分组中删除主机条目
    async fn remove_host(&self, host: &Host) -> Result<(), InventoryError>;
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Inventory {
    #[serde(default)]
    all: InventoryRoot,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InventoryRoot {
    #[serde(default)]
    children: BTreeMap<String, InventoryGroup>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct InventoryGroup {
    #[serde(default)]
    hosts: BTreeMap<String, HostVars>,
    #[serde(flatten)]
    extra: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct HostVars {
    ansible_host: String,
    linsec_security_level: String,
}

impl Inventory {
    fn remove(&mut self, name: &str) -> bool {
        let mut removed = false;
        for group in self.all.children.values_mut() {
            removed |= group.hosts.remove(name).is_some();
        }
        removed
    }

    fn upsert(&mut self, host: &Host) {
        self.remove(&host.name);

        let vars = HostVars {
            ansible_host: host.ip.clone(),
            linsec_security_level: host.security_level.clone(),
        };

        let groups: Vec<&str> = if host.groups.is_empty() {
            vec![UNGROUPED]
        } else {
            host.groups.iter().map(String::as_str).collect()
        };

        for group in groups {
            self.all
                .children
                .entry(group.to_string())
                .or_default()
                .hosts
                .insert(host.name.clone(), vars.clone());
        }
    }
}

/// YAML inventory 文件
pub struct YamlInventory {
    root: PathBuf,
    /// 串行化对同一组文件的读改写
    lock: Mutex<()>,
}

impl YamlInventory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock: Mutex::new(()),
        }
    }

    async fn load(path: &Path) -> Result<Inventory, InventoryError> {
        if !fs::try_exists(path).await.unwrap_or(false) {
            return Ok(Inventory::default());
        }

        let content = fs::read_to_string(path).await.map_err(|source| InventoryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        if content.trim().is_empty() {
            return Ok(Inventory::default());
        }

        serde_yaml::from_str(&content).map_err(|source| InventoryError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    async fn save(path: &Path, inventory: &Inventory) -> Result<(), InventoryError> {
        let io_err = |source| InventoryError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let content = serde_yaml::to_string(inventory).map_err(|source| InventoryError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;

        let temp_path = path.with_extension("yml.tmp");
        fs::write(&temp_path, content).await.map_err(io_err)?;
        fs::rename(&temp_path, path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl InventoryWriter for YamlInventory {
    fn inventory_path(&self, environment: &str) -> PathBuf {
        self.root.join(environment).join(INVENTORY_FILE)
    }

    async fn upsert_host(&self, host: &Host) -> Result<(), InventoryError> {
        let _guard = self.lock.lock().await;
        let path = self.inventory_path(&host.environment);

        let mut inventory = Self::load(&path).await?;
        inventory.upsert(host);
        Self::save(&path, &inventory).await?;

        info!(
            host = %host.name,
            environment = %host.environment,
            path = %path.display(),
            "Saved host to inventory"
        );
        Ok(())
    }

    async fn remove_host(&self, host: &Host) -> Result<(), InventoryError> {
        let _guard = self.lock.lock().await;
        let path = self.inventory_path(&host.environment);

        if !fs::try_exists(&path).await.unwrap_or(false) {
            debug!(path = %path.display(), "Inventory missing, nothing to remove");
            return Ok(());
        }

        let mut inventory = Self::load(&path).await?;
        if inventory.remove(&host.name) {
            Self::save(&path, &inventory).await?;
            info!(
                host = %host.name,
                environment = %host.environment,
                "Removed host from inventory"
            );
        }
        Ok(())
    }
}
