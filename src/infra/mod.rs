//! 基础设施模块
//!
//! 封装外部依赖（子进程、inventory 文件、playbook 目录）

pub mod command;
pub mod inventory;
pub mod playbooks;

pub use command::CommandRunner;
pub use inventory::{InventoryWriter, YamlInventory};
pub use playbooks::PlaybookLibrary;
