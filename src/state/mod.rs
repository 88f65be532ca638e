//! 运行时状态模块
//!
//! 管理应用状态、主机仓库、任务存储和事件中心

pub mod app_state;
pub mod event_hub;
pub mod host_store;
pub mod job_store;

pub use app_state::AppState;
pub use event_hub::EventHub;
pub use host_store::{HostRepository, HostStore};
pub use job_store::JobStore;
