//! 领域模型模块
//!
//! 纯数据结构，不依赖 axum/tokio

pub mod deploy;
pub mod event;
pub mod host;
pub mod stats;

// Re-exports for convenience
pub use deploy::{DeployRequest, DeploymentJob, JobAccepted, JobOutcome, JobReport};
pub use event::{DeploymentEvent, DeploymentPhase, Event};
pub use host::{Host, HostId, HostStatus, NewHost};
pub use stats::StatsSnapshot;
