//! 服务层模块
//!
//! 包含核心业务逻辑

pub mod dispatcher;
pub mod events;
pub mod executor;
pub mod stats;

pub use dispatcher::{DeployError, Dispatcher};
pub use executor::{AnsibleExecutor, ExecutionAdapter};
pub use stats::StatsAggregator;
