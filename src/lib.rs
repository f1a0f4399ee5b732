//! 同步客户端的发现阶段
//!
//! 并行遍历本地目录与远程服务器，结合同步日志判断每个条目需要的操作，
//! 检测两端的重命名，应用选择性同步与排除规则，并以事件流输出结果。

pub mod config;
pub mod core;
pub mod db;
pub mod error;
pub mod logging;
pub mod storage;

pub use crate::config::DiscoveryConfig;
pub use crate::core::{
    AbortHandle, DiscoveredItem, DiscoveryContext, DiscoveryEvent, DiscoveryPhase,
    DiscoverySummary,
};
pub use crate::error::{DiscoveryError, Result};
