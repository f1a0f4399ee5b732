//! 发现阶段错误类型

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// 远程目录列举失败
    #[error("列举远程目录 {path} 失败: {message}")]
    Listing { path: String, message: String },

    /// 本地目录读取失败
    #[error("读取本地目录 {path} 失败: {message}")]
    LocalListing { path: String, message: String },

    /// 服务器数据指纹与日志中记录的不一致（远程被整体重置）
    #[error("服务器数据指纹已变化: 记录为 {expected}, 服务器返回 {actual}")]
    FingerprintMismatch { expected: String, actual: String },

    #[error("无效的选择性同步路径: {0}")]
    InvalidSelectiveSyncPath(String),

    #[error("同步日志错误: {0}")]
    Journal(String),

    #[error("配置错误: {0}")]
    Config(String),

    #[error("发现阶段已取消")]
    Aborted,
}

impl From<sqlx::Error> for DiscoveryError {
    fn from(e: sqlx::Error) -> Self {
        DiscoveryError::Journal(e.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for DiscoveryError {
    fn from(e: sqlx::migrate::MigrateError) -> Self {
        DiscoveryError::Journal(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;
