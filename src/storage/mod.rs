pub mod local;
pub mod memory;
pub mod webdav;

use crate::core::records::{LocalEntry, RemoteEntry};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use uuid::Uuid;

pub use local::LocalFs;
pub use memory::{MemoryLocal, MemoryRemote};
pub use webdav::WebDavLister;

// ============ 公共常量 ============

/// 非 IO 操作超时（秒）- stat, list 等
pub const OP_TIMEOUT_SECS: u64 = 60;
/// IO 操作超时（秒）
pub const IO_TIMEOUT_SECS: u64 = 300;

/// 一次远程列举的原始结果
#[derive(Debug, Clone, Default)]
pub struct DirectoryListing {
    /// 第一项描述目录自身，其余为子条目
    pub entries: Vec<RemoteEntry>,
    /// 服务器数据指纹（仅部分服务器提供）
    pub data_fingerprint: Option<String>,
}

/// 远程目录列举接口
#[async_trait]
pub trait RemoteLister: Send + Sync {
    /// 列举单层目录，路径相对同步根目录，根目录为空字符串
    async fn list_directory(&self, path: &str) -> Result<DirectoryListing>;

    /// 获取存储名称（用于日志）
    fn name(&self) -> &str;
}

/// 账户：发现阶段访问远程的唯一入口
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub lister: Arc<dyn RemoteLister>,
}

impl Account {
    pub fn new(name: impl Into<String>, lister: Arc<dyn RemoteLister>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            lister,
        }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("lister", &self.lister.name())
            .finish()
    }
}

/// 本地文件系统接口（同步调用）
pub trait LocalFilesystem: Send + Sync {
    /// 列举单层目录；目录不存在时返回 `Ok(None)`
    fn list_directory(&self, path: &str) -> Result<Option<Vec<LocalEntry>>>;

    fn exists(&self, path: &str) -> bool;

    /// 文件内容校验和，格式为 `BLAKE3:<hex>`
    fn content_checksum(&self, path: &str) -> Result<String>;
}

/// 计算文件内容的 hash（使用 BLAKE3 快速哈希）
pub fn calculate_hash(data: &[u8]) -> String {
    let hash = blake3::hash(data);
    // 只取前 16 字节（32 个十六进制字符），足够检测变化
    hash.to_hex()[..32].to_string()
}

/// 快速计算文件 hash（基于采样，适用于大文件）
pub fn calculate_quick_hash(data: &[u8]) -> String {
    let len = data.len();
    if len <= 65536 {
        return calculate_hash(data);
    }

    // 大文件：采样哈希（头部 + 中部 + 尾部 + 大小）
    let mut hasher = blake3::Hasher::new();
    let chunk_size = 16384;

    hasher.update(&data[..chunk_size]);
    hasher.update(&data[len / 2 - chunk_size / 2..len / 2 + chunk_size / 2]);
    hasher.update(&data[len - chunk_size..]);
    hasher.update(&len.to_le_bytes());

    let hash = hasher.finalize();
    hash.to_hex()[..32].to_string()
}

/// 带类型前缀的校验和
pub fn checksum_header(data: &[u8]) -> String {
    format!(
        "{}:{}",
        crate::core::comparator::LOCAL_CHECKSUM_TYPE,
        calculate_quick_hash(data)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quick_hash_detects_change() {
        let small = calculate_quick_hash(b"hello");
        assert_eq!(small.len(), 32);
        assert_ne!(small, calculate_quick_hash(b"hellp"));

        let mut big = vec![7u8; 200_000];
        let before = calculate_quick_hash(&big);
        big[0] = 8;
        assert_ne!(before, calculate_quick_hash(&big));
        assert!(checksum_header(b"x").starts_with("BLAKE3:"));
    }
}
