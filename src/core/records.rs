//! 发现阶段使用的数据记录：远程条目、本地条目、发现结果与事件

use crate::core::pinstate::PinState;
use serde::{Deserialize, Serialize};
use std::fmt;

/// 远程权限标记
///
/// 由服务器返回的权限字符串解析而来，例如 `"RDNVCKM"`。空字符串表示服务器没有提供权限信息。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct RemotePermissions {
    bits: u16,
    known: bool,
}

/// 单个远程权限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    CanWrite,
    CanDelete,
    CanRename,
    CanMove,
    CanAddFile,
    CanAddSubDirectories,
    CanReshare,
    IsShared,
    /// 外部存储的挂载根目录
    IsMounted,
    /// 外部存储内部的条目
    IsMountedSub,
}

impl Permission {
    const ALL: [Permission; 10] = [
        Permission::CanWrite,
        Permission::CanDelete,
        Permission::CanRename,
        Permission::CanMove,
        Permission::CanAddFile,
        Permission::CanAddSubDirectories,
        Permission::CanReshare,
        Permission::IsShared,
        Permission::IsMounted,
        Permission::IsMountedSub,
    ];

    fn letter(self) -> char {
        match self {
            Permission::CanWrite => 'W',
            Permission::CanDelete => 'D',
            Permission::CanRename => 'N',
            Permission::CanMove => 'V',
            Permission::CanAddFile => 'C',
            Permission::CanAddSubDirectories => 'K',
            Permission::CanReshare => 'R',
            Permission::IsShared => 'S',
            Permission::IsMounted => 'M',
            Permission::IsMountedSub => 'm',
        }
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl RemotePermissions {
    /// 解析服务器权限字符串，未知字母忽略
    pub fn parse(value: &str) -> Self {
        let mut perms = Self {
            bits: 0,
            known: !value.is_empty(),
        };
        for c in value.chars() {
            if let Some(p) = Permission::ALL.iter().find(|p| p.letter() == c) {
                perms.bits |= p.bit();
            }
        }
        perms
    }

    pub fn is_null(&self) -> bool {
        !self.known
    }

    pub fn has_permission(&self, p: Permission) -> bool {
        self.bits & p.bit() != 0
    }

    pub fn set_permission(&mut self, p: Permission) {
        self.known = true;
        self.bits |= p.bit();
    }

    pub fn unset_permission(&mut self, p: Permission) {
        self.bits &= !p.bit();
    }
}

impl fmt::Display for RemotePermissions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for p in Permission::ALL {
            if self.has_permission(p) {
                write!(f, "{}", p.letter())?;
            }
        }
        Ok(())
    }
}

impl From<String> for RemotePermissions {
    fn from(s: String) -> Self {
        Self::parse(&s)
    }
}

impl From<RemotePermissions> for String {
    fn from(p: RemotePermissions) -> Self {
        p.to_string()
    }
}

/// 直接下载提示
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectDownload {
    pub url: String,
    pub cookies: Option<String>,
}

/// 服务器上的一个条目（名称不含路径）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub name: String,
    pub etag: String,
    pub file_id: String,
    pub checksum_header: String,
    pub remote_perm: RemotePermissions,
    pub modtime: i64,
    pub size: u64,
    pub is_directory: bool,
    pub direct_download: Option<DirectDownload>,
}

impl RemoteEntry {
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }
}

/// 本地文件系统上的一个条目（名称不含路径）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalEntry {
    pub name: String,
    pub modtime: i64,
    pub size: u64,
    pub inode: u64,
    pub is_directory: bool,
    pub is_hidden: bool,
    /// 占位文件（虚拟文件）
    pub is_virtual: bool,
    pub is_symlink: bool,
}

impl LocalEntry {
    pub fn is_valid(&self) -> bool {
        !self.name.is_empty()
    }
}

/// 对条目要执行的操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instruction {
    /// 两边一致，无需操作
    None,
    New,
    Remove,
    Rename,
    /// 内容变化，需要传输
    Sync,
    Conflict,
    /// 被排除规则忽略
    Ignore,
    /// 内容一致，只需要更新日志中的元数据
    UpdateMetadata,
    /// 文件与目录互换
    TypeChange,
    Error,
}

/// 操作方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    #[default]
    None,
    /// 本地 -> 服务器
    Up,
    /// 服务器 -> 本地
    Down,
}

impl Direction {
    pub fn reversed(self) -> Self {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::None => Direction::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemType {
    #[default]
    File,
    Directory,
    /// 占位文件，不下载内容
    VirtualFile,
    /// 需要把占位文件填充为真实文件
    VirtualFileDownload,
    SoftLink,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::File => "file",
            ItemType::Directory => "directory",
            ItemType::VirtualFile => "virtual_file",
            ItemType::VirtualFileDownload => "virtual_file_download",
            ItemType::SoftLink => "soft_link",
        }
    }
}

impl From<&str> for ItemType {
    fn from(s: &str) -> Self {
        match s {
            "directory" => ItemType::Directory,
            "virtual_file" => ItemType::VirtualFile,
            "virtual_file_download" => ItemType::VirtualFileDownload,
            "soft_link" => ItemType::SoftLink,
            _ => ItemType::File,
        }
    }
}

/// 面向下游的粗粒度分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    New,
    Removed,
    Renamed,
    Modified,
    Conflict,
    Unchanged,
    Excluded,
    Error,
}

/// 发现阶段的输出单元
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveredItem {
    /// 条目在同步完成后所在的路径（相对同步根目录）
    pub file: String,
    /// 日志（基线）中的路径，重命名时与 `file` 不同
    pub original_file: String,
    pub instruction: Instruction,
    pub direction: Direction,
    pub item_type: ItemType,
    pub etag: String,
    /// 重命名检测时被取消的删除条目的旧 etag
    pub previous_etag: Option<String>,
    pub file_id: String,
    pub size: u64,
    pub modtime: i64,
    pub inode: u64,
    pub checksum_header: String,
    pub remote_perm: RemotePermissions,
    pub is_external_storage: bool,
    pub pin_state: PinState,
    pub error: Option<String>,
    pub remote: Option<RemoteEntry>,
    pub local: Option<LocalEntry>,
}

impl DiscoveredItem {
    pub fn new(file: impl Into<String>, original_file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            original_file: original_file.into(),
            instruction: Instruction::None,
            direction: Direction::None,
            item_type: ItemType::File,
            etag: String::new(),
            previous_etag: None,
            file_id: String::new(),
            size: 0,
            modtime: 0,
            inode: 0,
            checksum_header: String::new(),
            remote_perm: RemotePermissions::default(),
            is_external_storage: false,
            pin_state: PinState::Inherited,
            error: None,
            remote: None,
            local: None,
        }
    }

    pub fn is_directory(&self) -> bool {
        self.item_type == ItemType::Directory
    }

    /// 用远程条目填充元数据
    pub fn apply_remote(&mut self, remote: &RemoteEntry) {
        self.etag = remote.etag.clone();
        self.file_id = remote.file_id.clone();
        self.checksum_header = remote.checksum_header.clone();
        self.remote_perm = remote.remote_perm;
        self.size = remote.size;
        self.modtime = remote.modtime;
        if remote.is_directory {
            self.item_type = ItemType::Directory;
        }
        self.remote = Some(remote.clone());
    }

    /// 用本地条目填充元数据（远程元数据优先，本地只补充 inode 等）
    pub fn apply_local(&mut self, local: &LocalEntry) {
        self.inode = local.inode;
        if self.remote.is_none() {
            self.size = local.size;
            self.modtime = local.modtime;
            self.item_type = if local.is_directory {
                ItemType::Directory
            } else if local.is_symlink {
                ItemType::SoftLink
            } else if local.is_virtual {
                ItemType::VirtualFile
            } else {
                ItemType::File
            };
        }
        self.local = Some(local.clone());
    }

    pub fn classification(&self) -> Classification {
        match self.instruction {
            Instruction::None | Instruction::UpdateMetadata => Classification::Unchanged,
            Instruction::New => Classification::New,
            Instruction::Remove => Classification::Removed,
            Instruction::Rename => Classification::Renamed,
            Instruction::Sync | Instruction::TypeChange => Classification::Modified,
            Instruction::Conflict => Classification::Conflict,
            Instruction::Ignore => Classification::Excluded,
            Instruction::Error => Classification::Error,
        }
    }
}

/// 发现阶段向下游发送的事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DiscoveryEvent {
    ItemDiscovered(Box<DiscoveredItem>),
    /// 被静默排除、不会出现在 ItemDiscovered 中的路径
    SilentlyExcluded { path: String },
    /// 新发现的大目录（或外部存储），等待用户确认
    NewBigFolder { path: String, is_external: bool },
    FatalError { message: String },
    Finished,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permissions_roundtrip_keeps_letters() {
        let perms = RemotePermissions::parse("RDNVCKWM");
        assert!(perms.has_permission(Permission::IsMounted));
        assert!(perms.has_permission(Permission::CanWrite));
        assert!(!perms.has_permission(Permission::IsMountedSub));
        assert_eq!(RemotePermissions::parse(&perms.to_string()), perms);
    }

    #[test]
    fn test_empty_permissions_are_null() {
        assert!(RemotePermissions::parse("").is_null());
        assert!(!RemotePermissions::parse("D").is_null());
    }

    #[test]
    fn test_classification_mapping() {
        let mut item = DiscoveredItem::new("a", "a");
        assert_eq!(item.classification(), Classification::Unchanged);
        item.instruction = Instruction::TypeChange;
        assert_eq!(item.classification(), Classification::Modified);
        item.instruction = Instruction::Ignore;
        assert_eq!(item.classification(), Classification::Excluded);
    }
}
