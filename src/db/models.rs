use crate::core::paths;
use crate::core::pinstate::PinState;
use crate::core::records::{ItemType, LocalEntry, RemoteEntry, RemotePermissions};
use serde::{Deserialize, Serialize};

/// 日志记录：某个路径上一次同步完成时两端一致的状态
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalRecord {
    pub path: String,
    pub item_type: ItemType,
    pub etag: String,
    pub file_id: String,
    pub inode: u64,
    pub modtime: i64,
    pub size: u64,
    /// 内容校验和，格式为 `类型:值`
    pub checksum: Option<String>,
    pub remote_perm: RemotePermissions,
    pub pin_state: Option<PinState>,
}

impl JournalRecord {
    pub fn is_directory(&self) -> bool {
        self.item_type == ItemType::Directory
    }

    pub fn is_virtual_file(&self) -> bool {
        matches!(
            self.item_type,
            ItemType::VirtualFile | ItemType::VirtualFileDownload
        )
    }

    pub fn name(&self) -> &str {
        paths::file_name(&self.path)
    }

    pub fn parent(&self) -> &str {
        paths::parent(&self.path)
    }

    /// 由两端的条目合成一条记录（同步完成后由下游写入）
    pub fn from_entries(
        path: impl Into<String>,
        local: Option<&LocalEntry>,
        remote: Option<&RemoteEntry>,
    ) -> Self {
        let is_dir = remote
            .map(|r| r.is_directory)
            .or_else(|| local.map(|l| l.is_directory))
            .unwrap_or(false);
        let item_type = if is_dir {
            ItemType::Directory
        } else if local.is_some_and(|l| l.is_virtual) {
            ItemType::VirtualFile
        } else {
            ItemType::File
        };
        Self {
            path: path.into(),
            item_type,
            etag: remote.map(|r| r.etag.clone()).unwrap_or_default(),
            file_id: remote.map(|r| r.file_id.clone()).unwrap_or_default(),
            inode: local.map(|l| l.inode).unwrap_or(0),
            modtime: remote
                .map(|r| r.modtime)
                .or_else(|| local.map(|l| l.modtime))
                .unwrap_or(0),
            size: remote
                .map(|r| r.size)
                .or_else(|| local.map(|l| l.size))
                .unwrap_or(0),
            checksum: remote
                .map(|r| r.checksum_header.clone())
                .filter(|c| !c.is_empty()),
            remote_perm: remote.map(|r| r.remote_perm).unwrap_or_default(),
            pin_state: None,
        }
    }

    /// 日志中的远程视图，用于未变化目录的合成列举
    pub fn to_remote_entry(&self) -> RemoteEntry {
        RemoteEntry {
            name: self.name().to_string(),
            etag: self.etag.clone(),
            file_id: self.file_id.clone(),
            checksum_header: self.checksum.clone().unwrap_or_default(),
            remote_perm: self.remote_perm,
            modtime: self.modtime,
            size: self.size,
            is_directory: self.is_directory(),
            direct_download: None,
        }
    }

    /// 日志中的本地视图，用于不做本地发现的目录
    pub fn to_local_entry(&self) -> LocalEntry {
        LocalEntry {
            name: self.name().to_string(),
            modtime: self.modtime,
            size: self.size,
            inode: self.inode,
            is_directory: self.is_directory(),
            is_hidden: false,
            is_virtual: self.is_virtual_file(),
            is_symlink: false,
        }
    }
}

/// 数据库行
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct JournalRow {
    pub path: String,
    pub item_type: String,
    pub etag: String,
    pub file_id: String,
    pub inode: i64,
    pub modtime: i64,
    pub size: i64,
    pub checksum: Option<String>,
    pub remote_perm: String,
    pub pin_state: Option<String>,
}

impl From<JournalRow> for JournalRecord {
    fn from(row: JournalRow) -> Self {
        JournalRecord {
            path: row.path,
            item_type: ItemType::from(row.item_type.as_str()),
            etag: row.etag,
            file_id: row.file_id,
            inode: row.inode as u64,
            modtime: row.modtime,
            size: row.size.max(0) as u64,
            checksum: row.checksum,
            remote_perm: RemotePermissions::parse(&row.remote_perm),
            pin_state: row.pin_state.as_deref().map(PinState::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_from_entries_prefers_remote_metadata() {
        let local = LocalEntry {
            name: "a.txt".into(),
            modtime: 90,
            size: 3,
            inode: 42,
            ..Default::default()
        };
        let remote = RemoteEntry {
            name: "a.txt".into(),
            etag: "E1".into(),
            file_id: "id1".into(),
            modtime: 100,
            size: 4,
            ..Default::default()
        };
        let record = JournalRecord::from_entries("d/a.txt", Some(&local), Some(&remote));
        assert_eq!(record.inode, 42);
        assert_eq!(record.etag, "E1");
        assert_eq!(record.modtime, 100);
        assert_eq!(record.name(), "a.txt");
        assert_eq!(record.parent(), "d");
        assert_eq!(record.to_remote_entry().file_id, "id1");
    }
}
