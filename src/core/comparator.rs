use crate::core::records::{LocalEntry, RemoteEntry};
use crate::db::JournalRecord;

/// 本地内容校验和的类型前缀
pub const LOCAL_CHECKSUM_TYPE: &str = "BLAKE3";

/// 远程条目相对基线的变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileRelation {
    /// etag 未变
    Equal,
    /// etag 变了但校验和一致，只需更新元数据
    MetadataOnly,
    /// 内容变化
    Changed,
}

/// 比较配置
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// 时间容差（秒）
    pub time_tolerance_seconds: i64,
    /// 大小相同而时间变化时，是否计算本地校验和确认
    pub use_checksum: bool,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            time_tolerance_seconds: 0,
            use_checksum: true,
        }
    }
}

/// 文件比较器：判断一端相对日志基线是否变化
#[derive(Debug, Clone, Default)]
pub struct FileComparator {
    config: CompareConfig,
}

impl FileComparator {
    pub fn new(use_checksum: bool) -> Self {
        Self {
            config: CompareConfig {
                use_checksum,
                ..Default::default()
            },
        }
    }

    pub fn with_config(config: CompareConfig) -> Self {
        Self { config }
    }

    fn same_time(&self, a: i64, b: i64) -> bool {
        a.abs_diff(b) <= self.config.time_tolerance_seconds.unsigned_abs()
    }

    /// 本地条目相对基线是否变化
    ///
    /// `probe` 只在大小相同、时间不同且基线带有本地校验和时调用。
    pub fn local_changed<F>(&self, local: &LocalEntry, base: &JournalRecord, probe: F) -> bool
    where
        F: FnOnce() -> Option<String>,
    {
        if local.is_directory != base.is_directory() {
            return true;
        }
        // 目录本身没有内容，占位文件只看远程
        if local.is_directory || local.is_virtual {
            return false;
        }
        if local.size != base.size {
            tracing::debug!(
                "本地文件大小变化: {} (base={}, local={})",
                base.path,
                base.size,
                local.size
            );
            return true;
        }
        if self.same_time(local.modtime, base.modtime) {
            return false;
        }

        if self.config.use_checksum {
            if let Some(expected) = base
                .checksum
                .as_deref()
                .filter(|c| c.starts_with(LOCAL_CHECKSUM_TYPE))
            {
                if let Some(actual) = probe() {
                    if actual == expected {
                        tracing::debug!("本地文件时间变化但内容一致: {}", base.path);
                        return false;
                    }
                }
            }
        }

        tracing::debug!(
            "本地文件时间变化: {} (base={}, local={})",
            base.path,
            base.modtime,
            local.modtime
        );
        true
    }

    /// 远程条目相对基线的变化
    pub fn remote_changed(&self, remote: &RemoteEntry, base: &JournalRecord) -> FileRelation {
        if remote.is_directory != base.is_directory() {
            return FileRelation::Changed;
        }
        if remote.etag == base.etag {
            return FileRelation::Equal;
        }
        if !remote.is_directory
            && !remote.checksum_header.is_empty()
            && base.checksum.as_deref() == Some(remote.checksum_header.as_str())
        {
            return FileRelation::MetadataOnly;
        }
        FileRelation::Changed
    }

    /// 两端都是文件且没有基线时，判断内容是否一致
    pub fn same_content(&self, local: &LocalEntry, remote: &RemoteEntry) -> bool {
        local.size == remote.size && self.same_time(local.modtime, remote.modtime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::records::{ItemType, RemotePermissions};
    use std::cell::Cell;

    fn base(size: u64, modtime: i64, checksum: Option<&str>) -> JournalRecord {
        JournalRecord {
            path: "a.txt".into(),
            item_type: ItemType::File,
            etag: "E1".into(),
            file_id: "id1".into(),
            inode: 1,
            modtime,
            size,
            checksum: checksum.map(String::from),
            remote_perm: RemotePermissions::default(),
            pin_state: None,
        }
    }

    fn local(size: u64, modtime: i64) -> LocalEntry {
        LocalEntry {
            name: "a.txt".into(),
            size,
            modtime,
            inode: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_local_unchanged_does_not_probe() {
        let cmp = FileComparator::default();
        let probed = Cell::new(false);
        let changed = cmp.local_changed(&local(3, 100), &base(3, 100, Some("BLAKE3:x")), || {
            probed.set(true);
            None
        });
        assert!(!changed);
        assert!(!probed.get());
    }

    #[test]
    fn test_touched_file_with_same_checksum_is_unchanged() {
        let cmp = FileComparator::default();
        let changed = cmp.local_changed(&local(3, 200), &base(3, 100, Some("BLAKE3:x")), || {
            Some("BLAKE3:x".to_string())
        });
        assert!(!changed);
        let changed = cmp.local_changed(&local(3, 200), &base(3, 100, Some("BLAKE3:x")), || {
            Some("BLAKE3:y".to_string())
        });
        assert!(changed);
    }

    #[test]
    fn test_foreign_checksum_type_is_not_probed() {
        let cmp = FileComparator::default();
        let changed = cmp.local_changed(&local(3, 200), &base(3, 100, Some("SHA1:x")), || {
            panic!("不应计算校验和")
        });
        assert!(changed);
    }

    #[test]
    fn test_time_tolerance() {
        let cmp = FileComparator::with_config(CompareConfig {
            time_tolerance_seconds: 2,
            use_checksum: false,
        });
        assert!(!cmp.local_changed(&local(3, 102), &base(3, 100, None), || None));
        assert!(cmp.local_changed(&local(3, 103), &base(3, 100, None), || None));
    }

    #[test]
    fn test_extreme_mtimes_do_not_overflow() {
        let cmp = FileComparator::with_config(CompareConfig {
            time_tolerance_seconds: 2,
            use_checksum: false,
        });
        assert!(cmp.local_changed(&local(3, i64::MAX), &base(3, i64::MIN, None), || None));
        assert!(!cmp.local_changed(&local(3, i64::MIN), &base(3, i64::MIN + 1, None), || None));
    }

    #[test]
    fn test_remote_relation() {
        let cmp = FileComparator::default();
        let mut remote = RemoteEntry {
            name: "a.txt".into(),
            etag: "E1".into(),
            ..Default::default()
        };
        assert_eq!(cmp.remote_changed(&remote, &base(3, 100, None)), FileRelation::Equal);
        remote.etag = "E2".into();
        assert_eq!(cmp.remote_changed(&remote, &base(3, 100, None)), FileRelation::Changed);
        remote.checksum_header = "SHA1:abc".into();
        assert_eq!(
            cmp.remote_changed(&remote, &base(3, 100, Some("SHA1:abc"))),
            FileRelation::MetadataOnly
        );
    }
}
