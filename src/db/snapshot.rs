//! 日志的只读快照，发现阶段开始时加载一次

use super::models::JournalRecord;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct JournalSnapshot {
    records: HashMap<String, JournalRecord>,
    /// 父目录 -> 已排序的子路径
    children: HashMap<String, Vec<String>>,
    by_file_id: HashMap<String, String>,
    by_inode: HashMap<u64, String>,
    by_dir_etag: HashMap<String, String>,
    data_fingerprint: String,
}

impl JournalSnapshot {
    pub fn new(records: Vec<JournalRecord>, data_fingerprint: impl Into<String>) -> Self {
        let mut snapshot = Self {
            data_fingerprint: data_fingerprint.into(),
            ..Default::default()
        };
        for record in records {
            if record.path.is_empty() {
                continue;
            }
            if !record.file_id.is_empty() {
                snapshot
                    .by_file_id
                    .insert(record.file_id.clone(), record.path.clone());
            }
            if record.inode != 0 {
                snapshot.by_inode.insert(record.inode, record.path.clone());
            }
            if record.is_directory() && !record.etag.is_empty() {
                snapshot
                    .by_dir_etag
                    .insert(record.etag.clone(), record.path.clone());
            }
            snapshot
                .children
                .entry(record.parent().to_string())
                .or_default()
                .push(record.path.clone());
            snapshot.records.insert(record.path.clone(), record);
        }
        for list in snapshot.children.values_mut() {
            list.sort();
        }
        snapshot
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<&JournalRecord> {
        self.records.get(path)
    }

    /// 目录的直接子记录
    pub fn children_of<'a>(&'a self, dir: &str) -> impl Iterator<Item = &'a JournalRecord> + 'a {
        self.children
            .get(dir)
            .into_iter()
            .flatten()
            .filter_map(move |p| self.records.get(p))
    }

    pub fn find_by_file_id(&self, file_id: &str) -> Option<&JournalRecord> {
        self.by_file_id.get(file_id).and_then(|p| self.records.get(p))
    }

    pub fn find_by_inode(&self, inode: u64) -> Option<&JournalRecord> {
        self.by_inode.get(&inode).and_then(|p| self.records.get(p))
    }

    pub fn find_dir_by_etag(&self, etag: &str) -> Option<&JournalRecord> {
        self.by_dir_etag.get(etag).and_then(|p| self.records.get(p))
    }

    pub fn data_fingerprint(&self) -> &str {
        &self.data_fingerprint
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::records::{ItemType, RemotePermissions};

    fn record(path: &str, item_type: ItemType, etag: &str, file_id: &str, inode: u64) -> JournalRecord {
        JournalRecord {
            path: path.into(),
            item_type,
            etag: etag.into(),
            file_id: file_id.into(),
            inode,
            modtime: 0,
            size: 0,
            checksum: None,
            remote_perm: RemotePermissions::default(),
            pin_state: None,
        }
    }

    #[test]
    fn test_indexes() {
        let snapshot = JournalSnapshot::new(
            vec![
                record("d", ItemType::Directory, "ED", "idd", 10),
                record("d/b.txt", ItemType::File, "EB", "idb", 12),
                record("d/a.txt", ItemType::File, "EA", "ida", 11),
            ],
            "fp",
        );
        let names: Vec<&str> = snapshot.children_of("d").map(|r| r.name()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);
        assert_eq!(snapshot.find_by_file_id("idb").unwrap().path, "d/b.txt");
        assert_eq!(snapshot.find_by_inode(11).unwrap().path, "d/a.txt");
        assert_eq!(snapshot.find_dir_by_etag("ED").unwrap().path, "d");
        assert!(snapshot.find_dir_by_etag("EA").is_none());
        assert_eq!(snapshot.children_of("").count(), 1);
        assert_eq!(snapshot.data_fingerprint(), "fp");
    }
}
