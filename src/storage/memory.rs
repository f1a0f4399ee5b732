//! 内存中的远程与本地树，用于测试、基准和演练
//!
//! 远程树模拟服务器语义：修改会刷新所有祖先目录的 etag，重命名保留文件 ID 和 etag。

use super::{checksum_header, DirectoryListing, LocalFilesystem, RemoteLister};
use crate::core::paths;
use crate::core::records::{LocalEntry, RemoteEntry, RemotePermissions};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn subtree_keys<V>(tree: &BTreeMap<String, V>, root: &str) -> Vec<String> {
    tree.keys()
        .filter(|p| !p.is_empty() && paths::is_same_or_ancestor(root, p))
        .cloned()
        .collect()
}

/// 内存远程
pub struct MemoryRemote {
    tree: Mutex<BTreeMap<String, RemoteEntry>>,
    counter: AtomicU64,
    data_fingerprint: Mutex<Option<String>>,
    failures: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
    listed: Mutex<Vec<String>>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    pub fn new() -> Self {
        let remote = Self {
            tree: Mutex::new(BTreeMap::new()),
            counter: AtomicU64::new(0),
            data_fingerprint: Mutex::new(None),
            failures: Mutex::new(HashSet::new()),
            delay: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            listed: Mutex::new(Vec::new()),
        };
        let root = RemoteEntry {
            name: String::new(),
            etag: remote.next_tag("e"),
            file_id: remote.next_tag("id"),
            remote_perm: RemotePermissions::parse("WDNVCK"),
            is_directory: true,
            ..Default::default()
        };
        lock(&remote.tree).insert(String::new(), root);
        remote
    }

    fn next_tag(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.counter.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// 刷新路径所有祖先（含根目录）的 etag
    fn touch_ancestors(&self, tree: &mut BTreeMap<String, RemoteEntry>, path: &str) {
        let mut current = path;
        while !current.is_empty() {
            current = paths::parent(current);
            let etag = self.next_tag("e");
            if let Some(entry) = tree.get_mut(current) {
                entry.etag = etag;
            }
        }
    }

    fn insert(&self, path: &str, is_directory: bool, size: u64, modtime: i64) {
        let mut tree = lock(&self.tree);
        // 自动补齐父目录
        let parent = paths::parent(path);
        if !parent.is_empty() && !tree.contains_key(parent) {
            drop(tree);
            self.add_dir(parent);
            tree = lock(&self.tree);
        }
        let entry = RemoteEntry {
            name: paths::file_name(path).to_string(),
            etag: self.next_tag("e"),
            file_id: self.next_tag("id"),
            checksum_header: String::new(),
            remote_perm: RemotePermissions::parse("WDNVCK"),
            modtime,
            size,
            is_directory,
            direct_download: None,
        };
        tree.insert(path.to_string(), entry);
        self.touch_ancestors(&mut tree, path);
    }

    pub fn add_dir(&self, path: &str) {
        self.insert(path, true, 0, 0);
    }

    pub fn add_file(&self, path: &str, size: u64, modtime: i64) {
        self.insert(path, false, size, modtime);
    }

    /// 修改文件内容：新 etag，祖先 etag 随之变化
    pub fn modify_file(&self, path: &str, size: u64, modtime: i64) {
        let mut tree = lock(&self.tree);
        let etag = self.next_tag("e");
        if let Some(entry) = tree.get_mut(path) {
            entry.size = size;
            entry.modtime = modtime;
            entry.etag = etag;
            self.touch_ancestors(&mut tree, path);
        }
    }

    pub fn remove(&self, path: &str) {
        let mut tree = lock(&self.tree);
        for key in subtree_keys(&tree, path) {
            tree.remove(&key);
        }
        self.touch_ancestors(&mut tree, path);
    }

    /// 移动整个子树，文件 ID 与 etag 保持不变
    pub fn rename(&self, from: &str, to: &str) {
        let mut tree = lock(&self.tree);
        for key in subtree_keys(&tree, from) {
            if let Some(mut entry) = tree.remove(&key) {
                let new_path = format!("{}{}", to, &key[from.len()..]);
                if key == from {
                    entry.name = paths::file_name(to).to_string();
                }
                tree.insert(new_path, entry);
            }
        }
        self.touch_ancestors(&mut tree, from);
        self.touch_ancestors(&mut tree, to);
    }

    pub fn set_permissions(&self, path: &str, perms: &str) {
        if let Some(entry) = lock(&self.tree).get_mut(path) {
            entry.remote_perm = RemotePermissions::parse(perms);
        }
    }

    /// 目录大小（服务器报告的子树总大小）
    pub fn set_size(&self, path: &str, size: u64) {
        if let Some(entry) = lock(&self.tree).get_mut(path) {
            entry.size = size;
        }
    }

    pub fn set_checksum(&self, path: &str, checksum: &str) {
        if let Some(entry) = lock(&self.tree).get_mut(path) {
            entry.checksum_header = checksum.to_string();
        }
    }

    /// 清空所有文件 ID，模拟不提供 ID 的服务器
    pub fn clear_file_ids(&self) {
        for entry in lock(&self.tree).values_mut() {
            entry.file_id.clear();
        }
    }

    pub fn set_data_fingerprint(&self, fingerprint: &str) {
        *lock(&self.data_fingerprint) = Some(fingerprint.to_string());
    }

    /// 让指定目录的列举失败
    pub fn fail_path(&self, path: &str) {
        lock(&self.failures).insert(path.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn entry(&self, path: &str) -> Option<RemoteEntry> {
        lock(&self.tree).get(path).cloned()
    }

    /// 除根目录外的所有条目
    pub fn entries(&self) -> Vec<(String, RemoteEntry)> {
        lock(&self.tree)
            .iter()
            .filter(|(p, _)| !p.is_empty())
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect()
    }

    /// 同时进行中的列举数峰值
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 按调用顺序记录的已列举目录
    pub fn listed_paths(&self) -> Vec<String> {
        lock(&self.listed).clone()
    }
}

#[async_trait]
impl RemoteLister for MemoryRemote {
    async fn list_directory(&self, path: &str) -> Result<DirectoryListing> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.listed).push(path.to_string());
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        scopeguard::defer! {
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }

        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if lock(&self.failures).contains(path) {
            return Err(anyhow!("模拟的列举失败: {}", path));
        }

        let tree = lock(&self.tree);
        let self_entry = tree
            .get(path)
            .filter(|e| e.is_directory)
            .cloned()
            .ok_or_else(|| anyhow!("目录不存在: {}", path))?;
        let mut entries = vec![self_entry];
        entries.extend(
            tree.iter()
                .filter(|(p, _)| !p.is_empty() && paths::parent(p) == path)
                .map(|(_, e)| e.clone()),
        );
        let data_fingerprint = if path.is_empty() {
            lock(&self.data_fingerprint).clone()
        } else {
            None
        };
        Ok(DirectoryListing {
            entries,
            data_fingerprint,
        })
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// 内存本地树
pub struct MemoryLocal {
    tree: Mutex<BTreeMap<String, LocalEntry>>,
    contents: Mutex<HashMap<String, Vec<u8>>>,
    next_inode: AtomicU64,
    broken: Mutex<HashSet<String>>,
}

impl Default for MemoryLocal {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLocal {
    pub fn new() -> Self {
        let mut tree = BTreeMap::new();
        tree.insert(
            String::new(),
            LocalEntry {
                is_directory: true,
                inode: 1,
                ..Default::default()
            },
        );
        Self {
            tree: Mutex::new(tree),
            contents: Mutex::new(HashMap::new()),
            next_inode: AtomicU64::new(2),
            broken: Mutex::new(HashSet::new()),
        }
    }

    fn insert(&self, path: &str, entry: LocalEntry) {
        let parent = paths::parent(path);
        if !parent.is_empty() && !lock(&self.tree).contains_key(parent) {
            self.add_dir(parent);
        }
        let mut entry = entry;
        entry.name = paths::file_name(path).to_string();
        entry.inode = self.next_inode.fetch_add(1, Ordering::SeqCst);
        lock(&self.tree).insert(path.to_string(), entry);
    }

    pub fn add_dir(&self, path: &str) {
        self.insert(
            path,
            LocalEntry {
                is_directory: true,
                ..Default::default()
            },
        );
    }

    pub fn add_file(&self, path: &str, size: u64, modtime: i64) {
        self.insert(
            path,
            LocalEntry {
                size,
                modtime,
                ..Default::default()
            },
        );
    }

    /// 带内容的文件，校验和由内容计算
    pub fn add_file_with_content(&self, path: &str, content: &[u8], modtime: i64) {
        self.add_file(path, content.len() as u64, modtime);
        lock(&self.contents).insert(path.to_string(), content.to_vec());
    }

    pub fn add_placeholder(&self, path: &str, size: u64, modtime: i64) {
        self.insert(
            path,
            LocalEntry {
                size,
                modtime,
                is_virtual: true,
                ..Default::default()
            },
        );
    }

    pub fn add_hidden_file(&self, path: &str, size: u64, modtime: i64) {
        self.insert(
            path,
            LocalEntry {
                size,
                modtime,
                is_hidden: true,
                ..Default::default()
            },
        );
    }

    pub fn add_symlink(&self, path: &str) {
        self.insert(
            path,
            LocalEntry {
                is_symlink: true,
                ..Default::default()
            },
        );
    }

    pub fn modify_file(&self, path: &str, size: u64, modtime: i64) {
        if let Some(entry) = lock(&self.tree).get_mut(path) {
            entry.size = size;
            entry.modtime = modtime;
        }
    }

    /// 只改修改时间，内容不变
    pub fn touch(&self, path: &str, modtime: i64) {
        if let Some(entry) = lock(&self.tree).get_mut(path) {
            entry.modtime = modtime;
        }
    }

    pub fn remove(&self, path: &str) {
        let mut tree = lock(&self.tree);
        for key in subtree_keys(&tree, path) {
            tree.remove(&key);
        }
    }

    /// 移动子树，inode 保持不变
    pub fn rename(&self, from: &str, to: &str) {
        let mut tree = lock(&self.tree);
        let mut contents = lock(&self.contents);
        for key in subtree_keys(&tree, from) {
            if let Some(mut entry) = tree.remove(&key) {
                let new_path = format!("{}{}", to, &key[from.len()..]);
                if key == from {
                    entry.name = paths::file_name(to).to_string();
                }
                if let Some(data) = contents.remove(&key) {
                    contents.insert(new_path.clone(), data);
                }
                tree.insert(new_path, entry);
            }
        }
    }

    /// 让指定目录的读取失败
    pub fn break_path(&self, path: &str) {
        lock(&self.broken).insert(path.to_string());
    }

    pub fn entry(&self, path: &str) -> Option<LocalEntry> {
        lock(&self.tree).get(path).cloned()
    }

    pub fn entries(&self) -> Vec<(String, LocalEntry)> {
        lock(&self.tree)
            .iter()
            .filter(|(p, _)| !p.is_empty())
            .map(|(p, e)| (p.clone(), e.clone()))
            .collect()
    }
}

impl LocalFilesystem for MemoryLocal {
    fn list_directory(&self, path: &str) -> Result<Option<Vec<LocalEntry>>> {
        if lock(&self.broken).contains(path) {
            return Err(anyhow!("模拟的本地读取失败: {}", path));
        }
        let tree = lock(&self.tree);
        match tree.get(path) {
            Some(dir) if dir.is_directory => {}
            _ => return Ok(None),
        }
        Ok(Some(
            tree.iter()
                .filter(|(p, _)| !p.is_empty() && paths::parent(p) == path)
                .map(|(_, e)| e.clone())
                .collect(),
        ))
    }

    fn exists(&self, path: &str) -> bool {
        lock(&self.tree).contains_key(path)
    }

    fn content_checksum(&self, path: &str) -> Result<String> {
        lock(&self.contents)
            .get(path)
            .map(|data| checksum_header(data))
            .ok_or_else(|| anyhow!("没有内容: {}", path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_remote_listing_has_self_entry_first() {
        let remote = MemoryRemote::new();
        remote.add_file("d/a.txt", 3, 100);
        let listing = remote.list_directory("d").await.unwrap();
        assert!(listing.entries[0].is_directory);
        assert_eq!(listing.entries[0].name, "d");
        assert_eq!(listing.entries[1].name, "a.txt");
        assert!(remote.list_directory("missing").await.is_err());
    }

    #[test]
    fn test_remote_modification_propagates_etag() {
        let remote = MemoryRemote::new();
        remote.add_file("d/e/a.txt", 3, 100);
        let before = remote.entry("d").unwrap().etag;
        let root_before = remote.entry("").unwrap().etag;
        remote.modify_file("d/e/a.txt", 4, 200);
        assert_ne!(remote.entry("d").unwrap().etag, before);
        assert_ne!(remote.entry("").unwrap().etag, root_before);
    }

    #[test]
    fn test_remote_rename_keeps_ids() {
        let remote = MemoryRemote::new();
        remote.add_file("d/a.txt", 3, 100);
        let dir = remote.entry("d").unwrap();
        let file = remote.entry("d/a.txt").unwrap();
        remote.rename("d", "x");
        assert!(remote.entry("d").is_none());
        let moved_dir = remote.entry("x").unwrap();
        assert_eq!(moved_dir.file_id, dir.file_id);
        assert_eq!(moved_dir.etag, dir.etag);
        assert_eq!(moved_dir.name, "x");
        assert_eq!(remote.entry("x/a.txt").unwrap().file_id, file.file_id);
    }

    #[test]
    fn test_local_rename_keeps_inode() {
        let local = MemoryLocal::new();
        local.add_file("d/a.txt", 3, 100);
        let inode = local.entry("d").unwrap().inode;
        local.rename("d", "x");
        assert_eq!(local.entry("x").unwrap().inode, inode);
        assert!(local.exists("x/a.txt"));
        assert!(!local.exists("d"));
        assert!(local.list_directory("d").unwrap().is_none());
    }
}
