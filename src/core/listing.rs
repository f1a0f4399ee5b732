//! 单目录列举任务
//!
//! 包装一次远程列举调用：剥离描述目录自身的第一项，识别外部存储，
//! 根目录时额外带回服务器数据指纹。结果最多回调一次，取消后不再回调。

use crate::core::records::{Permission, RemoteEntry, RemotePermissions};
use crate::storage::{Account, DirectoryListing, RemoteLister};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const MISSING_DATA_MESSAGE: &str = "The server file discovery reply is missing data.";

/// 规范化后的列举结果
#[derive(Debug, Clone, Default)]
pub struct RemoteListing {
    /// 按名称排序的子条目
    pub entries: Vec<RemoteEntry>,
    pub dir_etag: String,
    pub dir_perm: RemotePermissions,
    pub is_external_storage: bool,
    pub data_fingerprint: Option<String>,
}

pub type ListingResult = std::result::Result<RemoteListing, String>;

pub struct SingleDirectoryListing {
    lister: Arc<dyn RemoteLister>,
    path: String,
    is_root: bool,
    cancel: CancellationToken,
}

impl std::fmt::Debug for SingleDirectoryListing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleDirectoryListing")
            .field("lister", &self.lister.name())
            .field("path", &self.path)
            .field("is_root", &self.is_root)
            .finish()
    }
}

impl SingleDirectoryListing {
    pub fn new(account: &Account, path: impl Into<String>) -> Self {
        Self {
            lister: account.lister.clone(),
            path: path.into(),
            is_root: false,
            cancel: CancellationToken::new(),
        }
    }

    pub fn set_is_root_path(&mut self, is_root: bool) {
        self.is_root = is_root;
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// 在 tokio 运行时上开始列举
    pub fn start<F>(&self, on_finished: F)
    where
        F: FnOnce(ListingResult) + Send + 'static,
    {
        let lister = self.lister.clone();
        let path = self.path.clone();
        let is_root = self.is_root;
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("列举已取消: {}", path);
                    return;
                }
                r = lister.list_directory(&path) => r,
            };
            if cancel.is_cancelled() {
                return;
            }
            on_finished(process_listing(&path, is_root, result));
        });
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// 把原始列举结果规范化
pub fn process_listing(
    path: &str,
    is_root: bool,
    result: anyhow::Result<DirectoryListing>,
) -> ListingResult {
    let listing = match result {
        Ok(listing) => listing,
        Err(e) => {
            warn!("列举远程目录失败: {}: {:#}", path, e);
            return Err(format!("{:#}", e));
        }
    };

    let mut entries = listing.entries.into_iter();
    let Some(self_entry) = entries.next() else {
        return Err(MISSING_DATA_MESSAGE.to_string());
    };
    if !self_entry.is_directory {
        return Err(MISSING_DATA_MESSAGE.to_string());
    }

    let is_external_storage = self_entry.remote_perm.has_permission(Permission::IsMounted);
    let mut children = Vec::with_capacity(entries.len());
    for mut entry in entries {
        if !entry.is_valid() {
            return Err(format!("{} ({})", MISSING_DATA_MESSAGE, path));
        }
        // 只有挂载点本身带 M，内部条目降为 m
        if is_external_storage && entry.remote_perm.has_permission(Permission::IsMounted) {
            entry.remote_perm.unset_permission(Permission::IsMounted);
            entry.remote_perm.set_permission(Permission::IsMountedSub);
        }
        children.push(entry);
    }
    children.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(RemoteListing {
        entries: children,
        dir_etag: self_entry.etag,
        dir_perm: self_entry.remote_perm,
        is_external_storage,
        data_fingerprint: if is_root {
            listing.data_fingerprint.filter(|fp| !fp.is_empty())
        } else {
            None
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryRemote;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn dir(name: &str, perms: &str) -> RemoteEntry {
        RemoteEntry {
            name: name.into(),
            etag: format!("E-{}", name),
            is_directory: true,
            remote_perm: RemotePermissions::parse(perms),
            ..Default::default()
        }
    }

    #[test]
    fn test_self_entry_is_stripped_and_children_sorted() {
        let listing = DirectoryListing {
            entries: vec![dir("d", "WD"), dir("b", ""), dir("a", "")],
            data_fingerprint: Some("fp".into()),
        };
        let result = process_listing("d", false, Ok(listing)).unwrap();
        let names: Vec<&str> = result.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(result.dir_etag, "E-d");
        assert!(!result.is_external_storage);
        // 非根目录不带指纹
        assert!(result.data_fingerprint.is_none());
    }

    #[test]
    fn test_empty_reply_is_missing_data() {
        let err = process_listing("", true, Ok(DirectoryListing::default())).unwrap_err();
        assert_eq!(err, MISSING_DATA_MESSAGE);
    }

    #[test]
    fn test_child_without_name_fails() {
        let listing = DirectoryListing {
            entries: vec![dir("", ""), dir("", "")],
            data_fingerprint: None,
        };
        assert!(process_listing("", true, Ok(listing)).is_err());
    }

    #[test]
    fn test_external_storage_downgrades_children() {
        let listing = DirectoryListing {
            entries: vec![dir("ext", "M"), dir("inner", "M")],
            data_fingerprint: Some("fp".into()),
        };
        let result = process_listing("", true, Ok(listing)).unwrap();
        assert!(result.is_external_storage);
        let perm = result.entries[0].remote_perm;
        assert!(!perm.has_permission(Permission::IsMounted));
        assert!(perm.has_permission(Permission::IsMountedSub));
        assert_eq!(result.data_fingerprint.as_deref(), Some("fp"));
    }

    #[tokio::test]
    async fn test_start_delivers_result_once() {
        let remote = Arc::new(MemoryRemote::new());
        remote.add_file("a.txt", 1, 1);
        let account = Account::new("test", remote.clone());
        let job = SingleDirectoryListing::new(&account, "");
        let (tx, rx) = oneshot::channel();
        job.start(move |result| {
            let _ = tx.send(result);
        });
        let result = rx.await.unwrap().unwrap();
        assert_eq!(result.entries.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_suppresses_callback() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_delay(Duration::from_millis(200));
        let account = Account::new("test", remote.clone());
        let job = SingleDirectoryListing::new(&account, "");
        let (tx, rx) = oneshot::channel::<ListingResult>();
        job.start(move |result| {
            let _ = tx.send(result);
        });
        job.abort();
        // 回调被丢弃后发送端随之关闭
        assert!(rx.await.is_err());
        assert!(job.is_aborted());
    }
}
