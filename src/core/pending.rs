//! 待定删除集合
//!
//! 删除项在整个阶段结束前都不会发出，后续的重命名检测可以把它们撤销。

use crate::core::paths;
use crate::core::phase::JobId;
use crate::core::records::{DiscoveredItem, Instruction};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct PendingDeletion {
    pub item: DiscoveredItem,
    /// 已删除目录的延迟比较任务
    pub job: Option<JobId>,
    /// 删除前的 etag
    pub etag: String,
    /// 已被复活为新建项，不再参与重命名匹配
    pub resurrected: bool,
}

#[derive(Debug, Default)]
pub struct PendingDeletions {
    entries: BTreeMap<String, PendingDeletion>,
}

impl PendingDeletions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<String>, item: DiscoveredItem, job: Option<JobId>) {
        let path = path.into();
        debug!("登记待定删除: {}", path);
        let etag = item.etag.clone();
        self.entries.insert(
            path,
            PendingDeletion {
                item,
                job,
                etag,
                resurrected: false,
            },
        );
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&PendingDeletion> {
        self.entries.get(path)
    }

    /// 取出并撤销一个待定删除，已复活的条目不会匹配
    pub fn find_and_cancel(&mut self, path: &str) -> Option<PendingDeletion> {
        if self.entries.get(path).is_some_and(|p| !p.resurrected) {
            debug!("撤销待定删除: {}", path);
            return self.entries.remove(path);
        }
        None
    }

    /// 把路径及其所有处于待定删除的祖先改为反方向新建
    pub fn resurrect(&mut self, path: &str) -> Vec<String> {
        let mut revived = Vec::new();
        let mut current = path;
        loop {
            if let Some(pending) = self.entries.get_mut(current) {
                if !pending.resurrected {
                    pending.resurrected = true;
                    pending.item.instruction = Instruction::New;
                    pending.item.direction = pending.item.direction.reversed();
                    revived.push(current.to_string());
                }
            }
            if current.is_empty() {
                break;
            }
            current = paths::parent(current);
        }
        if !revived.is_empty() {
            debug!("复活已删除目录: {:?}", revived);
        }
        revived
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 按路径顺序取出全部剩余条目
    pub fn drain(&mut self) -> Vec<(String, PendingDeletion)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
