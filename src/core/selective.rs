//! 选择性同步黑白名单
//!
//! 两个列表的条目都是以 `/` 结尾的相对路径，并保持排序，祖先查找使用二分搜索。

use crate::error::{DiscoveryError, Result};

/// 选择性同步列表类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectiveSyncListType {
    BlackList,
    WhiteList,
}

impl SelectiveSyncListType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SelectiveSyncListType::BlackList => "blacklist",
            SelectiveSyncListType::WhiteList => "whitelist",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SelectiveSyncLists {
    black_list: Vec<String>,
    white_list: Vec<String>,
}

/// 校验并规范化列表：补齐结尾的 `/`，排序并去重
pub fn normalize_list(list: &[String]) -> Result<Vec<String>> {
    let mut result = Vec::with_capacity(list.len());
    for raw in list {
        let entry = raw.replace('\\', "/");
        if entry == "/" {
            // 单独的 "/" 表示整个同步目录
            result.push(entry);
            continue;
        }
        let trimmed = entry.trim_end_matches('/');
        if trimmed.is_empty() || trimmed.starts_with('/') {
            return Err(DiscoveryError::InvalidSelectiveSyncPath(raw.clone()));
        }
        if trimmed
            .split('/')
            .any(|seg| seg.is_empty() || seg == "." || seg == "..")
        {
            return Err(DiscoveryError::InvalidSelectiveSyncPath(raw.clone()));
        }
        result.push(format!("{}/", trimmed));
    }
    result.sort();
    result.dedup();
    Ok(result)
}

/// 在已排序列表中查找路径本身或它的任一祖先，返回最深的那个条目
fn deepest_ancestor_in<'a>(list: &'a [String], path: &str) -> Option<&'a str> {
    if list.is_empty() {
        return None;
    }
    // "/" 命中所有路径
    let mut best = list
        .binary_search_by(|e| e.as_str().cmp("/"))
        .ok()
        .map(|idx| list[idx].as_str());
    let path_slash = format!("{}/", path.trim_end_matches('/'));
    for (idx, _) in path_slash.match_indices('/') {
        let prefix = &path_slash[..=idx];
        if let Ok(found) = list.binary_search_by(|e| e.as_str().cmp(prefix)) {
            best = Some(list[found].as_str());
        }
    }
    best
}

impl SelectiveSyncLists {
    pub fn new(black_list: &[String], white_list: &[String]) -> Result<Self> {
        Ok(Self {
            black_list: normalize_list(black_list)?,
            white_list: normalize_list(white_list)?,
        })
    }

    pub fn set_black_list(&mut self, list: &[String]) -> Result<()> {
        self.black_list = normalize_list(list)?;
        Ok(())
    }

    pub fn set_white_list(&mut self, list: &[String]) -> Result<()> {
        self.white_list = normalize_list(list)?;
        Ok(())
    }

    pub fn black_list(&self) -> &[String] {
        &self.black_list
    }

    pub fn white_list(&self) -> &[String] {
        &self.white_list
    }

    /// 路径（或其祖先）在黑名单中，且没有被更具体的白名单条目覆盖
    pub fn is_in_black_list(&self, path: &str) -> bool {
        let Some(black) = deepest_ancestor_in(&self.black_list, path) else {
            return false;
        };
        match deepest_ancestor_in(&self.white_list, path) {
            Some(white) => !(black == "/" || white.starts_with(black)),
            None => true,
        }
    }

    /// 路径本身或任一祖先在白名单中
    pub fn is_in_white_list(&self, path: &str) -> bool {
        deepest_ancestor_in(&self.white_list, path).is_some()
    }

    /// 白名单中精确包含该路径（不看祖先）
    pub fn white_list_contains_exact(&self, path: &str) -> bool {
        let key = format!("{}/", path.trim_end_matches('/'));
        self.white_list.binary_search(&key).is_ok()
    }

    /// 按排序位置插入白名单
    pub fn add_to_white_list(&mut self, path: &str) {
        let key = format!("{}/", path.trim_end_matches('/'));
        if let Err(pos) = self.white_list.binary_search(&key) {
            self.white_list.insert(pos, key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lists(black: &[&str], white: &[&str]) -> SelectiveSyncLists {
        let black: Vec<String> = black.iter().map(|s| s.to_string()).collect();
        let white: Vec<String> = white.iter().map(|s| s.to_string()).collect();
        SelectiveSyncLists::new(&black, &white).unwrap()
    }

    #[test]
    fn test_normalize_sorts_and_appends_slash() {
        let list = normalize_list(&["b".to_string(), "a/".to_string(), "a".to_string()]).unwrap();
        assert_eq!(list, vec!["a/".to_string(), "b/".to_string()]);
    }

    #[test]
    fn test_normalize_rejects_invalid_paths() {
        assert!(normalize_list(&["/abs".to_string()]).is_err());
        assert!(normalize_list(&["a/../b".to_string()]).is_err());
        assert!(normalize_list(&["".to_string()]).is_err());
    }

    #[test]
    fn test_ancestor_in_black_list() {
        let l = lists(&["photos/2020"], &[]);
        assert!(l.is_in_black_list("photos/2020"));
        assert!(l.is_in_black_list("photos/2020/img.jpg"));
        assert!(!l.is_in_black_list("photos"));
        assert!(!l.is_in_black_list("photos/2020-old"));
    }

    #[test]
    fn test_nested_entries_do_not_hide_ancestor() {
        let l = lists(&["a", "a/b", "a/c"], &[]);
        assert!(l.is_in_black_list("a/d/x"));
    }

    #[test]
    fn test_white_list_overrides_below_black_entry() {
        let l = lists(&["docs"], &["docs/keep"]);
        assert!(l.is_in_black_list("docs/other"));
        assert!(!l.is_in_black_list("docs/keep"));
        assert!(!l.is_in_black_list("docs/keep/file.txt"));
    }

    #[test]
    fn test_white_list_above_black_entry_does_not_override() {
        let l = lists(&["docs/private"], &["docs"]);
        assert!(l.is_in_black_list("docs/private/x"));
        assert!(!l.is_in_black_list("docs/public"));
    }

    #[test]
    fn test_root_entry_matches_everything() {
        let l = lists(&["/"], &[]);
        assert!(l.is_in_black_list("anything"));
        assert!(l.is_in_black_list("-dash/first"));
    }

    #[test]
    fn test_add_to_white_list_keeps_order() {
        let mut l = lists(&[], &["b"]);
        l.add_to_white_list("a");
        l.add_to_white_list("c/");
        l.add_to_white_list("a");
        assert_eq!(l.white_list(), &["a/".to_string(), "b/".to_string(), "c/".to_string()]);
        assert!(l.white_list_contains_exact("c"));
        assert!(!l.white_list_contains_exact("c/d"));
        assert!(l.is_in_white_list("c/d"));
    }
}
