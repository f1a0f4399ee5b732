//! 重命名关联表：记录“原路径现在位于哪里”

use std::collections::BTreeMap;

#[derive(Debug, Clone, Default)]
pub struct RenameTable {
    map: BTreeMap<String, String>,
}

impl RenameTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, original: impl Into<String>, current: impl Into<String>) {
        self.map.insert(original.into(), current.into());
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.map.get(original).map(|s| s.as_str())
    }

    pub fn contains_original(&self, original: &str) -> bool {
        self.map.contains_key(original)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// 用最深的已重命名祖先替换路径前缀
    ///
    /// 只解析祖先，路径本身命中时不替换：条目自身仍在新位置上单独分类。
    pub fn adjust(&self, path: &str) -> String {
        if self.map.is_empty() {
            return path.to_string();
        }
        let mut end = path.len();
        while let Some(pos) = path[..end].rfind('/') {
            if let Some(renamed) = self.map.get(&path[..pos]) {
                return format!("{}{}", renamed, &path[pos..]);
            }
            end = pos;
        }
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestor_rename_is_resolved() {
        let mut table = RenameTable::new();
        table.insert("X", "Z");
        assert_eq!(table.adjust("X/Y/file"), "Z/Y/file");
        assert_eq!(table.adjust("X/Y"), "Z/Y");
    }

    #[test]
    fn test_exact_hit_is_not_substituted() {
        let mut table = RenameTable::new();
        table.insert("X", "Z");
        table.insert("X/Y", "W");
        assert_eq!(table.adjust("X"), "X");
        // 最深的祖先优先
        assert_eq!(table.adjust("X/Y/file"), "W/file");
        assert_eq!(table.adjust("X/Y"), "Z/Y");
    }

    #[test]
    fn test_sibling_prefix_is_not_an_ancestor() {
        let mut table = RenameTable::new();
        table.insert("X", "Z");
        assert_eq!(table.adjust("XY/file"), "XY/file");
    }
}
