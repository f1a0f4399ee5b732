//! 相对路径工具
//!
//! 发现阶段的所有路径都相对同步根目录，使用 `/` 分隔，不带首尾斜杠，根目录为空字符串。

/// 拼接目录与名称
pub fn join(dir: &str, name: &str) -> String {
    if dir.is_empty() {
        name.to_string()
    } else {
        format!("{}/{}", dir, name)
    }
}

/// 父目录路径，根目录的父目录仍为根目录
pub fn parent(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[..pos],
        None => "",
    }
}

/// 最后一级名称
pub fn file_name(path: &str) -> &str {
    match path.rfind('/') {
        Some(pos) => &path[pos + 1..],
        None => path,
    }
}

/// 规范化外部传入的路径
pub fn normalize(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}

/// `ancestor` 是否为 `path` 本身或其祖先
pub fn is_same_or_ancestor(ancestor: &str, path: &str) -> bool {
    if ancestor.is_empty() || ancestor == path {
        return true;
    }
    path.len() > ancestor.len()
        && path.starts_with(ancestor)
        && path.as_bytes()[ancestor.len()] == b'/'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_and_split() {
        assert_eq!(join("", "a"), "a");
        assert_eq!(join("a/b", "c"), "a/b/c");
        assert_eq!(parent("a/b/c"), "a/b");
        assert_eq!(parent("a"), "");
        assert_eq!(file_name("a/b/c"), "c");
        assert_eq!(normalize("\\a\\b/"), "a/b");
    }

    #[test]
    fn test_ancestor_check_respects_segments() {
        assert!(is_same_or_ancestor("a", "a/b"));
        assert!(is_same_or_ancestor("", "a"));
        assert!(!is_same_or_ancestor("a", "ab"));
    }
}
