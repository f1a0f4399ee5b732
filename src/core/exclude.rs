//! 排除规则
//!
//! 规则来自排除文件（每行一个 glob）和配置中的附加模式：
//! - `#` 开头为注释
//! - `]` 前缀表示“排除并允许清理”
//! - 以 `/` 结尾只匹配目录
//! - 含 `/` 的模式匹配完整路径，否则逐级匹配路径的每一段

use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// 文件名最大字节数
const MAX_NAME_LENGTH: usize = 254;

const INVALID_CHARS: &[char] = &['\\', ':', '?', '*', '"', '<', '>', '|'];

/// 始终静默排除的名称
const SILENT_PATTERNS: &[&str] = &[
    ".sync_*.db*",
    "._sync_*.db*",
    ".syncdiscover.db*",
    ".syncdiscover.log*",
];

const CONFLICT_PATTERN: &str = "*_conflict-*";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExcludeType {
    NotExcluded,
    /// 命中排除列表
    Excluded,
    /// 命中 `]` 规则，父目录删除时可以一并清理
    ExcludeAndRemove,
    /// 内部文件，静默跳过
    Silent,
    Hidden,
    InvalidChar,
    TooLong,
    /// 冲突副本
    Conflict,
}

impl ExcludeType {
    /// 不产生任何条目，只发出静默排除事件
    pub fn is_silent(self) -> bool {
        matches!(
            self,
            ExcludeType::Silent | ExcludeType::Hidden | ExcludeType::Conflict
        )
    }

    /// 需要附带给用户的说明
    pub fn message(self) -> Option<&'static str> {
        match self {
            ExcludeType::InvalidChar => Some("文件名包含非法字符"),
            ExcludeType::TooLong => Some("文件名过长"),
            _ => None,
        }
    }
}

/// 排除过滤器
pub trait ExcludeFilter: Send + Sync {
    fn check(&self, path: &str, is_dir: bool, exclude_hidden: bool) -> ExcludeType;

    fn is_excluded(&self, path: &str, is_dir: bool, exclude_hidden: bool) -> bool {
        self.check(path, is_dir, exclude_hidden) != ExcludeType::NotExcluded
    }

    /// 重新加载规则
    fn reload(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone)]
struct ExcludeRule {
    regex: Regex,
    dirs_only: bool,
    full_path: bool,
    remove: bool,
}

impl ExcludeRule {
    fn compile(raw: &str) -> Option<Self> {
        let mut pattern = raw.trim();
        if pattern.is_empty() || pattern.starts_with('#') {
            return None;
        }
        let remove = pattern.starts_with(']');
        if remove {
            pattern = &pattern[1..];
        }
        let dirs_only = pattern.ends_with('/');
        let pattern = pattern.trim_end_matches('/');
        if pattern.is_empty() {
            return None;
        }
        let full_path = pattern.contains('/');
        let regex = match Regex::new(&glob_to_regex(pattern, full_path)) {
            Ok(re) => re,
            Err(e) => {
                warn!("无效的排除规则 {}: {}", raw, e);
                return None;
            }
        };
        Some(Self {
            regex,
            dirs_only,
            full_path,
            remove,
        })
    }

    fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.full_path {
            return (is_dir || !self.dirs_only) && self.regex.is_match(path);
        }
        let mut segments: Vec<&str> = path.split('/').collect();
        // 只匹配目录的规则跳过文件本身的名称
        if self.dirs_only && !is_dir {
            segments.pop();
        }
        segments.iter().any(|seg| self.regex.is_match(seg))
    }
}

/// glob 转正则；完整路径模式下通配符不跨越 `/`
fn glob_to_regex(pattern: &str, full_path: bool) -> String {
    let any = if full_path { "[^/]*" } else { ".*" };
    let one = if full_path { "[^/]" } else { "." };
    let mut out = String::from("^");
    let chars: Vec<char> = pattern.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' if chars.get(i + 1) == Some(&'*') => {
                out.push_str(".*");
                i += 1;
            }
            '*' => out.push_str(any),
            '?' => out.push_str(one),
            '[' => match chars[i..].iter().position(|&c| c == ']') {
                Some(end) if end > 1 => {
                    let class: String = chars[i + 1..i + end].iter().collect();
                    let class = class.strip_prefix('!').map_or(class.clone(), |c| format!("^{}", c));
                    out.push('[');
                    out.push_str(&class.replace('\\', "\\\\"));
                    out.push(']');
                    i += end;
                }
                _ => out.push_str("\\["),
            },
            c => out.push_str(&regex::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// 基于 glob 模式的排除过滤器
#[derive(Debug, Default)]
pub struct PatternExcludes {
    files: RwLock<Vec<PathBuf>>,
    patterns: RwLock<Vec<String>>,
    rules: RwLock<Vec<ExcludeRule>>,
    silent: Vec<Regex>,
    conflict: Option<Regex>,
}

impl PatternExcludes {
    pub fn new() -> Self {
        Self {
            silent: SILENT_PATTERNS
                .iter()
                .filter_map(|p| Regex::new(&glob_to_regex(p, false)).ok())
                .collect(),
            conflict: Regex::new(&glob_to_regex(CONFLICT_PATTERN, false)).ok(),
            ..Default::default()
        }
    }

    /// 登记排除文件，下次 `reload` 时读取
    pub fn add_exclude_file(&self, path: impl Into<PathBuf>) {
        let mut files = self.files.write().unwrap_or_else(|e| e.into_inner());
        files.push(path.into());
    }

    /// 添加一条模式并立即生效
    pub fn add_pattern(&self, pattern: &str) {
        if let Some(rule) = ExcludeRule::compile(pattern) {
            self.rules
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .push(rule);
        }
        self.patterns
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(pattern.to_string());
    }

    pub fn rule_count(&self) -> usize {
        self.rules.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn load_file(path: &Path) -> anyhow::Result<Vec<ExcludeRule>> {
        let content = fs::read_to_string(path)?;
        Ok(content.lines().filter_map(ExcludeRule::compile).collect())
    }
}

impl ExcludeFilter for PatternExcludes {
    fn check(&self, path: &str, is_dir: bool, exclude_hidden: bool) -> ExcludeType {
        let name = path.rsplit('/').next().unwrap_or(path);

        if exclude_hidden && name.starts_with('.') {
            return ExcludeType::Hidden;
        }
        if path.contains(INVALID_CHARS) {
            return ExcludeType::InvalidChar;
        }
        if self.silent.iter().any(|re| re.is_match(name)) {
            return ExcludeType::Silent;
        }
        if name.len() > MAX_NAME_LENGTH {
            return ExcludeType::TooLong;
        }
        if self.conflict.as_ref().is_some_and(|re| re.is_match(name)) {
            return ExcludeType::Conflict;
        }

        let rules = self.rules.read().unwrap_or_else(|e| e.into_inner());
        for rule in rules.iter() {
            if rule.matches(path, is_dir) {
                debug!("排除: {}", path);
                return if rule.remove && !is_dir {
                    ExcludeType::ExcludeAndRemove
                } else {
                    ExcludeType::Excluded
                };
            }
        }
        ExcludeType::NotExcluded
    }

    fn reload(&self) -> anyhow::Result<()> {
        let mut rules = Vec::new();
        let files = self.files.read().unwrap_or_else(|e| e.into_inner()).clone();
        for file in &files {
            if !file.exists() {
                warn!("排除文件不存在: {:?}", file);
                continue;
            }
            rules.extend(Self::load_file(file)?);
        }
        let patterns = self.patterns.read().unwrap_or_else(|e| e.into_inner());
        rules.extend(patterns.iter().filter_map(|p| ExcludeRule::compile(p)));
        debug!("重新加载 {} 条排除规则", rules.len());
        *self.rules.write().unwrap_or_else(|e| e.into_inner()) = rules;
        Ok(())
    }
}

/// 不排除任何内容
#[derive(Debug, Default, Clone, Copy)]
pub struct NoExcludes;

impl ExcludeFilter for NoExcludes {
    fn check(&self, _path: &str, _is_dir: bool, _exclude_hidden: bool) -> ExcludeType {
        ExcludeType::NotExcluded
    }

    fn reload(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// 判断单个名称是否匹配 glob
pub fn matches_glob(pattern: &str, name: &str) -> bool {
    Regex::new(&glob_to_regex(pattern, false))
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_builtin_rules() {
        let ex = PatternExcludes::new();
        assert_eq!(ex.check("a/b:c.txt", false, false), ExcludeType::InvalidChar);
        assert_eq!(ex.check(".sync_1234.db", false, false), ExcludeType::Silent);
        assert_eq!(ex.check("d/x_conflict-20240101.txt", false, false), ExcludeType::Conflict);
        assert_eq!(ex.check(&"a".repeat(255), false, false), ExcludeType::TooLong);
        assert_eq!(ex.check(".hidden", false, true), ExcludeType::Hidden);
        assert_eq!(ex.check(".hidden", false, false), ExcludeType::NotExcluded);
    }

    #[test]
    fn test_component_and_full_path_patterns() {
        let ex = PatternExcludes::new();
        ex.add_pattern("*.tmp");
        ex.add_pattern("build/");
        ex.add_pattern("docs/*.bak");
        ex.add_pattern("]~*");

        assert_eq!(ex.check("x/y.tmp", false, false), ExcludeType::Excluded);
        assert_eq!(ex.check("build", true, false), ExcludeType::Excluded);
        assert_eq!(ex.check("src/build/out.o", false, false), ExcludeType::Excluded);
        assert_eq!(ex.check("build", false, false), ExcludeType::NotExcluded);
        assert_eq!(ex.check("docs/a.bak", false, false), ExcludeType::Excluded);
        assert_eq!(ex.check("docs/sub/a.bak", false, false), ExcludeType::NotExcluded);
        assert_eq!(ex.check("~lock", false, false), ExcludeType::ExcludeAndRemove);
        assert_eq!(ex.check("~lockdir", true, false), ExcludeType::Excluded);
    }

    #[test]
    fn test_reload_reads_exclude_files() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("exclude.lst");
        let mut f = fs::File::create(&file).unwrap();
        writeln!(f, "# comment").unwrap();
        writeln!(f, "*.part").unwrap();
        drop(f);

        let ex = PatternExcludes::new();
        ex.add_exclude_file(&file);
        ex.add_pattern("*.swp");
        assert!(!ex.is_excluded("a.part", false, false));
        ex.reload().unwrap();
        assert!(ex.is_excluded("a.part", false, false));
        assert!(ex.is_excluded("a.swp", false, false));
        assert_eq!(ex.rule_count(), 2);
    }

    #[test]
    fn test_glob_classes() {
        assert!(matches_glob("file[0-9].txt", "file3.txt"));
        assert!(!matches_glob("file[!0-9].txt", "file3.txt"));
        assert!(matches_glob("a?c", "abc"));
    }
}
