//! 应用配置模块

use crate::core::comparator::CompareConfig;
use crate::core::pinstate::PinState;
use crate::error::{DiscoveryError, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// 发现阶段配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryConfig {
    /// 同时进行的远程列举数上限
    #[serde(default = "default_max_active_jobs")]
    pub max_active_jobs: usize,
    /// 把隐藏文件当作排除项
    #[serde(default)]
    pub ignore_hidden_files: bool,
    /// 新目录超过该大小（MB）时需要用户确认，None 表示不检查
    #[serde(default = "default_big_folder_limit")]
    pub new_big_folder_size_limit_mb: Option<u64>,
    /// 新的外部存储挂载点需要用户确认
    #[serde(default = "default_true")]
    pub confirm_external_storage: bool,
    /// 启用虚拟文件（占位文件）
    #[serde(default)]
    pub virtual_files: bool,
    #[serde(default = "default_virtual_file_suffix")]
    pub virtual_file_suffix: String,
    /// 大小相同而时间变化时计算本地校验和
    #[serde(default = "default_true")]
    pub use_checksum: bool,
    /// 时间容差（秒）
    #[serde(default)]
    pub time_tolerance_seconds: i64,
    /// 远程 etag 未变的目录直接用日志内容，不再列举
    #[serde(default = "default_true")]
    pub skip_unchanged_remote_dirs: bool,
    /// 排除规则文件
    #[serde(default)]
    pub exclude_files: Vec<PathBuf>,
    /// 附加排除模式
    #[serde(default = "default_exclude_patterns")]
    pub exclude_patterns: Vec<String>,
    #[serde(default)]
    pub selective_sync_black_list: Vec<String>,
    #[serde(default)]
    pub selective_sync_white_list: Vec<String>,
    /// 同步根目录的固定状态
    #[serde(default)]
    pub root_pin_state: PinState,
}

fn default_max_active_jobs() -> usize {
    4
}

fn default_big_folder_limit() -> Option<u64> {
    Some(500)
}

fn default_true() -> bool {
    true
}

fn default_virtual_file_suffix() -> String {
    ".vfile".to_string()
}

fn default_exclude_patterns() -> Vec<String> {
    vec![
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
        "*.tmp".to_string(),
        "*.temp".to_string(),
        "~*".to_string(),
    ]
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_active_jobs: default_max_active_jobs(),
            ignore_hidden_files: false,
            new_big_folder_size_limit_mb: default_big_folder_limit(),
            confirm_external_storage: true,
            virtual_files: false,
            virtual_file_suffix: default_virtual_file_suffix(),
            use_checksum: true,
            time_tolerance_seconds: 0,
            skip_unchanged_remote_dirs: true,
            exclude_files: Vec::new(),
            exclude_patterns: default_exclude_patterns(),
            selective_sync_black_list: Vec::new(),
            selective_sync_white_list: Vec::new(),
            root_pin_state: PinState::AlwaysLocal,
        }
    }
}

impl DiscoveryConfig {
    /// 从配置文件的 `discovery` 段加载配置
    pub fn load(config_dir: &Path) -> Self {
        let config_file = config_dir.join("config.json");
        fs::read_to_string(&config_file)
            .ok()
            .and_then(|content| serde_json::from_str::<serde_json::Value>(&content).ok())
            .and_then(|config| config.get("discovery").cloned())
            .and_then(|section| serde_json::from_value::<DiscoveryConfig>(section).ok())
            .unwrap_or_default()
    }

    /// 保存到配置文件，保留其他段
    pub fn save(&self, config_dir: &Path) -> io::Result<()> {
        let config_file = config_dir.join("config.json");

        let mut config: serde_json::Value = if config_file.exists() {
            let content = fs::read_to_string(&config_file)?;
            serde_json::from_str(&content).unwrap_or_else(|_| serde_json::json!({}))
        } else {
            serde_json::json!({})
        };

        config["discovery"] = serde_json::to_value(self).map_err(io::Error::other)?;

        let content = serde_json::to_string_pretty(&config).map_err(io::Error::other)?;
        fs::write(&config_file, content)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_active_jobs == 0 {
            return Err(DiscoveryError::Config(
                "maxActiveJobs 必须大于 0".to_string(),
            ));
        }
        if self.time_tolerance_seconds < 0 {
            return Err(DiscoveryError::Config(
                "timeToleranceSeconds 不能为负数".to_string(),
            ));
        }
        Ok(())
    }

    pub fn compare_config(&self) -> CompareConfig {
        CompareConfig {
            time_tolerance_seconds: self.time_tolerance_seconds,
            use_checksum: self.use_checksum,
        }
    }

    pub fn big_folder_limit_bytes(&self) -> Option<u64> {
        self.new_big_folder_size_limit_mb
            .map(|mb| mb.saturating_mul(1024 * 1024))
    }
}

/// 默认配置目录
pub fn default_config_dir() -> PathBuf {
    let base = if cfg!(target_os = "windows") {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    } else if cfg!(target_os = "macos") {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join("Library").join("Application Support"))
    } else {
        std::env::var("HOME")
            .ok()
            .map(|h| PathBuf::from(h).join(".config"))
    };
    base.map(|p| p.join("syncdiscover"))
        .unwrap_or_else(|| PathBuf::from(".syncdiscover"))
}

/// 命令行参数
#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "对比本地目录与 WebDAV 远程，输出同步前的发现结果", long_about = None)]
pub struct Args {
    /// 本地同步目录
    #[arg(value_name = "LOCAL")]
    pub local: PathBuf,

    /// WebDAV 服务地址
    #[arg(long, value_name = "URL")]
    pub webdav_endpoint: String,

    /// WebDAV 用户名
    #[arg(short, long, default_value = "")]
    pub user: String,

    /// WebDAV 密码
    #[arg(long, default_value = "")]
    pub password: String,

    /// 远程根目录
    #[arg(long)]
    pub root: Option<String>,

    /// 同步日志数据库路径（默认位于配置目录）
    #[arg(long)]
    pub journal: Option<PathBuf>,

    /// 配置目录
    #[arg(long)]
    pub config_dir: Option<PathBuf>,

    /// 覆盖同时进行的列举数
    #[arg(short = 'j', long)]
    pub max_jobs: Option<usize>,

    /// 以 JSON 行输出事件
    #[arg(long, default_value_t = false)]
    pub json: bool,

    /// 输出未变化的条目
    #[arg(short, long, default_value_t = false)]
    pub all: bool,

    /// Suppress non-error messages
    #[arg(short, long, default_value_t = false)]
    pub quiet: bool,

    /// Increase verbosity
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone().unwrap_or_else(default_config_dir)
    }

    pub fn journal_path(&self) -> PathBuf {
        self.journal
            .clone()
            .unwrap_or_else(|| self.config_dir().join("journal.db"))
    }

    /// 用命令行覆盖配置
    pub fn apply(&self, config: &mut DiscoveryConfig) {
        if let Some(jobs) = self.max_jobs {
            config.max_active_jobs = jobs;
        }
    }
}
