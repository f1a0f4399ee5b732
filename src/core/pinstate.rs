//! 固定状态（pin state）：决定条目内容是否需要常驻本地

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinState {
    /// 跟随父目录
    #[default]
    Inherited,
    /// 内容常驻本地并保持最新
    AlwaysLocal,
    /// 只保留占位文件，按需下载
    OnlineOnly,
    /// 用户未做决定
    Unspecified,
}

impl PinState {
    /// 计算子条目的有效固定状态
    ///
    /// `stored` 为日志中记录的状态，首次发现的条目没有记录。
    /// 首次发现时 `Unspecified` 与 `Inherited` 一样跟随父目录；
    /// 已有记录的条目保留自己的明确选择。
    pub fn resolve(parent: PinState, stored: Option<PinState>, first_discovery: bool) -> PinState {
        match stored {
            Some(PinState::AlwaysLocal) => PinState::AlwaysLocal,
            Some(PinState::OnlineOnly) => PinState::OnlineOnly,
            Some(PinState::Unspecified) if !first_discovery => PinState::Unspecified,
            _ => parent,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PinState::Inherited => "inherited",
            PinState::AlwaysLocal => "always_local",
            PinState::OnlineOnly => "online_only",
            PinState::Unspecified => "unspecified",
        }
    }
}

impl fmt::Display for PinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for PinState {
    fn from(s: &str) -> Self {
        match s {
            "always_local" => PinState::AlwaysLocal,
            "online_only" => PinState::OnlineOnly,
            "unspecified" => PinState::Unspecified,
            _ => PinState::Inherited,
        }
    }
}
