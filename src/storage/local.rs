use super::{checksum_header, LocalFilesystem};
use crate::core::records::LocalEntry;
use anyhow::{bail, Result};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// 本地同步目录
pub struct LocalFs {
    base_path: PathBuf,
    /// 占位文件后缀，例如 `.vfile`
    virtual_file_suffix: Option<String>,
}

impl LocalFs {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let base_path = path.as_ref().to_path_buf();
        if !base_path.is_dir() {
            bail!("本地同步目录不存在: {:?}", base_path);
        }
        Ok(Self {
            base_path,
            virtual_file_suffix: None,
        })
    }

    pub fn with_virtual_file_suffix(mut self, suffix: impl Into<String>) -> Self {
        let suffix = suffix.into();
        self.virtual_file_suffix = (!suffix.is_empty()).then_some(suffix);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        let path = path.trim_start_matches('/').trim_start_matches('\\');
        if path.is_empty() {
            self.base_path.clone()
        } else {
            self.base_path.join(path)
        }
    }

    fn read_entry(&self, entry: &walkdir::DirEntry) -> Result<Option<LocalEntry>> {
        let Some(name) = entry.file_name().to_str() else {
            warn!("跳过非 UTF-8 文件名: {:?}", entry.path());
            return Ok(None);
        };
        let metadata = entry.metadata()?;
        let modtime = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64);
        let is_symlink = entry.path_is_symlink();
        let is_directory = metadata.is_dir();

        let mut local = LocalEntry {
            name: name.to_string(),
            modtime,
            size: if is_directory { 0 } else { metadata.len() },
            inode: inode_of(&metadata),
            is_directory,
            is_hidden: is_hidden(name, &metadata),
            is_virtual: false,
            is_symlink,
        };

        if let Some(suffix) = &self.virtual_file_suffix {
            if !is_directory && name.len() > suffix.len() && name.ends_with(suffix.as_str()) {
                local.name.truncate(name.len() - suffix.len());
                local.is_virtual = true;
            }
        }
        Ok(Some(local))
    }
}

#[cfg(unix)]
fn inode_of(metadata: &std::fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    metadata.ino()
}

#[cfg(not(unix))]
fn inode_of(_metadata: &std::fs::Metadata) -> u64 {
    0
}

#[cfg(windows)]
fn is_hidden(name: &str, metadata: &std::fs::Metadata) -> bool {
    use std::os::windows::fs::MetadataExt;
    const FILE_ATTRIBUTE_HIDDEN: u32 = 0x2;
    name.starts_with('.') || metadata.file_attributes() & FILE_ATTRIBUTE_HIDDEN != 0
}

#[cfg(not(windows))]
fn is_hidden(name: &str, _metadata: &std::fs::Metadata) -> bool {
    name.starts_with('.')
}

impl LocalFilesystem for LocalFs {
    fn list_directory(&self, path: &str) -> Result<Option<Vec<LocalEntry>>> {
        let dir = self.resolve_path(path);
        match std::fs::symlink_metadata(&dir) {
            Ok(m) if m.is_dir() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let mut entries = Vec::new();
        for entry in WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(1)
            .follow_links(false)
            .sort_by_file_name()
        {
            let entry = entry?;
            if let Some(local) = self.read_entry(&entry)? {
                entries.push(local);
            }
        }
        Ok(Some(entries))
    }

    fn exists(&self, path: &str) -> bool {
        let full = self.resolve_path(path);
        if full.symlink_metadata().is_ok() {
            return true;
        }
        match &self.virtual_file_suffix {
            Some(suffix) => {
                let mut placeholder = full.into_os_string();
                placeholder.push(suffix);
                PathBuf::from(placeholder).symlink_metadata().is_ok()
            }
            None => false,
        }
    }

    fn content_checksum(&self, path: &str) -> Result<String> {
        let data = std::fs::read(self.resolve_path(path))?;
        Ok(checksum_header(&data))
    }
}
