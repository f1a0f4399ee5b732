use super::{DirectoryListing, RemoteLister, IO_TIMEOUT_SECS, OP_TIMEOUT_SECS};
use crate::core::records::{RemoteEntry, RemotePermissions};
use anyhow::Result;
use async_trait::async_trait;
use futures::TryStreamExt;
use opendal::{layers::TimeoutLayer, Metadata, Metakey, Operator};
use std::time::Duration;
use tracing::debug;

/// 基于 opendal 的 WebDAV 目录列举
pub struct WebDavLister {
    operator: Operator,
    name: String,
}

impl WebDavLister {
    pub fn new(
        endpoint: &str,
        username: &str,
        password: &str,
        root: Option<String>,
    ) -> Result<Self> {
        use opendal::services::Webdav;

        let mut builder = Webdav::default()
            .endpoint(endpoint)
            .username(username)
            .password(password);

        if let Some(ref r) = root {
            builder = builder.root(r);
        }

        // 超时由列举方负责，超时会作为普通列举失败上报
        let operator = Operator::new(builder)?
            .layer(
                TimeoutLayer::default()
                    .with_timeout(Duration::from_secs(OP_TIMEOUT_SECS))
                    .with_io_timeout(Duration::from_secs(IO_TIMEOUT_SECS)),
            )
            .finish();

        let name = format!(
            "webdav://{}{}",
            endpoint.trim_end_matches('/'),
            root.as_deref()
                .map(|r| format!("/{}", r.trim_start_matches('/')))
                .unwrap_or_default()
        );

        Ok(Self { operator, name })
    }

    fn entry_from_meta(name: &str, meta: &Metadata) -> RemoteEntry {
        let etag = meta
            .etag()
            .map(|s| s.trim_matches('"').to_string())
            .unwrap_or_default();
        RemoteEntry {
            name: name.to_string(),
            // WebDAV 不提供独立的文件 ID，用 etag 作为目录的重命名线索
            file_id: String::new(),
            checksum_header: meta
                .content_md5()
                .map(|md5| format!("MD5:{}", md5))
                .unwrap_or_default(),
            remote_perm: RemotePermissions::default(),
            modtime: meta.last_modified().map_or(0, |t| t.timestamp()),
            size: if meta.is_dir() { 0 } else { meta.content_length() },
            is_directory: meta.is_dir(),
            direct_download: None,
            etag,
        }
    }
}

#[async_trait]
impl RemoteLister for WebDavLister {
    async fn list_directory(&self, path: &str) -> Result<DirectoryListing> {
        let dir = if path.is_empty() {
            "/".to_string()
        } else {
            format!("{}/", path.trim_matches('/'))
        };

        // 第一项为目录自身
        let self_meta = self.operator.stat(&dir).await?;
        let self_name = path.rsplit('/').next().unwrap_or_default();
        let mut entries = vec![Self::entry_from_meta(self_name, &self_meta)];

        let mut lister = self
            .operator
            .lister_with(&dir)
            .metakey(
                Metakey::ContentLength
                    | Metakey::LastModified
                    | Metakey::Mode
                    | Metakey::Etag
                    | Metakey::ContentMd5,
            )
            .await?;

        while let Some(entry) = lister.try_next().await? {
            let entry_path = entry.path().trim_start_matches('/');
            // 部分服务器会在列表中返回目录自身
            if entry_path.is_empty() || entry_path == dir.trim_start_matches('/') {
                continue;
            }
            let name = entry.name().trim_end_matches('/');
            entries.push(Self::entry_from_meta(name, entry.metadata()));
        }

        debug!("{} 列举 {} 得到 {} 个子条目", self.name, dir, entries.len() - 1);
        Ok(DirectoryListing {
            entries,
            data_fingerprint: None,
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}
