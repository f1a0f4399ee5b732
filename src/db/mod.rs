//! 同步日志：发现阶段的基线数据

pub mod memory;
pub mod models;
pub mod snapshot;

pub use memory::MemoryJournal;
pub use models::JournalRecord;
pub use snapshot::JournalSnapshot;

use crate::core::selective::SelectiveSyncListType;
use crate::error::{DiscoveryError, Result};
use async_trait::async_trait;
use models::JournalRow;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const DATA_FINGERPRINT_KEY: &str = "data_fingerprint";

/// 同步日志接口
///
/// 发现阶段只读；写入由执行同步的下游完成。
#[async_trait]
pub trait SyncJournal: Send + Sync {
    async fn load_records(&self) -> Result<Vec<JournalRecord>>;

    async fn data_fingerprint(&self) -> Result<String>;

    async fn set_data_fingerprint(&self, fingerprint: &str) -> Result<()>;

    async fn selective_sync_list(&self, kind: SelectiveSyncListType) -> Result<Vec<String>>;

    async fn set_selective_sync_list(&self, kind: SelectiveSyncListType, list: &[String])
        -> Result<()>;

    async fn upsert_record(&self, record: &JournalRecord) -> Result<()>;

    /// 删除记录及其所有子记录
    async fn delete_record(&self, path: &str) -> Result<()>;

    /// 加载完整快照
    async fn snapshot(&self) -> Result<JournalSnapshot> {
        let records = self.load_records().await?;
        let fingerprint = self.data_fingerprint().await?;
        Ok(JournalSnapshot::new(records, fingerprint))
    }
}

/// 基于 SQLite 的同步日志
pub struct SqliteJournal {
    db: SqlitePool,
}

impl SqliteJournal {
    /// 打开（必要时创建）日志数据库并执行迁移
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DiscoveryError::Journal(e.to_string()))?;
        }
        // Windows 路径需要转换反斜杠为正斜杠
        let db_path = path
            .to_str()
            .ok_or_else(|| DiscoveryError::Journal(format!("无效的日志路径: {:?}", path)))?
            .replace('\\', "/");

        let db = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(&format!("sqlite:{}?mode=rwc", db_path))
            .await?;
        Self::from_pool(db).await
    }

    /// 内存数据库，仅在单连接下有效
    pub async fn in_memory() -> Result<Self> {
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::from_pool(db).await
    }

    async fn from_pool(db: SqlitePool) -> Result<Self> {
        sqlx::migrate!("./migrations").run(&db).await?;
        info!("同步日志已就绪");
        Ok(Self { db })
    }

    pub async fn close(&self) {
        self.db.close().await;
    }
}

#[async_trait]
impl SyncJournal for SqliteJournal {
    async fn load_records(&self) -> Result<Vec<JournalRecord>> {
        let rows = sqlx::query_as::<_, JournalRow>(
            "SELECT path, item_type, etag, file_id, inode, modtime, size, checksum, remote_perm, pin_state
             FROM journal_records ORDER BY path",
        )
        .fetch_all(&self.db)
        .await?;
        debug!("加载 {} 条日志记录", rows.len());
        Ok(rows.into_iter().map(JournalRecord::from).collect())
    }

    async fn data_fingerprint(&self) -> Result<String> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM journal_meta WHERE key = ?")
                .bind(DATA_FINGERPRINT_KEY)
                .fetch_optional(&self.db)
                .await?;
        Ok(value.unwrap_or_default())
    }

    async fn set_data_fingerprint(&self, fingerprint: &str) -> Result<()> {
        sqlx::query(
            r#"INSERT INTO journal_meta (key, value) VALUES (?, ?)
               ON CONFLICT(key) DO UPDATE SET value = excluded.value"#,
        )
        .bind(DATA_FINGERPRINT_KEY)
        .bind(fingerprint)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    async fn selective_sync_list(&self, kind: SelectiveSyncListType) -> Result<Vec<String>> {
        let list: Vec<String> =
            sqlx::query_scalar("SELECT path FROM selective_sync WHERE list_type = ? ORDER BY path")
                .bind(kind.as_str())
                .fetch_all(&self.db)
                .await?;
        Ok(list)
    }

    async fn set_selective_sync_list(
        &self,
        kind: SelectiveSyncListType,
        list: &[String],
    ) -> Result<()> {
        let mut tx = self.db.begin().await?;
        sqlx::query("DELETE FROM selective_sync WHERE list_type = ?")
            .bind(kind.as_str())
            .execute(&mut *tx)
            .await?;
        for path in list {
            sqlx::query("INSERT OR IGNORE INTO selective_sync (list_type, path) VALUES (?, ?)")
                .bind(kind.as_str())
                .bind(path)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn upsert_record(&self, record: &JournalRecord) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"INSERT INTO journal_records
                   (path, parent, item_type, etag, file_id, inode, modtime, size, checksum, remote_perm, pin_state, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(path) DO UPDATE SET
                   item_type = excluded.item_type,
                   etag = excluded.etag,
                   file_id = excluded.file_id,
                   inode = excluded.inode,
                   modtime = excluded.modtime,
                   size = excluded.size,
                   checksum = excluded.checksum,
                   remote_perm = excluded.remote_perm,
                   pin_state = excluded.pin_state,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&record.path)
        .bind(record.parent())
        .bind(record.item_type.as_str())
        .bind(&record.etag)
        .bind(&record.file_id)
        .bind(record.inode as i64)
        .bind(record.modtime)
        .bind(record.size as i64)
        .bind(&record.checksum)
        .bind(record.remote_perm.to_string())
        .bind(record.pin_state.map(|p| p.as_str()))
        .bind(now)
        .execute(&self.db)
        .await?;

        Ok(())
    }

    async fn delete_record(&self, path: &str) -> Result<()> {
        sqlx::query("DELETE FROM journal_records WHERE path = ? OR path LIKE ? ESCAPE '\\'")
            .bind(path)
            .bind(format!("{}/%", escape_like(path)))
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::pinstate::PinState;
    use crate::core::records::{ItemType, RemotePermissions};

    fn record(path: &str) -> JournalRecord {
        JournalRecord {
            path: path.into(),
            item_type: ItemType::File,
            etag: "E1".into(),
            file_id: "id1".into(),
            inode: 7,
            modtime: 100,
            size: 3,
            checksum: Some("BLAKE3:abc".into()),
            remote_perm: RemotePermissions::parse("WDNV"),
            pin_state: Some(PinState::OnlineOnly),
        }
    }

    #[tokio::test]
    async fn test_sqlite_journal_roundtrip() {
        let journal = SqliteJournal::in_memory().await.unwrap();
        journal.upsert_record(&record("d/a_1.txt")).await.unwrap();
        journal.upsert_record(&record("d/b.txt")).await.unwrap();
        journal.upsert_record(&record("da_1.txt")).await.unwrap();

        let records = journal.load_records().await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], record("d/a_1.txt"));

        journal.delete_record("d").await.unwrap();
        let records = journal.load_records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path, "da_1.txt");
    }

    #[tokio::test]
    async fn test_sqlite_journal_meta_and_lists() {
        let journal = SqliteJournal::in_memory().await.unwrap();
        assert_eq!(journal.data_fingerprint().await.unwrap(), "");
        journal.set_data_fingerprint("fp1").await.unwrap();
        journal.set_data_fingerprint("fp2").await.unwrap();
        assert_eq!(journal.data_fingerprint().await.unwrap(), "fp2");

        let list = vec!["b/".to_string(), "a/".to_string()];
        journal
            .set_selective_sync_list(SelectiveSyncListType::BlackList, &list)
            .await
            .unwrap();
        let loaded = journal
            .selective_sync_list(SelectiveSyncListType::BlackList)
            .await
            .unwrap();
        assert_eq!(loaded, vec!["a/".to_string(), "b/".to_string()]);
        assert!(journal
            .selective_sync_list(SelectiveSyncListType::WhiteList)
            .await
            .unwrap()
            .is_empty());

        let snapshot = journal.snapshot().await.unwrap();
        assert_eq!(snapshot.data_fingerprint(), "fp2");
    }

    #[tokio::test]
    async fn test_memory_journal_delete_removes_subtree() {
        let journal = MemoryJournal::with_records(vec![record("d"), record("d/x"), record("dx")]);
        journal.delete_record("d").await.unwrap();
        let paths: Vec<String> = journal
            .load_records()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.path)
            .collect();
        assert_eq!(paths, vec!["dx".to_string()]);
    }
}
