//! 内存中的同步日志，用于测试和一次性运行

use super::{JournalRecord, JournalSnapshot, SyncJournal};
use crate::core::selective::SelectiveSyncListType;
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::Mutex;

#[derive(Debug, Default)]
struct JournalData {
    records: BTreeMap<String, JournalRecord>,
    data_fingerprint: String,
    black_list: Vec<String>,
    white_list: Vec<String>,
}

#[derive(Debug, Default)]
pub struct MemoryJournal {
    data: Mutex<JournalData>,
}

impl MemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: impl IntoIterator<Item = JournalRecord>) -> Self {
        let data = JournalData {
            records: records.into_iter().map(|r| (r.path.clone(), r)).collect(),
            ..Default::default()
        };
        Self {
            data: Mutex::new(data),
        }
    }
}

#[async_trait]
impl SyncJournal for MemoryJournal {
    async fn load_records(&self) -> Result<Vec<JournalRecord>> {
        Ok(self.data.lock().await.records.values().cloned().collect())
    }

    async fn data_fingerprint(&self) -> Result<String> {
        Ok(self.data.lock().await.data_fingerprint.clone())
    }

    async fn set_data_fingerprint(&self, fingerprint: &str) -> Result<()> {
        self.data.lock().await.data_fingerprint = fingerprint.to_string();
        Ok(())
    }

    async fn selective_sync_list(&self, kind: SelectiveSyncListType) -> Result<Vec<String>> {
        let data = self.data.lock().await;
        Ok(match kind {
            SelectiveSyncListType::BlackList => data.black_list.clone(),
            SelectiveSyncListType::WhiteList => data.white_list.clone(),
        })
    }

    async fn set_selective_sync_list(
        &self,
        kind: SelectiveSyncListType,
        list: &[String],
    ) -> Result<()> {
        let mut data = self.data.lock().await;
        match kind {
            SelectiveSyncListType::BlackList => data.black_list = list.to_vec(),
            SelectiveSyncListType::WhiteList => data.white_list = list.to_vec(),
        }
        Ok(())
    }

    async fn upsert_record(&self, record: &JournalRecord) -> Result<()> {
        self.data
            .lock()
            .await
            .records
            .insert(record.path.clone(), record.clone());
        Ok(())
    }

    async fn delete_record(&self, path: &str) -> Result<()> {
        let mut data = self.data.lock().await;
        let prefix = format!("{}/", path);
        data.records
            .retain(|p, _| p != path && !p.starts_with(&prefix));
        Ok(())
    }

    async fn snapshot(&self) -> Result<JournalSnapshot> {
        let data = self.data.lock().await;
        Ok(JournalSnapshot::new(
            data.records.values().cloned().collect(),
            data.data_fingerprint.clone(),
        ))
    }
}
