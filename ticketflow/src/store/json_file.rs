//! User store persisted as a JSON snapshot on disk.
//!
//! Every assignment rewrites the snapshot through a temporary file and a
//! rename, so a crash leaves either the previous or the new snapshot.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::{apply_assignment, contiguous_assigned_count, RecordQuery, SortKey, UserStore};
use crate::errors::StoreError;
use crate::records::UserRecord;

/// A [`UserStore`] backed by a JSON array of records in one file.
#[derive(Debug)]
pub struct JsonFileUserStore {
    path: PathBuf,
    records: Mutex<Vec<UserRecord>>,
}

impl JsonFileUserStore {
    /// Opens the snapshot at `path`.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let bytes = tokio::fs::read(&path).await.map_err(|e| {
            StoreError::Unavailable(format!("cannot read {}: {e}", path.display()))
        })?;
        let records: Vec<UserRecord> = serde_json::from_slice(&bytes)
            .map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))?;

        debug!(path = %path.display(), records = records.len(), "Opened user store");

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    /// Writes `records` to a new snapshot file at `path`.
    pub async fn create(path: impl AsRef<Path>, records: Vec<UserRecord>) -> Result<Self, StoreError> {
        let store = Self {
            path: path.as_ref().to_path_buf(),
            records: Mutex::new(records),
        };
        {
            let records = store.records.lock().await;
            store.persist(&records).await?;
        }
        Ok(store)
    }

    /// Path of the snapshot file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns a copy of every record.
    pub async fn snapshot(&self) -> Vec<UserRecord> {
        self.records.lock().await.clone()
    }

    async fn persist(&self, records: &[UserRecord]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl UserStore for JsonFileUserStore {
    async fn fetch_page(
        &self,
        query: &RecordQuery,
        after: Option<&SortKey>,
    ) -> Result<Vec<UserRecord>, StoreError> {
        let records = self.records.lock().await;
        Ok(query.select_page(records.iter(), after))
    }

    async fn assigned_ticket_count(&self) -> Result<u64, StoreError> {
        let records = self.records.lock().await;
        contiguous_assigned_count(records.iter())
    }

    async fn mark_ticket_assigned(&self, user_id: &str, sequence: u64) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let mut updated = records.clone();
        apply_assignment(&mut updated, user_id, sequence)?;
        self.persist(&updated).await?;
        *records = updated;
        Ok(())
    }
}
