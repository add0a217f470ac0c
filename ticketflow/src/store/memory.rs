//! In-memory user store.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{apply_assignment, contiguous_assigned_count, RecordQuery, SortKey, UserStore};
use crate::errors::StoreError;
use crate::records::UserRecord;

/// A [`UserStore`] held entirely in memory.
#[derive(Debug, Default, Clone)]
pub struct InMemoryUserStore {
    records: Arc<Mutex<Vec<UserRecord>>>,
}

impl InMemoryUserStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `records`.
    #[must_use]
    pub fn with_records(records: Vec<UserRecord>) -> Self {
        Self {
            records: Arc::new(Mutex::new(records)),
        }
    }

    /// Adds a record.
    pub fn insert(&self, record: UserRecord) {
        self.records.lock().push(record);
    }

    /// Returns a copy of a record by id.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<UserRecord> {
        self.records.lock().iter().find(|r| r.id == user_id).cloned()
    }

    /// Returns a copy of every record.
    #[must_use]
    pub fn snapshot(&self) -> Vec<UserRecord> {
        self.records.lock().clone()
    }

    /// Returns the number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// Returns true if the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn fetch_page(
        &self,
        query: &RecordQuery,
        after: Option<&SortKey>,
    ) -> Result<Vec<UserRecord>, StoreError> {
        Ok(query.select_page(self.records.lock().iter(), after))
    }

    async fn assigned_ticket_count(&self) -> Result<u64, StoreError> {
        contiguous_assigned_count(self.records.lock().iter())
    }

    async fn mark_ticket_assigned(&self, user_id: &str, sequence: u64) -> Result<(), StoreError> {
        apply_assignment(&mut self.records.lock(), user_id, sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{ApplicationStatus, TicketMarker};
    use futures::TryStreamExt;

    fn store() -> InMemoryUserStore {
        InMemoryUserStore::with_records(
            (0..7)
                .map(|i| {
                    UserRecord::new(format!("u{i}"), format!("kc-{i}"), format!("u{i}@x"))
                        .with_status(ApplicationStatus::Accepted)
                })
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_records_stream_spans_pages() {
        let store = store();
        let ids: Vec<String> = store
            .records(RecordQuery::all_users().with_page_size(3))
            .map_ok(|r| r.id)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids, vec!["u0", "u1", "u2", "u3", "u4", "u5", "u6"]);
    }

    #[tokio::test]
    async fn test_assignment_mid_stream_does_not_skip_records() {
        let store = store();
        let mut stream = store.records(RecordQuery::ticket_assignment().with_page_size(2));
        let mut seen = Vec::new();
        let mut sequence = 0;

        while let Some(record) = stream.try_next().await.unwrap() {
            sequence += 1;
            store.mark_ticket_assigned(&record.id, sequence).await.unwrap();
            seen.push(record.id);
        }

        assert_eq!(seen.len(), 7);
        assert_eq!(store.assigned_ticket_count().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_mark_ticket_assigned_rejects_duplicates() {
        let store = store();
        store.mark_ticket_assigned("u0", 1).await.unwrap();

        let again = store.mark_ticket_assigned("u0", 2).await.unwrap_err();
        assert!(again.is_record_scoped());
        let reused = store.mark_ticket_assigned("u1", 1).await.unwrap_err();
        assert!(reused.is_record_scoped());

        assert_eq!(store.get("u0").unwrap().ticket, TicketMarker::Assigned { sequence: 1 });
        assert_eq!(store.assigned_ticket_count().await.unwrap(), 1);
    }
}
