//! Backing store interface and record source.
//!
//! The store owns [`UserRecord`]s. Pipelines read them as a lazy, ordered
//! stream fetched page by page with keyset pagination, so records the ticket
//! sink marks as assigned mid-run do not shift later pages.

mod json_file;
mod memory;

pub use json_file::JsonFileUserStore;
pub use memory::InMemoryUserStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};

use crate::errors::StoreError;
use crate::records::{ApplicationStatus, UserRecord};

/// Lazy, ordered stream of records.
pub type RecordStream<'a> = BoxStream<'a, Result<UserRecord, StoreError>>;

/// Default number of records fetched per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Sort order for a record query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrder {
    /// By internal id.
    #[default]
    AllUsers,
    /// By submission time, unsubmitted last, ties broken by internal id.
    TicketAssignment,
}

/// Position of a record within a [`RecordOrder`]. Totally ordered.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SortKey {
    unsubmitted: bool,
    submitted_at: Option<DateTime<Utc>>,
    id: String,
}

impl SortKey {
    /// Computes the key of `record` under `order`.
    #[must_use]
    pub fn of(record: &UserRecord, order: RecordOrder) -> Self {
        match order {
            RecordOrder::AllUsers => Self {
                unsubmitted: false,
                submitted_at: None,
                id: record.id.clone(),
            },
            RecordOrder::TicketAssignment => Self {
                unsubmitted: record.submitted_at.is_none(),
                submitted_at: record.submitted_at,
                id: record.id.clone(),
            },
        }
    }
}

/// Which records to read, and in what order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordQuery {
    /// Sort order.
    pub order: RecordOrder,
    /// Only records in one of these statuses. `None` means any status.
    pub statuses: Option<Vec<ApplicationStatus>>,
    /// Only records without a ticket.
    pub unassigned_only: bool,
    /// Records fetched per page.
    pub page_size: usize,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self::all_users()
    }
}

impl RecordQuery {
    /// Every user, by id.
    #[must_use]
    pub fn all_users() -> Self {
        Self {
            order: RecordOrder::AllUsers,
            statuses: None,
            unassigned_only: false,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Accepted users without a ticket, in ticket-assignment order.
    #[must_use]
    pub fn ticket_assignment() -> Self {
        Self {
            order: RecordOrder::TicketAssignment,
            statuses: Some(vec![ApplicationStatus::Accepted]),
            unassigned_only: true,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Restricts to the given statuses.
    #[must_use]
    pub fn with_statuses(mut self, statuses: Vec<ApplicationStatus>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Returns true if `record` satisfies the query's filters.
    #[must_use]
    pub fn matches(&self, record: &UserRecord) -> bool {
        if self.unassigned_only && record.ticket.is_assigned() {
            return false;
        }
        self.statuses
            .as_ref()
            .map_or(true, |s| s.contains(&record.application_status))
    }

    /// Selects one page from an unordered set of records: sorts the matches,
    /// skips everything up to and including `after`, keeps `page_size`.
    #[must_use]
    pub fn select_page<'a, I>(&self, records: I, after: Option<&SortKey>) -> Vec<UserRecord>
    where
        I: IntoIterator<Item = &'a UserRecord>,
    {
        let mut keyed: Vec<(SortKey, &UserRecord)> = records
            .into_iter()
            .filter(|r| self.matches(r))
            .map(|r| (SortKey::of(r, self.order), r))
            .filter(|(key, _)| after.map_or(true, |a| key > a))
            .collect();
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        keyed
            .into_iter()
            .take(self.page_size.max(1))
            .map(|(_, r)| r.clone())
            .collect()
    }
}

/// The persistent home of user records.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fetches up to `query.page_size` matching records positioned after
    /// `after`, in query order.
    async fn fetch_page(
        &self,
        query: &RecordQuery,
        after: Option<&SortKey>,
    ) -> Result<Vec<UserRecord>, StoreError>;

    /// Number of tickets assigned so far.
    ///
    /// Fails with [`StoreError::Corrupt`] if the assigned sequence numbers are
    /// not exactly `1..=count`.
    async fn assigned_ticket_count(&self) -> Result<u64, StoreError>;

    /// Persists ticket `sequence` against `user_id`.
    ///
    /// Refuses with [`StoreError::Conflict`] if the user already holds a
    /// ticket, does not exist, or the sequence number is taken.
    async fn mark_ticket_assigned(&self, user_id: &str, sequence: u64) -> Result<(), StoreError>;

    /// Streams every matching record in query order, one page at a time.
    ///
    /// Not resumable mid-stream: to restart, call again.
    fn records(&self, query: RecordQuery) -> RecordStream<'_> {
        let pages = stream::try_unfold(
            (None::<SortKey>, false),
            move |(after, finished)| {
                let query = query.clone();
                async move {
                    if finished {
                        return Ok::<_, StoreError>(None);
                    }
                    let page = self.fetch_page(&query, after.as_ref()).await?;
                    if page.is_empty() {
                        return Ok(None);
                    }
                    let last = page.last().map(|r| SortKey::of(r, query.order));
                    let finished = page.len() < query.page_size;
                    Ok(Some((page, (last, finished))))
                }
            },
        );

        pages
            .map_ok(|page| stream::iter(page.into_iter().map(Ok::<UserRecord, StoreError>)))
            .try_flatten()
            .boxed()
    }
}

/// Checks that assigned sequence numbers are exactly `1..=n` and returns `n`.
pub(crate) fn contiguous_assigned_count<'a, I>(records: I) -> Result<u64, StoreError>
where
    I: IntoIterator<Item = &'a UserRecord>,
{
    let mut sequences: Vec<u64> = records
        .into_iter()
        .filter_map(|r| r.ticket.sequence())
        .collect();
    sequences.sort_unstable();

    for (expected, actual) in (1u64..).zip(sequences.iter()) {
        if *actual != expected {
            return Err(StoreError::Corrupt(format!(
                "ticket sequence numbers are not contiguous: expected {expected}, found {actual}"
            )));
        }
    }
    Ok(sequences.len() as u64)
}

/// Applies a ticket assignment to an in-memory record set.
pub(crate) fn apply_assignment(
    records: &mut [UserRecord],
    user_id: &str,
    sequence: u64,
) -> Result<(), StoreError> {
    if sequence == 0 {
        return Err(StoreError::conflict(user_id, "sequence numbers start at 1"));
    }
    if records.iter().any(|r| r.ticket.sequence() == Some(sequence)) {
        return Err(StoreError::conflict(
            user_id,
            format!("sequence {sequence} is already assigned"),
        ));
    }
    let record = records
        .iter_mut()
        .find(|r| r.id == user_id)
        .ok_or_else(|| StoreError::conflict(user_id, "no such user"))?;
    if let Some(existing) = record.ticket.sequence() {
        return Err(StoreError::conflict(
            user_id,
            format!("already holds ticket {existing}"),
        ));
    }
    record.ticket = crate::records::TicketMarker::Assigned { sequence };
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TicketMarker;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, minute, 0).unwrap()
    }

    #[test]
    fn test_ticket_order_is_total() {
        let late = UserRecord::new("a", "kc-a", "a@x").with_submitted_at(at(30));
        let early_b = UserRecord::new("b", "kc-b", "b@x").with_submitted_at(at(5));
        let early_c = UserRecord::new("c", "kc-c", "c@x").with_submitted_at(at(5));
        let never = UserRecord::new("0", "kc-0", "0@x");

        let order = RecordOrder::TicketAssignment;
        let mut keys = vec![
            SortKey::of(&never, order),
            SortKey::of(&late, order),
            SortKey::of(&early_c, order),
            SortKey::of(&early_b, order),
        ];
        keys.sort();
        let ids: Vec<_> = keys.iter().map(|k| k.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "a", "0"]);
    }

    #[test]
    fn test_query_matches() {
        let query = RecordQuery::ticket_assignment();
        let accepted = UserRecord::new("a", "kc", "a@x").with_status(ApplicationStatus::Accepted);
        let assigned = accepted
            .clone()
            .with_ticket(TicketMarker::Assigned { sequence: 1 });
        let rejected = UserRecord::new("r", "kc", "r@x").with_status(ApplicationStatus::Rejected);

        assert!(query.matches(&accepted));
        assert!(!query.matches(&assigned));
        assert!(!query.matches(&rejected));
        assert!(RecordQuery::all_users().matches(&rejected));
    }

    #[test]
    fn test_select_page_keyset() {
        let records: Vec<_> = ["d", "b", "a", "c"]
            .iter()
            .map(|id| UserRecord::new(*id, "kc", "x@x"))
            .collect();
        let query = RecordQuery::all_users().with_page_size(2);

        let first = query.select_page(&records, None);
        assert_eq!(first.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);

        let cursor = SortKey::of(&first[1], query.order);
        let second = query.select_page(&records, Some(&cursor));
        assert_eq!(second.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["c", "d"]);
    }

    #[test]
    fn test_contiguous_assigned_count() {
        let ok = vec![
            UserRecord::new("a", "kc", "x").with_ticket(TicketMarker::Assigned { sequence: 2 }),
            UserRecord::new("b", "kc", "x").with_ticket(TicketMarker::Assigned { sequence: 1 }),
            UserRecord::new("c", "kc", "x"),
        ];
        assert_eq!(contiguous_assigned_count(&ok).unwrap(), 2);

        let gap = vec![
            UserRecord::new("a", "kc", "x").with_ticket(TicketMarker::Assigned { sequence: 1 }),
            UserRecord::new("b", "kc", "x").with_ticket(TicketMarker::Assigned { sequence: 3 }),
        ];
        assert!(matches!(contiguous_assigned_count(&gap), Err(StoreError::Corrupt(_))));
    }

    #[test]
    fn test_apply_assignment_conflicts() {
        let mut records = vec![
            UserRecord::new("a", "kc", "x").with_ticket(TicketMarker::Assigned { sequence: 1 }),
            UserRecord::new("b", "kc", "x"),
        ];

        assert!(apply_assignment(&mut records, "a", 2).unwrap_err().is_record_scoped());
        assert!(apply_assignment(&mut records, "b", 1).unwrap_err().is_record_scoped());
        assert!(apply_assignment(&mut records, "zzz", 2).unwrap_err().is_record_scoped());
        apply_assignment(&mut records, "b", 2).unwrap();
        assert_eq!(records[1].ticket.sequence(), Some(2));
    }

    #[tokio::test]
    async fn test_records_stream_surfaces_fetch_error() {
        let store = crate::testing::FlakyStore::new(InMemoryUserStore::with_records(vec![
            UserRecord::new("a", "kc-a", "a@x"),
        ]))
        .unavailable();

        let pulled: Vec<Result<UserRecord, StoreError>> =
            store.records(RecordQuery::all_users()).collect().await;

        assert_eq!(pulled.len(), 1);
        assert!(matches!(pulled[0], Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_records_stream_ends_on_short_page() {
        let store = InMemoryUserStore::with_records(
            (0..5).map(|i| UserRecord::new(format!("u{i}"), "kc", "x")).collect(),
        );

        let ids: Vec<String> = store
            .records(RecordQuery::all_users().with_page_size(2))
            .map_ok(|r| r.id)
            .try_collect()
            .await
            .unwrap();

        assert_eq!(ids, vec!["u0", "u1", "u2", "u3", "u4"]);
    }
}
