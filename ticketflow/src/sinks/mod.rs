//! Terminal stages that perform side effects.
//!
//! A sink owns the authoritative count for its run. The count is bumped once
//! per committed side effect and is never decremented. For the ticket and
//! mail sinks the effect is durable when counted. The export sink counts a
//! row once it is handed to the CSV writer; rows are durable after `finish`.

mod export;
mod mailer;
mod tickets;

pub use export::CsvExportSink;
pub use mailer::{MailDelivery, ReminderMailerSink, DEFAULT_SEND_TIMEOUT};
pub use tickets::TicketAssignerSink;

use async_trait::async_trait;

use crate::errors::{RecordFailure, TicketflowError};
use crate::records::AugmentedRecord;

/// What a sink did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkOutcome {
    /// The side effect was committed and counted.
    Committed {
        /// Set when a secondary effect failed after the commit, e.g. the
        /// confirmation mail for an assigned ticket.
        failure: Option<RecordFailure>,
    },
    /// Nothing was committed for this record.
    Skipped {
        /// Why.
        reason: String,
        /// Set when the skip was caused by a per-record failure.
        failure: Option<RecordFailure>,
    },
}

impl SinkOutcome {
    /// A clean commit.
    #[must_use]
    pub fn committed() -> Self {
        Self::Committed { failure: None }
    }

    /// A skip without failure, e.g. a duplicate.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self::Skipped {
            reason: reason.into(),
            failure: None,
        }
    }

    /// A skip caused by a per-record failure.
    #[must_use]
    pub fn failed(failure: RecordFailure) -> Self {
        Self::Skipped {
            reason: failure.error.clone(),
            failure: Some(failure),
        }
    }

    /// Returns true if the side effect was committed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        matches!(self, Self::Committed { .. })
    }

    /// Returns the per-record failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&RecordFailure> {
        match self {
            Self::Committed { failure } | Self::Skipped { failure, .. } => failure.as_ref(),
        }
    }
}

/// Terminal consumer of records.
///
/// `consume` returns `Err` only for pipeline-fatal problems; the count must
/// then still reflect every effect committed before the error.
#[async_trait]
pub trait RecordSink: Send {
    /// Returns the name of the sink.
    fn name(&self) -> &str;

    /// Performs the side effect for one record.
    async fn consume(&mut self, record: AugmentedRecord) -> Result<SinkOutcome, TicketflowError>;

    /// Number of side effects committed so far in this run.
    fn count(&self) -> u64;

    /// Called once after the last record, including after cancellation.
    async fn finish(&mut self) -> Result<(), TicketflowError> {
        Ok(())
    }
}

/// Monotonic count of committed side effects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkCounter(u64);

impl SinkCounter {
    /// Creates a zeroed counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one committed effect and returns the new value.
    pub fn increment(&mut self) -> u64 {
        self.0 += 1;
        self.0
    }

    /// Current value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}
