//! Ticket assignment sink.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use super::{MailDelivery, RecordSink, SinkCounter, SinkOutcome};
use crate::errors::{FailureClass, RecordFailure, TicketflowError};
use crate::records::{AugmentedRecord, TicketMarker};
use crate::store::UserStore;

/// Assigns the next ticket number to each record, persists it, then sends a
/// confirmation.
///
/// The persisted assignment is authoritative. If the write fails nothing is
/// counted and no mail goes out; if the mail fails after the write, the
/// ticket still counts and the failure is reported alongside. Assumes it is
/// the only writer of ticket state for the duration of the run.
pub struct TicketAssignerSink {
    name: String,
    store: Arc<dyn UserStore>,
    delivery: MailDelivery,
    offset: u64,
    counter: SinkCounter,
    assigned: HashSet<String>,
    mail_failures: u64,
}

impl std::fmt::Debug for TicketAssignerSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TicketAssignerSink")
            .field("offset", &self.offset)
            .field("counter", &self.counter)
            .field("mail_failures", &self.mail_failures)
            .finish_non_exhaustive()
    }
}

impl TicketAssignerSink {
    /// Creates a sink that continues numbering after `offset` tickets.
    ///
    /// `offset` must be the store's current assigned count, read right
    /// before the run starts.
    pub fn new(store: Arc<dyn UserStore>, delivery: MailDelivery, offset: u64) -> Self {
        Self {
            name: "tickets".to_string(),
            store,
            delivery,
            offset,
            counter: SinkCounter::new(),
            assigned: HashSet::new(),
            mail_failures: 0,
        }
    }

    /// Tickets already assigned before this run.
    #[must_use]
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Offset plus tickets assigned in this run.
    #[must_use]
    pub fn total_assigned_ticket_count(&self) -> u64 {
        self.offset + self.counter.get()
    }

    /// Confirmation mails that could not be sent for assigned tickets.
    #[must_use]
    pub fn mail_failures(&self) -> u64 {
        self.mail_failures
    }

    fn next_sequence(&self) -> u64 {
        self.total_assigned_ticket_count() + 1
    }
}

#[async_trait]
impl RecordSink for TicketAssignerSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&mut self, mut record: AugmentedRecord) -> Result<SinkOutcome, TicketflowError> {
        let user_id = record.user_id().to_string();
        if self.assigned.contains(&user_id) {
            return Ok(SinkOutcome::skipped("ticket already assigned in this run"));
        }

        let sequence = self.next_sequence();
        if let Err(err) = self.store.mark_ticket_assigned(&user_id, sequence).await {
            if !err.is_record_scoped() {
                return Err(err.into());
            }
            warn!(user_id = %user_id, sequence, error = %err, "Ticket not assigned");
            return Ok(SinkOutcome::failed(RecordFailure::new(
                &self.name,
                &user_id,
                FailureClass::Permanent,
                err.to_string(),
            )));
        }

        self.counter.increment();
        self.assigned.insert(user_id.clone());
        record.record.ticket = TicketMarker::Assigned { sequence };
        info!(user_id = %user_id, sequence, "Ticket assigned");

        match self.delivery.deliver(&self.name, &record).await {
            Ok(()) => Ok(SinkOutcome::committed()),
            Err(failure) => {
                self.mail_failures += 1;
                warn!(
                    user_id = %user_id,
                    sequence,
                    error = %failure.error,
                    "Ticket assigned but confirmation not sent"
                );
                Ok(SinkOutcome::Committed {
                    failure: Some(failure),
                })
            }
        }
    }

    fn count(&self) -> u64 {
        self.counter.get()
    }
}
