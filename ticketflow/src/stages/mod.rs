//! Record stages.
//!
//! A stage consumes one record and either emits it, possibly changed, or
//! drops it. Per-record problems are reported in the [`StageOutcome`];
//! returning `Err` aborts the whole run.

mod augment;
mod filter;
mod projection;

pub use augment::{AugmentationStage, MissingIdentityPolicy};
pub use filter::{EligibilityFilter, EligibilityPolicy};
pub use projection::{Attribute, AttributeProjection, ProjectionStage};

use async_trait::async_trait;
use std::fmt::Debug;

use crate::errors::{RecordFailure, TicketflowError};
use crate::records::AugmentedRecord;

/// What a stage did with a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// Pass the record downstream.
    Emit {
        /// The record to pass on.
        record: AugmentedRecord,
        /// Set when the record is passed on despite a per-record failure.
        degraded: Option<RecordFailure>,
    },
    /// Stop processing the record.
    Drop {
        /// Internal user id.
        user_id: String,
        /// Why it was dropped.
        reason: String,
        /// Set when the drop was caused by a per-record failure.
        failure: Option<RecordFailure>,
    },
}

impl StageOutcome {
    /// Emits a record unchanged in status.
    #[must_use]
    pub fn emit(record: AugmentedRecord) -> Self {
        Self::Emit {
            record,
            degraded: None,
        }
    }

    /// Emits a record after a per-record failure.
    #[must_use]
    pub fn emit_degraded(record: AugmentedRecord, failure: RecordFailure) -> Self {
        Self::Emit {
            record,
            degraded: Some(failure),
        }
    }

    /// Drops a record that did not qualify.
    #[must_use]
    pub fn drop_record(user_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Drop {
            user_id: user_id.into(),
            reason: reason.into(),
            failure: None,
        }
    }

    /// Drops a record because of a per-record failure.
    #[must_use]
    pub fn drop_failed(failure: RecordFailure) -> Self {
        Self::Drop {
            user_id: failure.user_id.clone(),
            reason: failure.error.clone(),
            failure: Some(failure),
        }
    }

    /// Returns true if the record continues downstream.
    #[must_use]
    pub fn is_emit(&self) -> bool {
        matches!(self, Self::Emit { .. })
    }

    /// Returns the emitted record, if any.
    #[must_use]
    pub fn into_record(self) -> Option<AugmentedRecord> {
        match self {
            Self::Emit { record, .. } => Some(record),
            Self::Drop { .. } => None,
        }
    }
}

/// A transform step between the source and the sink.
#[async_trait]
pub trait RecordStage: Send + Sync + Debug {
    /// Returns the name of the stage.
    fn name(&self) -> &str;

    /// Processes one record.
    async fn process(&self, record: AugmentedRecord) -> Result<StageOutcome, TicketflowError>;
}

/// A stage built from a synchronous closure.
pub struct FnStage<F>
where
    F: Fn(AugmentedRecord) -> StageOutcome + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> FnStage<F>
where
    F: Fn(AugmentedRecord) -> StageOutcome + Send + Sync,
{
    /// Creates a new function-based stage.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

impl<F> Debug for FnStage<F>
where
    F: Fn(AugmentedRecord) -> StageOutcome + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> RecordStage for FnStage<F>
where
    F: Fn(AugmentedRecord) -> StageOutcome + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, record: AugmentedRecord) -> Result<StageOutcome, TicketflowError> {
        Ok((self.func)(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::FailureClass;
    use crate::records::UserRecord;

    fn record(id: &str) -> AugmentedRecord {
        UserRecord::new(id, format!("kc-{id}"), format!("{id}@x")).into()
    }

    #[tokio::test]
    async fn test_fn_stage() {
        let stage = FnStage::new("odd-only", |r: AugmentedRecord| {
            if r.user_id().ends_with('1') {
                StageOutcome::emit(r)
            } else {
                StageOutcome::drop_record(r.user_id(), "even")
            }
        });

        assert_eq!(stage.name(), "odd-only");
        assert!(stage.process(record("u1")).await.unwrap().is_emit());
        assert!(!stage.process(record("u2")).await.unwrap().is_emit());
    }

    #[test]
    fn test_drop_failed_carries_user() {
        let failure = RecordFailure::new("augment", "u9", FailureClass::Permanent, "not found");
        match StageOutcome::drop_failed(failure) {
            StageOutcome::Drop { user_id, failure, .. } => {
                assert_eq!(user_id, "u9");
                assert!(failure.is_some());
            }
            StageOutcome::Emit { .. } => panic!("expected drop"),
        }
    }

    #[test]
    fn test_into_record() {
        assert!(StageOutcome::emit(record("u1")).into_record().is_some());
        assert!(StageOutcome::drop_record("u1", "x").into_record().is_none());
    }
}
