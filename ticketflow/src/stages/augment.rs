//! Identity augmentation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{RecordStage, StageOutcome};
use crate::errors::{FailureClass, IdentityError, RecordFailure, TicketflowError};
use crate::identity::IdentityLookup;
use crate::records::{Augmentation, AugmentedRecord};
use crate::retry::{with_retry, RetryConfig};

/// Per-call timeout used when none is configured.
pub const DEFAULT_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// What to do with a record whose identity could not be confirmed.
///
/// Applied separately to permanent outcomes (not found, refused) and to
/// lookups that still fail transiently after the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingIdentityPolicy {
    /// Emit the record unaugmented.
    #[default]
    PassThrough,
    /// Drop the record.
    Drop,
}

/// Fetches the identity profile for each record and merges it in.
///
/// Transient failures are retried within the configured budget. What happens
/// after that is the exhausted-retry policy: pass the record on as
/// [`Augmentation::Degraded`], or drop it so a later run picks it up again.
/// The stage never returns `Err`.
#[derive(Clone)]
pub struct AugmentationStage {
    name: String,
    lookup: Arc<dyn IdentityLookup>,
    missing: MissingIdentityPolicy,
    exhausted: MissingIdentityPolicy,
    retry: RetryConfig,
    timeout: Duration,
}

impl std::fmt::Debug for AugmentationStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AugmentationStage")
            .field("name", &self.name)
            .field("missing", &self.missing)
            .field("exhausted", &self.exhausted)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl AugmentationStage {
    /// Creates a stage with default policy, retry and timeout.
    pub fn new(lookup: Arc<dyn IdentityLookup>) -> Self {
        Self {
            name: "augment".to_string(),
            lookup,
            missing: MissingIdentityPolicy::default(),
            exhausted: MissingIdentityPolicy::default(),
            retry: RetryConfig::default(),
            timeout: DEFAULT_LOOKUP_TIMEOUT,
        }
    }

    /// Sets the missing-identity policy.
    #[must_use]
    pub fn with_missing_policy(mut self, policy: MissingIdentityPolicy) -> Self {
        self.missing = policy;
        self
    }

    /// Sets what happens once transient failures exhaust the retry budget.
    #[must_use]
    pub fn with_exhausted_policy(mut self, policy: MissingIdentityPolicy) -> Self {
        self.exhausted = policy;
        self
    }

    /// Sets the retry budget for transient failures.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the per-call timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns the missing-identity policy.
    #[must_use]
    pub fn missing_policy(&self) -> MissingIdentityPolicy {
        self.missing
    }

    /// Returns the exhausted-retry policy.
    #[must_use]
    pub fn exhausted_policy(&self) -> MissingIdentityPolicy {
        self.exhausted
    }
}

#[async_trait]
impl RecordStage for AugmentationStage {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, mut record: AugmentedRecord) -> Result<StageOutcome, TicketflowError> {
        let identity_id = record.record.identity_id.clone();
        let id = identity_id.as_str();
        let lookup = self.lookup.as_ref();

        let outcome = with_retry(
            &self.retry,
            id,
            self.timeout,
            move || lookup.lookup(id),
            IdentityError::is_transient,
            |elapsed| IdentityError::Transient(format!("lookup timed out after {}ms", elapsed.as_millis())),
        )
        .await;

        match outcome.result {
            Ok(profile) => {
                debug!(user_id = %record.user_id(), attempts = outcome.attempts, "Identity augmented");
                record.augmentation = Augmentation::Augmented { profile };
                Ok(StageOutcome::emit(record))
            }
            Err(err) if err.is_transient() => {
                warn!(
                    user_id = %record.user_id(),
                    attempts = outcome.attempts,
                    error = %err,
                    policy = ?self.exhausted,
                    "Identity lookup exhausted retries"
                );
                let failure =
                    RecordFailure::new(&self.name, record.user_id(), FailureClass::Transient, err.to_string());
                match self.exhausted {
                    MissingIdentityPolicy::PassThrough => {
                        record.augmentation = Augmentation::Degraded;
                        Ok(StageOutcome::emit_degraded(record, failure))
                    }
                    MissingIdentityPolicy::Drop => Ok(StageOutcome::drop_failed(failure)),
                }
            }
            Err(err) => {
                let failure =
                    RecordFailure::new(&self.name, record.user_id(), FailureClass::Permanent, err.to_string());
                match self.missing {
                    MissingIdentityPolicy::PassThrough => {
                        record.augmentation = Augmentation::Missing;
                        Ok(StageOutcome::emit_degraded(record, failure))
                    }
                    MissingIdentityPolicy::Drop => Ok(StageOutcome::drop_failed(failure)),
                }
            }
        }
    }
}
