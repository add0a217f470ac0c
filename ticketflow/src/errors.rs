//! Error types for the ticketflow pipelines.
//!
//! Errors are split by the collaborator that produced them. Each collaborator
//! error knows whether it is transient, which is what the retry layer keys on.
//! [`TicketflowError`] is the pipeline-fatal error: once a stage or sink returns
//! one, the run aborts and the error is surfaced to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Pipeline-fatal error. Returning this from a stage or sink aborts the run.
#[derive(Debug, Error)]
pub enum TicketflowError {
    /// The backing store failed in a way that is not scoped to one record.
    #[error("{0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded or is inconsistent.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A template required by a sink could not be loaded.
    #[error("{0}")]
    Template(#[from] TemplateError),

    /// A stage was wired in a way the driver cannot execute.
    #[error("Pipeline misconfigured: {0}")]
    Misconfigured(String),

    /// Writing export output failed.
    #[error("Export error: {0}")]
    Export(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<csv::Error> for TicketflowError {
    fn from(err: csv::Error) -> Self {
        Self::Export(err.to_string())
    }
}

/// Errors raised by a [`UserStore`](crate::store::UserStore).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The write conflicts with state already in the store.
    ///
    /// Scoped to a single record: the ticket sink skips the record.
    #[error("Store conflict for user '{user_id}': {reason}")]
    Conflict {
        /// The user the write targeted.
        user_id: String,
        /// Why the write was refused.
        reason: String,
    },

    /// The store cannot be reached.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The persisted data could not be decoded.
    #[error("Store data corrupt: {0}")]
    Corrupt(String),

    /// Reading or writing the persisted data failed.
    #[error("Store IO error: {0}")]
    Io(String),
}

impl StoreError {
    /// Creates a conflict error.
    #[must_use]
    pub fn conflict(user_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            user_id: user_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if the error only affects the record being written.
    #[must_use]
    pub fn is_record_scoped(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Errors raised by an [`IdentityLookup`](crate::identity::IdentityLookup).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The identity provider has no account for this id.
    #[error("Identity not found: {identity_id}")]
    NotFound {
        /// The looked-up identity id.
        identity_id: String,
    },

    /// The identity provider refused the lookup for a non-transient reason.
    #[error("Identity lookup rejected for {identity_id}: {reason}")]
    Rejected {
        /// The looked-up identity id.
        identity_id: String,
        /// Reason reported by the provider.
        reason: String,
    },

    /// Network failure, timeout or server-side error.
    #[error("Identity lookup failed transiently: {0}")]
    Transient(String),
}

impl IdentityError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(identity_id: impl Into<String>) -> Self {
        Self::NotFound {
            identity_id: identity_id.into(),
        }
    }

    /// Creates a rejected error.
    #[must_use]
    pub fn rejected(identity_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            identity_id: identity_id.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors raised by a [`Mailer`](crate::mail::Mailer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MailError {
    /// Network failure, timeout, throttling or server-side error.
    #[error("Mail send failed transiently: {0}")]
    Transient(String),

    /// The provider refused the message.
    #[error("Mail rejected for {recipient}: {reason}")]
    Rejected {
        /// Recipient address.
        recipient: String,
        /// Reason reported by the provider.
        reason: String,
    },
}

impl MailError {
    /// Creates a rejected error.
    #[must_use]
    pub fn rejected(recipient: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            recipient: recipient.into(),
            reason: reason.into(),
        }
    }

    /// Returns true if retrying may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Errors raised by a [`TemplateRenderer`](crate::templates::TemplateRenderer).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    /// No template is registered under this name.
    #[error("Template not found: {0}")]
    Missing(String),

    /// The template source could not be parsed.
    #[error("Template '{name}' is malformed: {reason}")]
    Malformed {
        /// Template name.
        name: String,
        /// Parse failure.
        reason: String,
    },

    /// Loading template sources failed.
    #[error("Template IO error: {0}")]
    Io(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Cannot read config '{path}': {reason}")]
    Read {
        /// Path that was read.
        path: String,
        /// Underlying failure.
        reason: String,
    },

    /// The configuration file is not valid TOML for the schema.
    #[error("Invalid config: {0}")]
    Parse(String),

    /// A secret referenced by name is not present in the environment.
    #[error("Environment variable '{0}' is not set")]
    MissingSecret(String),

    /// A value is present but unusable.
    #[error("Invalid value for '{key}': {reason}")]
    InvalidValue {
        /// Config key.
        key: String,
        /// Why it was refused.
        reason: String,
    },
}

/// How a per-record failure was classified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Retried, then degraded.
    Transient,
    /// Dropped or passed through according to stage policy.
    Permanent,
}

/// A per-record failure that did not abort the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordFailure {
    /// Stage or sink that observed the failure.
    pub stage: String,
    /// Internal user id of the record.
    pub user_id: String,
    /// Classification.
    pub class: FailureClass,
    /// Error message.
    pub error: String,
}

impl RecordFailure {
    /// Creates a new record failure.
    #[must_use]
    pub fn new(
        stage: impl Into<String>,
        user_id: impl Into<String>,
        class: FailureClass,
        error: impl Into<String>,
    ) -> Self {
        Self {
            stage: stage.into(),
            user_id: user_id.into(),
            class,
            error: error.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_is_record_scoped() {
        let err = StoreError::conflict("u1", "already assigned");
        assert!(err.is_record_scoped());
        assert!(err.to_string().contains("u1"));
        assert!(!StoreError::Unavailable("down".into()).is_record_scoped());
    }

    #[test]
    fn test_identity_error_classification() {
        assert!(IdentityError::Transient("timeout".into()).is_transient());
        assert!(!IdentityError::not_found("kc-1").is_transient());
        assert!(!IdentityError::rejected("kc-1", "forbidden").is_transient());
    }

    #[test]
    fn test_mail_error_classification() {
        assert!(MailError::Transient("503".into()).is_transient());
        assert!(!MailError::rejected("a@b.c", "bad address").is_transient());
    }

    #[test]
    fn test_store_error_converts_to_fatal() {
        let err: TicketflowError = StoreError::Unavailable("connection refused".into()).into();
        assert!(matches!(err, TicketflowError::Store(_)));
        assert_eq!(err.to_string(), "Store unavailable: connection refused");
    }

    #[test]
    fn test_record_failure_serializes_class_snake_case() {
        let failure = RecordFailure::new("augment", "u7", FailureClass::Transient, "timeout");
        let value = serde_json::to_value(&failure).unwrap();
        assert_eq!(value["stage"], "augment");
        assert_eq!(value["class"], "transient");
    }
}
