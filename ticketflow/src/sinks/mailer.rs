//! Reminder mail sink and the delivery helper shared with the ticket sink.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{RecordSink, SinkCounter, SinkOutcome};
use crate::errors::{FailureClass, MailError, RecordFailure, TemplateError, TicketflowError};
use crate::mail::{MailMessage, Mailer};
use crate::records::AugmentedRecord;
use crate::retry::{with_retry, RetryConfig};
use crate::templates::TemplateRenderer;

/// Per-call timeout used when none is configured.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(15);

/// Renders one template per record and sends it with bounded retry.
#[derive(Clone)]
pub struct MailDelivery {
    mailer: Arc<dyn Mailer>,
    templates: Arc<dyn TemplateRenderer>,
    template: String,
    subject: String,
    retry: RetryConfig,
    timeout: Duration,
}

impl std::fmt::Debug for MailDelivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailDelivery")
            .field("template", &self.template)
            .field("subject", &self.subject)
            .field("retry", &self.retry)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl MailDelivery {
    /// Creates a delivery for `template`.
    ///
    /// Fails if the template is not registered, since every record would
    /// fail the same way.
    pub fn new(
        mailer: Arc<dyn Mailer>,
        templates: Arc<dyn TemplateRenderer>,
        template: impl Into<String>,
        subject: impl Into<String>,
    ) -> Result<Self, TemplateError> {
        let template = template.into();
        if !templates.has_template(&template) {
            return Err(TemplateError::Missing(template));
        }
        Ok(Self {
            mailer,
            templates,
            template,
            subject: subject.into(),
            retry: RetryConfig::default(),
            timeout: DEFAULT_SEND_TIMEOUT,
        })
    }

    /// Sets the retry budget for transient send failures.
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

    /// Template name.
    #[must_use]
    pub fn template(&self) -> &str {
        &self.template
    }

    /// Renders and sends the message for `record`.
    ///
    /// Failures are reported against `stage` and never abort the caller.
    pub async fn deliver(&self, stage: &str, record: &AugmentedRecord) -> Result<(), RecordFailure> {
        let body = self
            .templates
            .render(&self.template, &record.template_data())
            .map_err(|e| RecordFailure::new(stage, record.user_id(), FailureClass::Permanent, e.to_string()))?;
        let message = MailMessage::new(record.recipient(), self.subject.clone(), body);
        let mailer = self.mailer.as_ref();
        let msg = &message;

        let outcome = with_retry(
            &self.retry,
            &message.to,
            self.timeout,
            move || mailer.send(msg),
            MailError::is_transient,
            |elapsed| MailError::Transient(format!("send timed out after {}ms", elapsed.as_millis())),
        )
        .await;

        outcome.result.map_err(|e| {
            let class = if e.is_transient() {
                FailureClass::Transient
            } else {
                FailureClass::Permanent
            };
            RecordFailure::new(stage, record.user_id(), class, e.to_string())
        })
    }
}

/// Sends one reminder per record and counts the sends that succeeded.
///
/// Within a run each user is mailed at most once. A failed send is logged
/// and skipped; it never stops the run and is not counted.
#[derive(Debug)]
pub struct ReminderMailerSink {
    name: String,
    delivery: MailDelivery,
    counter: SinkCounter,
    reminded: HashSet<String>,
}

impl ReminderMailerSink {
    /// Creates a reminder sink.
    #[must_use]
    pub fn new(delivery: MailDelivery) -> Self {
        Self {
            name: "reminders".to_string(),
            delivery,
            counter: SinkCounter::new(),
            reminded: HashSet::new(),
        }
    }
}

#[async_trait]
impl RecordSink for ReminderMailerSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn consume(&mut self, record: AugmentedRecord) -> Result<SinkOutcome, TicketflowError> {
        if self.reminded.contains(record.user_id()) {
            return Ok(SinkOutcome::skipped("already reminded in this run"));
        }

        match self.delivery.deliver(&self.name, &record).await {
            Ok(()) => {
                self.reminded.insert(record.user_id().to_string());
                let count = self.counter.increment();
                info!(user_id = %record.user_id(), count, "Reminder sent");
                Ok(SinkOutcome::committed())
            }
            Err(failure) => {
                warn!(user_id = %record.user_id(), error = %failure.error, "Reminder not sent");
                Ok(SinkOutcome::failed(failure))
            }
        }
    }

    fn count(&self) -> u64 {
        self.counter.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::UserRecord;
    use crate::retry::JitterStrategy;
    use crate::templates::Templates;
    use crate::testing::RecordingMailer;
    use pretty_assertions::assert_eq;

    fn templates() -> Arc<Templates> {
        Arc::new(
            Templates::new()
                .with("reminder", "<p>Hi {{ display_name }}, upload your CV.</p>")
                .unwrap(),
        )
    }

    fn delivery(mailer: Arc<RecordingMailer>) -> MailDelivery {
        MailDelivery::new(mailer, templates(), "reminder", "Reminder")
            .unwrap()
            .with_retry(
                RetryConfig::new()
                    .with_max_attempts(2)
                    .with_base_delay_ms(1)
                    .with_jitter(JitterStrategy::None),
            )
    }

    fn record(id: &str) -> AugmentedRecord {
        UserRecord::new(id, format!("kc-{id}"), format!("{id}@example.com"))
            .with_names("Ada", "Lovelace")
            .into()
    }

    #[test]
    fn test_missing_template_is_rejected_up_front() {
        let err = MailDelivery::new(Arc::new(RecordingMailer::new()), templates(), "nope", "s").unwrap_err();
        assert_eq!(err, TemplateError::Missing("nope".into()));
    }

    #[tokio::test]
    async fn test_sends_rendered_message() {
        let mailer = Arc::new(RecordingMailer::new());
        let mut sink = ReminderMailerSink::new(delivery(mailer.clone()));

        let outcome = sink.consume(record("a")).await.unwrap();

        assert!(outcome.is_committed());
        assert_eq!(sink.count(), 1);
        let sent = mailer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "a@example.com");
        assert_eq!(sent[0].body, "<p>Hi Ada Lovelace, upload your CV.</p>");
    }

    #[tokio::test]
    async fn test_failed_send_is_not_counted() {
        let mailer = Arc::new(RecordingMailer::new().reject("a@example.com"));
        let mut sink = ReminderMailerSink::new(delivery(mailer.clone()));

        let a = sink.consume(record("a")).await.unwrap();
        let b = sink.consume(record("b")).await.unwrap();

        assert_eq!(a.failure().unwrap().class, FailureClass::Permanent);
        assert!(b.is_committed());
        assert_eq!(sink.count(), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let mailer = Arc::new(RecordingMailer::new().fail_transiently("a@example.com", 1));
        let mut sink = ReminderMailerSink::new(delivery(mailer.clone()));

        assert!(sink.consume(record("a")).await.unwrap().is_committed());
        assert_eq!(mailer.attempts(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_user_mailed_once() {
        let mailer = Arc::new(RecordingMailer::new());
        let mut sink = ReminderMailerSink::new(delivery(mailer.clone()));

        sink.consume(record("a")).await.unwrap();
        let again = sink.consume(record("a")).await.unwrap();

        assert!(!again.is_committed());
        assert_eq!(sink.count(), 1);
        assert_eq!(mailer.sent().len(), 1);
    }
}
