//! The batch jobs: reminder mailing, ticket assignment and partner export.
//!
//! Each job wires a source query, its stages and its sink into one
//! [`Pipeline`] run. Collaborators are injected so the same wiring runs
//! against the real clients and against test doubles.

use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::Arc;
use tracing::info;

use crate::cancellation::CancellationToken;
use crate::config::{self, MailBackend, TicketflowConfig};
use crate::errors::TicketflowError;
use crate::events::{EventSink, LoggingEventSink};
use crate::identity::{IdentityLookup, KeycloakIdentityClient};
use crate::mail::{LogMailer, MailgunMailer, Mailer};
use crate::pipeline::{Pipeline, PipelineReport};
use crate::sinks::{CsvExportSink, MailDelivery, RecordSink, ReminderMailerSink, TicketAssignerSink};
use crate::stages::{AugmentationStage, EligibilityFilter, EligibilityPolicy, ProjectionStage};
use crate::store::{JsonFileUserStore, RecordQuery, UserStore};
use crate::templates::{TemplateRenderer, Templates};

/// Outcome of a ticket assignment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TicketJobReport {
    /// The pipeline run.
    pub report: PipelineReport,
    /// Tickets assigned before the run.
    pub offset: u64,
    /// Tickets assigned in this run.
    pub newly_assigned: u64,
    /// Tickets assigned overall after the run.
    pub total_assigned: u64,
    /// Assigned tickets whose confirmation mail failed.
    pub mail_failures: u64,
}

/// Collaborators and settings shared by every job.
pub struct Jobs {
    config: TicketflowConfig,
    store: Arc<dyn UserStore>,
    identity: Arc<dyn IdentityLookup>,
    mailer: Arc<dyn Mailer>,
    templates: Arc<dyn TemplateRenderer>,
    events: Arc<dyn EventSink>,
    cancel: Arc<CancellationToken>,
}

impl std::fmt::Debug for Jobs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Jobs")
            .field("config", &self.config)
            .field("cancel", &self.cancel)
            .finish_non_exhaustive()
    }
}

impl Jobs {
    /// Wires jobs around explicit collaborators.
    pub fn new(
        config: TicketflowConfig,
        store: Arc<dyn UserStore>,
        identity: Arc<dyn IdentityLookup>,
        mailer: Arc<dyn Mailer>,
        templates: Arc<dyn TemplateRenderer>,
    ) -> Self {
        Self {
            config,
            store,
            identity,
            mailer,
            templates,
            events: Arc::new(LoggingEventSink),
            cancel: Arc::new(CancellationToken::new()),
        }
    }

    /// Builds the production collaborators described by `config`.
    ///
    /// Opens the JSON store, loads the template directory, and reads the
    /// identity token and mail key from the environment.
    pub async fn from_config(config: TicketflowConfig) -> Result<Self, TicketflowError> {
        let store = JsonFileUserStore::open(&config.store.path).await?;
        let templates = Templates::load_dir(&config.templates.dir).await?;
        info!(
            store = %config.store.path.display(),
            templates = templates.len(),
            "Loaded store and templates"
        );

        let identity = KeycloakIdentityClient::new(
            &config.identity.base_url,
            &config.identity.realm,
            config::secret(&config.identity.token_env)?,
            config.identity.timeout(),
        )?;

        let mailer: Arc<dyn Mailer> = match config.mail.backend {
            MailBackend::Mailgun => Arc::new(MailgunMailer::new(
                &config.mail.api_base,
                &config.mail.domain,
                config::secret(&config.mail.api_key_env)?,
                &config.mail.from,
                config.mail.timeout(),
            )?),
            MailBackend::Log => Arc::new(LogMailer),
        };

        Ok(Self::new(
            config,
            Arc::new(store),
            Arc::new(identity),
            mailer,
            Arc::new(templates),
        ))
    }

    /// Sets where lifecycle events go.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Sets the token that stops a running job between records.
    #[must_use]
    pub fn with_cancellation(mut self, token: Arc<CancellationToken>) -> Self {
        self.cancel = token;
        self
    }

    /// The configuration in use.
    #[must_use]
    pub fn config(&self) -> &TicketflowConfig {
        &self.config
    }

    /// Mails the reminder template to every eligible user.
    ///
    /// The report's `committed` count is the number of mails sent.
    pub async fn run_reminders(&self) -> Result<PipelineReport, TicketflowError> {
        let settings = &self.config.reminders;
        let delivery = self.delivery(&settings.template, &settings.subject)?;
        let mut sink = ReminderMailerSink::new(delivery);

        let mut builder = Pipeline::builder("reminders");
        if settings.eligibility != EligibilityPolicy::AllUsers {
            builder = builder.stage(Arc::new(EligibilityFilter::new(settings.eligibility.clone())))?;
        }
        let pipeline = builder
            .stage(Arc::new(
                self.augmentation()
                    .with_missing_policy(settings.missing_identity)
                    .with_exhausted_policy(settings.unreachable_identity),
            ))?
            .events(self.events.clone())
            .cancellation(self.cancel.clone())
            .build();

        let source = self.store.records(self.query(RecordQuery::all_users()));
        pipeline.run(source, &mut sink).await
    }

    /// Assigns the next ticket numbers to accepted users without one, in
    /// submission order.
    ///
    /// Numbering continues from the store's current assigned count, which is
    /// re-read on every run. Must not run concurrently with another ticket
    /// run against the same store.
    pub async fn run_tickets(&self) -> Result<TicketJobReport, TicketflowError> {
        let settings = &self.config.tickets;
        let offset = self.store.assigned_ticket_count().await?;
        info!(offset, "Resuming ticket numbering");

        let delivery = self.delivery(&settings.template, &settings.subject)?;
        let mut sink = TicketAssignerSink::new(self.store.clone(), delivery, offset);

        let pipeline = Pipeline::builder("tickets")
            .stage(Arc::new(EligibilityFilter::ticket_eligible()))?
            .stage(Arc::new(
                self.augmentation()
                    .with_missing_policy(settings.missing_identity)
                    .with_exhausted_policy(settings.unreachable_identity),
            ))?
            .events(self.events.clone())
            .cancellation(self.cancel.clone())
            .build();

        let source = self.store.records(self.query(RecordQuery::ticket_assignment()));
        let report = pipeline.run(source, &mut sink).await?;

        Ok(TicketJobReport {
            offset,
            newly_assigned: sink.count(),
            total_assigned: sink.total_assigned_ticket_count(),
            mail_failures: sink.mail_failures(),
            report,
        })
    }

    /// Writes the partner export to the configured output file.
    pub async fn run_export(&self) -> Result<PipelineReport, TicketflowError> {
        let projection = self.config.export.projection();
        let mut sink = CsvExportSink::create(&self.config.export.output, &projection)?;
        self.export_into(&mut sink).await
    }

    /// Writes the partner export to `writer` and returns it.
    pub async fn run_export_to<W: Write + Send>(
        &self,
        writer: W,
    ) -> Result<(PipelineReport, W), TicketflowError> {
        let projection = self.config.export.projection();
        let mut sink = CsvExportSink::new(writer, &projection)?;
        let report = self.export_into(&mut sink).await?;
        Ok((report, sink.into_inner()?))
    }

    async fn export_into(&self, sink: &mut dyn RecordSink) -> Result<PipelineReport, TicketflowError> {
        let pipeline = Pipeline::builder("export")
            .stage(Arc::new(self.augmentation()))?
            .stage(Arc::new(ProjectionStage::new(self.config.export.projection())))?
            .events(self.events.clone())
            .cancellation(self.cancel.clone())
            .build();

        let source = self.store.records(self.query(RecordQuery::all_users()));
        pipeline.run(source, sink).await
    }

    fn augmentation(&self) -> AugmentationStage {
        AugmentationStage::new(self.identity.clone())
            .with_retry(self.config.identity.retry.clone())
            .with_timeout(self.config.identity.timeout())
    }

    fn delivery(&self, template: &str, subject: &str) -> Result<MailDelivery, TicketflowError> {
        Ok(MailDelivery::new(self.mailer.clone(), self.templates.clone(), template, subject)?
            .with_retry(self.config.mail.retry.clone())
            .with_timeout(self.config.mail.timeout()))
    }

    fn query(&self, query: RecordQuery) -> RecordQuery {
        query.with_page_size(self.config.store.page_size)
    }
}
