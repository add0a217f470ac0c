//! # Ticketflow
//!
//! Resumable batch pipelines over applicant records.
//!
//! A pipeline pulls user records from a store one at a time and passes each
//! through a chain of stages before handing it to a sink:
//!
//! - **Stages** filter records by eligibility, augment them with identity
//!   provider data, and project them to export rows
//! - **Sinks** perform the side effect (a reminder mail, a ticket assignment,
//!   a CSV row) and own the count of effects actually committed
//! - **Jobs** wire the three batch runs from configuration
//!
//! Per-record failures never stop a run; they are retried when transient and
//! reported in the [`pipeline::PipelineReport`]. Store outages and bad
//! configuration abort the run.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use ticketflow::prelude::*;
//!
//! let config = TicketflowConfig::from_env()?;
//! let jobs = Jobs::from_config(config).await?;
//!
//! let tickets = jobs.run_tickets().await?;
//! println!("Assigned {} tickets", tickets.newly_assigned);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod cancellation;
pub mod config;
pub mod errors;
pub mod events;
pub mod identity;
pub mod jobs;
pub mod mail;
pub mod pipeline;
pub mod records;
pub mod retry;
pub mod sinks;
pub mod stages;
pub mod store;
pub mod templates;
pub mod testing;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::TicketflowConfig;
    pub use crate::errors::{
        ConfigError, FailureClass, IdentityError, MailError, RecordFailure, StoreError,
        TemplateError, TicketflowError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink, PipelineEvent};
    pub use crate::identity::{IdentityLookup, KeycloakIdentityClient};
    pub use crate::jobs::{Jobs, TicketJobReport};
    pub use crate::mail::{LogMailer, MailMessage, Mailer, MailgunMailer};
    pub use crate::pipeline::{Pipeline, PipelineBuilder, PipelineReport};
    pub use crate::records::{
        ApplicationStatus, Augmentation, AugmentedRecord, IdentityProfile, TicketMarker, UserRecord,
    };
    pub use crate::retry::RetryConfig;
    pub use crate::sinks::{CsvExportSink, RecordSink, ReminderMailerSink, SinkOutcome, TicketAssignerSink};
    pub use crate::stages::{
        AttributeProjection, AugmentationStage, EligibilityFilter, EligibilityPolicy,
        MissingIdentityPolicy, ProjectionStage, RecordStage, StageOutcome,
    };
    pub use crate::store::{InMemoryUserStore, JsonFileUserStore, RecordQuery, UserStore};
    pub use crate::templates::{TemplateRenderer, Templates};
}
