//! Testing utilities for ticketflow pipelines.
//!
//! This module provides:
//! - Scripted identity, mail and store collaborators
//! - Record and template fixtures
//! - Assertions over ticket state

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_contiguous_tickets, assert_ticket_order, assert_unassigned};
pub use fixtures::{
    accepted, base_time, fast_retry, full_profile, templates, ticket_holder, user,
    REMINDER_TEMPLATE, TICKET_TEMPLATE,
};
pub use mocks::{FlakyStore, RecordingMailer, ScriptedIdentityLookup};
