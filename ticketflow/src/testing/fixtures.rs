//! Record and collaborator fixtures.

use chrono::{DateTime, Duration, TimeZone, Utc};

use crate::records::{ApplicationStatus, ConsentFlags, TicketMarker, UserRecord};
use crate::retry::{JitterStrategy, RetryConfig};
use crate::templates::Templates;

/// Name of the reminder template in [`templates`].
pub const REMINDER_TEMPLATE: &str = "upload-cv-reminder";

/// Name of the ticket confirmation template in [`templates`].
pub const TICKET_TEMPLATE: &str = "ticket-assigned";

/// Base submission time; fixtures submit `minute` minutes after it.
#[must_use]
pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 9, 0, 0)
        .single()
        .unwrap_or_default()
}

/// A record with status `status`, identity id `kc-<id>` and email
/// `<id>@example.com`, submitted `minute` minutes after [`base_time`].
#[must_use]
pub fn user(id: &str, status: ApplicationStatus, minute: i64) -> UserRecord {
    let record = UserRecord::new(id, format!("kc-{id}"), format!("{id}@example.com"))
        .with_names(format!("First {id}"), format!("Last {id}"))
        .with_status(status);
    if status == ApplicationStatus::Unsubmitted {
        record
    } else {
        record.with_submitted_at(base_time() + Duration::minutes(minute))
    }
}

/// An accepted, unassigned record.
#[must_use]
pub fn accepted(id: &str, minute: i64) -> UserRecord {
    user(id, ApplicationStatus::Accepted, minute)
}

/// An accepted record already holding ticket `sequence`.
#[must_use]
pub fn ticket_holder(id: &str, minute: i64, sequence: u64) -> UserRecord {
    accepted(id, minute).with_ticket(TicketMarker::Assigned { sequence })
}

/// A fully populated record, handy for export tests.
#[must_use]
pub fn full_profile(id: &str) -> UserRecord {
    let mut record = accepted(id, 0).with_consent(
        "huk",
        ConsentFlags {
            marketing: true,
            privacy: true,
        },
    );
    record.phone = Some("+44 7700 900000".to_string());
    record.university = Some("University of Edinburgh".to_string());
    record.graduation_year = Some(2026);
    record.level_of_study = Some("undergraduate".to_string());
    record.country = Some("GB".to_string());
    record.ethnicity = Some("prefer not to say".to_string());
    record.gender = Some("female".to_string());
    record
}

/// Retry budget with millisecond delays and no jitter.
#[must_use]
pub fn fast_retry(max_attempts: usize) -> RetryConfig {
    RetryConfig::new()
        .with_max_attempts(max_attempts)
        .with_base_delay_ms(1)
        .with_max_delay_ms(5)
        .with_jitter(JitterStrategy::None)
}

/// Reminder and ticket templates.
#[must_use]
pub fn templates() -> Templates {
    let mut templates = Templates::new();
    let sources = [
        (REMINDER_TEMPLATE, "Hi {{ display_name }}, please upload your CV."),
        (TICKET_TEMPLATE, "Hi {{ display_name }}, your ticket number is {{ ticket.sequence }}."),
    ];
    for (name, source) in sources {
        if let Err(e) = templates.insert(name, source) {
            panic!("fixture template '{name}' is invalid: {e}");
        }
    }
    templates
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::TemplateRenderer;

    #[test]
    fn test_unsubmitted_fixture_has_no_timestamp() {
        assert!(user("u", ApplicationStatus::Unsubmitted, 5).submitted_at.is_none());
        assert_eq!(
            accepted("u", 5).submitted_at,
            Some(base_time() + Duration::minutes(5))
        );
    }

    #[test]
    fn test_fixture_templates_registered() {
        let t = templates();
        assert!(t.has_template(REMINDER_TEMPLATE));
        assert!(t.has_template(TICKET_TEMPLATE));
    }
}
