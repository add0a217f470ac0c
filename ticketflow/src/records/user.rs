//! User records as read from the backing store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Where an application is in the review process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// The user has an account but has not submitted.
    #[default]
    Unsubmitted,
    /// Submitted, awaiting review.
    Submitted,
    /// Accepted, eligible for a ticket.
    Accepted,
    /// Reviewed and placed on the waiting list.
    WaitingList,
    /// Reviewed and rejected.
    Rejected,
    /// Confirmed attendee.
    Attending,
}

impl fmt::Display for ApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsubmitted => write!(f, "unsubmitted"),
            Self::Submitted => write!(f, "submitted"),
            Self::Accepted => write!(f, "accepted"),
            Self::WaitingList => write!(f, "waiting_list"),
            Self::Rejected => write!(f, "rejected"),
            Self::Attending => write!(f, "attending"),
        }
    }
}

/// Marketing and privacy consent given to one partner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsentFlags {
    /// Consent to marketing contact from the partner.
    #[serde(default)]
    pub marketing: bool,
    /// Consent to the partner's privacy policy.
    #[serde(default)]
    pub privacy: bool,
}

/// Ticket assignment state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TicketMarker {
    /// No ticket has been assigned.
    #[default]
    Unassigned,
    /// A ticket with this sequence number has been assigned.
    Assigned {
        /// One-based assignment sequence number.
        sequence: u64,
    },
}

impl TicketMarker {
    /// Returns true if a ticket has been assigned.
    #[must_use]
    pub fn is_assigned(&self) -> bool {
        matches!(self, Self::Assigned { .. })
    }

    /// Returns the assigned sequence number, if any.
    #[must_use]
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Assigned { sequence } => Some(*sequence),
            Self::Unassigned => None,
        }
    }
}

/// One applicant as stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    /// Internal user id.
    pub id: String,
    /// Account id at the identity provider.
    pub identity_id: String,
    /// Given names.
    #[serde(default)]
    pub first_names: String,
    /// Family names.
    #[serde(default)]
    pub last_names: String,
    /// Email address held in the store.
    pub email: String,
    /// Phone number.
    #[serde(default)]
    pub phone: Option<String>,
    /// Institution attended.
    #[serde(default)]
    pub university: Option<String>,
    /// Expected graduation year.
    #[serde(default)]
    pub graduation_year: Option<u16>,
    /// Current level of study.
    #[serde(default)]
    pub level_of_study: Option<String>,
    /// Country of residence.
    #[serde(default)]
    pub country: Option<String>,
    /// Self-reported ethnicity.
    #[serde(default)]
    pub ethnicity: Option<String>,
    /// Self-reported gender.
    #[serde(default)]
    pub gender: Option<String>,
    /// Review status.
    #[serde(default)]
    pub application_status: ApplicationStatus,
    /// When the application was submitted.
    #[serde(default)]
    pub submitted_at: Option<DateTime<Utc>>,
    /// Consent flags keyed by partner.
    #[serde(default)]
    pub consents: BTreeMap<String, ConsentFlags>,
    /// Ticket assignment marker.
    #[serde(default)]
    pub ticket: TicketMarker,
}

impl UserRecord {
    /// Creates a record with only the identifying fields set.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        identity_id: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            identity_id: identity_id.into(),
            first_names: String::new(),
            last_names: String::new(),
            email: email.into(),
            phone: None,
            university: None,
            graduation_year: None,
            level_of_study: None,
            country: None,
            ethnicity: None,
            gender: None,
            application_status: ApplicationStatus::default(),
            submitted_at: None,
            consents: BTreeMap::new(),
            ticket: TicketMarker::default(),
        }
    }

    /// Sets the names.
    #[must_use]
    pub fn with_names(mut self, first: impl Into<String>, last: impl Into<String>) -> Self {
        self.first_names = first.into();
        self.last_names = last.into();
        self
    }

    /// Sets the application status.
    #[must_use]
    pub fn with_status(mut self, status: ApplicationStatus) -> Self {
        self.application_status = status;
        self
    }

    /// Sets the submission time.
    #[must_use]
    pub fn with_submitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.submitted_at = Some(at);
        self
    }

    /// Sets the ticket marker.
    #[must_use]
    pub fn with_ticket(mut self, ticket: TicketMarker) -> Self {
        self.ticket = ticket;
        self
    }

    /// Records consent flags for a partner.
    #[must_use]
    pub fn with_consent(mut self, partner: impl Into<String>, flags: ConsentFlags) -> Self {
        self.consents.insert(partner.into(), flags);
        self
    }

    /// Returns the stringified value of a named field.
    ///
    /// Names are snake_case field names, plus `consent.<partner>.marketing`
    /// and `consent.<partner>.privacy`. Unknown names and unset optional
    /// fields yield `None`.
    #[must_use]
    pub fn field_value(&self, name: &str) -> Option<String> {
        match name {
            "id" => Some(self.id.clone()),
            "identity_id" => Some(self.identity_id.clone()),
            "first_names" => Some(self.first_names.clone()),
            "last_names" => Some(self.last_names.clone()),
            "email" => Some(self.email.clone()),
            "phone" => self.phone.clone(),
            "university" => self.university.clone(),
            "graduation_year" => self.graduation_year.map(|y| y.to_string()),
            "level_of_study" => self.level_of_study.clone(),
            "country" => self.country.clone(),
            "ethnicity" => self.ethnicity.clone(),
            "gender" => self.gender.clone(),
            "application_status" => Some(self.application_status.to_string()),
            "submitted_at" => self.submitted_at.map(|t| t.to_rfc3339()),
            "ticket_sequence" => self.ticket.sequence().map(|s| s.to_string()),
            other => self.consent_value(other),
        }
    }

    fn consent_value(&self, name: &str) -> Option<String> {
        let rest = name.strip_prefix("consent.")?;
        let (partner, flag) = rest.rsplit_once('.')?;
        let flags = self.consents.get(partner)?;
        match flag {
            "marketing" => Some(flags.marketing.to_string()),
            "privacy" => Some(flags.privacy.to_string()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&ApplicationStatus::WaitingList).unwrap();
        assert_eq!(json, "\"waiting_list\"");
        assert_eq!(ApplicationStatus::Accepted.to_string(), "accepted");
    }

    #[test]
    fn test_ticket_marker_wire_format() {
        let marker = TicketMarker::Assigned { sequence: 12 };
        let json = serde_json::to_value(marker).unwrap();
        assert_eq!(json, serde_json::json!({"state": "assigned", "sequence": 12}));
        assert_eq!(marker.sequence(), Some(12));
        assert!(!TicketMarker::Unassigned.is_assigned());
    }

    #[test]
    fn test_record_deserializes_with_defaults() {
        let record: UserRecord = serde_json::from_value(serde_json::json!({
            "id": "u1",
            "identity_id": "kc-1",
            "email": "ada@example.com"
        }))
        .unwrap();

        assert_eq!(record.application_status, ApplicationStatus::Unsubmitted);
        assert_eq!(record.ticket, TicketMarker::Unassigned);
        assert!(record.consents.is_empty());
    }

    #[test]
    fn test_field_value_lookup() {
        let record = UserRecord::new("u1", "kc-1", "ada@example.com")
            .with_names("Ada", "Lovelace")
            .with_status(ApplicationStatus::Accepted)
            .with_consent("huk", ConsentFlags { marketing: true, privacy: false });

        assert_eq!(record.field_value("first_names").as_deref(), Some("Ada"));
        assert_eq!(record.field_value("application_status").as_deref(), Some("accepted"));
        assert_eq!(record.field_value("consent.huk.marketing").as_deref(), Some("true"));
        assert_eq!(record.field_value("consent.huk.privacy").as_deref(), Some("false"));
        assert_eq!(record.field_value("consent.other.privacy"), None);
        assert_eq!(record.field_value("ethnicity"), None);
        assert_eq!(record.field_value("no_such_field"), None);
    }
}
