//! Eligibility filtering.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{RecordStage, StageOutcome};
use crate::errors::TicketflowError;
use crate::records::{ApplicationStatus, AugmentedRecord, UserRecord};

/// Which records an [`EligibilityFilter`] lets through.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityPolicy {
    /// Every record.
    #[default]
    AllUsers,
    /// Accepted records that do not yet hold a ticket.
    TicketEligible,
    /// Records in one of the listed statuses.
    Statuses(Vec<ApplicationStatus>),
}

/// Drops records that fail an [`EligibilityPolicy`]. Pure; never fails.
#[derive(Debug, Clone)]
pub struct EligibilityFilter {
    name: String,
    policy: EligibilityPolicy,
}

impl EligibilityFilter {
    /// Creates a filter.
    #[must_use]
    pub fn new(policy: EligibilityPolicy) -> Self {
        Self {
            name: "eligibility".to_string(),
            policy,
        }
    }

    /// Filter for the ticket-assignment pipeline.
    #[must_use]
    pub fn ticket_eligible() -> Self {
        Self::new(EligibilityPolicy::TicketEligible)
    }

    /// Returns the policy.
    #[must_use]
    pub fn policy(&self) -> &EligibilityPolicy {
        &self.policy
    }

    /// Returns true if `record` satisfies the policy.
    #[must_use]
    pub fn should_pass(&self, record: &UserRecord) -> bool {
        self.rejection(record).is_none()
    }

    fn rejection(&self, record: &UserRecord) -> Option<String> {
        match &self.policy {
            EligibilityPolicy::AllUsers => None,
            EligibilityPolicy::TicketEligible => {
                if record.application_status != ApplicationStatus::Accepted {
                    Some(format!("status is {}", record.application_status))
                } else {
                    record
                        .ticket
                        .sequence()
                        .map(|s| format!("already holds ticket {s}"))
                }
            }
            EligibilityPolicy::Statuses(allowed) => {
                if allowed.contains(&record.application_status) {
                    None
                } else {
                    Some(format!("status is {}", record.application_status))
                }
            }
        }
    }
}

#[async_trait]
impl RecordStage for EligibilityFilter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, record: AugmentedRecord) -> Result<StageOutcome, TicketflowError> {
        Ok(match self.rejection(&record.record) {
            None => StageOutcome::emit(record),
            Some(reason) => StageOutcome::drop_record(record.user_id(), reason),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TicketMarker;

    const ALL_STATUSES: [ApplicationStatus; 6] = [
        ApplicationStatus::Unsubmitted,
        ApplicationStatus::Submitted,
        ApplicationStatus::Accepted,
        ApplicationStatus::WaitingList,
        ApplicationStatus::Rejected,
        ApplicationStatus::Attending,
    ];

    #[test]
    fn test_ticket_filter_passes_only_accepted_unassigned() {
        let filter = EligibilityFilter::ticket_eligible();

        for status in ALL_STATUSES {
            for ticket in [TicketMarker::Unassigned, TicketMarker::Assigned { sequence: 3 }] {
                let record = UserRecord::new("u", "kc", "u@x")
                    .with_status(status)
                    .with_ticket(ticket);
                let expected = status == ApplicationStatus::Accepted && !ticket.is_assigned();
                assert_eq!(filter.should_pass(&record), expected, "{status} {ticket:?}");
            }
        }
    }

    #[test]
    fn test_status_filter() {
        let filter = EligibilityFilter::new(EligibilityPolicy::Statuses(vec![
            ApplicationStatus::Unsubmitted,
            ApplicationStatus::Submitted,
        ]));
        assert!(filter.should_pass(&UserRecord::new("u", "kc", "x")));
        assert!(!filter.should_pass(
            &UserRecord::new("u", "kc", "x").with_status(ApplicationStatus::Rejected)
        ));
    }

    #[tokio::test]
    async fn test_dropped_record_reports_reason() {
        let filter = EligibilityFilter::ticket_eligible();
        let record = UserRecord::new("u2", "kc", "x")
            .with_status(ApplicationStatus::Accepted)
            .with_ticket(TicketMarker::Assigned { sequence: 7 });

        match filter.process(record.into()).await.unwrap() {
            StageOutcome::Drop { user_id, reason, failure } => {
                assert_eq!(user_id, "u2");
                assert_eq!(reason, "already holds ticket 7");
                assert!(failure.is_none());
            }
            StageOutcome::Emit { .. } => panic!("expected drop"),
        }
    }

    #[test]
    fn test_policy_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            policy: EligibilityPolicy,
        }
        let w: Wrapper = toml::from_str("policy = \"ticket_eligible\"").unwrap();
        assert_eq!(w.policy, EligibilityPolicy::TicketEligible);
        let w: Wrapper = toml::from_str("policy = { statuses = [\"submitted\"] }").unwrap();
        assert_eq!(w.policy, EligibilityPolicy::Statuses(vec![ApplicationStatus::Submitted]));
    }
}
