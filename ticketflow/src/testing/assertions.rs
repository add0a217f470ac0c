//! Test assertions for store state.

use std::collections::BTreeMap;

use crate::records::UserRecord;

/// Asserts that assigned ticket numbers are exactly `1..=n`, one per user.
pub fn assert_contiguous_tickets(records: &[UserRecord]) {
    let mut holders: BTreeMap<u64, &str> = BTreeMap::new();
    for record in records {
        if let Some(sequence) = record.ticket.sequence() {
            if let Some(other) = holders.insert(sequence, record.id.as_str()) {
                panic!("ticket {sequence} assigned to both '{other}' and '{}'", record.id);
            }
        }
    }
    let sequences: Vec<u64> = holders.keys().copied().collect();
    let expected: Vec<u64> = (1..=sequences.len() as u64).collect();
    assert_eq!(
        sequences, expected,
        "Expected contiguous ticket numbers, got {sequences:?}"
    );
}

/// Asserts that `ids` hold tickets `first, first + 1, ...` in that order.
pub fn assert_ticket_order(records: &[UserRecord], ids: &[&str], first: u64) {
    for (offset, id) in (0u64..).zip(ids) {
        let record = records
            .iter()
            .find(|r| r.id == *id)
            .unwrap_or_else(|| panic!("no record '{id}'"));
        assert_eq!(
            record.ticket.sequence(),
            Some(first + offset),
            "Expected '{id}' to hold ticket {}",
            first + offset
        );
    }
}

/// Asserts that no user in `ids` holds a ticket.
pub fn assert_unassigned(records: &[UserRecord], ids: &[&str]) {
    for record in records.iter().filter(|r| ids.contains(&r.id.as_str())) {
        assert!(
            !record.ticket.is_assigned(),
            "Expected '{}' to hold no ticket, got {:?}",
            record.id,
            record.ticket
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::TicketMarker;

    fn holder(id: &str, sequence: u64) -> UserRecord {
        UserRecord::new(id, "kc", "x").with_ticket(TicketMarker::Assigned { sequence })
    }

    #[test]
    fn test_contiguous_passes() {
        assert_contiguous_tickets(&[holder("a", 2), holder("b", 1), UserRecord::new("c", "kc", "x")]);
    }

    #[test]
    #[should_panic(expected = "contiguous")]
    fn test_gap_fails() {
        assert_contiguous_tickets(&[holder("a", 1), holder("b", 3)]);
    }

    #[test]
    #[should_panic(expected = "assigned to both")]
    fn test_duplicate_fails() {
        assert_contiguous_tickets(&[holder("a", 1), holder("b", 1)]);
    }
}
