//! Ticket-ownership integrity checks.
//!
//! Every ticket must carry an explicit owner reference. Two recurring defects
//! from historical conversions (embedded tickets to references,
//! `selectedTickets` to `tickets`) are detected here: tickets owned by the
//! registration itself instead of an attendee or group, and one owner id
//! stamped identically across every ticket of a multi-attendee registration.

use ltx_core::RegistrationRecord;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OwnershipDefect {
    /// Ticket has no owner type or no owner id at all.
    MissingOwner { ticket_index: usize },
    /// Ticket owner id equals the registration's own id.
    OwnerIsRegistration { ticket_index: usize },
    /// Every ticket of a multi-attendee registration carries one identical
    /// owner id, which means per-attendee ownership was lost in a conversion.
    SharedOwnerAcrossAttendees { owner_id: String },
}

pub fn ticket_ownership_defects(registration: &RegistrationRecord) -> Vec<OwnershipDefect> {
    let mut defects = Vec::new();

    for (ticket_index, ticket) in registration.tickets.iter().enumerate() {
        match (&ticket.owner_type, &ticket.owner_id) {
            (Some(_), Some(owner_id)) => {
                if owner_id == &registration.registration_id {
                    defects.push(OwnershipDefect::OwnerIsRegistration { ticket_index });
                }
            }
            _ => defects.push(OwnershipDefect::MissingOwner { ticket_index }),
        }
    }

    // Group-owned tickets legitimately share the group id; the rule only
    // applies to attendee-owned tickets.
    let attendee_owned: Vec<&str> = registration
        .tickets
        .iter()
        .filter(|t| t.owner_type == Some(ltx_core::TicketOwnerType::Attendee))
        .filter_map(|t| t.owner_id.as_deref())
        .collect();
    if registration.attendee_count > 1 && attendee_owned.len() > 1 {
        let first = attendee_owned[0];
        if attendee_owned.iter().all(|id| *id == first) && first != registration.registration_id {
            defects.push(OwnershipDefect::SharedOwnerAcrossAttendees {
                owner_id: first.to_string(),
            });
        }
    }

    defects
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ltx_core::{RegistrationType, TicketLineItem, TicketOwnerType};
    use serde_json::json;

    fn registration(id: &str, attendees: u32, tickets: Vec<TicketLineItem>) -> RegistrationRecord {
        RegistrationRecord {
            registration_id: id.to_string(),
            registration_type: RegistrationType::Individual,
            confirmation_number: None,
            total_amount: 100.0,
            contact_email: None,
            contact_name: None,
            contact_phone: None,
            created_at: Utc.with_ymd_and_hms(2025, 6, 10, 3, 0, 0).single().unwrap(),
            attendee_count: attendees,
            tickets,
            document: json!({}),
        }
    }

    fn ticket(owner_type: Option<TicketOwnerType>, owner_id: Option<&str>) -> TicketLineItem {
        TicketLineItem {
            name: "Banquet".to_string(),
            owner_type,
            owner_id: owner_id.map(str::to_string),
        }
    }

    #[test]
    fn well_formed_ownership_reports_nothing() {
        let reg = registration(
            "reg-1",
            2,
            vec![
                ticket(Some(TicketOwnerType::Attendee), Some("att-1")),
                ticket(Some(TicketOwnerType::Attendee), Some("att-2")),
            ],
        );
        assert!(ticket_ownership_defects(&reg).is_empty());
    }

    #[test]
    fn ticket_owned_by_the_registration_itself_is_a_defect() {
        let reg = registration(
            "reg-1",
            1,
            vec![ticket(Some(TicketOwnerType::Attendee), Some("reg-1"))],
        );
        assert_eq!(
            ticket_ownership_defects(&reg),
            vec![OwnershipDefect::OwnerIsRegistration { ticket_index: 0 }]
        );
    }

    #[test]
    fn shared_owner_across_multi_attendee_tickets_is_a_defect() {
        let reg = registration(
            "reg-1",
            3,
            vec![
                ticket(Some(TicketOwnerType::Attendee), Some("att-1")),
                ticket(Some(TicketOwnerType::Attendee), Some("att-1")),
                ticket(Some(TicketOwnerType::Attendee), Some("att-1")),
            ],
        );
        assert_eq!(
            ticket_ownership_defects(&reg),
            vec![OwnershipDefect::SharedOwnerAcrossAttendees {
                owner_id: "att-1".to_string()
            }]
        );
    }

    #[test]
    fn missing_owner_reference_is_a_defect() {
        let reg = registration(
            "reg-1",
            1,
            vec![ticket(None, None), ticket(Some(TicketOwnerType::Lodge), None)],
        );
        assert_eq!(
            ticket_ownership_defects(&reg),
            vec![
                OwnershipDefect::MissingOwner { ticket_index: 0 },
                OwnershipDefect::MissingOwner { ticket_index: 1 },
            ]
        );
    }

    #[test]
    fn lodge_tickets_sharing_the_group_owner_are_legitimate() {
        // Group-owned tickets share the group id by design; the shared-owner
        // rule only applies to attendee-owned tickets.
        let reg = registration(
            "reg-lodge",
            10,
            vec![
                ticket(Some(TicketOwnerType::Lodge), Some("lodge-77")),
                ticket(Some(TicketOwnerType::Lodge), Some("lodge-77")),
            ],
        );
        assert!(ticket_ownership_defects(&reg).is_empty());
    }
}
