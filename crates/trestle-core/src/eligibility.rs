use crate::types::{Attendee, AttendeeKind, RegistrationType};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Wizard behaviour keyed by registration type.
///
/// The table is deterministic and compiled in; the same registration type
/// always yields the same policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationPolicy {
    pub registration_type: RegistrationType,
    /// Fewest attendees the wizard accepts before payment.
    pub min_attendees: usize,
    /// Attendee variant seeded when the type is chosen.
    pub default_attendee: DefaultAttendee,
    /// Wizard features unlocked for this type.
    pub features: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultAttendee {
    Mason,
    Guest,
}

pub fn policy_for(registration_type: RegistrationType) -> RegistrationPolicy {
    match registration_type {
        RegistrationType::Individual => RegistrationPolicy {
            registration_type,
            min_attendees: 1,
            default_attendee: DefaultAttendee::Mason,
            features: &["partners", "guest_attendees"],
        },
        RegistrationType::Lodge => RegistrationPolicy {
            registration_type,
            min_attendees: 3,
            default_attendee: DefaultAttendee::Mason,
            features: &["partners", "member_roster"],
        },
        RegistrationType::Delegation => RegistrationPolicy {
            registration_type,
            min_attendees: 1,
            default_attendee: DefaultAttendee::Mason,
            features: &["grand_lodge_details"],
        },
    }
}

/// Per-event attendance restriction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EligibilityRule {
    /// Only masons may hold a seat at the event.
    MasonsOnly,
    /// Only masons holding exactly the named rank may attend,
    /// e.g. `RequiresRank("GL")` for grand-officer-only ceremonies.
    RequiresRank(String),
    /// Partners cannot be seated at the event.
    NoPartners,
}

/// Event-keyed eligibility rules. Events without an entry are open to every
/// attendee; evaluation is total and has no side effects.
#[derive(Debug, Clone, Default)]
pub struct EligibilityTable {
    rules: HashMap<Uuid, Vec<EligibilityRule>>,
}

impl EligibilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restrict(mut self, event_id: Uuid, rule: EligibilityRule) -> Self {
        self.rules.entry(event_id).or_default().push(rule);
        self
    }

    pub fn rules_for(&self, event_id: Uuid) -> &[EligibilityRule] {
        self.rules.get(&event_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First reason the attendee cannot hold a seat at the event, or `None`
    /// when every rule passes.
    pub fn ineligibility_reason(&self, event_id: Uuid, attendee: &Attendee) -> Option<String> {
        for rule in self.rules_for(event_id) {
            match rule {
                EligibilityRule::MasonsOnly => {
                    if !matches!(attendee.kind, AttendeeKind::Mason { .. }) {
                        return Some(format!(
                            "{} attendees are not eligible for this event",
                            attendee.kind.label()
                        ));
                    }
                }
                EligibilityRule::RequiresRank(required) => match &attendee.kind {
                    AttendeeKind::Mason { rank: Some(rank), .. } if rank == required => {}
                    _ => {
                        return Some(format!("event is restricted to rank '{}'", required));
                    }
                },
                EligibilityRule::NoPartners => {
                    if attendee.kind.is_partner() {
                        return Some("partners cannot be seated at this event".to_string());
                    }
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Attendee;

    #[test]
    fn minimum_attendees_per_type() {
        assert_eq!(policy_for(RegistrationType::Individual).min_attendees, 1);
        assert_eq!(policy_for(RegistrationType::Lodge).min_attendees, 3);
        assert_eq!(policy_for(RegistrationType::Delegation).min_attendees, 1);
    }

    #[test]
    fn events_without_rules_are_open() {
        let table = EligibilityTable::new();
        let guest = Attendee::guest("Ms", "Avery", "Cole");
        assert_eq!(table.ineligibility_reason(Uuid::new_v4(), &guest), None);
    }

    #[test]
    fn masons_only_rejects_guests_and_partners() {
        let event = Uuid::new_v4();
        let table = EligibilityTable::new().restrict(event, EligibilityRule::MasonsOnly);

        let mason = Attendee::mason("W Bro", "John", "Smith");
        let guest = Attendee::guest("Mr", "Glen", "Hart");
        let partner = Attendee::partner_of(mason.attendee_id, "Wife", "Mrs", "Iris", "Smith");

        assert_eq!(table.ineligibility_reason(event, &mason), None);
        assert!(table.ineligibility_reason(event, &guest).is_some());
        assert!(table.ineligibility_reason(event, &partner).is_some());
    }

    #[test]
    fn rank_rule_requires_exact_rank() {
        let event = Uuid::new_v4();
        let table =
            EligibilityTable::new().restrict(event, EligibilityRule::RequiresRank("GL".into()));

        let grand_officer =
            Attendee::mason("RW Bro", "Peter", "Vale").with_masonic_details("GL", "Unity", "6");
        let master_mason =
            Attendee::mason("Bro", "Ray", "Ford").with_masonic_details("MM", "Unity", "6");
        let unranked = Attendee::mason("Bro", "Noel", "Pryor");

        assert_eq!(table.ineligibility_reason(event, &grand_officer), None);
        assert!(table.ineligibility_reason(event, &master_mason).is_some());
        assert!(table.ineligibility_reason(event, &unranked).is_some());
    }
}
