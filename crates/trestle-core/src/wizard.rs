use crate::catalog::FunctionDetail;
use crate::draft::{DraftRegistration, DraftUpdate, WizardStep};
use crate::eligibility::{policy_for, DefaultAttendee, EligibilityTable};
use crate::error::{FieldError, RegistrationError};
use crate::types::{Attendee, AttendeeKind, RegistrationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Offer shown when a wizard session opens and an incomplete draft already
/// exists for the same owner and function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryPrompt {
    pub draft_id: Uuid,
    pub resume_step: WizardStep,
    pub registration_type: Option<RegistrationType>,
    pub attendee_count: usize,
    pub saved_at: DateTime<Utc>,
}

impl RecoveryPrompt {
    pub fn for_draft(draft: &DraftRegistration) -> Self {
        Self {
            draft_id: draft.draft_id,
            resume_step: draft.current_step,
            registration_type: draft.registration_type,
            attendee_count: draft.attendees.len(),
            saved_at: draft.updated_at,
        }
    }
}

/// Caller's answer to a recovery prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryChoice {
    /// Reopen the saved draft at its saved step.
    Resume,
    /// Delete the saved draft and start fresh.
    Discard,
}

/// Drives a draft through the wizard: applies section updates, validates the
/// current step, and moves the cursor.
///
/// Forward movement is gated on the current step validating cleanly; backward
/// movement always succeeds and never clears later-step data, so nothing a
/// guest typed is lost to a detour.
pub struct WizardController {
    eligibility: EligibilityTable,
}

impl WizardController {
    pub fn new(eligibility: EligibilityTable) -> Self {
        Self { eligibility }
    }

    pub fn eligibility(&self) -> &EligibilityTable {
        &self.eligibility
    }

    /// Apply one section update. Choosing a registration type on an empty
    /// draft seeds the policy's default attendee so the form opens with a
    /// scaffold, the way the original paper forms pre-print one row.
    pub fn apply_update(&self, draft: &mut DraftRegistration, update: DraftUpdate) {
        match update {
            DraftUpdate::RegistrationType { registration_type } => {
                draft.registration_type = Some(registration_type);
                if draft.attendees.is_empty() {
                    let policy = policy_for(registration_type);
                    let seeded = match policy.default_attendee {
                        DefaultAttendee::Mason => Attendee::mason("", "", ""),
                        DefaultAttendee::Guest => Attendee::guest("", "", ""),
                    };
                    draft.attendees.push(seeded.with_primary(true));
                }
            }
            DraftUpdate::Attendees { attendees } => draft.attendees = attendees,
            DraftUpdate::Lodge { lodge } => draft.lodge = Some(lodge),
            DraftUpdate::Delegation { delegation } => draft.delegation = Some(delegation),
            DraftUpdate::Tickets { tickets } => draft.tickets = tickets,
            DraftUpdate::Billing { billing } => draft.billing = Some(billing),
        }
        draft.touch();
    }

    /// Validate the named step against the draft as it stands.
    pub fn validate_step(
        &self,
        draft: &DraftRegistration,
        step: WizardStep,
        function: &FunctionDetail,
    ) -> Vec<FieldError> {
        match step {
            WizardStep::RegistrationType => self.validate_registration_type(draft),
            WizardStep::AttendeeDetails => self.validate_attendees(draft),
            WizardStep::TicketSelection => self.validate_tickets(draft, function),
            WizardStep::Payment => self.validate_billing(draft),
            WizardStep::Confirmation => Vec::new(),
        }
    }

    /// Validate every step up to and including the payment step, the gate the
    /// completion flow runs before any money moves.
    pub fn validate_for_payment(
        &self,
        draft: &DraftRegistration,
        function: &FunctionDetail,
    ) -> Vec<FieldError> {
        let mut errors = Vec::new();
        for step in [
            WizardStep::RegistrationType,
            WizardStep::AttendeeDetails,
            WizardStep::TicketSelection,
            WizardStep::Payment,
        ] {
            errors.extend(self.validate_step(draft, step, function));
        }
        errors
    }

    /// Validate the current step and move forward. The draft is untouched
    /// when validation fails.
    pub fn advance(
        &self,
        draft: &mut DraftRegistration,
        function: &FunctionDetail,
    ) -> Result<WizardStep, RegistrationError> {
        match draft.current_step {
            WizardStep::Payment => {
                return Err(RegistrationError::invalid_field(
                    "step",
                    "the payment step is completed through the payment flow, not a step change",
                ));
            }
            WizardStep::Confirmation => {
                return Err(RegistrationError::invalid_field(
                    "step",
                    "this registration is already complete",
                ));
            }
            _ => {}
        }

        let errors = self.validate_step(draft, draft.current_step, function);
        if !errors.is_empty() {
            return Err(RegistrationError::Validation(errors));
        }

        // Steps before Payment always have a successor.
        if let Some(next) = draft.current_step.next() {
            draft.current_step = next;
            draft.touch();
        }
        Ok(draft.current_step)
    }

    /// Move backward, keeping every later-step answer in place.
    pub fn retreat(&self, draft: &mut DraftRegistration) -> WizardStep {
        if let Some(previous) = draft.current_step.previous() {
            draft.current_step = previous;
            draft.touch();
        }
        draft.current_step
    }

    fn validate_registration_type(&self, draft: &DraftRegistration) -> Vec<FieldError> {
        match draft.registration_type {
            Some(_) => Vec::new(),
            None => vec![FieldError::new(
                "registration_type",
                "choose a registration type",
            )],
        }
    }

    fn validate_attendees(&self, draft: &DraftRegistration) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let Some(registration_type) = draft.registration_type else {
            return vec![FieldError::new(
                "registration_type",
                "choose a registration type",
            )];
        };

        let policy = policy_for(registration_type);
        if draft.attendees.len() < policy.min_attendees {
            let message = match registration_type {
                RegistrationType::Lodge => {
                    format!("minimum {} members required", policy.min_attendees)
                }
                _ => format!("at least {} attendee(s) required", policy.min_attendees),
            };
            errors.push(FieldError::new("attendees", message));
        }

        let primaries = draft.attendees.iter().filter(|a| a.is_primary).count();
        if primaries == 0 {
            errors.push(FieldError::new("attendees", "a primary attendee is required"));
        } else if primaries > 1 {
            errors.push(FieldError::new(
                "attendees",
                "only one attendee can be primary",
            ));
        }

        for (index, attendee) in draft.attendees.iter().enumerate() {
            if attendee.title.trim().is_empty() {
                errors.push(FieldError::new(
                    format!("attendees[{index}].title"),
                    "title is required",
                ));
            }
            if attendee.first_name.trim().is_empty() {
                errors.push(FieldError::new(
                    format!("attendees[{index}].first_name"),
                    "first name is required",
                ));
            }
            if attendee.last_name.trim().is_empty() {
                errors.push(FieldError::new(
                    format!("attendees[{index}].last_name"),
                    "last name is required",
                ));
            }

            if let AttendeeKind::Partner {
                relationship,
                principal_attendee_id,
            } = &attendee.kind
            {
                if relationship.trim().is_empty() {
                    errors.push(FieldError::new(
                        format!("attendees[{index}].relationship"),
                        "relationship is required",
                    ));
                }
                match draft.attendee(*principal_attendee_id) {
                    Some(principal) if !principal.kind.is_partner() => {}
                    _ => {
                        errors.push(FieldError::new(
                            format!("attendees[{index}].principal_attendee_id"),
                            "partner must reference an existing mason or guest attendee",
                        ));
                    }
                }
            }
        }

        match registration_type {
            RegistrationType::Lodge => match &draft.lodge {
                Some(lodge) => {
                    if lodge.lodge_name.trim().is_empty() {
                        errors.push(FieldError::new("lodge.lodge_name", "lodge name is required"));
                    }
                    if lodge.lodge_number.trim().is_empty() {
                        errors.push(FieldError::new(
                            "lodge.lodge_number",
                            "lodge number is required",
                        ));
                    }
                }
                None => errors.push(FieldError::new("lodge", "lodge details are required")),
            },
            RegistrationType::Delegation => match &draft.delegation {
                Some(delegation) => {
                    if delegation.delegation_name.trim().is_empty() {
                        errors.push(FieldError::new(
                            "delegation.delegation_name",
                            "delegation name is required",
                        ));
                    }
                    if delegation.grand_lodge.trim().is_empty() {
                        errors.push(FieldError::new(
                            "delegation.grand_lodge",
                            "grand lodge is required",
                        ));
                    }
                }
                None => errors.push(FieldError::new(
                    "delegation",
                    "delegation details are required",
                )),
            },
            RegistrationType::Individual => {}
        }

        errors
    }

    fn validate_tickets(
        &self,
        draft: &DraftRegistration,
        function: &FunctionDetail,
    ) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let tickets = function.ticket_index();

        if draft.tickets.is_empty() {
            errors.push(FieldError::new("tickets", "select at least one ticket"));
            return errors;
        }

        let mut per_type_quantities: HashMap<Uuid, u32> = HashMap::new();

        for (index, entry) in draft.tickets.entries.iter().enumerate() {
            let Some(ticket) = tickets.get(&entry.ticket_type_id) else {
                errors.push(FieldError::new(
                    format!("tickets[{index}].ticket_type_id"),
                    "unknown ticket type",
                ));
                continue;
            };

            if entry.quantity == 0 {
                errors.push(FieldError::new(
                    format!("tickets[{index}].quantity"),
                    "quantity must be at least one",
                ));
            }

            if ticket.per_attendee {
                *per_type_quantities.entry(ticket.ticket_type_id).or_default() += entry.quantity;

                let Some(attendee_id) = entry.attendee_id else {
                    errors.push(FieldError::new(
                        format!("tickets[{index}].attendee_id"),
                        format!("'{}' must be assigned to an attendee", ticket.name),
                    ));
                    continue;
                };
                let Some(attendee) = draft.attendee(attendee_id) else {
                    errors.push(FieldError::new(
                        format!("tickets[{index}].attendee_id"),
                        "assigned attendee does not exist on this draft",
                    ));
                    continue;
                };
                if let Some(reason) = self
                    .eligibility
                    .ineligibility_reason(ticket.event_id, attendee)
                {
                    errors.push(FieldError::new(format!("tickets[{index}]"), reason));
                }
            }
        }

        for (ticket_type_id, quantity) in per_type_quantities {
            if quantity as usize > draft.attendees.len() {
                let name = tickets
                    .get(&ticket_type_id)
                    .map(|t| t.name.as_str())
                    .unwrap_or("ticket");
                errors.push(FieldError::new(
                    "tickets",
                    format!("quantity for '{name}' exceeds the attendee count"),
                ));
            }
        }

        let has_per_attendee_types = tickets.values().any(|ticket| ticket.per_attendee);
        if has_per_attendee_types {
            for attendee in &draft.attendees {
                let seated = draft.tickets.assigned_to(attendee.attendee_id).any(|entry| {
                    tickets
                        .get(&entry.ticket_type_id)
                        .is_some_and(|t| t.per_attendee)
                });
                if !seated {
                    errors.push(FieldError::new(
                        "tickets",
                        format!("{} has no ticket assigned", attendee.full_name()),
                    ));
                }
            }
        }

        errors
    }

    fn validate_billing(&self, draft: &DraftRegistration) -> Vec<FieldError> {
        let Some(billing) = &draft.billing else {
            return vec![FieldError::new("billing", "billing details are required")];
        };

        let mut errors = Vec::new();
        let required = [
            ("billing.first_name", billing.first_name.as_str(), "first name is required"),
            ("billing.last_name", billing.last_name.as_str(), "last name is required"),
            (
                "billing.address_line_1",
                billing.address_line_1.as_str(),
                "street address is required",
            ),
            ("billing.suburb", billing.suburb.as_str(), "suburb is required"),
            ("billing.postcode", billing.postcode.as_str(), "postcode is required"),
            (
                "billing.state_territory",
                billing.state_territory.as_str(),
                "state or territory is required",
            ),
            ("billing.country", billing.country.as_str(), "country is required"),
        ];
        for (field, value, message) in required {
            if value.trim().is_empty() {
                errors.push(FieldError::new(field, message));
            }
        }

        if !looks_like_email(&billing.email) {
            errors.push(FieldError::new(
                "billing.email",
                "a valid email address is required",
            ));
        }
        if !looks_like_mobile(&billing.mobile) {
            errors.push(FieldError::new(
                "billing.mobile",
                "a valid mobile number is required",
            ));
        }

        errors
    }
}

fn looks_like_email(text: &str) -> bool {
    match text.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

fn looks_like_mobile(text: &str) -> bool {
    text.chars().filter(|c| c.is_ascii_digit()).count() >= 8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EventSummary, FunctionSummary, TicketType};
    use crate::eligibility::EligibilityRule;
    use crate::types::{BillingDetails, LodgeDetails, TicketSelection};
    use chrono::TimeZone;

    fn fixed_time(ts: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(ts, 0).unwrap()
    }

    struct Fixture {
        function: FunctionDetail,
        ceremony_event: Uuid,
        ceremony_seat: Uuid,
        banquet_seat: Uuid,
        program_book: Uuid,
    }

    fn fixture() -> Fixture {
        let function_id = Uuid::new_v4();
        let ceremony_event = Uuid::new_v4();
        let banquet_event = Uuid::new_v4();
        let ceremony_seat = Uuid::new_v4();
        let banquet_seat = Uuid::new_v4();
        let program_book = Uuid::new_v4();

        let function = FunctionDetail {
            summary: FunctionSummary {
                function_id,
                slug: "grand-installation-2025".to_string(),
                name: "Grand Installation 2025".to_string(),
                starts_on: fixed_time(1_750_000_000),
                ends_on: fixed_time(1_750_172_800),
                published: true,
            },
            description: "Annual installation of the Grand Master".to_string(),
            events: vec![
                EventSummary {
                    event_id: ceremony_event,
                    title: "Installation Ceremony".to_string(),
                    starts_at: fixed_time(1_750_000_000),
                    ticket_types: vec![TicketType {
                        ticket_type_id: ceremony_seat,
                        event_id: ceremony_event,
                        name: "Ceremony Seat".to_string(),
                        price_minor: 1_500,
                        per_attendee: true,
                    }],
                },
                EventSummary {
                    event_id: banquet_event,
                    title: "Grand Banquet".to_string(),
                    starts_at: fixed_time(1_750_086_400),
                    ticket_types: vec![
                        TicketType {
                            ticket_type_id: banquet_seat,
                            event_id: banquet_event,
                            name: "Banquet Seat".to_string(),
                            price_minor: 2_000,
                            per_attendee: true,
                        },
                        TicketType {
                            ticket_type_id: program_book,
                            event_id: banquet_event,
                            name: "Commemorative Program".to_string(),
                            price_minor: 500,
                            per_attendee: false,
                        },
                    ],
                },
            ],
        };

        Fixture {
            function,
            ceremony_event,
            ceremony_seat,
            banquet_seat,
            program_book,
        }
    }

    fn controller() -> WizardController {
        WizardController::new(EligibilityTable::new())
    }

    fn billing() -> BillingDetails {
        BillingDetails {
            first_name: "John".to_string(),
            last_name: "Smith".to_string(),
            email: "john@example.org".to_string(),
            mobile: "0400 123 456".to_string(),
            address_line_1: "1 Lodge Street".to_string(),
            address_line_2: None,
            suburb: "Sydney".to_string(),
            postcode: "2000".to_string(),
            state_territory: "NSW".to_string(),
            country: "AU".to_string(),
        }
    }

    fn individual_draft(fixture: &Fixture) -> DraftRegistration {
        let controller = controller();
        let mut draft = DraftRegistration::new(
            "owner-1",
            fixture.function.summary.function_id,
            &fixture.function.summary.slug,
        );
        controller.apply_update(
            &mut draft,
            DraftUpdate::RegistrationType {
                registration_type: RegistrationType::Individual,
            },
        );
        controller.apply_update(
            &mut draft,
            DraftUpdate::Attendees {
                attendees: vec![Attendee::mason("W Bro", "John", "Smith").with_primary(true)],
            },
        );
        draft
    }

    #[test]
    fn choosing_a_type_seeds_the_default_attendee() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = DraftRegistration::new(
            "owner-1",
            fixture.function.summary.function_id,
            "grand-installation-2025",
        );

        controller.apply_update(
            &mut draft,
            DraftUpdate::RegistrationType {
                registration_type: RegistrationType::Individual,
            },
        );

        assert_eq!(draft.attendees.len(), 1);
        assert!(draft.attendees[0].is_primary);
        assert!(matches!(
            draft.attendees[0].kind,
            AttendeeKind::Mason { .. }
        ));
    }

    #[test]
    fn advance_requires_a_registration_type() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = DraftRegistration::new(
            "owner-1",
            fixture.function.summary.function_id,
            "grand-installation-2025",
        );

        let err = controller.advance(&mut draft, &fixture.function).unwrap_err();
        assert_eq!(err.field_errors()[0].field, "registration_type");
        assert_eq!(draft.current_step, WizardStep::RegistrationType);
    }

    #[test]
    fn lodge_below_minimum_is_blocked_with_member_message() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = DraftRegistration::new(
            "owner-1",
            fixture.function.summary.function_id,
            "grand-installation-2025",
        );
        controller.apply_update(
            &mut draft,
            DraftUpdate::RegistrationType {
                registration_type: RegistrationType::Lodge,
            },
        );
        controller.apply_update(
            &mut draft,
            DraftUpdate::Lodge {
                lodge: LodgeDetails {
                    lodge_name: "Lodge Unity".to_string(),
                    lodge_number: "No. 6".to_string(),
                },
            },
        );
        controller.apply_update(
            &mut draft,
            DraftUpdate::Attendees {
                attendees: vec![
                    Attendee::mason("W Bro", "John", "Smith").with_primary(true),
                    Attendee::mason("Bro", "Alan", "Reed"),
                ],
            },
        );
        draft.current_step = WizardStep::AttendeeDetails;

        let err = controller.advance(&mut draft, &fixture.function).unwrap_err();
        let messages: Vec<&str> = err
            .field_errors()
            .iter()
            .map(|e| e.message.as_str())
            .collect();
        assert!(messages.contains(&"minimum 3 members required"));
        assert_eq!(draft.current_step, WizardStep::AttendeeDetails);
    }

    #[test]
    fn exactly_one_primary_is_enforced() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = individual_draft(&fixture);
        draft.current_step = WizardStep::AttendeeDetails;

        draft.attendees = vec![
            Attendee::mason("W Bro", "John", "Smith").with_primary(true),
            Attendee::mason("Bro", "Alan", "Reed").with_primary(true),
        ];
        let errors = controller.validate_step(&draft, WizardStep::AttendeeDetails, &fixture.function);
        assert!(errors
            .iter()
            .any(|e| e.message == "only one attendee can be primary"));

        draft.attendees = vec![Attendee::mason("W Bro", "John", "Smith")];
        let errors = controller.validate_step(&draft, WizardStep::AttendeeDetails, &fixture.function);
        assert!(errors
            .iter()
            .any(|e| e.message == "a primary attendee is required"));
    }

    #[test]
    fn partner_back_reference_must_resolve_to_a_principal() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = individual_draft(&fixture);

        let dangling = Attendee::partner_of(Uuid::new_v4(), "Wife", "Mrs", "June", "Smith");
        draft.attendees.push(dangling);
        let errors = controller.validate_step(&draft, WizardStep::AttendeeDetails, &fixture.function);
        assert!(errors.iter().any(|e| e
            .message
            .contains("partner must reference an existing mason or guest")));

        // A partner chained onto another partner is rejected too.
        let mut draft = individual_draft(&fixture);
        let principal = draft.attendees[0].attendee_id;
        let first_partner = Attendee::partner_of(principal, "Wife", "Mrs", "June", "Smith");
        let second_partner = Attendee::partner_of(
            first_partner.attendee_id,
            "Guest",
            "Ms",
            "Ivy",
            "Smith",
        );
        draft.attendees.push(first_partner);
        draft.attendees.push(second_partner);
        let errors = controller.validate_step(&draft, WizardStep::AttendeeDetails, &fixture.function);
        assert!(errors.iter().any(|e| e
            .message
            .contains("partner must reference an existing mason or guest")));
    }

    #[test]
    fn ticket_validation_covers_unknown_unassigned_and_overcount() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = individual_draft(&fixture);
        let attendee_id = draft.attendees[0].attendee_id;
        draft.current_step = WizardStep::TicketSelection;

        // Unknown ticket type.
        draft.tickets = TicketSelection::default().assign(Uuid::new_v4(), attendee_id);
        let errors = controller.validate_step(&draft, WizardStep::TicketSelection, &fixture.function);
        assert!(errors.iter().any(|e| e.message == "unknown ticket type"));

        // Seat not assigned to anyone.
        draft.tickets = TicketSelection::default().add(fixture.ceremony_seat, 1);
        let errors = controller.validate_step(&draft, WizardStep::TicketSelection, &fixture.function);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("must be assigned to an attendee")));

        // More seats of one type than attendees.
        draft.tickets = TicketSelection {
            entries: vec![crate::types::TicketSelectionEntry {
                ticket_type_id: fixture.ceremony_seat,
                quantity: 3,
                attendee_id: Some(attendee_id),
            }],
        };
        let errors = controller.validate_step(&draft, WizardStep::TicketSelection, &fixture.function);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("exceeds the attendee count")));

        // Empty selection.
        draft.tickets = TicketSelection::default();
        let errors = controller.validate_step(&draft, WizardStep::TicketSelection, &fixture.function);
        assert!(errors
            .iter()
            .any(|e| e.message == "select at least one ticket"));
    }

    #[test]
    fn every_attendee_needs_a_seat_when_function_sells_seats() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = individual_draft(&fixture);
        let first = draft.attendees[0].attendee_id;
        let guest = Attendee::guest("Mr", "Glen", "Hart");
        let guest_id = guest.attendee_id;
        draft.attendees.push(guest);

        draft.tickets = TicketSelection::default().assign(fixture.ceremony_seat, first);
        let errors = controller.validate_step(&draft, WizardStep::TicketSelection, &fixture.function);
        assert!(errors
            .iter()
            .any(|e| e.message == "Mr Glen Hart has no ticket assigned"));

        draft.tickets = TicketSelection::default()
            .assign(fixture.ceremony_seat, first)
            .assign(fixture.banquet_seat, guest_id)
            .add(fixture.program_book, 1);
        let errors = controller.validate_step(&draft, WizardStep::TicketSelection, &fixture.function);
        assert!(errors.is_empty());
    }

    #[test]
    fn eligibility_rules_apply_to_seated_attendees() {
        let fixture = fixture();
        let table = EligibilityTable::new()
            .restrict(fixture.ceremony_event, EligibilityRule::MasonsOnly);
        let controller = WizardController::new(table);

        let mut draft = individual_draft(&fixture);
        let guest = Attendee::guest("Mr", "Glen", "Hart");
        let guest_id = guest.attendee_id;
        draft.attendees.push(guest);
        let mason_id = draft.attendees[0].attendee_id;

        draft.tickets = TicketSelection::default()
            .assign(fixture.ceremony_seat, mason_id)
            .assign(fixture.ceremony_seat, guest_id);

        let errors = controller.validate_step(&draft, WizardStep::TicketSelection, &fixture.function);
        assert!(errors
            .iter()
            .any(|e| e.message.contains("not eligible for this event")));
    }

    #[test]
    fn billing_is_validated_before_payment() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = individual_draft(&fixture);
        draft.current_step = WizardStep::Payment;

        let errors = controller.validate_step(&draft, WizardStep::Payment, &fixture.function);
        assert!(errors.iter().any(|e| e.field == "billing"));

        let mut bad = billing();
        bad.email = "not-an-email".to_string();
        bad.mobile = "12".to_string();
        controller.apply_update(&mut draft, DraftUpdate::Billing { billing: bad });
        let errors = controller.validate_step(&draft, WizardStep::Payment, &fixture.function);
        assert!(errors.iter().any(|e| e.field == "billing.email"));
        assert!(errors.iter().any(|e| e.field == "billing.mobile"));

        controller.apply_update(&mut draft, DraftUpdate::Billing { billing: billing() });
        assert!(controller
            .validate_step(&draft, WizardStep::Payment, &fixture.function)
            .is_empty());
    }

    #[test]
    fn full_walk_reaches_payment_and_stops_there() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = individual_draft(&fixture);
        let attendee_id = draft.attendees[0].attendee_id;

        assert_eq!(
            controller.advance(&mut draft, &fixture.function).unwrap(),
            WizardStep::AttendeeDetails
        );
        assert_eq!(
            controller.advance(&mut draft, &fixture.function).unwrap(),
            WizardStep::TicketSelection
        );

        controller.apply_update(
            &mut draft,
            DraftUpdate::Tickets {
                tickets: TicketSelection::default().assign(fixture.ceremony_seat, attendee_id),
            },
        );
        assert_eq!(
            controller.advance(&mut draft, &fixture.function).unwrap(),
            WizardStep::Payment
        );

        controller.apply_update(&mut draft, DraftUpdate::Billing { billing: billing() });
        let err = controller.advance(&mut draft, &fixture.function).unwrap_err();
        assert!(err.to_string().contains("payment flow"));
        assert_eq!(draft.current_step, WizardStep::Payment);
    }

    #[test]
    fn retreat_keeps_later_step_data() {
        let fixture = fixture();
        let controller = controller();
        let mut draft = individual_draft(&fixture);
        let attendee_id = draft.attendees[0].attendee_id;
        draft.current_step = WizardStep::Payment;
        controller.apply_update(
            &mut draft,
            DraftUpdate::Tickets {
                tickets: TicketSelection::default().assign(fixture.ceremony_seat, attendee_id),
            },
        );
        controller.apply_update(&mut draft, DraftUpdate::Billing { billing: billing() });

        assert_eq!(controller.retreat(&mut draft), WizardStep::TicketSelection);
        assert_eq!(controller.retreat(&mut draft), WizardStep::AttendeeDetails);
        assert!(!draft.tickets.is_empty());
        assert!(draft.billing.is_some());

        draft.current_step = WizardStep::RegistrationType;
        assert_eq!(controller.retreat(&mut draft), WizardStep::RegistrationType);
    }

    #[test]
    fn recovery_prompt_reflects_saved_progress() {
        let fixture = fixture();
        let mut draft = individual_draft(&fixture);
        draft.current_step = WizardStep::TicketSelection;

        let prompt = RecoveryPrompt::for_draft(&draft);
        assert_eq!(prompt.draft_id, draft.draft_id);
        assert_eq!(prompt.resume_step, WizardStep::TicketSelection);
        assert_eq!(prompt.attendee_count, 1);
        assert_eq!(
            prompt.registration_type,
            Some(RegistrationType::Individual)
        );
    }
}
