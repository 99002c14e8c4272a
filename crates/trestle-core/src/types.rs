use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The three registration shapes the wizard supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationType {
    Individual,
    Lodge,
    Delegation,
}

impl RegistrationType {
    pub fn name(self) -> &'static str {
        match self {
            Self::Individual => "individual",
            Self::Lodge => "lodge",
            Self::Delegation => "delegation",
        }
    }

    /// Prefix baked into server-issued confirmation numbers.
    pub fn confirmation_prefix(self) -> &'static str {
        match self {
            Self::Individual => "IND",
            Self::Lodge => "LDG",
            Self::Delegation => "DEL",
        }
    }
}

/// Attendee classification. A partner row references the mason or guest it
/// accompanies; the back-reference never owns the principal row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "attendee_type", rename_all = "snake_case")]
pub enum AttendeeKind {
    Mason {
        rank: Option<String>,
        lodge_name: Option<String>,
        lodge_number: Option<String>,
    },
    Guest,
    Partner {
        relationship: String,
        principal_attendee_id: Uuid,
    },
}

impl AttendeeKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Mason { .. } => "mason",
            Self::Guest => "guest",
            Self::Partner { .. } => "partner",
        }
    }

    pub fn is_partner(&self) -> bool {
        matches!(self, Self::Partner { .. })
    }
}

/// One person attending the function, regardless of registration shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attendee {
    pub attendee_id: Uuid,
    #[serde(flatten)]
    pub kind: AttendeeKind,
    pub is_primary: bool,
    pub title: String,
    pub first_name: String,
    pub last_name: String,
}

impl Attendee {
    pub fn mason(
        title: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            attendee_id: Uuid::new_v4(),
            kind: AttendeeKind::Mason {
                rank: None,
                lodge_name: None,
                lodge_number: None,
            },
            is_primary: false,
            title: title.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    pub fn guest(
        title: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            attendee_id: Uuid::new_v4(),
            kind: AttendeeKind::Guest,
            is_primary: false,
            title: title.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    pub fn partner_of(
        principal_attendee_id: Uuid,
        relationship: impl Into<String>,
        title: impl Into<String>,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
    ) -> Self {
        Self {
            attendee_id: Uuid::new_v4(),
            kind: AttendeeKind::Partner {
                relationship: relationship.into(),
                principal_attendee_id,
            },
            is_primary: false,
            title: title.into(),
            first_name: first_name.into(),
            last_name: last_name.into(),
        }
    }

    pub fn with_primary(mut self, is_primary: bool) -> Self {
        self.is_primary = is_primary;
        self
    }

    pub fn with_masonic_details(
        mut self,
        rank: impl Into<String>,
        lodge_name: impl Into<String>,
        lodge_number: impl Into<String>,
    ) -> Self {
        if let AttendeeKind::Mason {
            rank: r,
            lodge_name: n,
            lodge_number: num,
        } = &mut self.kind
        {
            *r = Some(rank.into());
            *n = Some(lodge_name.into());
            *num = Some(lodge_number.into());
        }
        self
    }

    pub fn full_name(&self) -> String {
        format!("{} {} {}", self.title, self.first_name, self.last_name)
    }
}

/// Lodge block captured for lodge registrations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LodgeDetails {
    pub lodge_name: String,
    pub lodge_number: String,
}

/// Delegation block captured for official visiting delegations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationDetails {
    pub delegation_name: String,
    pub grand_lodge: String,
}

/// One line of the ticket selection: a ticket type, a quantity, and for
/// per-attendee ticket types the attendee the seat belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketSelectionEntry {
    pub ticket_type_id: Uuid,
    pub quantity: u32,
    pub attendee_id: Option<Uuid>,
}

/// The draft's ticket selection across all events of the function.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TicketSelection {
    pub entries: Vec<TicketSelectionEntry>,
}

impl TicketSelection {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn assign(mut self, ticket_type_id: Uuid, attendee_id: Uuid) -> Self {
        self.entries.push(TicketSelectionEntry {
            ticket_type_id,
            quantity: 1,
            attendee_id: Some(attendee_id),
        });
        self
    }

    pub fn add(mut self, ticket_type_id: Uuid, quantity: u32) -> Self {
        self.entries.push(TicketSelectionEntry {
            ticket_type_id,
            quantity,
            attendee_id: None,
        });
        self
    }

    /// Ticket entries assigned to the given attendee.
    pub fn assigned_to(&self, attendee_id: Uuid) -> impl Iterator<Item = &TicketSelectionEntry> {
        self.entries
            .iter()
            .filter(move |entry| entry.attendee_id == Some(attendee_id))
    }
}

/// Billing contact collected at the payment step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingDetails {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub mobile: String,
    pub address_line_1: String,
    pub address_line_2: Option<String>,
    pub suburb: String,
    pub postcode: String,
    pub state_territory: String,
    pub country: String,
}

impl BillingDetails {
    pub fn contact_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

/// Payment lifecycle of a draft or persisted registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

/// Lifecycle of a persisted registration row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationStatus {
    Pending,
    Completed,
    Failed,
}

/// Payment details submitted by the client once tokenization has happened
/// browser-side. The server never sees card data, only the gateway token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSubmission {
    pub payment_token: String,
    pub provider: String,
}

/// Result of a successful completion flow, echoed to the client and reused
/// verbatim when the same draft is submitted again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionOutcome {
    pub registration_id: Uuid,
    pub confirmation_number: String,
    pub payment_id: String,
    pub total_paid_minor: u64,
    pub completed_at: DateTime<Utc>,
}

/// Full registration row handed to the registration store after a captured
/// payment. The registration id equals the draft id that produced it, which
/// is what makes the upsert idempotent across resubmissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationUpsert {
    pub registration_id: Uuid,
    pub owner_id: String,
    pub function_id: Uuid,
    pub registration_type: RegistrationType,
    pub attendees: Vec<Attendee>,
    pub lodge: Option<LodgeDetails>,
    pub delegation: Option<DelegationDetails>,
    pub tickets: TicketSelection,
    pub billing_name: String,
    pub billing_email: String,
    pub subtotal_minor: u64,
    pub total_paid_minor: u64,
    pub payment_id: String,
    pub status: RegistrationStatus,
    pub payment_status: PaymentStatus,
}

/// Receipt returned by the store for an upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    pub registration_id: Uuid,
    pub confirmation_number: String,
    pub created_at: DateTime<Utc>,
}

/// Stored registration as the admin surface sees it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationRecord {
    pub registration_id: Uuid,
    pub confirmation_number: String,
    pub owner_id: String,
    pub function_id: Uuid,
    pub registration_type: RegistrationType,
    pub status: RegistrationStatus,
    pub payment_status: PaymentStatus,
    pub attendees: Vec<Attendee>,
    pub lodge: Option<LodgeDetails>,
    pub delegation: Option<DelegationDetails>,
    pub tickets: TicketSelection,
    pub billing_name: String,
    pub billing_email: String,
    pub subtotal_minor: u64,
    pub total_paid_minor: u64,
    pub payment_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Type-specific projection behind a confirmation number.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConfirmationDetail {
    Individual {
        attendees: Vec<Attendee>,
    },
    Lodge {
        lodge: LodgeDetails,
        members: Vec<Attendee>,
    },
    Delegation {
        delegation: DelegationDetails,
        delegates: Vec<Attendee>,
    },
}

/// Read model returned to a guest who presents a confirmation number.
/// Only fully paid registrations ever materialize into one of these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRecord {
    pub confirmation_number: String,
    pub registration_id: Uuid,
    pub function_id: Uuid,
    pub registration_type: RegistrationType,
    pub billing_name: String,
    pub billing_email: String,
    pub tickets: TicketSelection,
    pub total_paid_minor: u64,
    pub completed_at: DateTime<Utc>,
    pub detail: ConfirmationDetail,
}

/// Paging window for admin listings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl Default for QueryWindow {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attendee_kind_serializes_with_tag() {
        let attendee = Attendee::mason("W Bro", "John", "Smith")
            .with_masonic_details("PM", "Lodge Unity", "No. 6")
            .with_primary(true);
        let value = serde_json::to_value(&attendee).unwrap();
        assert_eq!(value["attendee_type"], "mason");
        assert_eq!(value["rank"], "PM");
        assert_eq!(value["is_primary"], true);

        let back: Attendee = serde_json::from_value(value).unwrap();
        assert_eq!(back, attendee);
    }

    #[test]
    fn partner_keeps_back_reference() {
        let mason = Attendee::mason("Bro", "Alan", "Reed");
        let partner = Attendee::partner_of(mason.attendee_id, "Wife", "Mrs", "June", "Reed");
        match partner.kind {
            AttendeeKind::Partner {
                principal_attendee_id,
                ..
            } => assert_eq!(principal_attendee_id, mason.attendee_id),
            _ => panic!("expected partner"),
        }
    }

    #[test]
    fn confirmation_prefixes_follow_registration_type() {
        assert_eq!(RegistrationType::Individual.confirmation_prefix(), "IND");
        assert_eq!(RegistrationType::Lodge.confirmation_prefix(), "LDG");
        assert_eq!(RegistrationType::Delegation.confirmation_prefix(), "DEL");
    }
}
