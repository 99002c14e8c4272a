use crate::types::{
    Attendee, BillingDetails, DelegationDetails, LodgeDetails, PaymentStatus, RegistrationType,
    TicketSelection,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Wizard steps in forward order.
///
/// `Confirmation` is terminal and never entered by a step transition; only a
/// successful payment completion lands there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WizardStep {
    RegistrationType,
    AttendeeDetails,
    TicketSelection,
    Payment,
    Confirmation,
}

impl WizardStep {
    pub fn name(self) -> &'static str {
        match self {
            Self::RegistrationType => "registration_type",
            Self::AttendeeDetails => "attendee_details",
            Self::TicketSelection => "ticket_selection",
            Self::Payment => "payment",
            Self::Confirmation => "confirmation",
        }
    }

    pub fn next(self) -> Option<WizardStep> {
        match self {
            Self::RegistrationType => Some(Self::AttendeeDetails),
            Self::AttendeeDetails => Some(Self::TicketSelection),
            Self::TicketSelection => Some(Self::Payment),
            Self::Payment => Some(Self::Confirmation),
            Self::Confirmation => None,
        }
    }

    pub fn previous(self) -> Option<WizardStep> {
        match self {
            Self::RegistrationType => None,
            Self::AttendeeDetails => Some(Self::RegistrationType),
            Self::TicketSelection => Some(Self::AttendeeDetails),
            Self::Payment => Some(Self::TicketSelection),
            Self::Confirmation => Some(Self::Payment),
        }
    }
}

/// One wizard session's in-flight registration.
///
/// The draft id doubles as the registration id once payment completes, which
/// keeps resubmission of the same draft idempotent end to end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftRegistration {
    pub draft_id: Uuid,
    pub owner_id: String,
    pub function_id: Uuid,
    pub function_slug: String,
    pub registration_type: Option<RegistrationType>,
    pub attendees: Vec<Attendee>,
    pub lodge: Option<LodgeDetails>,
    pub delegation: Option<DelegationDetails>,
    pub tickets: TicketSelection,
    pub billing: Option<BillingDetails>,
    pub current_step: WizardStep,
    pub payment_status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DraftRegistration {
    pub fn new(owner_id: impl Into<String>, function_id: Uuid, function_slug: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            draft_id: Uuid::new_v4(),
            owner_id: owner_id.into(),
            function_id,
            function_slug: function_slug.into(),
            registration_type: None,
            attendees: Vec::new(),
            lodge: None,
            delegation: None,
            tickets: TicketSelection::default(),
            billing: None,
            current_step: WizardStep::RegistrationType,
            payment_status: PaymentStatus::Pending,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn primary_attendee(&self) -> Option<&Attendee> {
        self.attendees.iter().find(|attendee| attendee.is_primary)
    }

    pub fn attendee(&self, attendee_id: Uuid) -> Option<&Attendee> {
        self.attendees
            .iter()
            .find(|attendee| attendee.attendee_id == attendee_id)
    }
}

/// One section update posted by the wizard client. Updates replace whole
/// sections; the server never merges partial field diffs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "section", rename_all = "snake_case")]
pub enum DraftUpdate {
    RegistrationType { registration_type: RegistrationType },
    Attendees { attendees: Vec<Attendee> },
    Lodge { lodge: LodgeDetails },
    Delegation { delegation: DelegationDetails },
    Tickets { tickets: TicketSelection },
    Billing { billing: BillingDetails },
}
