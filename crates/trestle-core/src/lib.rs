//! Trestle core: function registration and ticketing for Masonic events.
//!
//! This crate drives a draft-backed registration wizard with type-specific
//! eligibility rules, integer fee arithmetic with gateway gross-up, and a
//! strictly ordered payment completion flow that never leaves a captured
//! charge without either a registration row or a reconciliation case.

#![deny(unsafe_code)]

pub mod catalog;
pub mod draft;
pub mod eligibility;
pub mod engine;
pub mod error;
pub mod fees;
pub mod gateway;
pub mod outbox;
pub mod recon;
pub mod storage;
pub mod store;
pub mod types;
pub mod wizard;

pub use catalog::{EventSummary, FunctionCatalog, FunctionDetail, FunctionSummary, TicketType};
pub use draft::{DraftRegistration, DraftUpdate, WizardStep};
pub use eligibility::{
    policy_for, DefaultAttendee, EligibilityRule, EligibilityTable, RegistrationPolicy,
};
pub use engine::{RegistrationEngine, RegistrationOpening};
pub use error::{FieldError, RegistrationError};
pub use fees::{
    FeeBreakdown, FeeCalculator, FeeContext, FeeLine, FeeSchedule, FeeScheduleSource,
    StaticFeeScheduleSource,
};
pub use gateway::{
    ChargeOutcome, ChargeRequest, GatewayRegistry, GatewayStatus, PaymentGateway,
};
pub use outbox::{EmailOutbox, MailSender, OutboxDrainReport, OutboxEntry};
pub use recon::{ReconciliationCase, ReconciliationLog};
pub use storage::{
    bootstrap_registration_store, ConfirmationPointer, MemoryRegistrationStore,
    PostgresRegistrationStore, RegistrationStorageConfig, RegistrationStore,
};
pub use store::{DraftSealer, DraftStore, FileDraftStore, MemoryDraftStore};
pub use types::{
    Attendee, AttendeeKind, BillingDetails, CompletionOutcome, ConfirmationDetail,
    ConfirmationRecord, DelegationDetails, LodgeDetails, PaymentStatus, PaymentSubmission,
    QueryWindow, RegistrationReceipt, RegistrationRecord, RegistrationStatus, RegistrationType,
    RegistrationUpsert, TicketSelection, TicketSelectionEntry,
};
pub use wizard::{RecoveryChoice, RecoveryPrompt, WizardController};
