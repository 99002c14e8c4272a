use crate::error::RegistrationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// A ticketed event inside a function, e.g. the installation ceremony or the
/// grand banquet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSummary {
    pub event_id: Uuid,
    pub title: String,
    pub starts_at: DateTime<Utc>,
    pub ticket_types: Vec<TicketType>,
}

/// A purchasable ticket type. `per_attendee` tickets are seats that must be
/// assigned to a named attendee; the rest are add-ons sold by quantity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketType {
    pub ticket_type_id: Uuid,
    pub event_id: Uuid,
    pub name: String,
    pub price_minor: u64,
    pub per_attendee: bool,
}

/// Top-level function listing entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSummary {
    pub function_id: Uuid,
    pub slug: String,
    pub name: String,
    pub starts_on: DateTime<Utc>,
    pub ends_on: DateTime<Utc>,
    pub published: bool,
}

/// Function detail with its events and their ticket types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDetail {
    pub summary: FunctionSummary,
    pub description: String,
    pub events: Vec<EventSummary>,
}

impl FunctionDetail {
    /// Ticket types across every event, keyed by id. Used by the wizard to
    /// validate selections and by the completion flow to price them.
    pub fn ticket_index(&self) -> HashMap<Uuid, &TicketType> {
        self.events
            .iter()
            .flat_map(|event| event.ticket_types.iter())
            .map(|ticket| (ticket.ticket_type_id, ticket))
            .collect()
    }
}

/// Read-only source of published functions.
///
/// Implementations wrap whatever holds the event catalog (hosted database,
/// fixtures); registration code never reaches past this seam.
#[async_trait]
pub trait FunctionCatalog: Send + Sync {
    async fn published_functions(&self) -> Result<Vec<FunctionSummary>, RegistrationError>;

    /// Detail for a published function. Unknown and unpublished slugs both
    /// resolve to `None`.
    async fn function_by_slug(&self, slug: &str)
        -> Result<Option<FunctionDetail>, RegistrationError>;

    async fn function_by_id(&self, function_id: Uuid)
        -> Result<Option<FunctionDetail>, RegistrationError>;
}
