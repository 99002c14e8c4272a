//! Gateway, mail, and catalog adapters for trestle.

#![deny(unsafe_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use trestle_core::catalog::{
    EventSummary, FunctionCatalog, FunctionDetail, FunctionSummary, TicketType,
};
use trestle_core::error::RegistrationError;
use trestle_core::gateway::{ChargeOutcome, ChargeRequest, GatewayStatus, PaymentGateway};
use trestle_core::outbox::{MailSender, OutboxEntry};
use uuid::Uuid;

/// Mock card gateway for deterministic local payment simulation.
///
/// Charges succeed unless the token starts with `tok_fail`; repeated
/// idempotency keys replay the original outcome instead of charging again.
#[derive(Debug, Default)]
pub struct MockCardGateway {
    attempts: AtomicUsize,
    charges: Mutex<HashMap<String, ChargeOutcome>>,
}

impl MockCardGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total `create_payment` calls, replays included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Distinct charges created, replays excluded.
    pub fn charges(&self) -> usize {
        self.charges.lock().map(|guard| guard.len()).unwrap_or(0)
    }
}

#[async_trait]
impl PaymentGateway for MockCardGateway {
    fn provider(&self) -> &'static str {
        "mock-card"
    }

    async fn create_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, RegistrationError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut charges = self.charges.lock().map_err(|_| {
            RegistrationError::Infrastructure("mock gateway lock poisoned".to_string())
        })?;

        if let Some(existing) = charges.get(&request.idempotency_key) {
            return Ok(existing.clone());
        }

        let outcome = if request.payment_token.starts_with("tok_fail") {
            ChargeOutcome {
                payment_id: format!("mock-pay-{:04}", charges.len() + 1),
                status: GatewayStatus::Failed,
                charged_at: Utc::now(),
                failure_reason: Some("card_declined".to_string()),
            }
        } else {
            ChargeOutcome {
                payment_id: format!("mock-pay-{:04}", charges.len() + 1),
                status: GatewayStatus::Succeeded,
                charged_at: Utc::now(),
                failure_reason: None,
            }
        };
        charges.insert(request.idempotency_key.clone(), outcome.clone());
        Ok(outcome)
    }

    async fn complete_payment(
        &self,
        payment_id: &str,
        _idempotency_key: &str,
    ) -> Result<ChargeOutcome, RegistrationError> {
        Ok(ChargeOutcome {
            payment_id: payment_id.to_string(),
            status: GatewayStatus::Succeeded,
            charged_at: Utc::now(),
            failure_reason: None,
        })
    }

    async fn cancel_payment(
        &self,
        payment_id: &str,
        _idempotency_key: &str,
    ) -> Result<ChargeOutcome, RegistrationError> {
        Ok(ChargeOutcome {
            payment_id: payment_id.to_string(),
            status: GatewayStatus::Failed,
            charged_at: Utc::now(),
            failure_reason: Some("cancelled".to_string()),
        })
    }
}

/// Deterministic failing gateway useful for outage drills.
#[derive(Debug, Clone)]
pub struct AlwaysFailGateway {
    provider_name: &'static str,
    reason: String,
}

impl AlwaysFailGateway {
    pub fn new(provider_name: &'static str, reason: impl Into<String>) -> Self {
        Self {
            provider_name,
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PaymentGateway for AlwaysFailGateway {
    fn provider(&self) -> &'static str {
        self.provider_name
    }

    async fn create_payment(
        &self,
        _request: &ChargeRequest,
    ) -> Result<ChargeOutcome, RegistrationError> {
        Err(RegistrationError::Gateway {
            provider: self.provider_name.to_string(),
            message: self.reason.clone(),
        })
    }

    async fn complete_payment(
        &self,
        _payment_id: &str,
        _idempotency_key: &str,
    ) -> Result<ChargeOutcome, RegistrationError> {
        Err(RegistrationError::Gateway {
            provider: self.provider_name.to_string(),
            message: self.reason.clone(),
        })
    }

    async fn cancel_payment(
        &self,
        _payment_id: &str,
        _idempotency_key: &str,
    ) -> Result<ChargeOutcome, RegistrationError> {
        Err(RegistrationError::Gateway {
            provider: self.provider_name.to_string(),
            message: self.reason.clone(),
        })
    }
}

/// Mail sender that records every delivery and always succeeds.
#[derive(Debug, Default)]
pub struct RecordingMailSender {
    sent: Mutex<Vec<OutboxEntry>>,
}

impl RecordingMailSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<OutboxEntry> {
        self.sent
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl MailSender for RecordingMailSender {
    async fn send(&self, entry: &OutboxEntry) -> Result<(), String> {
        if let Ok(mut guard) = self.sent.lock() {
            guard.push(entry.clone());
        }
        Ok(())
    }
}

/// Mail sender that refuses every delivery with a fixed reason.
#[derive(Debug, Clone)]
pub struct RefusingMailSender {
    reason: String,
}

impl RefusingMailSender {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl MailSender for RefusingMailSender {
    async fn send(&self, _entry: &OutboxEntry) -> Result<(), String> {
        Err(self.reason.clone())
    }
}

/// Stable ids for the fixture catalog, usable from tests and demo seeds.
pub const INSTALLATION_FUNCTION: Uuid = Uuid::from_u128(0x7265_7374_6c65_0001);
pub const CEREMONY_EVENT: Uuid = Uuid::from_u128(0x7265_7374_6c65_0011);
pub const BANQUET_EVENT: Uuid = Uuid::from_u128(0x7265_7374_6c65_0012);
pub const CEREMONY_SEAT: Uuid = Uuid::from_u128(0x7265_7374_6c65_0021);
pub const BANQUET_SEAT: Uuid = Uuid::from_u128(0x7265_7374_6c65_0022);
pub const PROGRAM_BOOK: Uuid = Uuid::from_u128(0x7265_7374_6c65_0023);

/// Deterministic catalog fixture: one published Masonic function with a
/// ceremony, a banquet, and a non-seat add-on, plus one unpublished function
/// that must never surface through the public surface.
#[derive(Debug, Clone, Default)]
pub struct FixtureFunctionCatalog;

impl FixtureFunctionCatalog {
    pub fn installation() -> FunctionDetail {
        FunctionDetail {
            summary: FunctionSummary {
                function_id: INSTALLATION_FUNCTION,
                slug: "grand-installation-2025".to_string(),
                name: "Grand Installation 2025".to_string(),
                starts_on: fixed_time(1_747_440_000),
                ends_on: fixed_time(1_747_612_800),
                published: true,
            },
            description: "Installation of the Grand Master and investiture of officers"
                .to_string(),
            events: vec![
                EventSummary {
                    event_id: CEREMONY_EVENT,
                    title: "Installation Ceremony".to_string(),
                    starts_at: fixed_time(1_747_459_800),
                    ticket_types: vec![TicketType {
                        ticket_type_id: CEREMONY_SEAT,
                        event_id: CEREMONY_EVENT,
                        name: "Ceremony Seat".to_string(),
                        price_minor: 1_500,
                        per_attendee: true,
                    }],
                },
                EventSummary {
                    event_id: BANQUET_EVENT,
                    title: "Grand Banquet".to_string(),
                    starts_at: fixed_time(1_747_485_000),
                    ticket_types: vec![
                        TicketType {
                            ticket_type_id: BANQUET_SEAT,
                            event_id: BANQUET_EVENT,
                            name: "Banquet Seat".to_string(),
                            price_minor: 12_500,
                            per_attendee: true,
                        },
                        TicketType {
                            ticket_type_id: PROGRAM_BOOK,
                            event_id: BANQUET_EVENT,
                            name: "Commemorative Program".to_string(),
                            price_minor: 2_000,
                            per_attendee: false,
                        },
                    ],
                },
            ],
        }
    }

    fn unpublished() -> FunctionSummary {
        FunctionSummary {
            function_id: Uuid::from_u128(0x7265_7374_6c65_0002),
            slug: "quarterly-communication-2026".to_string(),
            name: "Quarterly Communication 2026".to_string(),
            starts_on: fixed_time(1_772_323_200),
            ends_on: fixed_time(1_772_409_600),
            published: false,
        }
    }
}

#[async_trait]
impl FunctionCatalog for FixtureFunctionCatalog {
    async fn published_functions(&self) -> Result<Vec<FunctionSummary>, RegistrationError> {
        let mut summaries = vec![Self::installation().summary, Self::unpublished()];
        summaries.retain(|summary| summary.published);
        Ok(summaries)
    }

    async fn function_by_slug(
        &self,
        slug: &str,
    ) -> Result<Option<FunctionDetail>, RegistrationError> {
        let detail = Self::installation();
        Ok((detail.summary.published && detail.summary.slug == slug).then_some(detail))
    }

    async fn function_by_id(
        &self,
        function_id: Uuid,
    ) -> Result<Option<FunctionDetail>, RegistrationError> {
        let detail = Self::installation();
        Ok((detail.summary.published && detail.summary.function_id == function_id)
            .then_some(detail))
    }
}

fn fixed_time(ts: i64) -> chrono::DateTime<Utc> {
    Utc.timestamp_opt(ts, 0)
        .single()
        .expect("fixture timestamp must be valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn charge(token: &str, key: &str) -> ChargeRequest {
        ChargeRequest::new(token, 2_111, "AUD", key, "Registration for Grand Installation")
    }

    #[tokio::test]
    async fn mock_gateway_replays_repeated_idempotency_keys() {
        let gateway = MockCardGateway::new();

        let first = gateway.create_payment(&charge("tok_visa", "key-1")).await.unwrap();
        let replay = gateway.create_payment(&charge("tok_visa", "key-1")).await.unwrap();
        let second = gateway.create_payment(&charge("tok_visa", "key-2")).await.unwrap();

        assert_eq!(first, replay);
        assert_ne!(first.payment_id, second.payment_id);
        assert_eq!(gateway.attempts(), 3);
        assert_eq!(gateway.charges(), 2);
    }

    #[tokio::test]
    async fn mock_gateway_declines_fail_tokens() {
        let gateway = MockCardGateway::new();
        let outcome = gateway
            .create_payment(&charge("tok_fail_insufficient", "key-1"))
            .await
            .unwrap();
        assert_eq!(outcome.status, GatewayStatus::Failed);
        assert_eq!(outcome.failure_reason.as_deref(), Some("card_declined"));
    }

    #[tokio::test]
    async fn failing_gateway_returns_gateway_errors() {
        let gateway = AlwaysFailGateway::new("outage-card", "forced");
        let err = gateway
            .create_payment(&charge("tok_visa", "key-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Gateway { .. }));
    }

    #[tokio::test]
    async fn fixture_catalog_hides_unpublished_functions() {
        let catalog = FixtureFunctionCatalog;

        let published = catalog.published_functions().await.unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].slug, "grand-installation-2025");

        assert!(catalog
            .function_by_slug("grand-installation-2025")
            .await
            .unwrap()
            .is_some());
        assert!(catalog
            .function_by_slug("quarterly-communication-2026")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn fixture_catalog_ticket_index_covers_all_types() {
        let detail = FixtureFunctionCatalog::installation();
        let index = detail.ticket_index();
        assert_eq!(index.len(), 3);
        assert!(index[&CEREMONY_SEAT].per_attendee);
        assert!(!index[&PROGRAM_BOOK].per_attendee);
    }
}
