use crate::error::RegistrationError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Gateway-reported state of a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayStatus {
    Succeeded,
    Failed,
    Pending,
}

/// Server-side charge request. The token arrived from client-side
/// tokenization; no raw card data ever appears here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub payment_token: String,
    pub amount_minor: u64,
    pub currency: String,
    /// Stable per-draft key; the gateway must treat repeated keys as the
    /// same charge.
    pub idempotency_key: String,
    pub description: String,
    pub metadata: BTreeMap<String, String>,
}

impl ChargeRequest {
    pub fn new(
        payment_token: impl Into<String>,
        amount_minor: u64,
        currency: impl Into<String>,
        idempotency_key: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            payment_token: payment_token.into(),
            amount_minor,
            currency: currency.into(),
            idempotency_key: idempotency_key.into(),
            description: description.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// What a gateway reports back for a charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub payment_id: String,
    pub status: GatewayStatus,
    pub charged_at: DateTime<Utc>,
    /// Gateway-side failure detail when `status` is `Failed`.
    pub failure_reason: Option<String>,
}

/// Pluggable card payment provider.
///
/// Implementations wrap external processors; every call is idempotent under
/// the request's idempotency key.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    fn provider(&self) -> &'static str;

    async fn create_payment(
        &self,
        request: &ChargeRequest,
    ) -> Result<ChargeOutcome, RegistrationError>;

    /// Confirm a previously created pending payment.
    async fn complete_payment(
        &self,
        payment_id: &str,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, RegistrationError>;

    /// Void a payment that will not be completed.
    async fn cancel_payment(
        &self,
        payment_id: &str,
        idempotency_key: &str,
    ) -> Result<ChargeOutcome, RegistrationError>;
}

/// Registry of payment gateways keyed by provider label.
#[derive(Default)]
pub struct GatewayRegistry {
    gateways: HashMap<String, Arc<dyn PaymentGateway>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self {
            gateways: HashMap::new(),
        }
    }

    pub fn register(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways
            .insert(gateway.provider().to_string(), gateway);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn PaymentGateway>> {
        self.gateways.get(provider).cloned()
    }

    pub fn has(&self, provider: &str) -> bool {
        self.gateways.contains_key(provider)
    }

    pub fn providers(&self) -> Vec<String> {
        let mut providers: Vec<String> = self.gateways.keys().cloned().collect();
        providers.sort();
        providers
    }
}
