use crate::error::RegistrationError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Fee parameters, expressed in basis points and minor currency units so the
/// arithmetic stays integral end to end.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSchedule {
    pub schedule_version: String,
    /// Marketplace share applied to the ticket subtotal.
    pub platform_rate_bps: u32,
    /// Ceiling on the platform share per registration.
    pub platform_cap_minor: u64,
    /// Card processing rate for cards issued in the home country.
    pub domestic_rate_bps: u32,
    pub domestic_fixed_minor: u64,
    /// Card processing rate for everything else.
    pub international_rate_bps: u32,
    pub international_fixed_minor: u64,
    /// ISO country whose cards count as domestic.
    pub home_country: String,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            schedule_version: "trestle-fees-v1".to_string(),
            // 2.2% capped at 20.00.
            platform_rate_bps: 220,
            platform_cap_minor: 2_000,
            // 1.75% + 0.30 domestic, 3.5% + 0.30 international.
            domestic_rate_bps: 175,
            domestic_fixed_minor: 30,
            international_rate_bps: 350,
            international_fixed_minor: 30,
            home_country: "AU".to_string(),
        }
    }
}

/// Where the fee calculator learns the current schedule.
#[async_trait]
pub trait FeeScheduleSource: Send + Sync {
    async fn fetch_schedule(&self) -> Result<FeeSchedule, RegistrationError>;
}

/// Fixed schedule source for local runs and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticFeeScheduleSource {
    schedule: FeeSchedule,
}

impl StaticFeeScheduleSource {
    pub fn new(schedule: FeeSchedule) -> Self {
        Self { schedule }
    }
}

#[async_trait]
impl FeeScheduleSource for StaticFeeScheduleSource {
    async fn fetch_schedule(&self) -> Result<FeeSchedule, RegistrationError> {
        Ok(self.schedule.clone())
    }
}

/// Card origin inputs for a calculation. When neither field is present the
/// card is treated as domestic, matching how the checkout behaves before the
/// gateway has inspected the card.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FeeContext {
    pub is_domestic: Option<bool>,
    pub card_country: Option<String>,
}

impl FeeContext {
    pub fn domestic() -> Self {
        Self {
            is_domestic: Some(true),
            card_country: None,
        }
    }

    pub fn international() -> Self {
        Self {
            is_domestic: Some(false),
            card_country: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeLine {
    pub label: String,
    pub amount_minor: u64,
}

/// Result of a fee calculation. `customer_total_minor` is what the card is
/// charged; `connected_amount_minor` is what the organiser receives, which
/// the gross-up keeps equal to the ticket subtotal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeBreakdown {
    pub subtotal_minor: u64,
    pub platform_fee_minor: u64,
    pub gateway_fee_minor: u64,
    pub customer_total_minor: u64,
    pub connected_amount_minor: u64,
    pub domestic_card: bool,
    pub lines: Vec<FeeLine>,
}

impl FeeBreakdown {
    fn zero() -> Self {
        Self {
            subtotal_minor: 0,
            platform_fee_minor: 0,
            gateway_fee_minor: 0,
            customer_total_minor: 0,
            connected_amount_minor: 0,
            domestic_card: true,
            lines: Vec::new(),
        }
    }
}

struct CachedSchedule {
    schedule: FeeSchedule,
    fetched_at: Instant,
}

/// Fee calculator over a TTL-cached schedule source.
///
/// A source failure fails the calculation closed: no stale schedule is used
/// past its TTL and no compiled-in fallback is applied.
pub struct FeeCalculator {
    source: Arc<dyn FeeScheduleSource>,
    ttl: Duration,
    cached: RwLock<Option<CachedSchedule>>,
}

impl FeeCalculator {
    pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

    pub fn new(source: Arc<dyn FeeScheduleSource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cached: RwLock::new(None),
        }
    }

    pub fn with_default_ttl(source: Arc<dyn FeeScheduleSource>) -> Self {
        Self::new(source, Self::DEFAULT_TTL)
    }

    /// Drop the cached schedule so the next calculation refetches.
    pub async fn clear_cache(&self) {
        *self.cached.write().await = None;
    }

    async fn schedule(&self) -> Result<FeeSchedule, RegistrationError> {
        if let Some(cached) = self.cached.read().await.as_ref() {
            if cached.fetched_at.elapsed() < self.ttl {
                return Ok(cached.schedule.clone());
            }
        }
        let schedule = self.source.fetch_schedule().await?;
        *self.cached.write().await = Some(CachedSchedule {
            schedule: schedule.clone(),
            fetched_at: Instant::now(),
        });
        Ok(schedule)
    }

    /// Price a registration subtotal.
    ///
    /// A zero subtotal short-circuits to an all-zero breakdown without
    /// consulting the schedule source; a negative subtotal is a validation
    /// error, never a numeric result.
    pub async fn calculate(
        &self,
        subtotal_minor: i64,
        context: &FeeContext,
    ) -> Result<FeeBreakdown, RegistrationError> {
        if subtotal_minor < 0 {
            return Err(RegistrationError::invalid_field(
                "subtotal",
                "amount cannot be negative",
            ));
        }
        if subtotal_minor == 0 {
            return Ok(FeeBreakdown::zero());
        }

        let schedule = self.schedule().await?;
        if schedule.platform_rate_bps >= 10_000
            || schedule.domestic_rate_bps >= 10_000
            || schedule.international_rate_bps >= 10_000
        {
            return Err(RegistrationError::Infrastructure(format!(
                "fee schedule '{}' carries a rate of 100% or more",
                schedule.schedule_version
            )));
        }
        let subtotal = subtotal_minor as u64;
        let domestic = resolve_domestic(context, &schedule);
        let (rate_bps, fixed_minor) = if domestic {
            (schedule.domestic_rate_bps, schedule.domestic_fixed_minor)
        } else {
            (
                schedule.international_rate_bps,
                schedule.international_fixed_minor,
            )
        };

        let platform_fee = rate_component(subtotal, schedule.platform_rate_bps)
            .min(schedule.platform_cap_minor);

        // Gross the charge up so the gateway's percentage-plus-fixed cut
        // still leaves subtotal + platform fee behind.
        let base = subtotal + platform_fee + fixed_minor;
        let customer_total = round_div(base as u128 * 10_000, (10_000 - rate_bps as u64) as u128);
        let gateway_fee = customer_total - subtotal - platform_fee;

        Ok(FeeBreakdown {
            subtotal_minor: subtotal,
            platform_fee_minor: platform_fee,
            gateway_fee_minor: gateway_fee,
            customer_total_minor: customer_total,
            connected_amount_minor: subtotal,
            domestic_card: domestic,
            lines: vec![
                FeeLine {
                    label: "Tickets".to_string(),
                    amount_minor: subtotal,
                },
                FeeLine {
                    label: "Booking fee".to_string(),
                    amount_minor: platform_fee,
                },
                FeeLine {
                    label: "Card processing".to_string(),
                    amount_minor: gateway_fee,
                },
                FeeLine {
                    label: "Total".to_string(),
                    amount_minor: customer_total,
                },
            ],
        })
    }
}

fn resolve_domestic(context: &FeeContext, schedule: &FeeSchedule) -> bool {
    if let Some(domestic) = context.is_domestic {
        return domestic;
    }
    match context.card_country.as_deref() {
        Some(country) => country.eq_ignore_ascii_case(&schedule.home_country),
        None => true,
    }
}

fn rate_component(amount_minor: u64, rate_bps: u32) -> u64 {
    round_div(amount_minor as u128 * rate_bps as u128, 10_000)
}

/// Integer division rounding half away from zero.
fn round_div(numerator: u128, denominator: u128) -> u64 {
    ((numerator + denominator / 2) / denominator) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSource {
        calls: Arc<AtomicUsize>,
        schedule: FeeSchedule,
    }

    impl CountingSource {
        fn new(calls: Arc<AtomicUsize>) -> Self {
            Self {
                calls,
                schedule: FeeSchedule::default(),
            }
        }
    }

    #[async_trait]
    impl FeeScheduleSource for CountingSource {
        async fn fetch_schedule(&self) -> Result<FeeSchedule, RegistrationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.schedule.clone())
        }
    }

    struct BrokenSource;

    #[async_trait]
    impl FeeScheduleSource for BrokenSource {
        async fn fetch_schedule(&self) -> Result<FeeSchedule, RegistrationError> {
            Err(RegistrationError::Infrastructure(
                "fee schedule unavailable".into(),
            ))
        }
    }

    fn default_calculator() -> FeeCalculator {
        FeeCalculator::with_default_ttl(Arc::new(StaticFeeScheduleSource::default()))
    }

    #[tokio::test]
    async fn domestic_twenty_dollar_subtotal() {
        let calculator = default_calculator();
        let breakdown = calculator
            .calculate(2_000, &FeeContext::domestic())
            .await
            .unwrap();

        assert_eq!(breakdown.platform_fee_minor, 44);
        assert_eq!(breakdown.gateway_fee_minor, 67);
        assert_eq!(breakdown.customer_total_minor, 2_111);
        assert_eq!(breakdown.connected_amount_minor, 2_000);
        assert!(breakdown.domestic_card);
    }

    #[tokio::test]
    async fn international_rate_is_steeper() {
        let calculator = default_calculator();
        let domestic = calculator
            .calculate(2_000, &FeeContext::domestic())
            .await
            .unwrap();
        let international = calculator
            .calculate(2_000, &FeeContext::international())
            .await
            .unwrap();

        assert!(international.customer_total_minor > domestic.customer_total_minor);
        assert_eq!(international.connected_amount_minor, 2_000);
        assert_eq!(international.platform_fee_minor, domestic.platform_fee_minor);
    }

    #[tokio::test]
    async fn platform_fee_hits_cap() {
        let calculator = default_calculator();
        // 2.2% of 200,000 would be 4,400; the cap holds it at 2,000.
        let breakdown = calculator
            .calculate(200_000, &FeeContext::domestic())
            .await
            .unwrap();
        assert_eq!(breakdown.platform_fee_minor, 2_000);
    }

    #[tokio::test]
    async fn zero_subtotal_skips_schedule_source() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calculator = FeeCalculator::with_default_ttl(Arc::new(CountingSource::new(
            Arc::clone(&calls),
        )));

        let breakdown = calculator
            .calculate(0, &FeeContext::default())
            .await
            .unwrap();
        assert_eq!(breakdown.customer_total_minor, 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn negative_subtotal_is_rejected() {
        let calculator = default_calculator();
        let err = calculator
            .calculate(-500, &FeeContext::domestic())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Validation(_)));
    }

    #[tokio::test]
    async fn cache_avoids_refetch_inside_ttl() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calculator = FeeCalculator::with_default_ttl(Arc::new(CountingSource::new(
            Arc::clone(&calls),
        )));

        for _ in 0..3 {
            calculator
                .calculate(2_000, &FeeContext::domestic())
                .await
                .unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn expired_ttl_and_manual_clear_refetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let calculator = FeeCalculator::new(
            Arc::new(CountingSource::new(Arc::clone(&calls))),
            Duration::ZERO,
        );

        calculator
            .calculate(2_000, &FeeContext::domestic())
            .await
            .unwrap();
        calculator
            .calculate(2_000, &FeeContext::domestic())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        let cached = FeeCalculator::with_default_ttl(Arc::new(CountingSource::new(Arc::clone(
            &calls,
        ))));
        cached.calculate(2_000, &FeeContext::domestic()).await.unwrap();
        cached.clear_cache().await;
        cached.calculate(2_000, &FeeContext::domestic()).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn source_failure_fails_closed() {
        let calculator = FeeCalculator::with_default_ttl(Arc::new(BrokenSource));
        let err = calculator
            .calculate(2_000, &FeeContext::domestic())
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Infrastructure(_)));
    }

    #[tokio::test]
    async fn card_country_resolves_domesticity() {
        let calculator = default_calculator();
        let au = FeeContext {
            is_domestic: None,
            card_country: Some("au".to_string()),
        };
        let nz = FeeContext {
            is_domestic: None,
            card_country: Some("NZ".to_string()),
        };
        assert!(calculator.calculate(2_000, &au).await.unwrap().domestic_card);
        assert!(!calculator.calculate(2_000, &nz).await.unwrap().domestic_card);
    }
}
