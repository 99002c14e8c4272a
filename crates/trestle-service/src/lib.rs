#![deny(unsafe_code)]

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use trestle_adapters::{FixtureFunctionCatalog, MockCardGateway, RecordingMailSender, CEREMONY_EVENT};
use trestle_core::outbox::OutboxError;
use trestle_core::recon::ReconError;
use trestle_core::{
    bootstrap_registration_store, CompletionOutcome, ConfirmationRecord, DraftRegistration,
    DraftSealer, DraftUpdate, EligibilityRule, EligibilityTable, FeeBreakdown, FeeCalculator,
    FeeContext, FeeSchedule, FileDraftStore, FunctionDetail, FunctionSummary, MailSender,
    OutboxDrainReport, OutboxEntry, PaymentSubmission, QueryWindow, ReconciliationCase,
    RegistrationEngine, RegistrationError, RegistrationOpening, RegistrationRecord,
    RegistrationStorageConfig, StaticFeeScheduleSource,
};
use trestle_core::{EmailOutbox, ReconciliationLog};
use trestle_core::RecoveryChoice;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Directory holding the draft, outbox, and reconciliation files.
    pub data_dir: PathBuf,
    pub registration_storage: RegistrationStorageConfig,
    /// Salt for sealing drafts at rest; `None` stores them in the clear.
    pub draft_seal_salt: Option<String>,
    pub fee_cache_ttl: Duration,
    pub fee_schedule: FeeSchedule,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("trestle/data"),
            registration_storage: RegistrationStorageConfig::Memory,
            draft_seal_salt: None,
            fee_cache_ttl: FeeCalculator::DEFAULT_TTL,
            fee_schedule: FeeSchedule::default(),
        }
    }
}

#[derive(Clone)]
pub struct ServiceState {
    pub engine: Arc<RegistrationEngine>,
    pub mailer: Arc<dyn MailSender>,
    pub registration_backend: &'static str,
}

impl ServiceState {
    pub async fn bootstrap(config: ServiceConfig) -> Result<Self, ServiceError> {
        let ServiceConfig {
            data_dir,
            registration_storage,
            draft_seal_salt,
            fee_cache_ttl,
            fee_schedule,
        } = config;

        let registration_backend = registration_storage.label();
        let registrations = bootstrap_registration_store(registration_storage).await?;

        let sealer = draft_seal_salt.map(DraftSealer::new);
        let drafts = Arc::new(FileDraftStore::open(data_dir.join("drafts.json"), sealer));
        let outbox = EmailOutbox::load(data_dir.join("outbox.json"))?;
        let recon = ReconciliationLog::load(data_dir.join("reconciliation.json"))?;

        let fees = FeeCalculator::new(
            Arc::new(StaticFeeScheduleSource::new(fee_schedule)),
            fee_cache_ttl,
        );
        // The installation ceremony itself is closed to non-masons; the
        // banquet and add-ons stay open.
        let eligibility =
            EligibilityTable::new().restrict(CEREMONY_EVENT, EligibilityRule::MasonsOnly);

        let mut engine =
            RegistrationEngine::new(Arc::new(FixtureFunctionCatalog), drafts, registrations)
                .with_fee_calculator(fees)
                .with_eligibility(eligibility)
                .with_outbox(outbox)
                .with_reconciliation_log(recon);
        engine.register_gateway(Arc::new(MockCardGateway::new()));

        Ok(Self {
            engine: Arc::new(engine),
            mailer: Arc::new(RecordingMailSender::new()),
            registration_backend,
        })
    }
}

pub fn build_router(state: ServiceState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/functions", get(list_functions))
        .route("/functions/:slug", get(get_function))
        .route("/functions/:slug/register", post(begin_registration))
        .route("/api/registrations/drafts/:draft_id", get(get_draft))
        .route("/api/registrations/drafts/:draft_id", put(update_draft))
        .route("/api/registrations/drafts/:draft_id", delete(abandon_draft))
        .route(
            "/api/registrations/drafts/:draft_id/advance",
            post(advance_draft),
        )
        .route("/api/registrations/drafts/:draft_id/back", post(back_draft))
        .route(
            "/api/registrations/drafts/:draft_id/recovery",
            post(recover_draft),
        )
        .route("/api/calculate-fees", post(calculate_fees))
        .route(
            "/api/registrations/:draft_id/payment/complete",
            post(complete_payment),
        )
        .route(
            "/api/confirmations/:confirmation_number",
            get(get_confirmation),
        )
        .route("/admin/registrations", get(admin_registrations))
        .route("/admin/reconciliation", get(admin_reconciliation))
        .route("/admin/outbox", get(admin_outbox))
        .route("/admin/outbox/drain", post(admin_drain_outbox))
        .route("/admin/fees/cache/clear", post(admin_clear_fee_cache))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("core error: {0}")]
    Core(#[from] RegistrationError),
    #[error("outbox error: {0}")]
    Outbox(#[from] OutboxError),
    #[error("reconciliation log error: {0}")]
    Recon(#[from] ReconError),
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Http { status: StatusCode, message: String },
    #[error(transparent)]
    Core(#[from] RegistrationError),
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self::Http {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Http { status, message } => {
                (status, Json(serde_json::json!({ "error": message }))).into_response()
            }
            ApiError::Core(err) => {
                let status = match &err {
                    RegistrationError::Validation(_) => StatusCode::BAD_REQUEST,
                    RegistrationError::Authorization(_) => StatusCode::FORBIDDEN,
                    RegistrationError::NotFound(_) => StatusCode::NOT_FOUND,
                    RegistrationError::Gateway { .. } => StatusCode::BAD_GATEWAY,
                    RegistrationError::Persistence(_)
                    | RegistrationError::Infrastructure(_)
                    | RegistrationError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                let mut body = serde_json::json!({ "error": err.to_string() });
                let fields = err.field_errors();
                if !fields.is_empty() {
                    body["fields"] = serde_json::json!(fields);
                }
                (status, Json(body)).into_response()
            }
        }
    }
}

/// Pull the acting owner out of the `x-owner-id` header. Draft and payment
/// routes refuse to run without one.
fn owner_id(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("x-owner-id")
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| ApiError::bad_request("the x-owner-id header is required"))
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    registration_backend: &'static str,
    payment_providers: Vec<String>,
}

async fn health(State(state): State<ServiceState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        service: "trestle-service",
        registration_backend: state.registration_backend,
        payment_providers: state.engine.providers(),
    })
}

#[derive(Debug, Clone, Serialize)]
struct FunctionsResponse {
    items: Vec<FunctionSummary>,
}

async fn list_functions(
    State(state): State<ServiceState>,
) -> Result<Json<FunctionsResponse>, ApiError> {
    Ok(Json(FunctionsResponse {
        items: state.engine.published_functions().await?,
    }))
}

async fn get_function(
    Path(slug): Path<String>,
    State(state): State<ServiceState>,
) -> Result<Json<FunctionDetail>, ApiError> {
    Ok(Json(state.engine.function(&slug).await?))
}

async fn begin_registration(
    Path(slug): Path<String>,
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<RegistrationOpening>, ApiError> {
    let owner = owner_id(&headers)?;
    Ok(Json(state.engine.begin_registration(&slug, &owner).await?))
}

async fn get_draft(
    Path(draft_id): Path<Uuid>,
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<DraftRegistration>, ApiError> {
    let owner = owner_id(&headers)?;
    Ok(Json(state.engine.draft(draft_id, &owner).await?))
}

async fn update_draft(
    Path(draft_id): Path<Uuid>,
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(update): Json<DraftUpdate>,
) -> Result<Json<DraftRegistration>, ApiError> {
    let owner = owner_id(&headers)?;
    Ok(Json(state.engine.update_draft(draft_id, &owner, update).await?))
}

async fn advance_draft(
    Path(draft_id): Path<Uuid>,
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<DraftRegistration>, ApiError> {
    let owner = owner_id(&headers)?;
    Ok(Json(state.engine.advance_draft(draft_id, &owner).await?))
}

async fn back_draft(
    Path(draft_id): Path<Uuid>,
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<DraftRegistration>, ApiError> {
    let owner = owner_id(&headers)?;
    Ok(Json(state.engine.retreat_draft(draft_id, &owner).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct RecoveryRequest {
    choice: RecoveryChoice,
}

async fn recover_draft(
    Path(draft_id): Path<Uuid>,
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<RecoveryRequest>,
) -> Result<Json<DraftRegistration>, ApiError> {
    let owner = owner_id(&headers)?;
    Ok(Json(
        state
            .engine
            .resolve_recovery(draft_id, &owner, request.choice)
            .await?,
    ))
}

#[derive(Debug, Clone, Serialize)]
struct DraftDeleted {
    draft_id: Uuid,
    status: &'static str,
}

async fn abandon_draft(
    Path(draft_id): Path<Uuid>,
    State(state): State<ServiceState>,
    headers: HeaderMap,
) -> Result<Json<DraftDeleted>, ApiError> {
    let owner = owner_id(&headers)?;
    state.engine.delete_draft(draft_id, &owner).await?;
    Ok(Json(DraftDeleted {
        draft_id,
        status: "deleted",
    }))
}

#[derive(Debug, Clone, Deserialize)]
struct FeeQuoteRequest {
    subtotal_minor: i64,
    is_domestic: Option<bool>,
    card_country: Option<String>,
}

async fn calculate_fees(
    State(state): State<ServiceState>,
    Json(request): Json<FeeQuoteRequest>,
) -> Result<Json<FeeBreakdown>, ApiError> {
    let context = FeeContext {
        is_domestic: request.is_domestic,
        card_country: request.card_country,
    };
    Ok(Json(
        state.engine.quote_fees(request.subtotal_minor, &context).await?,
    ))
}

#[derive(Debug, Clone, Deserialize)]
struct CompletePaymentRequest {
    payment_token: String,
    provider: String,
}

async fn complete_payment(
    Path(draft_id): Path<Uuid>,
    State(state): State<ServiceState>,
    headers: HeaderMap,
    Json(request): Json<CompletePaymentRequest>,
) -> Result<Json<CompletionOutcome>, ApiError> {
    let owner = owner_id(&headers)?;
    let submission = PaymentSubmission {
        payment_token: request.payment_token,
        provider: request.provider,
    };
    Ok(Json(
        state
            .engine
            .complete_payment(draft_id, &owner, submission)
            .await?,
    ))
}

async fn get_confirmation(
    Path(confirmation_number): Path<String>,
    State(state): State<ServiceState>,
) -> Result<Json<ConfirmationRecord>, ApiError> {
    Ok(Json(state.engine.confirmation(&confirmation_number).await?))
}

#[derive(Debug, Clone, Deserialize)]
struct AdminListQuery {
    limit: Option<usize>,
    offset: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
struct RegistrationsResponse {
    returned: usize,
    items: Vec<RegistrationRecord>,
}

async fn admin_registrations(
    State(state): State<ServiceState>,
    Query(query): Query<AdminListQuery>,
) -> Result<Json<RegistrationsResponse>, ApiError> {
    let window = QueryWindow {
        limit: query.limit.unwrap_or(50).min(500),
        offset: query.offset.unwrap_or(0),
    };
    let items = state.engine.list_registrations(window).await?;
    Ok(Json(RegistrationsResponse {
        returned: items.len(),
        items,
    }))
}

#[derive(Debug, Clone, Serialize)]
struct ReconciliationResponse {
    items: Vec<ReconciliationCase>,
}

async fn admin_reconciliation(
    State(state): State<ServiceState>,
) -> Result<Json<ReconciliationResponse>, ApiError> {
    Ok(Json(ReconciliationResponse {
        items: state.engine.reconciliation_cases().await,
    }))
}

#[derive(Debug, Clone, Serialize)]
struct OutboxResponse {
    items: Vec<OutboxEntry>,
}

async fn admin_outbox(State(state): State<ServiceState>) -> Result<Json<OutboxResponse>, ApiError> {
    Ok(Json(OutboxResponse {
        items: state.engine.outbox_entries().await,
    }))
}

async fn admin_drain_outbox(
    State(state): State<ServiceState>,
) -> Result<Json<OutboxDrainReport>, ApiError> {
    Ok(Json(state.engine.drain_outbox(state.mailer.as_ref()).await?))
}

#[derive(Debug, Clone, Serialize)]
struct CacheCleared {
    status: &'static str,
}

async fn admin_clear_fee_cache(State(state): State<ServiceState>) -> Json<CacheCleared> {
    state.engine.clear_fee_cache().await;
    Json(CacheCleared { status: "cleared" })
}
