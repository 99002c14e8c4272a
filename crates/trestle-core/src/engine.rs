use crate::catalog::{FunctionCatalog, FunctionDetail, FunctionSummary};
use crate::draft::{DraftRegistration, DraftUpdate};
use crate::eligibility::EligibilityTable;
use crate::error::RegistrationError;
use crate::fees::{FeeBreakdown, FeeCalculator, FeeContext, FeeSchedule, StaticFeeScheduleSource};
use crate::gateway::{ChargeRequest, GatewayRegistry, GatewayStatus, PaymentGateway};
use crate::outbox::{EmailOutbox, MailSender, OutboxDrainReport, OutboxEntry};
use crate::recon::{ReconciliationCase, ReconciliationLog};
use crate::storage::RegistrationStore;
use crate::store::DraftStore;
use crate::types::{
    CompletionOutcome, PaymentStatus, PaymentSubmission, QueryWindow, RegistrationRecord,
    RegistrationStatus, RegistrationUpsert,
};
use crate::wizard::{RecoveryChoice, RecoveryPrompt, WizardController};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// What a guest gets back when they open the wizard for a function.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "opening", rename_all = "snake_case")]
pub enum RegistrationOpening {
    /// No incomplete draft existed; a fresh one was created and saved.
    Fresh { draft: DraftRegistration },
    /// An incomplete draft exists for this owner and function. Nothing is
    /// created until the caller resolves the prompt.
    Recoverable { prompt: RecoveryPrompt },
}

/// Everything the registration flows need, wired together once at startup.
///
/// The engine owns the strict completion order: validate, price, charge,
/// persist, notify, clear. Failures at each stage degrade exactly as far as
/// that stage allows and no further; in particular nothing after a captured
/// charge can un-capture it, so persistence failures land in the
/// reconciliation log instead of an automatic refund.
pub struct RegistrationEngine {
    catalog: Arc<dyn FunctionCatalog>,
    drafts: Arc<dyn DraftStore>,
    registrations: Arc<dyn RegistrationStore>,
    gateways: GatewayRegistry,
    fees: FeeCalculator,
    wizard: WizardController,
    outbox: Mutex<EmailOutbox>,
    recon: Mutex<ReconciliationLog>,
    currency: String,
}

impl RegistrationEngine {
    pub fn new(
        catalog: Arc<dyn FunctionCatalog>,
        drafts: Arc<dyn DraftStore>,
        registrations: Arc<dyn RegistrationStore>,
    ) -> Self {
        Self {
            catalog,
            drafts,
            registrations,
            gateways: GatewayRegistry::new(),
            fees: FeeCalculator::with_default_ttl(Arc::new(StaticFeeScheduleSource::new(
                FeeSchedule::default(),
            ))),
            wizard: WizardController::new(EligibilityTable::new()),
            outbox: Mutex::new(EmailOutbox::in_memory()),
            recon: Mutex::new(ReconciliationLog::in_memory()),
            currency: "AUD".to_string(),
        }
    }

    pub fn register_gateway(&mut self, gateway: Arc<dyn PaymentGateway>) {
        self.gateways.register(gateway);
    }

    pub fn with_fee_calculator(mut self, fees: FeeCalculator) -> Self {
        self.fees = fees;
        self
    }

    pub fn with_eligibility(mut self, eligibility: EligibilityTable) -> Self {
        self.wizard = WizardController::new(eligibility);
        self
    }

    pub fn with_outbox(mut self, outbox: EmailOutbox) -> Self {
        self.outbox = Mutex::new(outbox);
        self
    }

    pub fn with_reconciliation_log(mut self, log: ReconciliationLog) -> Self {
        self.recon = Mutex::new(log);
        self
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = currency.into();
        self
    }

    pub fn providers(&self) -> Vec<String> {
        self.gateways.providers()
    }

    // ---- catalog ----------------------------------------------------------

    pub async fn published_functions(&self) -> Result<Vec<FunctionSummary>, RegistrationError> {
        self.catalog.published_functions().await
    }

    pub async fn function(&self, slug: &str) -> Result<FunctionDetail, RegistrationError> {
        self.catalog
            .function_by_slug(slug)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("function '{slug}' not found")))
    }

    async fn function_for_draft(
        &self,
        draft: &DraftRegistration,
    ) -> Result<FunctionDetail, RegistrationError> {
        self.catalog
            .function_by_id(draft.function_id)
            .await?
            .ok_or_else(|| {
                RegistrationError::NotFound(format!(
                    "function '{}' is no longer available",
                    draft.function_slug
                ))
            })
    }

    // ---- wizard sessions --------------------------------------------------

    /// Open the wizard for a function. An incomplete draft for the same owner
    /// turns into a recovery prompt instead of silently starting over.
    pub async fn begin_registration(
        &self,
        slug: &str,
        owner_id: &str,
    ) -> Result<RegistrationOpening, RegistrationError> {
        let function = self.function(slug).await?;

        if let Some(existing) = self
            .drafts
            .find_incomplete(owner_id, function.summary.function_id)
            .await?
        {
            return Ok(RegistrationOpening::Recoverable {
                prompt: RecoveryPrompt::for_draft(&existing),
            });
        }

        let draft = DraftRegistration::new(owner_id, function.summary.function_id, slug);
        self.drafts.save(&draft).await?;
        tracing::info!(draft_id = %draft.draft_id, function = slug, "registration draft opened");
        Ok(RegistrationOpening::Fresh { draft })
    }

    /// Answer a recovery prompt: resume the saved draft, or discard it and
    /// start a fresh one for the same function.
    pub async fn resolve_recovery(
        &self,
        draft_id: Uuid,
        owner_id: &str,
        choice: RecoveryChoice,
    ) -> Result<DraftRegistration, RegistrationError> {
        let existing = self.owned_draft(draft_id, owner_id).await?;
        match choice {
            RecoveryChoice::Resume => Ok(existing),
            RecoveryChoice::Discard => {
                self.drafts.delete(draft_id).await?;
                let fresh = DraftRegistration::new(
                    owner_id,
                    existing.function_id,
                    existing.function_slug.clone(),
                );
                self.drafts.save(&fresh).await?;
                tracing::info!(
                    discarded = %draft_id,
                    draft_id = %fresh.draft_id,
                    "draft discarded, fresh draft opened"
                );
                Ok(fresh)
            }
        }
    }

    pub async fn draft(
        &self,
        draft_id: Uuid,
        owner_id: &str,
    ) -> Result<DraftRegistration, RegistrationError> {
        self.owned_draft(draft_id, owner_id).await
    }

    pub async fn update_draft(
        &self,
        draft_id: Uuid,
        owner_id: &str,
        update: DraftUpdate,
    ) -> Result<DraftRegistration, RegistrationError> {
        let mut draft = self.owned_draft(draft_id, owner_id).await?;
        self.wizard.apply_update(&mut draft, update);
        self.drafts.save(&draft).await?;
        Ok(draft)
    }

    /// Validate the current step and move the draft forward. The saved draft
    /// is untouched when validation fails.
    pub async fn advance_draft(
        &self,
        draft_id: Uuid,
        owner_id: &str,
    ) -> Result<DraftRegistration, RegistrationError> {
        let mut draft = self.owned_draft(draft_id, owner_id).await?;
        let function = self.function_for_draft(&draft).await?;
        self.wizard.advance(&mut draft, &function)?;
        self.drafts.save(&draft).await?;
        Ok(draft)
    }

    pub async fn retreat_draft(
        &self,
        draft_id: Uuid,
        owner_id: &str,
    ) -> Result<DraftRegistration, RegistrationError> {
        let mut draft = self.owned_draft(draft_id, owner_id).await?;
        self.wizard.retreat(&mut draft);
        self.drafts.save(&draft).await?;
        Ok(draft)
    }

    pub async fn delete_draft(
        &self,
        draft_id: Uuid,
        owner_id: &str,
    ) -> Result<(), RegistrationError> {
        self.owned_draft(draft_id, owner_id).await?;
        self.drafts.delete(draft_id).await
    }

    async fn owned_draft(
        &self,
        draft_id: Uuid,
        owner_id: &str,
    ) -> Result<DraftRegistration, RegistrationError> {
        let draft = self
            .drafts
            .load(draft_id)
            .await?
            .ok_or_else(|| RegistrationError::NotFound(format!("draft '{draft_id}' not found")))?;
        if draft.owner_id != owner_id {
            return Err(RegistrationError::Authorization(
                "draft belongs to a different owner".to_string(),
            ));
        }
        Ok(draft)
    }

    // ---- fees -------------------------------------------------------------

    pub async fn quote_fees(
        &self,
        subtotal_minor: i64,
        context: &FeeContext,
    ) -> Result<FeeBreakdown, RegistrationError> {
        self.fees.calculate(subtotal_minor, context).await
    }

    pub async fn clear_fee_cache(&self) {
        self.fees.clear_cache().await;
    }

    fn price_tickets(
        &self,
        draft: &DraftRegistration,
        function: &FunctionDetail,
    ) -> Result<u64, RegistrationError> {
        let index = function.ticket_index();
        let mut subtotal: u64 = 0;
        for (position, entry) in draft.tickets.entries.iter().enumerate() {
            let ticket = index.get(&entry.ticket_type_id).ok_or_else(|| {
                RegistrationError::invalid_field(
                    format!("tickets[{position}].ticket_type_id"),
                    "unknown ticket type",
                )
            })?;
            subtotal = subtotal
                .saturating_add(ticket.price_minor.saturating_mul(u64::from(entry.quantity)));
        }
        Ok(subtotal)
    }

    // ---- payment completion ----------------------------------------------

    /// Run the completion flow for a draft: re-validate every step, price the
    /// selection, charge the gateway, persist the registration, queue the
    /// confirmation email, and clear the draft.
    ///
    /// Resubmitting a draft that already completed returns the stored outcome
    /// without contacting the gateway again.
    pub async fn complete_payment(
        &self,
        draft_id: Uuid,
        owner_id: &str,
        submission: PaymentSubmission,
    ) -> Result<CompletionOutcome, RegistrationError> {
        if let Some(record) = self.registrations.registration(draft_id).await? {
            if record.owner_id != owner_id {
                return Err(RegistrationError::Authorization(
                    "registration belongs to a different owner".to_string(),
                ));
            }
            if record.status == RegistrationStatus::Completed
                && record.payment_status == PaymentStatus::Completed
            {
                tracing::info!(
                    registration_id = %record.registration_id,
                    "resubmission of completed draft, returning stored outcome"
                );
                return Ok(outcome_from_record(&record));
            }
        }

        let mut draft = self.owned_draft(draft_id, owner_id).await?;
        let function = self.function_for_draft(&draft).await?;

        let errors = self.wizard.validate_for_payment(&draft, &function);
        if !errors.is_empty() {
            return Err(RegistrationError::Validation(errors));
        }
        // validate_for_payment guarantees these are present.
        let Some(registration_type) = draft.registration_type else {
            return Err(RegistrationError::invalid_field(
                "registration_type",
                "choose a registration type",
            ));
        };
        let Some(billing) = draft.billing.clone() else {
            return Err(RegistrationError::invalid_field(
                "billing",
                "billing details are required",
            ));
        };

        let gateway = self.gateways.get(&submission.provider).ok_or_else(|| {
            RegistrationError::invalid_field(
                "provider",
                format!("unknown payment provider '{}'", submission.provider),
            )
        })?;

        let subtotal = self.price_tickets(&draft, &function)?;
        let context = FeeContext {
            is_domestic: None,
            card_country: Some(billing.country.clone()),
        };
        let fees = self.fees.calculate(subtotal as i64, &context).await?;

        // Stable per-draft key: a resubmission that races past the stored
        // outcome check still lands on the same gateway-side charge.
        let idempotency_key = format!("trestle-reg-{draft_id}");
        let request = ChargeRequest::new(
            submission.payment_token.clone(),
            fees.customer_total_minor,
            self.currency.clone(),
            idempotency_key.clone(),
            format!("Registration for {}", function.summary.name),
        )
        .with_metadata("draft_id", draft_id.to_string())
        .with_metadata("function_slug", function.summary.slug.clone());

        let charge = match gateway.create_payment(&request).await {
            Ok(charge) => charge,
            Err(err) => {
                self.mark_payment_failed(&mut draft).await;
                return Err(err);
            }
        };
        match charge.status {
            GatewayStatus::Succeeded => {}
            GatewayStatus::Failed | GatewayStatus::Pending => {
                self.mark_payment_failed(&mut draft).await;
                let message = charge
                    .failure_reason
                    .unwrap_or_else(|| "payment was not captured".to_string());
                tracing::warn!(
                    draft_id = %draft_id,
                    provider = %submission.provider,
                    %message,
                    "gateway declined the charge"
                );
                return Err(RegistrationError::Gateway {
                    provider: submission.provider,
                    message,
                });
            }
        }

        let upsert = RegistrationUpsert {
            registration_id: draft_id,
            owner_id: draft.owner_id.clone(),
            function_id: draft.function_id,
            registration_type,
            attendees: draft.attendees.clone(),
            lodge: draft.lodge.clone(),
            delegation: draft.delegation.clone(),
            tickets: draft.tickets.clone(),
            billing_name: billing.contact_name(),
            billing_email: billing.email.clone(),
            subtotal_minor: subtotal,
            total_paid_minor: fees.customer_total_minor,
            payment_id: charge.payment_id.clone(),
            status: RegistrationStatus::Completed,
            payment_status: PaymentStatus::Completed,
        };

        let receipt = match self.registrations.upsert_registration(upsert).await {
            Ok(receipt) => receipt,
            Err(err) => {
                // The charge captured; the row did not land. Log a case for
                // an operator instead of attempting an automatic refund.
                let case = ReconciliationCase {
                    case_id: Uuid::new_v4(),
                    draft_id,
                    owner_id: draft.owner_id.clone(),
                    function_id: draft.function_id,
                    provider: submission.provider.clone(),
                    payment_id: charge.payment_id.clone(),
                    amount_minor: fees.customer_total_minor,
                    reason: format!("payment captured but registration write failed: {err}"),
                    occurred_at: Utc::now(),
                };
                tracing::error!(
                    draft_id = %draft_id,
                    payment_id = %charge.payment_id,
                    error = %err,
                    "registration write failed after capture, reconciliation case opened"
                );
                let mut recon = self.recon.lock().await;
                if let Err(log_err) = recon.record(case) {
                    tracing::error!(error = %log_err, "reconciliation log write failed");
                }
                return Err(RegistrationError::Persistence(format!(
                    "payment {} captured but the registration could not be saved: {err}",
                    charge.payment_id
                )));
            }
        };

        {
            let mut outbox = self.outbox.lock().await;
            let payload = serde_json::json!({
                "confirmation_number": receipt.confirmation_number,
                "function": function.summary.name,
                "registration_type": registration_type.name(),
                "total_paid_minor": fees.customer_total_minor,
            });
            if let Err(err) = outbox.enqueue(
                "registration_confirmation",
                billing.email.clone(),
                format!("Registration confirmed: {}", receipt.confirmation_number),
                payload,
            ) {
                tracing::warn!(error = %err, "confirmation email could not be queued");
            }
        }

        if let Err(err) = self.drafts.delete(draft_id).await {
            tracing::warn!(draft_id = %draft_id, error = %err, "completed draft could not be cleared");
        }

        tracing::info!(
            registration_id = %receipt.registration_id,
            confirmation = %receipt.confirmation_number,
            total_minor = fees.customer_total_minor,
            "registration completed"
        );

        Ok(CompletionOutcome {
            registration_id: receipt.registration_id,
            confirmation_number: receipt.confirmation_number,
            payment_id: charge.payment_id,
            total_paid_minor: fees.customer_total_minor,
            completed_at: charge.charged_at,
        })
    }

    async fn mark_payment_failed(&self, draft: &mut DraftRegistration) {
        draft.payment_status = PaymentStatus::Failed;
        draft.touch();
        if let Err(err) = self.drafts.save(draft).await {
            tracing::warn!(draft_id = %draft.draft_id, error = %err, "failed draft could not be saved");
        }
    }

    // ---- confirmations ----------------------------------------------------

    /// Resolve a confirmation number to its type-specific read model. Anything
    /// short of a fully completed registration reads as not found.
    pub async fn confirmation(
        &self,
        confirmation_number: &str,
    ) -> Result<crate::types::ConfirmationRecord, RegistrationError> {
        let not_found = || {
            RegistrationError::NotFound(format!(
                "confirmation '{confirmation_number}' not found"
            ))
        };

        let pointer = self
            .registrations
            .lookup_confirmation(confirmation_number)
            .await?
            .ok_or_else(not_found)?;

        if pointer.status != RegistrationStatus::Completed
            || pointer.payment_status != PaymentStatus::Completed
        {
            return Err(not_found());
        }

        let projection = match pointer.registration_type {
            crate::types::RegistrationType::Individual => {
                self.registrations
                    .individual_projection(pointer.registration_id)
                    .await?
            }
            crate::types::RegistrationType::Lodge => {
                self.registrations
                    .lodge_projection(pointer.registration_id)
                    .await?
            }
            crate::types::RegistrationType::Delegation => {
                self.registrations
                    .delegation_projection(pointer.registration_id)
                    .await?
            }
        };
        projection.ok_or_else(not_found)
    }

    // ---- admin ------------------------------------------------------------

    pub async fn list_registrations(
        &self,
        window: QueryWindow,
    ) -> Result<Vec<RegistrationRecord>, RegistrationError> {
        self.registrations.list_registrations(window).await
    }

    pub async fn reconciliation_cases(&self) -> Vec<ReconciliationCase> {
        self.recon.lock().await.list()
    }

    pub async fn outbox_entries(&self) -> Vec<OutboxEntry> {
        self.outbox.lock().await.list()
    }

    pub async fn drain_outbox(
        &self,
        sender: &dyn MailSender,
    ) -> Result<OutboxDrainReport, RegistrationError> {
        self.outbox
            .lock()
            .await
            .drain(sender)
            .await
            .map_err(|err| RegistrationError::Infrastructure(err.to_string()))
    }
}

fn outcome_from_record(record: &RegistrationRecord) -> CompletionOutcome {
    CompletionOutcome {
        registration_id: record.registration_id,
        confirmation_number: record.confirmation_number.clone(),
        payment_id: record.payment_id.clone(),
        total_paid_minor: record.total_paid_minor,
        completed_at: record.created_at,
    }
}
