use crate::error::RegistrationError;
use crate::types::{
    ConfirmationDetail, ConfirmationRecord, PaymentStatus, QueryWindow, RegistrationReceipt,
    RegistrationRecord, RegistrationStatus, RegistrationType, RegistrationUpsert,
};
use async_trait::async_trait;
use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use uuid::Uuid;

/// Registration persistence backend configuration.
#[derive(Debug, Clone)]
pub enum RegistrationStorageConfig {
    /// Keep registrations in process memory only.
    Memory,
    /// Persist registrations in PostgreSQL.
    Postgres {
        database_url: String,
        max_connections: u32,
    },
}

impl RegistrationStorageConfig {
    pub fn memory() -> Self {
        Self::Memory
    }

    pub fn postgres(database_url: impl Into<String>, max_connections: u32) -> Self {
        Self::Postgres {
            database_url: database_url.into(),
            max_connections,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Memory => "memory",
            Self::Postgres { .. } => "postgres",
        }
    }
}

impl Default for RegistrationStorageConfig {
    fn default() -> Self {
        Self::Memory
    }
}

/// Unified confirmation lookup result: enough to pick the type-specific
/// projection and apply the completion gates, nothing more.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmationPointer {
    pub registration_id: Uuid,
    pub registration_type: RegistrationType,
    pub status: RegistrationStatus,
    pub payment_status: PaymentStatus,
}

/// Source of truth for completed registrations.
#[async_trait]
pub trait RegistrationStore: Send + Sync {
    /// Insert or update the registration row for this id.
    ///
    /// The first upsert assigns the confirmation number; later upserts keep
    /// it and the original creation time, which makes resubmission of an
    /// already completed draft a no-op at the persistence layer.
    async fn upsert_registration(
        &self,
        upsert: RegistrationUpsert,
    ) -> Result<RegistrationReceipt, RegistrationError>;

    async fn registration(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<RegistrationRecord>, RegistrationError>;

    /// Unified lookup across all registration types.
    async fn lookup_confirmation(
        &self,
        confirmation_number: &str,
    ) -> Result<Option<ConfirmationPointer>, RegistrationError>;

    async fn individual_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError>;

    async fn lodge_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError>;

    async fn delegation_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError>;

    async fn list_registrations(
        &self,
        window: QueryWindow,
    ) -> Result<Vec<RegistrationRecord>, RegistrationError>;
}

/// Build the configured store.
pub async fn bootstrap_registration_store(
    config: RegistrationStorageConfig,
) -> Result<Arc<dyn RegistrationStore>, RegistrationError> {
    match config {
        RegistrationStorageConfig::Memory => Ok(Arc::new(MemoryRegistrationStore::new())),
        RegistrationStorageConfig::Postgres {
            database_url,
            max_connections,
        } => {
            let store = PostgresRegistrationStore::connect(&database_url, max_connections).await?;
            store.ensure_schema().await?;
            Ok(Arc::new(store))
        }
    }
}

const CONFIRMATION_ATTEMPTS: usize = 8;

/// Server-issued confirmation number: type prefix, six digits, two letters,
/// e.g. `IND-482019QT`. The space is small enough that issuance retries on
/// collision instead of assuming uniqueness.
fn generate_confirmation_number(registration_type: RegistrationType) -> String {
    let mut rng = rand::thread_rng();
    let digits: u32 = rng.gen_range(0..1_000_000);
    let letters: String = (0..2)
        .map(|_| char::from(b'A' + rng.gen_range(0..26u8)))
        .collect();
    format!(
        "{}-{:06}{}",
        registration_type.confirmation_prefix(),
        digits,
        letters
    )
}

fn record_from_upsert(upsert: RegistrationUpsert, confirmation_number: String) -> RegistrationRecord {
    let now = Utc::now();
    RegistrationRecord {
        registration_id: upsert.registration_id,
        confirmation_number,
        owner_id: upsert.owner_id,
        function_id: upsert.function_id,
        registration_type: upsert.registration_type,
        status: upsert.status,
        payment_status: upsert.payment_status,
        attendees: upsert.attendees,
        lodge: upsert.lodge,
        delegation: upsert.delegation,
        tickets: upsert.tickets,
        billing_name: upsert.billing_name,
        billing_email: upsert.billing_email,
        subtotal_minor: upsert.subtotal_minor,
        total_paid_minor: upsert.total_paid_minor,
        payment_id: upsert.payment_id,
        created_at: now,
        updated_at: now,
    }
}

/// Shape a stored record into its confirmation read model, enforcing that the
/// row actually is the expected registration type.
fn project_confirmation(
    record: &RegistrationRecord,
    expected: RegistrationType,
) -> Result<ConfirmationRecord, RegistrationError> {
    if record.registration_type != expected {
        return Err(RegistrationError::Persistence(format!(
            "registration {} is a {} registration, not {}",
            record.registration_id,
            record.registration_type.name(),
            expected.name()
        )));
    }

    let detail = match record.registration_type {
        RegistrationType::Individual => ConfirmationDetail::Individual {
            attendees: record.attendees.clone(),
        },
        RegistrationType::Lodge => {
            let lodge = record.lodge.clone().ok_or_else(|| {
                RegistrationError::Persistence(format!(
                    "lodge registration {} is missing its lodge details",
                    record.registration_id
                ))
            })?;
            ConfirmationDetail::Lodge {
                lodge,
                members: record.attendees.clone(),
            }
        }
        RegistrationType::Delegation => {
            let delegation = record.delegation.clone().ok_or_else(|| {
                RegistrationError::Persistence(format!(
                    "delegation registration {} is missing its delegation details",
                    record.registration_id
                ))
            })?;
            ConfirmationDetail::Delegation {
                delegation,
                delegates: record.attendees.clone(),
            }
        }
    };

    Ok(ConfirmationRecord {
        confirmation_number: record.confirmation_number.clone(),
        registration_id: record.registration_id,
        function_id: record.function_id,
        registration_type: record.registration_type,
        billing_name: record.billing_name.clone(),
        billing_email: record.billing_email.clone(),
        tickets: record.tickets.clone(),
        total_paid_minor: record.total_paid_minor,
        completed_at: record.updated_at,
        detail,
    })
}

fn apply_window<T>(mut items: Vec<T>, window: QueryWindow) -> Vec<T> {
    if window.offset >= items.len() {
        return Vec::new();
    }
    let items = items.split_off(window.offset);
    items.into_iter().take(window.limit).collect()
}

/// In-memory registration store, the test and single-process default.
#[derive(Default)]
pub struct MemoryRegistrationStore {
    records: RwLock<HashMap<Uuid, RegistrationRecord>>,
    confirmations: RwLock<HashMap<String, Uuid>>,
}

impl MemoryRegistrationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn projection(
        &self,
        registration_id: Uuid,
        expected: RegistrationType,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError> {
        let records = self
            .records
            .read()
            .map_err(|_| RegistrationError::Infrastructure("records lock poisoned".into()))?;
        match records.get(&registration_id) {
            Some(record) => Ok(Some(project_confirmation(record, expected)?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RegistrationStore for MemoryRegistrationStore {
    async fn upsert_registration(
        &self,
        upsert: RegistrationUpsert,
    ) -> Result<RegistrationReceipt, RegistrationError> {
        let mut records = self
            .records
            .write()
            .map_err(|_| RegistrationError::Infrastructure("records lock poisoned".into()))?;
        let mut confirmations = self
            .confirmations
            .write()
            .map_err(|_| RegistrationError::Infrastructure("confirmations lock poisoned".into()))?;

        if let Some(existing) = records.get_mut(&upsert.registration_id) {
            existing.status = upsert.status;
            existing.payment_status = upsert.payment_status;
            existing.attendees = upsert.attendees;
            existing.lodge = upsert.lodge;
            existing.delegation = upsert.delegation;
            existing.tickets = upsert.tickets;
            existing.billing_name = upsert.billing_name;
            existing.billing_email = upsert.billing_email;
            existing.subtotal_minor = upsert.subtotal_minor;
            existing.total_paid_minor = upsert.total_paid_minor;
            existing.payment_id = upsert.payment_id;
            existing.updated_at = Utc::now();
            return Ok(RegistrationReceipt {
                registration_id: existing.registration_id,
                confirmation_number: existing.confirmation_number.clone(),
                created_at: existing.created_at,
            });
        }

        let mut confirmation_number = None;
        for _ in 0..CONFIRMATION_ATTEMPTS {
            let candidate = generate_confirmation_number(upsert.registration_type);
            if !confirmations.contains_key(&candidate) {
                confirmation_number = Some(candidate);
                break;
            }
        }
        let confirmation_number = confirmation_number.ok_or_else(|| {
            RegistrationError::Persistence(
                "could not issue a unique confirmation number".to_string(),
            )
        })?;

        let record = record_from_upsert(upsert, confirmation_number.clone());
        let receipt = RegistrationReceipt {
            registration_id: record.registration_id,
            confirmation_number: confirmation_number.clone(),
            created_at: record.created_at,
        };
        confirmations.insert(confirmation_number, record.registration_id);
        records.insert(record.registration_id, record);
        Ok(receipt)
    }

    async fn registration(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<RegistrationRecord>, RegistrationError> {
        let records = self
            .records
            .read()
            .map_err(|_| RegistrationError::Infrastructure("records lock poisoned".into()))?;
        Ok(records.get(&registration_id).cloned())
    }

    async fn lookup_confirmation(
        &self,
        confirmation_number: &str,
    ) -> Result<Option<ConfirmationPointer>, RegistrationError> {
        let confirmations = self
            .confirmations
            .read()
            .map_err(|_| RegistrationError::Infrastructure("confirmations lock poisoned".into()))?;
        let records = self
            .records
            .read()
            .map_err(|_| RegistrationError::Infrastructure("records lock poisoned".into()))?;

        Ok(confirmations
            .get(confirmation_number)
            .and_then(|id| records.get(id))
            .map(|record| ConfirmationPointer {
                registration_id: record.registration_id,
                registration_type: record.registration_type,
                status: record.status,
                payment_status: record.payment_status,
            }))
    }

    async fn individual_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError> {
        self.projection(registration_id, RegistrationType::Individual)
    }

    async fn lodge_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError> {
        self.projection(registration_id, RegistrationType::Lodge)
    }

    async fn delegation_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError> {
        self.projection(registration_id, RegistrationType::Delegation)
    }

    async fn list_registrations(
        &self,
        window: QueryWindow,
    ) -> Result<Vec<RegistrationRecord>, RegistrationError> {
        let records = self
            .records
            .read()
            .map_err(|_| RegistrationError::Infrastructure("records lock poisoned".into()))?;
        let mut all: Vec<RegistrationRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(apply_window(all, window))
    }
}

/// JSONB payload column: everything structured that the relational columns
/// do not need to index.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredPayload {
    attendees: Vec<crate::types::Attendee>,
    lodge: Option<crate::types::LodgeDetails>,
    delegation: Option<crate::types::DelegationDetails>,
    tickets: crate::types::TicketSelection,
}

/// PostgreSQL registration store.
#[derive(Debug, Clone)]
pub struct PostgresRegistrationStore {
    pool: PgPool,
}

impl PostgresRegistrationStore {
    pub async fn connect(
        database_url: &str,
        max_connections: u32,
    ) -> Result<Self, RegistrationError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await
            .map_err(|e| RegistrationError::Persistence(format!("postgres connect failed: {e}")))?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> Result<(), RegistrationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trestle_registrations (
                registration_id UUID PRIMARY KEY,
                confirmation_number TEXT NOT NULL UNIQUE,
                owner_id TEXT NOT NULL,
                function_id UUID NOT NULL,
                registration_type TEXT NOT NULL,
                status TEXT NOT NULL,
                payment_status TEXT NOT NULL,
                payload JSONB NOT NULL,
                billing_name TEXT NOT NULL,
                billing_email TEXT NOT NULL,
                subtotal_minor BIGINT NOT NULL,
                total_paid_minor BIGINT NOT NULL,
                payment_id TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RegistrationError::Persistence(format!("postgres schema create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trestle_registrations_owner ON trestle_registrations (owner_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RegistrationError::Persistence(format!("postgres index create failed: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_trestle_registrations_function ON trestle_registrations (function_id)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| RegistrationError::Persistence(format!("postgres index create failed: {e}")))?;

        Ok(())
    }

    fn decode_row(row: &sqlx::postgres::PgRow) -> Result<RegistrationRecord, RegistrationError> {
        let type_str: String = row
            .try_get("registration_type")
            .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?;
        let status_str: String = row
            .try_get("status")
            .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?;
        let payment_str: String = row
            .try_get("payment_status")
            .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?;
        let payload_value: serde_json::Value = row
            .try_get("payload")
            .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?;
        let payload: StoredPayload = serde_json::from_value(payload_value)
            .map_err(|e| RegistrationError::Serialization(format!("payload decode failed: {e}")))?;
        let subtotal: i64 = row
            .try_get("subtotal_minor")
            .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?;
        let total: i64 = row
            .try_get("total_paid_minor")
            .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?;

        Ok(RegistrationRecord {
            registration_id: row
                .try_get("registration_id")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
            confirmation_number: row
                .try_get("confirmation_number")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
            owner_id: row
                .try_get("owner_id")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
            function_id: row
                .try_get("function_id")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
            registration_type: parse_registration_type(&type_str)?,
            status: parse_status(&status_str)?,
            payment_status: parse_payment_status(&payment_str)?,
            attendees: payload.attendees,
            lodge: payload.lodge,
            delegation: payload.delegation,
            tickets: payload.tickets,
            billing_name: row
                .try_get("billing_name")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
            billing_email: row
                .try_get("billing_email")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
            subtotal_minor: subtotal.try_into().map_err(|_| {
                RegistrationError::Persistence("negative subtotal in storage".to_string())
            })?,
            total_paid_minor: total.try_into().map_err(|_| {
                RegistrationError::Persistence("negative total in storage".to_string())
            })?,
            payment_id: row
                .try_get("payment_id")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
            created_at: row
                .try_get("created_at")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
            updated_at: row
                .try_get("updated_at")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
        })
    }

    async fn fetch(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<RegistrationRecord>, RegistrationError> {
        let row = sqlx::query("SELECT * FROM trestle_registrations WHERE registration_id = $1")
            .bind(registration_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RegistrationError::Persistence(format!("postgres fetch failed: {e}")))?;
        row.as_ref().map(Self::decode_row).transpose()
    }

    async fn typed_projection(
        &self,
        registration_id: Uuid,
        expected: RegistrationType,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError> {
        match self.fetch(registration_id).await? {
            Some(record) => Ok(Some(project_confirmation(&record, expected)?)),
            None => Ok(None),
        }
    }

    async fn try_insert(
        &self,
        upsert: &RegistrationUpsert,
        confirmation_number: &str,
    ) -> Result<InsertResult, RegistrationError> {
        let payload = StoredPayload {
            attendees: upsert.attendees.clone(),
            lodge: upsert.lodge.clone(),
            delegation: upsert.delegation.clone(),
            tickets: upsert.tickets.clone(),
        };
        let payload_value = serde_json::to_value(&payload)
            .map_err(|e| RegistrationError::Serialization(format!("payload encode failed: {e}")))?;
        let subtotal: i64 = upsert.subtotal_minor.try_into().map_err(|_| {
            RegistrationError::Persistence("subtotal exceeds BIGINT range".to_string())
        })?;
        let total: i64 = upsert.total_paid_minor.try_into().map_err(|_| {
            RegistrationError::Persistence("total exceeds BIGINT range".to_string())
        })?;
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO trestle_registrations (
                registration_id,
                confirmation_number,
                owner_id,
                function_id,
                registration_type,
                status,
                payment_status,
                payload,
                billing_name,
                billing_email,
                subtotal_minor,
                total_paid_minor,
                payment_id,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $14)
            ON CONFLICT (registration_id) DO UPDATE SET
                status = EXCLUDED.status,
                payment_status = EXCLUDED.payment_status,
                payload = EXCLUDED.payload,
                billing_name = EXCLUDED.billing_name,
                billing_email = EXCLUDED.billing_email,
                subtotal_minor = EXCLUDED.subtotal_minor,
                total_paid_minor = EXCLUDED.total_paid_minor,
                payment_id = EXCLUDED.payment_id,
                updated_at = EXCLUDED.updated_at
            RETURNING confirmation_number, created_at
            "#,
        )
        .bind(upsert.registration_id)
        .bind(confirmation_number)
        .bind(&upsert.owner_id)
        .bind(upsert.function_id)
        .bind(upsert.registration_type.name())
        .bind(status_to_str(upsert.status))
        .bind(payment_status_to_str(upsert.payment_status))
        .bind(&payload_value)
        .bind(&upsert.billing_name)
        .bind(&upsert.billing_email)
        .bind(subtotal)
        .bind(total)
        .bind(&upsert.payment_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                let confirmation_number: String = row.try_get("confirmation_number").map_err(
                    |e| RegistrationError::Persistence(format!("postgres decode failed: {e}")),
                )?;
                let created_at = row.try_get("created_at").map_err(|e| {
                    RegistrationError::Persistence(format!("postgres decode failed: {e}"))
                })?;
                Ok(InsertResult::Done(RegistrationReceipt {
                    registration_id: upsert.registration_id,
                    confirmation_number,
                    created_at,
                }))
            }
            Err(sqlx::Error::Database(db_err))
                if db_err
                    .constraint()
                    .is_some_and(|name| name.contains("confirmation_number")) =>
            {
                Ok(InsertResult::ConfirmationTaken)
            }
            Err(e) => Err(RegistrationError::Persistence(format!(
                "postgres upsert failed: {e}"
            ))),
        }
    }
}

enum InsertResult {
    Done(RegistrationReceipt),
    ConfirmationTaken,
}

#[async_trait]
impl RegistrationStore for PostgresRegistrationStore {
    async fn upsert_registration(
        &self,
        upsert: RegistrationUpsert,
    ) -> Result<RegistrationReceipt, RegistrationError> {
        for _ in 0..CONFIRMATION_ATTEMPTS {
            let candidate = generate_confirmation_number(upsert.registration_type);
            match self.try_insert(&upsert, &candidate).await? {
                InsertResult::Done(receipt) => return Ok(receipt),
                InsertResult::ConfirmationTaken => continue,
            }
        }
        Err(RegistrationError::Persistence(
            "could not issue a unique confirmation number".to_string(),
        ))
    }

    async fn registration(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<RegistrationRecord>, RegistrationError> {
        self.fetch(registration_id).await
    }

    async fn lookup_confirmation(
        &self,
        confirmation_number: &str,
    ) -> Result<Option<ConfirmationPointer>, RegistrationError> {
        let row = sqlx::query(
            r#"
            SELECT registration_id, registration_type, status, payment_status
            FROM trestle_registrations
            WHERE confirmation_number = $1
            "#,
        )
        .bind(confirmation_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RegistrationError::Persistence(format!("postgres lookup failed: {e}")))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let type_str: String = row
            .try_get("registration_type")
            .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?;
        let status_str: String = row
            .try_get("status")
            .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?;
        let payment_str: String = row
            .try_get("payment_status")
            .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?;

        Ok(Some(ConfirmationPointer {
            registration_id: row
                .try_get("registration_id")
                .map_err(|e| RegistrationError::Persistence(format!("postgres decode failed: {e}")))?,
            registration_type: parse_registration_type(&type_str)?,
            status: parse_status(&status_str)?,
            payment_status: parse_payment_status(&payment_str)?,
        }))
    }

    async fn individual_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError> {
        self.typed_projection(registration_id, RegistrationType::Individual)
            .await
    }

    async fn lodge_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError> {
        self.typed_projection(registration_id, RegistrationType::Lodge)
            .await
    }

    async fn delegation_projection(
        &self,
        registration_id: Uuid,
    ) -> Result<Option<ConfirmationRecord>, RegistrationError> {
        self.typed_projection(registration_id, RegistrationType::Delegation)
            .await
    }

    async fn list_registrations(
        &self,
        window: QueryWindow,
    ) -> Result<Vec<RegistrationRecord>, RegistrationError> {
        let limit: i64 = window.limit.min(i64::MAX as usize) as i64;
        let offset: i64 = window.offset.min(i64::MAX as usize) as i64;
        let rows = sqlx::query(
            r#"
            SELECT * FROM trestle_registrations
            ORDER BY created_at DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RegistrationError::Persistence(format!("postgres list failed: {e}")))?;

        rows.iter().map(Self::decode_row).collect()
    }
}

fn status_to_str(status: RegistrationStatus) -> &'static str {
    match status {
        RegistrationStatus::Pending => "pending",
        RegistrationStatus::Completed => "completed",
        RegistrationStatus::Failed => "failed",
    }
}

fn parse_status(value: &str) -> Result<RegistrationStatus, RegistrationError> {
    match value {
        "pending" => Ok(RegistrationStatus::Pending),
        "completed" => Ok(RegistrationStatus::Completed),
        "failed" => Ok(RegistrationStatus::Failed),
        other => Err(RegistrationError::Persistence(format!(
            "unknown registration status '{other}' in storage"
        ))),
    }
}

fn payment_status_to_str(status: PaymentStatus) -> &'static str {
    match status {
        PaymentStatus::Pending => "pending",
        PaymentStatus::Completed => "completed",
        PaymentStatus::Failed => "failed",
    }
}

fn parse_payment_status(value: &str) -> Result<PaymentStatus, RegistrationError> {
    match value {
        "pending" => Ok(PaymentStatus::Pending),
        "completed" => Ok(PaymentStatus::Completed),
        "failed" => Ok(PaymentStatus::Failed),
        other => Err(RegistrationError::Persistence(format!(
            "unknown payment status '{other}' in storage"
        ))),
    }
}

fn parse_registration_type(value: &str) -> Result<RegistrationType, RegistrationError> {
    match value {
        "individual" => Ok(RegistrationType::Individual),
        "lodge" => Ok(RegistrationType::Lodge),
        "delegation" => Ok(RegistrationType::Delegation),
        other => Err(RegistrationError::Persistence(format!(
            "unknown registration type '{other}' in storage"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attendee, LodgeDetails, TicketSelection};

    fn sample_upsert(registration_type: RegistrationType) -> RegistrationUpsert {
        let mason = Attendee::mason("W Bro", "John", "Smith").with_primary(true);
        RegistrationUpsert {
            registration_id: Uuid::new_v4(),
            owner_id: "owner-1".to_string(),
            function_id: Uuid::new_v4(),
            registration_type,
            attendees: vec![mason],
            lodge: matches!(registration_type, RegistrationType::Lodge).then(|| LodgeDetails {
                lodge_name: "Lodge Unity".to_string(),
                lodge_number: "No. 6".to_string(),
            }),
            delegation: None,
            tickets: TicketSelection::default(),
            billing_name: "John Smith".to_string(),
            billing_email: "john@example.org".to_string(),
            subtotal_minor: 2_000,
            total_paid_minor: 2_111,
            payment_id: "pay-1".to_string(),
            status: RegistrationStatus::Completed,
            payment_status: PaymentStatus::Completed,
        }
    }

    #[test]
    fn confirmation_numbers_carry_type_prefix_and_shape() {
        for registration_type in [
            RegistrationType::Individual,
            RegistrationType::Lodge,
            RegistrationType::Delegation,
        ] {
            let number = generate_confirmation_number(registration_type);
            let (prefix, rest) = number.split_once('-').unwrap();
            assert_eq!(prefix, registration_type.confirmation_prefix());
            assert_eq!(rest.len(), 8);
            assert!(rest[..6].chars().all(|c| c.is_ascii_digit()));
            assert!(rest[6..].chars().all(|c| c.is_ascii_uppercase()));
        }
    }

    #[tokio::test]
    async fn first_upsert_issues_confirmation_and_second_preserves_it() {
        let store = MemoryRegistrationStore::new();
        let upsert = sample_upsert(RegistrationType::Individual);

        let first = store.upsert_registration(upsert.clone()).await.unwrap();
        assert!(first.confirmation_number.starts_with("IND-"));

        let mut resubmit = upsert;
        resubmit.payment_id = "pay-2".to_string();
        let second = store.upsert_registration(resubmit).await.unwrap();

        assert_eq!(first.confirmation_number, second.confirmation_number);
        assert_eq!(first.created_at, second.created_at);

        let record = store
            .registration(first.registration_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.payment_id, "pay-2");
    }

    #[tokio::test]
    async fn unified_lookup_resolves_type_and_statuses() {
        let store = MemoryRegistrationStore::new();
        let receipt = store
            .upsert_registration(sample_upsert(RegistrationType::Lodge))
            .await
            .unwrap();

        let pointer = store
            .lookup_confirmation(&receipt.confirmation_number)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(pointer.registration_type, RegistrationType::Lodge);
        assert_eq!(pointer.status, RegistrationStatus::Completed);

        assert!(store
            .lookup_confirmation("LDG-000000XX")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn projections_enforce_registration_type() {
        let store = MemoryRegistrationStore::new();
        let receipt = store
            .upsert_registration(sample_upsert(RegistrationType::Lodge))
            .await
            .unwrap();

        let lodge = store
            .lodge_projection(receipt.registration_id)
            .await
            .unwrap()
            .unwrap();
        match lodge.detail {
            ConfirmationDetail::Lodge { lodge, members } => {
                assert_eq!(lodge.lodge_name, "Lodge Unity");
                assert_eq!(members.len(), 1);
            }
            _ => panic!("expected lodge detail"),
        }

        let err = store
            .individual_projection(receipt.registration_id)
            .await
            .unwrap_err();
        assert!(matches!(err, RegistrationError::Persistence(_)));
    }

    #[tokio::test]
    async fn listing_is_windowed_newest_first() {
        let store = MemoryRegistrationStore::new();
        for _ in 0..5 {
            store
                .upsert_registration(sample_upsert(RegistrationType::Individual))
                .await
                .unwrap();
        }

        let page = store
            .list_registrations(QueryWindow {
                limit: 2,
                offset: 1,
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 2);
        assert!(page[0].created_at >= page[1].created_at);

        let empty = store
            .list_registrations(QueryWindow {
                limit: 10,
                offset: 50,
            })
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn status_string_roundtrip() {
        for status in [
            RegistrationStatus::Pending,
            RegistrationStatus::Completed,
            RegistrationStatus::Failed,
        ] {
            assert_eq!(parse_status(status_to_str(status)).unwrap(), status);
        }
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
        ] {
            assert_eq!(
                parse_payment_status(payment_status_to_str(status)).unwrap(),
                status
            );
        }
        assert!(parse_registration_type("individual").is_ok());
        assert!(parse_registration_type("banquet").is_err());
    }
}
