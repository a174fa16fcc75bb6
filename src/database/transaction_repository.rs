use crate::database::error::DatabaseError;
use crate::payments::types::{PaymentStatus, ProviderKind};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection, PgPool};

/// One payment as observed across every provider, in the normalized shape.
#[derive(Debug, Clone, FromRow)]
pub struct PaymentTransaction {
    pub id: i64,
    pub idempotency_key: String,
    pub external_id: Option<String>,
    pub provider: String,
    pub payment_type: String,
    pub status: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub pay_amount: Option<BigDecimal>,
    pub pay_currency: Option<String>,
    pub pay_address: Option<String>,
    pub received_amount: Option<BigDecimal>,
    pub received_currency: Option<String>,
    pub outcome_address: Option<String>,
    pub outcome_currency: Option<String>,
    pub invoice_url: Option<String>,
    pub order_id: Option<String>,
    pub order_description: Option<String>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub webhook_count: i32,
    pub last_webhook_at: Option<DateTime<Utc>>,
    pub last_status_check_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub provider_metadata: JsonValue,
    pub client_metadata: Option<JsonValue>,
    pub confirmed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PaymentTransaction {
    pub fn payment_status(&self) -> PaymentStatus {
        self.status.parse().unwrap_or(PaymentStatus::Pending)
    }

    pub fn provider_kind(&self) -> Result<ProviderKind, crate::payments::error::PaymentError> {
        self.provider.parse()
    }

    pub fn is_terminal(&self) -> bool {
        self.payment_status().is_terminal()
    }
}

/// Fields needed to persist a freshly created payment.
#[derive(Debug)]
pub struct NewPaymentTransaction {
    pub idempotency_key: String,
    pub external_id: Option<String>,
    pub provider: String,
    pub payment_type: String,
    pub status: String,
    pub amount: BigDecimal,
    pub currency: String,
    pub pay_amount: Option<BigDecimal>,
    pub pay_currency: Option<String>,
    pub pay_address: Option<String>,
    pub outcome_address: Option<String>,
    pub outcome_currency: Option<String>,
    pub invoice_url: Option<String>,
    pub order_id: Option<String>,
    pub order_description: Option<String>,
    pub user_id: Option<String>,
    pub project_id: Option<String>,
    pub provider_metadata: JsonValue,
    pub client_metadata: Option<JsonValue>,
    pub expires_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "id, idempotency_key, external_id, provider, payment_type, status, \
     amount, currency, pay_amount, pay_currency, pay_address, received_amount, \
     received_currency, outcome_address, outcome_currency, invoice_url, order_id, order_description, \
     user_id, project_id, webhook_count, last_webhook_at, last_status_check_at, \
     last_error, provider_metadata, client_metadata, confirmed_at, completed_at, \
     expires_at, created_at, updated_at";

/// Repository for payment transactions.
///
/// Plain reads go through the pool held by the repository. Anything that is
/// part of a multi-statement sequence takes an explicit connection so the
/// caller controls the transaction boundary.
pub struct TransactionRepository {
    pool: PgPool,
}

impl TransactionRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert the row unless another request already claimed the idempotency
    /// key. Returns `None` when this insert lost the race; the caller should
    /// re-read the winner inside the same transaction.
    pub async fn insert_if_absent(
        conn: &mut PgConnection,
        new: &NewPaymentTransaction,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "INSERT INTO payment_transactions \
             (idempotency_key, external_id, provider, payment_type, status, amount, currency, \
              pay_amount, pay_currency, pay_address, outcome_address, outcome_currency, \
              invoice_url, order_id, order_description, user_id, project_id, \
              provider_metadata, client_metadata, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20) \
             ON CONFLICT (idempotency_key) DO NOTHING \
             RETURNING {COLUMNS}"
        ))
        .bind(&new.idempotency_key)
        .bind(&new.external_id)
        .bind(&new.provider)
        .bind(&new.payment_type)
        .bind(&new.status)
        .bind(&new.amount)
        .bind(&new.currency)
        .bind(&new.pay_amount)
        .bind(&new.pay_currency)
        .bind(&new.pay_address)
        .bind(&new.outcome_address)
        .bind(&new.outcome_currency)
        .bind(&new.invoice_url)
        .bind(&new.order_id)
        .bind(&new.order_description)
        .bind(&new.user_id)
        .bind(&new.project_id)
        .bind(&new.provider_metadata)
        .bind(&new.client_metadata)
        .bind(new.expires_at)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {COLUMNS} FROM payment_transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_external_id(
        &self,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {COLUMNS} FROM payment_transactions \
             WHERE provider = $1 AND external_id = $2"
        ))
        .bind(provider)
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Lookup by provider reference alone, for API lookups where the caller
    /// does not know which provider issued the id.
    pub async fn find_by_external_id_any(
        &self,
        external_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {COLUMNS} FROM payment_transactions \
             WHERE external_id = $1 \
             ORDER BY created_at DESC \
             LIMIT 1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn find_by_idempotency_key(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {COLUMNS} FROM payment_transactions WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Same lookup on an explicit connection, for re-reading the winner of an
    /// idempotency-key race inside the inserting transaction.
    pub async fn find_by_idempotency_key_on(
        conn: &mut PgConnection,
        idempotency_key: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {COLUMNS} FROM payment_transactions WHERE idempotency_key = $1"
        ))
        .bind(idempotency_key)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Lock the row for the remainder of the enclosing transaction.
    pub async fn lock_by_id(
        conn: &mut PgConnection,
        id: i64,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {COLUMNS} FROM payment_transactions WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn lock_by_external_id(
        conn: &mut PgConnection,
        provider: &str,
        external_id: &str,
    ) -> Result<Option<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {COLUMNS} FROM payment_transactions \
             WHERE provider = $1 AND external_id = $2 FOR UPDATE"
        ))
        .bind(provider)
        .bind(external_id)
        .fetch_optional(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Apply the result of a polled status check. Lifecycle timestamps are
    /// stamped in-database so only the first observation of a state sets them.
    pub async fn apply_refresh(
        conn: &mut PgConnection,
        id: i64,
        status: &str,
        received_amount: Option<&BigDecimal>,
        received_currency: Option<&str>,
        pay_amount: Option<&BigDecimal>,
        provider_metadata: &JsonValue,
    ) -> Result<PaymentTransaction, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "UPDATE payment_transactions SET \
                 status = $2, \
                 received_amount = COALESCE($3, received_amount), \
                 received_currency = COALESCE($4, received_currency), \
                 pay_amount = COALESCE($5, pay_amount), \
                 provider_metadata = provider_metadata || $6, \
                 last_status_check_at = NOW(), \
                 last_error = NULL, \
                 confirmed_at = CASE WHEN $2 = 'confirmed' AND confirmed_at IS NULL \
                     THEN NOW() ELSE confirmed_at END, \
                 completed_at = CASE WHEN $2 IN ('finished', 'refunded') AND completed_at IS NULL \
                     THEN NOW() ELSE completed_at END, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .bind(received_amount)
        .bind(received_currency)
        .bind(pay_amount)
        .bind(provider_metadata)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Apply a verified webhook. A `None` status keeps the current one while
    /// still counting the delivery.
    pub async fn apply_webhook(
        conn: &mut PgConnection,
        id: i64,
        status: Option<&str>,
        received_amount: Option<&BigDecimal>,
        received_currency: Option<&str>,
        pay_amount: Option<&BigDecimal>,
        provider_metadata: &JsonValue,
    ) -> Result<PaymentTransaction, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "UPDATE payment_transactions SET \
                 status = COALESCE($2, status), \
                 received_amount = COALESCE($3, received_amount), \
                 received_currency = COALESCE($4, received_currency), \
                 pay_amount = COALESCE($5, pay_amount), \
                 provider_metadata = provider_metadata || $6, \
                 webhook_count = webhook_count + 1, \
                 last_webhook_at = NOW(), \
                 confirmed_at = CASE WHEN COALESCE($2, status) = 'confirmed' AND confirmed_at IS NULL \
                     THEN NOW() ELSE confirmed_at END, \
                 completed_at = CASE WHEN COALESCE($2, status) IN ('finished', 'refunded') \
                     AND completed_at IS NULL THEN NOW() ELSE completed_at END, \
                 updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        ))
        .bind(id)
        .bind(status)
        .bind(received_amount)
        .bind(received_currency)
        .bind(pay_amount)
        .bind(provider_metadata)
        .fetch_one(conn)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Record a failed status check. Also bumps `last_status_check_at` so one
    /// persistently failing row cannot monopolize the head of the sweep queue.
    pub async fn record_error(&self, id: i64, error: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payment_transactions SET \
                 last_error = $2, \
                 last_status_check_at = NOW(), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Non-terminal payments with a provider reference whose last check is
    /// older than the cutoff (or that were never checked), oldest first.
    pub async fn find_stale_pending(
        &self,
        provider: Option<&str>,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError> {
        let statuses: Vec<String> = PaymentStatus::NON_TERMINAL
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();

        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {COLUMNS} FROM payment_transactions \
             WHERE status = ANY($1) \
               AND ($2::text IS NULL OR provider = $2) \
               AND external_id IS NOT NULL \
               AND (last_status_check_at IS NULL OR last_status_check_at < $3) \
             ORDER BY last_status_check_at ASC NULLS FIRST \
             LIMIT $4"
        ))
        .bind(&statuses)
        .bind(provider)
        .bind(cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    pub async fn list(
        &self,
        provider: Option<&str>,
        status: Option<&str>,
        user_id: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<PaymentTransaction>, DatabaseError> {
        sqlx::query_as::<_, PaymentTransaction>(&format!(
            "SELECT {COLUMNS} FROM payment_transactions \
             WHERE ($1::text IS NULL OR provider = $1) \
               AND ($2::text IS NULL OR status = $2) \
               AND ($3::text IS NULL OR user_id = $3) \
             ORDER BY created_at DESC \
             LIMIT $4 OFFSET $5"
        ))
        .bind(provider)
        .bind(status)
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
