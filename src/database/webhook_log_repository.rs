use crate::database::error::DatabaseError;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{FromRow, PgConnection, PgPool};

/// Audit record for one inbound webhook delivery. Inserted before any
/// processing so rejected or unmatchable deliveries still leave a trace.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookLog {
    pub id: i64,
    pub provider: String,
    pub transaction_id: Option<i64>,
    pub external_id: Option<String>,
    pub event_type: Option<String>,
    pub signature_valid: Option<bool>,
    pub processed: bool,
    pub error: Option<String>,
    pub payload: JsonValue,
    pub headers: JsonValue,
    pub source_ip: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

const COLUMNS: &str = "id, provider, transaction_id, external_id, event_type, \
     signature_valid, processed, error, payload, headers, source_ip, received_at, processed_at";

pub struct WebhookLogRepository {
    pool: PgPool,
}

impl WebhookLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn insert(
        &self,
        provider: &str,
        external_id: Option<&str>,
        event_type: Option<&str>,
        signature_valid: Option<bool>,
        payload: &JsonValue,
        headers: &JsonValue,
        source_ip: Option<&str>,
    ) -> Result<WebhookLog, DatabaseError> {
        sqlx::query_as::<_, WebhookLog>(&format!(
            "INSERT INTO payment_webhook_logs \
             (provider, external_id, event_type, signature_valid, payload, headers, source_ip) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        ))
        .bind(provider)
        .bind(external_id)
        .bind(event_type)
        .bind(signature_valid)
        .bind(payload)
        .bind(headers)
        .bind(source_ip)
        .fetch_one(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }

    /// Backfill what verification learned about a delivery that was logged
    /// before the adapter ran.
    pub async fn record_verification(
        &self,
        id: i64,
        signature_valid: Option<bool>,
        external_id: Option<&str>,
        event_type: Option<&str>,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payment_webhook_logs SET \
                 signature_valid = $2, \
                 external_id = COALESCE($3, external_id), \
                 event_type = COALESCE($4, event_type) \
             WHERE id = $1",
        )
        .bind(id)
        .bind(signature_valid)
        .bind(external_id)
        .bind(event_type)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Mark the delivery as applied, backfilling the transaction it matched.
    pub async fn mark_processed(
        conn: &mut PgConnection,
        id: i64,
        transaction_id: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payment_webhook_logs SET \
                 processed = TRUE, \
                 transaction_id = $2, \
                 processed_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(transaction_id)
        .execute(conn)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    /// Record the rejection reason. `processed_at` stays null: it marks a
    /// successful transaction match, not the end of handling.
    pub async fn mark_failed(&self, id: i64, error: &str) -> Result<(), DatabaseError> {
        sqlx::query(
            "UPDATE payment_webhook_logs SET \
                 error = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)?;
        Ok(())
    }

    pub async fn list(
        &self,
        provider: Option<&str>,
        processed: Option<bool>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookLog>, DatabaseError> {
        sqlx::query_as::<_, WebhookLog>(&format!(
            "SELECT {COLUMNS} FROM payment_webhook_logs \
             WHERE ($1::text IS NULL OR provider = $1) \
               AND ($2::boolean IS NULL OR processed = $2) \
             ORDER BY received_at DESC \
             LIMIT $3 OFFSET $4"
        ))
        .bind(provider)
        .bind(processed)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(DatabaseError::from_sqlx)
    }
}
