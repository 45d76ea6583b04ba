//! Transaction ledger
//!
//! Append-only record of payment and refund events for user-facing billing
//! history. Payment appends are idempotent on the processor-assigned
//! transaction id (reprocessing a redelivered capture event upserts instead
//! of duplicating). A single capture can be partially refunded several
//! times, so each refund gets a synthetic id and its own row.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;

/// Hard cap on history page size
pub const MAX_HISTORY_PAGE: i64 = 100;

/// Type of ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Payment,
    Refund,
}

/// Settlement status of a ledger entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Completed,
    Refunded,
    PartiallyRefunded,
}

/// One row of user-facing billing history
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct TransactionLedgerEntry {
    pub user_id: Uuid,
    pub subscription_id: Option<String>,
    /// Processor transaction id; refund rows use a synthetic id
    pub transaction_id: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub amount_value: String,
    pub amount_currency: String,
    pub plan: Option<String>,
    pub description: Option<String>,
    pub raw_event_type: String,
    pub raw_resource: serde_json::Value,
    pub created_at: OffsetDateTime,
}

impl TransactionLedgerEntry {
    /// Synthetic unique id for a refund occurrence against a capture
    pub fn refund_transaction_id(capture_id: &str, at: OffsetDateTime) -> String {
        format!("refund_{}_{}", capture_id, at.unix_timestamp())
    }
}

/// Persistence operations for the ledger
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TransactionLedger: Send + Sync {
    /// Append an entry; idempotent on `transaction_id`
    async fn append(&self, entry: &TransactionLedgerEntry) -> BillingResult<()>;

    /// List a user's entries newest-first, `limit` clamped to
    /// [`MAX_HISTORY_PAGE`]
    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<TransactionLedgerEntry>>;

    /// Delete a user's entries as part of full account deletion
    async fn delete_for_user(&self, user_id: Uuid) -> BillingResult<()>;
}

/// Postgres-backed ledger
pub struct PgTransactionLedger {
    pool: PgPool,
}

impl PgTransactionLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionLedger for PgTransactionLedger {
    async fn append(&self, entry: &TransactionLedgerEntry) -> BillingResult<()> {
        // Upsert on the natural transaction id: a redelivered processor
        // event refreshes the row instead of duplicating it
        sqlx::query(
            r#"
            INSERT INTO transaction_ledger (
                user_id, subscription_id, transaction_id, transaction_type,
                status, amount_value, amount_currency, plan, description,
                raw_event_type, raw_resource, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, NOW())
            ON CONFLICT (transaction_id) DO UPDATE SET
                status = EXCLUDED.status,
                raw_event_type = EXCLUDED.raw_event_type,
                raw_resource = EXCLUDED.raw_resource
            "#,
        )
        .bind(entry.user_id)
        .bind(&entry.subscription_id)
        .bind(&entry.transaction_id)
        .bind(entry.transaction_type)
        .bind(entry.status)
        .bind(&entry.amount_value)
        .bind(&entry.amount_currency)
        .bind(&entry.plan)
        .bind(&entry.description)
        .bind(&entry.raw_event_type)
        .bind(&entry.raw_resource)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_user(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> BillingResult<Vec<TransactionLedgerEntry>> {
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);

        let entries: Vec<TransactionLedgerEntry> = sqlx::query_as(
            r#"
            SELECT
                user_id, subscription_id, transaction_id, transaction_type,
                status, amount_value, amount_currency, plan, description,
                raw_event_type, raw_resource, created_at
            FROM transaction_ledger
            WHERE user_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(entries)
    }

    async fn delete_for_user(&self, user_id: Uuid) -> BillingResult<()> {
        sqlx::query("DELETE FROM transaction_ledger WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refund_transaction_id_is_distinct_per_occurrence() {
        let t1 = OffsetDateTime::from_unix_timestamp(1_750_000_000).unwrap();
        let t2 = OffsetDateTime::from_unix_timestamp(1_750_000_060).unwrap();
        let id1 = TransactionLedgerEntry::refund_transaction_id("CAP-1", t1);
        let id2 = TransactionLedgerEntry::refund_transaction_id("CAP-1", t2);
        assert_eq!(id1, "refund_CAP-1_1750000000");
        assert_ne!(id1, id2);
    }
}
