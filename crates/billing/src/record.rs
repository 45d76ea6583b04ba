//! Subscription record store
//!
//! One record per user, mutated exclusively by the reconciliation state
//! machine. Writes are conditional: callers pass the `updated_at` they read,
//! and a write that no longer matches is rejected as stale instead of
//! clobbering a newer transition. That predicate, together with the partial
//! unique index on `paypal_subscription_id`, is what makes concurrent
//! webhook/user-action races safe without explicit locks.

use async_trait::async_trait;
use meetnotes_shared::{SubscriptionStatus, Tier};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};

/// Per-user subscription record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionRecord {
    pub user_id: Uuid,
    pub tier: Tier,
    pub paypal_subscription_id: Option<String>,
    pub paypal_plan_id: Option<String>,
    pub status: SubscriptionStatus,
    pub subscriber_email: Option<String>,
    pub next_billing_time: Option<OffsetDateTime>,
    pub cancel_at_period_end: bool,
    pub cancel_scheduled_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl SubscriptionRecord {
    /// Default record for a user with no subscription
    pub fn absent(user_id: Uuid) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            user_id,
            tier: Tier::Free,
            paypal_subscription_id: None,
            paypal_plan_id: None,
            status: SubscriptionStatus::Unknown,
            subscriber_email: None,
            next_billing_time: None,
            cancel_at_period_end: false,
            cancel_scheduled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the record holds a live paid subscription
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }
}

/// Persistence operations for subscription records
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Get the record for a user, if any
    async fn get_for_user(&self, user_id: Uuid) -> BillingResult<Option<SubscriptionRecord>>;

    /// Find the record owning a processor subscription id, across all users
    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>>;

    /// Write a record. When `expected_updated_at` is `Some`, the write only
    /// succeeds if the stored row still carries that timestamp; when it is
    /// `None`, only if no row exists for the user yet. A failed predicate
    /// returns `BillingError::StaleWrite` and the caller must re-read.
    async fn upsert(
        &self,
        record: &SubscriptionRecord,
        expected_updated_at: Option<OffsetDateTime>,
    ) -> BillingResult<SubscriptionRecord>;

    /// Delete the record as part of full account deletion
    async fn delete_for_user(&self, user_id: Uuid) -> BillingResult<()>;

    /// Record a processor event id as processed. Returns `false` when the id
    /// was already recorded, letting redelivered webhooks short-circuit.
    async fn record_processed_event(&self, event_id: &str) -> BillingResult<bool>;
}

/// Postgres-backed subscription store
pub struct PgSubscriptionStore {
    pool: PgPool,
}

impl PgSubscriptionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionStore for PgSubscriptionStore {
    async fn get_for_user(&self, user_id: Uuid) -> BillingResult<Option<SubscriptionRecord>> {
        let record: Option<SubscriptionRecord> = sqlx::query_as(
            r#"
            SELECT
                user_id, tier, paypal_subscription_id, paypal_plan_id, status,
                subscriber_email, next_billing_time, cancel_at_period_end,
                cancel_scheduled_at, created_at, updated_at
            FROM subscription_records
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn find_by_subscription_id(
        &self,
        subscription_id: &str,
    ) -> BillingResult<Option<SubscriptionRecord>> {
        let record: Option<SubscriptionRecord> = sqlx::query_as(
            r#"
            SELECT
                user_id, tier, paypal_subscription_id, paypal_plan_id, status,
                subscriber_email, next_billing_time, cancel_at_period_end,
                cancel_scheduled_at, created_at, updated_at
            FROM subscription_records
            WHERE paypal_subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record)
    }

    async fn upsert(
        &self,
        record: &SubscriptionRecord,
        expected_updated_at: Option<OffsetDateTime>,
    ) -> BillingResult<SubscriptionRecord> {
        let written: Option<SubscriptionRecord> = match expected_updated_at {
            // Insert-only: a row that appeared since the caller's read is a
            // lost race, surfaced as stale so the caller re-reads
            None => {
                sqlx::query_as(
                    r#"
                    INSERT INTO subscription_records (
                        user_id, tier, paypal_subscription_id, paypal_plan_id, status,
                        subscriber_email, next_billing_time, cancel_at_period_end,
                        cancel_scheduled_at, created_at, updated_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
                    ON CONFLICT (user_id) DO NOTHING
                    RETURNING
                        user_id, tier, paypal_subscription_id, paypal_plan_id, status,
                        subscriber_email, next_billing_time, cancel_at_period_end,
                        cancel_scheduled_at, created_at, updated_at
                    "#,
                )
                .bind(record.user_id)
                .bind(record.tier)
                .bind(&record.paypal_subscription_id)
                .bind(&record.paypal_plan_id)
                .bind(record.status)
                .bind(&record.subscriber_email)
                .bind(record.next_billing_time)
                .bind(record.cancel_at_period_end)
                .bind(record.cancel_scheduled_at)
                .fetch_optional(&self.pool)
                .await?
            }
            Some(expected) => {
                sqlx::query_as(
                    r#"
                    UPDATE subscription_records SET
                        tier = $2,
                        paypal_subscription_id = $3,
                        paypal_plan_id = $4,
                        status = $5,
                        subscriber_email = $6,
                        next_billing_time = $7,
                        cancel_at_period_end = $8,
                        cancel_scheduled_at = $9,
                        updated_at = NOW()
                    WHERE user_id = $1 AND updated_at = $10
                    RETURNING
                        user_id, tier, paypal_subscription_id, paypal_plan_id, status,
                        subscriber_email, next_billing_time, cancel_at_period_end,
                        cancel_scheduled_at, created_at, updated_at
                    "#,
                )
                .bind(record.user_id)
                .bind(record.tier)
                .bind(&record.paypal_subscription_id)
                .bind(&record.paypal_plan_id)
                .bind(record.status)
                .bind(&record.subscriber_email)
                .bind(record.next_billing_time)
                .bind(record.cancel_at_period_end)
                .bind(record.cancel_scheduled_at)
                .bind(expected)
                .fetch_optional(&self.pool)
                .await?
            }
        };

        written.ok_or_else(|| {
            BillingError::StaleWrite(format!(
                "subscription record for user {} changed since read",
                record.user_id
            ))
        })
    }

    async fn delete_for_user(&self, user_id: Uuid) -> BillingResult<()> {
        sqlx::query("DELETE FROM subscription_records WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_processed_event(&self, event_id: &str) -> BillingResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO processed_webhooks (event_id, processed_at)
            VALUES ($1, NOW())
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_record_defaults() {
        let user_id = Uuid::new_v4();
        let record = SubscriptionRecord::absent(user_id);
        assert_eq!(record.tier, Tier::Free);
        assert_eq!(record.status, SubscriptionStatus::Unknown);
        assert!(!record.cancel_at_period_end);
        assert!(record.paypal_subscription_id.is_none());
        assert!(!record.is_active());
    }
}
