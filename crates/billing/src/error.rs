//! Billing error types

use thiserror::Error;

/// Billing-specific errors
///
/// User-action errors (`Conflict`, `InvalidState`, `UnresolvedPlan`,
/// `NotFound`) surface to the caller as rejections. `Unauthenticated` is
/// returned only for webhook signature failures and must abort processing.
/// Side-effect failures never become errors here; they are logged at the
/// dispatch site.
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Webhook signature verification failed")]
    Unauthenticated,

    #[error("Subscription conflict: {0}")]
    Conflict(String),

    #[error("Plan id not mapped to a tier: {0}")]
    UnresolvedPlan(String),

    #[error("Subscription is not in a usable state: {0}")]
    InvalidState(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Stale write rejected: {0}")]
    StaleWrite(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<sqlx::Error> for BillingError {
    fn from(err: sqlx::Error) -> Self {
        BillingError::Database(err.to_string())
    }
}

impl From<reqwest::Error> for BillingError {
    fn from(err: reqwest::Error) -> Self {
        BillingError::Gateway(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
