//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use meetnotes_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Authentication required")]
    Unauthorized,

    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Invalid state: {0}")]
    UnprocessableEntity(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("{0}")]
    Conflict(String),

    // Upstream errors
    #[error("Payment processor unavailable")]
    UpstreamUnavailable(String),

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "UNAUTHORIZED",
                self.to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            ApiError::UnprocessableEntity(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "UNPROCESSABLE_ENTITY",
                msg.clone(),
            ),
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            ApiError::UpstreamUnavailable(msg) => {
                tracing::error!(error = %msg, "Payment processor call failed");
                (
                    StatusCode::BAD_GATEWAY,
                    "UPSTREAM_UNAVAILABLE",
                    "Payment processor unavailable".to_string(),
                )
            }
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            // Webhook signature failures map to 400 at the webhook route
            BillingError::Unauthenticated => ApiError::BadRequest("Invalid signature".to_string()),
            BillingError::Conflict(msg) => ApiError::Conflict(msg),
            BillingError::InvalidState(msg) => ApiError::UnprocessableEntity(msg),
            BillingError::UnresolvedPlan(plan) => {
                ApiError::UnprocessableEntity(format!("Plan {} is not recognized", plan))
            }
            BillingError::NotFound(_) => ApiError::NotFound,
            BillingError::Gateway(msg) => ApiError::UpstreamUnavailable(msg),
            BillingError::StaleWrite(msg) => ApiError::Conflict(msg),
            BillingError::Database(msg) => ApiError::Database(msg),
            BillingError::Config(msg) | BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Internal billing error");
                ApiError::Internal
            }
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!(error = %err, "Database error");
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            other => ApiError::Database(other.to_string()),
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    fn status_for(err: BillingError) -> StatusCode {
        ApiError::from(err).into_response().status()
    }

    #[test]
    fn test_billing_error_status_mapping() {
        assert_eq!(
            status_for(BillingError::Conflict("owned elsewhere".into())),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_for(BillingError::InvalidState("not active".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(BillingError::UnresolvedPlan("P-X".into())),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_for(BillingError::Unauthenticated),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(BillingError::NotFound("missing".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(BillingError::Gateway("503".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(BillingError::Database("down".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
