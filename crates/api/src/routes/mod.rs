//! API routes

pub mod billing;
pub mod health;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    let health_routes = Router::new()
        .route("/health", get(health::health))
        .route("/health/ready", get(health::readiness));

    let mut api_routes = Router::new();

    if state.config.enable_billing {
        api_routes = api_routes
            // Webhook is public; authenticity comes from signature
            // verification, not session auth
            .route("/billing/webhook/paypal", post(billing::paypal_webhook))
            .route("/billing/subscription/attach", post(billing::attach))
            .route("/billing/subscription/cancel", post(billing::cancel))
            .route("/billing/subscription", get(billing::get_subscription))
            .route("/billing/transactions", get(billing::transactions))
            .route("/billing/orders", post(billing::create_order))
            .route("/billing/orders/capture", post(billing::capture_order));
    }

    let cors = cors_layer(&state.config.allowed_origins);

    Router::new()
        .merge(health_routes)
        .nest("/api", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}
