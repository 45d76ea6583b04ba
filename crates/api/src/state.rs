//! Shared application state

use std::sync::Arc;

use meetnotes_billing::{
    BillingEmailService, ChannelBroadcaster, Normalizer, PayPalGateway, PgSubscriptionStore,
    PgTransactionLedger, PlanCatalog, ReconciliationService,
};
use sqlx::PgPool;

use crate::config::Config;
use crate::error::{ApiError, ApiResult};

/// Application state shared across request handlers
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Arc<Config>,
    /// Reconciliation entry point for webhooks and user actions
    pub billing: Arc<ReconciliationService>,
    /// Verifies and parses inbound webhook deliveries
    pub normalizer: Arc<Normalizer>,
    /// Live entitlement updates for connected sessions
    pub broadcaster: Arc<ChannelBroadcaster>,
}

impl AppState {
    /// Wire up the billing stack from config and environment
    pub fn new(pool: PgPool, config: Config) -> ApiResult<Self> {
        let plans = PlanCatalog::from_env().map_err(ApiError::from)?;
        let gateway = Arc::new(PayPalGateway::from_env().map_err(ApiError::from)?);

        let store = Arc::new(PgSubscriptionStore::new(pool.clone()));
        let ledger = Arc::new(PgTransactionLedger::new(pool.clone()));
        let notifier = Arc::new(BillingEmailService::from_env());
        let broadcaster = Arc::new(ChannelBroadcaster::default());

        let billing = Arc::new(ReconciliationService::new(
            store,
            ledger,
            gateway.clone(),
            notifier,
            broadcaster.clone(),
            plans.clone(),
        ));
        let normalizer = Arc::new(Normalizer::new(gateway, plans));

        Ok(Self {
            pool,
            config: Arc::new(config),
            billing,
            normalizer,
            broadcaster,
        })
    }
}
