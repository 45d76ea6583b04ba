//! Subscription billing for MeetNotes
//!
//! Keeps each user's entitlement tier consistent with PayPal's view of
//! their recurring subscription. Webhook deliveries and user actions feed
//! one reconciliation state machine; entitlements, the transaction ledger,
//! emails, and live broadcasts hang off its committed transitions.

pub mod broadcast;
pub mod email;
pub mod entitlement;
pub mod error;
pub mod events;
pub mod gateway;
pub mod ledger;
pub mod plans;
pub mod record;
pub mod scheduler;
pub mod state_machine;

pub use broadcast::{ChannelBroadcaster, EntitlementBroadcaster, EntitlementChange};
pub use email::{BillingEmailService, BillingNotifier, EmailConfig, NotificationTemplate};
pub use entitlement::{AiModel, EntitlementBundle, EntitlementFeatures, RateLimits};
pub use error::{BillingError, BillingResult};
pub use events::{NormalizedWebhookEvent, Normalizer, WebhookEventKind};
pub use gateway::{
    PayPalConfig, PayPalGateway, PaymentGateway, ProcessorSubscription, WebhookSignature,
};
pub use ledger::{
    PgTransactionLedger, TransactionLedger, TransactionLedgerEntry, TransactionStatus,
    TransactionType, MAX_HISTORY_PAGE,
};
pub use plans::PlanCatalog;
pub use record::{PgSubscriptionStore, SubscriptionRecord, SubscriptionStore};
pub use state_machine::{plan_transition, ReconciliationService, TransitionPlan};
