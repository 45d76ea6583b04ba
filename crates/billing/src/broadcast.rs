//! Entitlement change broadcast
//!
//! When reconciliation changes a user's tier, connected sessions should pick
//! up the new entitlements without polling. Deliveries go over an in-process
//! `tokio::sync::broadcast` channel that the realtime layer subscribes to.
//! Broadcast is best-effort: a full or unsubscribed channel is logged, never
//! an error.

use async_trait::async_trait;
use meetnotes_shared::Tier;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entitlement::EntitlementBundle;
use crate::error::BillingResult;

/// Payload pushed to connected sessions on a tier change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementChange {
    pub user_id: Uuid,
    pub previous_tier: Tier,
    pub new_tier: Tier,
    pub entitlements: EntitlementBundle,
}

impl EntitlementChange {
    pub fn new(user_id: Uuid, previous_tier: Tier, new_tier: Tier) -> Self {
        Self {
            user_id,
            previous_tier,
            new_tier,
            entitlements: EntitlementBundle::for_tier(new_tier),
        }
    }
}

/// Push-notification collaborator for tier changes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EntitlementBroadcaster: Send + Sync {
    /// Announce a tier change; failures are non-fatal
    async fn broadcast(&self, change: EntitlementChange) -> BillingResult<()>;
}

/// Broadcast over an in-process channel
///
/// The channel is bounded; slow subscribers miss messages rather than
/// backing up reconciliation.
pub struct ChannelBroadcaster {
    sender: tokio::sync::broadcast::Sender<EntitlementChange>,
}

impl ChannelBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe a session to entitlement changes
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<EntitlementChange> {
        self.sender.subscribe()
    }
}

impl Default for ChannelBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl EntitlementBroadcaster for ChannelBroadcaster {
    async fn broadcast(&self, change: EntitlementChange) -> BillingResult<()> {
        let user_id = change.user_id;
        match self.sender.send(change) {
            Ok(receivers) => {
                tracing::debug!(
                    user_id = %user_id,
                    receivers = receivers,
                    "Entitlement change broadcast"
                );
            }
            Err(_) => {
                // No subscribers connected right now
                tracing::debug!(user_id = %user_id, "Entitlement change had no subscribers");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_change() {
        let broadcaster = ChannelBroadcaster::new(8);
        let mut rx = broadcaster.subscribe();
        let user_id = Uuid::new_v4();

        broadcaster
            .broadcast(EntitlementChange::new(user_id, Tier::Free, Tier::Pro))
            .await
            .unwrap();

        let change = rx.recv().await.unwrap();
        assert_eq!(change.user_id, user_id);
        assert_eq!(change.new_tier, Tier::Pro);
        assert!(change.entitlements.features.summary_generation);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let broadcaster = ChannelBroadcaster::new(8);
        let result = broadcaster
            .broadcast(EntitlementChange::new(Uuid::new_v4(), Tier::Pro, Tier::Free))
            .await;
        assert!(result.is_ok());
    }
}
