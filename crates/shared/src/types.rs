//! Common types used across MeetNotes

use serde::{Deserialize, Serialize};

// =============================================================================
// Enums
// =============================================================================

/// Entitlement tier for billing
///
/// Tier hierarchy: Free (no subscription) → Pro → Pro Plus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Free,
    Pro,
    ProPlus,
}

impl Default for Tier {
    fn default() -> Self {
        Self::Free
    }
}

impl Tier {
    /// Whether this tier is paid (carries a processor subscription)
    pub fn is_paid(&self) -> bool {
        !matches!(self, Self::Free)
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Pro => write!(f, "pro"),
            Self::ProPlus => write!(f, "pro_plus"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "pro_plus" | "proplus" => Ok(Self::ProPlus),
            _ => Err(format!("Invalid tier: {}", s)),
        }
    }
}

/// Subscription status as mirrored from the payment processor
///
/// `Unknown` captures processor statuses outside the known catalogue; the
/// reconciliation core stores them verbatim without touching the tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "VARCHAR", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Created,
    Active,
    Cancelled,
    Expired,
    Suspended,
    Failed,
    Unknown,
}

impl Default for SubscriptionStatus {
    fn default() -> Self {
        Self::Unknown
    }
}

impl SubscriptionStatus {
    /// Statuses under which paid access is revoked
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Expired | Self::Suspended | Self::Failed
        )
    }

    /// Parse a processor-reported status string, mapping anything outside the
    /// catalogue to `Unknown` rather than erroring
    pub fn from_processor(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "APPROVAL_PENDING" | "APPROVED" | "CREATED" => Self::Created,
            "ACTIVE" => Self::Active,
            "CANCELLED" | "CANCELED" => Self::Cancelled,
            "EXPIRED" => Self::Expired,
            "SUSPENDED" => Self::Suspended,
            "FAILED" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Active => write!(f, "active"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
            Self::Suspended => write!(f, "suspended"),
            Self::Failed => write!(f, "failed"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

impl std::str::FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "created" => Ok(Self::Created),
            "active" => Ok(Self::Active),
            "cancelled" | "canceled" => Ok(Self::Cancelled),
            "expired" => Ok(Self::Expired),
            "suspended" => Ok(Self::Suspended),
            "failed" => Ok(Self::Failed),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("Invalid subscription status: {}", s)),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_default() {
        assert_eq!(Tier::default(), Tier::Free);
    }

    #[test]
    fn test_tier_is_paid() {
        assert!(!Tier::Free.is_paid());
        assert!(Tier::Pro.is_paid());
        assert!(Tier::ProPlus.is_paid());
    }

    #[test]
    fn test_tier_display() {
        assert_eq!(format!("{}", Tier::Free), "free");
        assert_eq!(format!("{}", Tier::Pro), "pro");
        assert_eq!(format!("{}", Tier::ProPlus), "pro_plus");
    }

    #[test]
    fn test_tier_from_str() {
        assert_eq!("free".parse::<Tier>().unwrap(), Tier::Free);
        assert_eq!("PRO".parse::<Tier>().unwrap(), Tier::Pro);
        assert_eq!("pro_plus".parse::<Tier>().unwrap(), Tier::ProPlus);
        assert!("platinum".parse::<Tier>().is_err());
    }

    #[test]
    fn test_status_is_terminal() {
        assert!(SubscriptionStatus::Cancelled.is_terminal());
        assert!(SubscriptionStatus::Expired.is_terminal());
        assert!(SubscriptionStatus::Suspended.is_terminal());
        assert!(SubscriptionStatus::Failed.is_terminal());
        assert!(!SubscriptionStatus::Active.is_terminal());
        assert!(!SubscriptionStatus::Created.is_terminal());
        assert!(!SubscriptionStatus::Unknown.is_terminal());
    }

    #[test]
    fn test_status_from_processor() {
        assert_eq!(
            SubscriptionStatus::from_processor("ACTIVE"),
            SubscriptionStatus::Active
        );
        assert_eq!(
            SubscriptionStatus::from_processor("CANCELLED"),
            SubscriptionStatus::Cancelled
        );
        assert_eq!(
            SubscriptionStatus::from_processor("APPROVAL_PENDING"),
            SubscriptionStatus::Created
        );
        // Anything outside the catalogue maps to Unknown, never an error
        assert_eq!(
            SubscriptionStatus::from_processor("SOME_NEW_STATUS"),
            SubscriptionStatus::Unknown
        );
    }

    #[test]
    fn test_status_display_roundtrip() {
        for status in [
            SubscriptionStatus::Created,
            SubscriptionStatus::Active,
            SubscriptionStatus::Cancelled,
            SubscriptionStatus::Expired,
            SubscriptionStatus::Suspended,
            SubscriptionStatus::Failed,
            SubscriptionStatus::Unknown,
        ] {
            assert_eq!(
                status.to_string().parse::<SubscriptionStatus>().unwrap(),
                status
            );
        }
    }

}
