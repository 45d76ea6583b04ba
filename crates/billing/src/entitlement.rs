//! Entitlement resolution
//!
//! Answers "what can this user do right now?" as a pure function of their
//! tier. Consumers (transcription pipeline, AI summarizer, rate limiter)
//! read the resolved bundle; nothing here mutates state. Unknown or missing
//! tier resolves to the most restrictive (free) bundle rather than erroring.

use meetnotes_shared::Tier;
use serde::{Deserialize, Serialize};

/// Monthly AI-token allowance for one model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelAllowance {
    pub model: AiModel,
    pub monthly_tokens: u64,
}

/// Models the summarizer may route to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiModel {
    Compact,
    Standard,
    Advanced,
}

/// Feature flags based on tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitlementFeatures {
    /// AI summary generation after transcription
    pub summary_generation: bool,
    /// Per-speaker labels in transcripts
    pub speaker_labels: bool,
    /// Transcript export (PDF/Markdown)
    pub export: bool,
}

/// Request-rate limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub max_requests_per_minute: u32,
    pub max_concurrent: u32,
}

/// Resolved quota/limit/feature bundle for a tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementBundle {
    pub tier: Tier,
    /// Monthly transcription-minute quota
    pub transcription_minutes_monthly: u64,
    /// Aggregate monthly AI-token quota across all models
    pub ai_tokens_monthly: u64,
    /// Per-model breakdown; models absent here are not allowed
    pub model_allowances: Vec<ModelAllowance>,
    pub rate_limits: RateLimits,
    pub features: EntitlementFeatures,
}

impl EntitlementBundle {
    /// Resolve the bundle for a tier
    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Free => Self {
                tier,
                transcription_minutes_monthly: 300,
                ai_tokens_monthly: 50_000,
                model_allowances: vec![ModelAllowance {
                    model: AiModel::Compact,
                    monthly_tokens: 50_000,
                }],
                rate_limits: RateLimits {
                    max_requests_per_minute: 10,
                    max_concurrent: 1,
                },
                features: EntitlementFeatures {
                    summary_generation: false,
                    speaker_labels: false,
                    export: false,
                },
            },
            Tier::Pro => Self {
                tier,
                transcription_minutes_monthly: 3_000,
                ai_tokens_monthly: 1_000_000,
                model_allowances: vec![
                    ModelAllowance {
                        model: AiModel::Compact,
                        monthly_tokens: 1_000_000,
                    },
                    ModelAllowance {
                        model: AiModel::Standard,
                        monthly_tokens: 500_000,
                    },
                ],
                rate_limits: RateLimits {
                    max_requests_per_minute: 60,
                    max_concurrent: 4,
                },
                features: EntitlementFeatures {
                    summary_generation: true,
                    speaker_labels: true,
                    export: true,
                },
            },
            Tier::ProPlus => Self {
                tier,
                transcription_minutes_monthly: 12_000,
                ai_tokens_monthly: 5_000_000,
                model_allowances: vec![
                    ModelAllowance {
                        model: AiModel::Compact,
                        monthly_tokens: 5_000_000,
                    },
                    ModelAllowance {
                        model: AiModel::Standard,
                        monthly_tokens: 3_000_000,
                    },
                    ModelAllowance {
                        model: AiModel::Advanced,
                        monthly_tokens: 1_000_000,
                    },
                ],
                rate_limits: RateLimits {
                    max_requests_per_minute: 120,
                    max_concurrent: 8,
                },
                features: EntitlementFeatures {
                    summary_generation: true,
                    speaker_labels: true,
                    export: true,
                },
            },
        }
    }

    /// Resolve for an optional tier; missing tier gets the free bundle
    pub fn for_tier_or_free(tier: Option<Tier>) -> Self {
        Self::for_tier(tier.unwrap_or(Tier::Free))
    }

    /// Check whether a model is on the allowlist
    pub fn allows_model(&self, model: AiModel) -> bool {
        self.model_allowances.iter().any(|a| a.model == model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_bundle_is_most_restrictive() {
        let free = EntitlementBundle::for_tier(Tier::Free);
        let pro = EntitlementBundle::for_tier(Tier::Pro);
        let pro_plus = EntitlementBundle::for_tier(Tier::ProPlus);

        assert!(free.transcription_minutes_monthly < pro.transcription_minutes_monthly);
        assert!(pro.transcription_minutes_monthly < pro_plus.transcription_minutes_monthly);
        assert!(free.ai_tokens_monthly < pro.ai_tokens_monthly);
        assert!(!free.features.summary_generation);
        assert!(pro.features.summary_generation);
    }

    #[test]
    fn test_missing_tier_defaults_to_free() {
        let bundle = EntitlementBundle::for_tier_or_free(None);
        assert_eq!(bundle.tier, Tier::Free);
        assert!(!bundle.features.export);
    }

    #[test]
    fn test_model_allowlist() {
        let free = EntitlementBundle::for_tier(Tier::Free);
        assert!(free.allows_model(AiModel::Compact));
        assert!(!free.allows_model(AiModel::Advanced));

        let pro_plus = EntitlementBundle::for_tier(Tier::ProPlus);
        assert!(pro_plus.allows_model(AiModel::Advanced));
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let a = EntitlementBundle::for_tier(Tier::Pro);
        let b = EntitlementBundle::for_tier(Tier::Pro);
        assert_eq!(a.ai_tokens_monthly, b.ai_tokens_monthly);
        assert_eq!(a.rate_limits, b.rate_limits);
        assert_eq!(a.features, b.features);
    }
}
