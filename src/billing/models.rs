use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Ceiling value stored for tiers without a usage cap.
pub const UNLIMITED_QUOTA: i64 = -1;

// key: billing-models -> tiers,entitlements,subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Tier {
    Free,
    Basic,
    Pro,
    Expert,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Free, Tier::Basic, Tier::Pro, Tier::Expert];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "FREE",
            Tier::Basic => "BASIC",
            Tier::Pro => "PRO",
            Tier::Expert => "EXPERT",
        }
    }

    /// Next tier up, used to phrase "upgrade or wait" responses.
    pub fn recommended_upgrade(&self) -> Option<Tier> {
        match self {
            Tier::Free => Some(Tier::Basic),
            Tier::Basic => Some(Tier::Pro),
            Tier::Pro => Some(Tier::Expert),
            Tier::Expert => None,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown subscription tier `{0}`")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "FREE" => Ok(Tier::Free),
            "BASIC" => Ok(Tier::Basic),
            "PRO" => Ok(Tier::Pro),
            "EXPERT" => Ok(Tier::Expert),
            _ => Err(UnknownTier(value.to_string())),
        }
    }
}

// key: billing-entitlement-model -> one row per user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entitlement {
    pub user_id: String,
    pub tier: Tier,
    pub monthly_quota: i64,
    pub used_quota: i64,
    pub quota_reset_date: DateTime<Utc>,
    pub subscription_status: String,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_end_date: Option<DateTime<Utc>>,
}

impl Entitlement {
    pub fn is_unlimited(&self) -> bool {
        self.monthly_quota == UNLIMITED_QUOTA
    }

    pub fn has_capacity(&self) -> bool {
        self.is_unlimited() || self.used_quota < self.monthly_quota
    }
}

// key: billing-subscription-model -> keyed by the provider subscription id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub id: Uuid,
    pub user_id: String,
    pub tier: Tier,
    pub status: String,
    pub stripe_subscription_id: String,
    pub stripe_price_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub current_period_start: DateTime<Utc>,
    pub current_period_end: DateTime<Utc>,
    pub cancel_at_period_end: bool,
    pub last_event_at: DateTime<Utc>,
}

/// Read-only projection returned by the quota status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaStatus {
    pub tier: Tier,
    pub unlimited: bool,
    pub used: i64,
    pub remaining: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quota: Option<i64>,
    pub percentage: f64,
    pub reset_at: DateTime<Utc>,
    pub recommended_upgrade: Option<Tier>,
}

impl QuotaStatus {
    pub fn from_entitlement(entitlement: &Entitlement) -> Self {
        let recommended_upgrade = entitlement.tier.recommended_upgrade();
        if entitlement.is_unlimited() {
            return Self {
                tier: entitlement.tier,
                unlimited: true,
                used: entitlement.used_quota,
                remaining: UNLIMITED_QUOTA,
                quota: None,
                percentage: 0.0,
                reset_at: entitlement.quota_reset_date,
                recommended_upgrade,
            };
        }

        let quota = entitlement.monthly_quota;
        let used = entitlement.used_quota;
        let percentage = if quota > 0 {
            (used as f64 * 100.0 / quota as f64).min(100.0)
        } else {
            0.0
        };

        Self {
            tier: entitlement.tier,
            unlimited: false,
            used,
            remaining: (quota - used).max(0),
            quota: Some(quota),
            percentage,
            reset_at: entitlement.quota_reset_date,
            recommended_upgrade,
        }
    }
}
