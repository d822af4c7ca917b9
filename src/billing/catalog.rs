use serde::Serialize;

use super::models::{Tier, UNLIMITED_QUOTA};

// key: billing-plan-catalog -> static tier table
#[derive(Debug, Clone, Serialize)]
pub struct PlanCatalogEntry {
    pub tier: Tier,
    pub name: &'static str,
    pub description: &'static str,
    pub price_cents: i64,
    pub price_id: Option<String>,
    pub quota: i64,
    pub features: Vec<&'static str>,
}

impl PlanCatalogEntry {
    pub fn is_unlimited(&self) -> bool {
        self.quota == UNLIMITED_QUOTA
    }
}

/// Read-only for the life of the process; built once in `main`.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    entries: Vec<PlanCatalogEntry>,
}

/// Provider price ids for the paid tiers.
#[derive(Debug, Clone, Default)]
pub struct PriceIds {
    pub basic: Option<String>,
    pub pro: Option<String>,
    pub expert: Option<String>,
}

impl PlanCatalog {
    pub fn new(prices: PriceIds) -> Self {
        let entries = vec![
            PlanCatalogEntry {
                tier: Tier::Free,
                name: "Free",
                description: "Core features, 10 generations per month",
                price_cents: 0,
                price_id: None,
                quota: 10,
                features: vec![
                    "10 AI generations per month",
                    "Basic dream analysis",
                    "Standard image generation",
                    "Community gallery",
                ],
            },
            PlanCatalogEntry {
                tier: Tier::Basic,
                name: "Basic",
                description: "For individuals, 100 generations per month",
                price_cents: 999,
                price_id: prices.basic,
                quota: 100,
                features: vec![
                    "100 AI generations per month",
                    "Advanced dream analysis",
                    "HD image generation",
                    "Video generation",
                    "Unlimited favorites",
                    "Priority support",
                ],
            },
            PlanCatalogEntry {
                tier: Tier::Pro,
                name: "Pro",
                description: "For creators, 500 generations per month",
                price_cents: 2999,
                price_id: prices.pro,
                quota: 500,
                features: vec![
                    "500 AI generations per month",
                    "Professional dream analysis",
                    "4K image generation",
                    "High quality video generation",
                    "Batch processing",
                    "Custom AI models",
                    "Commercial license",
                    "Dedicated support",
                ],
            },
            PlanCatalogEntry {
                tier: Tier::Expert,
                name: "Expert",
                description: "Unlimited generations with expert features",
                price_cents: 9999,
                price_id: prices.expert,
                quota: UNLIMITED_QUOTA,
                features: vec![
                    "Unlimited AI generations",
                    "Expert dream analysis",
                    "8K image generation",
                    "Studio video generation",
                    "API access",
                    "White-label customization",
                    "Early feature access",
                    "One-on-one expert sessions",
                ],
            },
        ];
        Self { entries }
    }

    pub fn from_env() -> Self {
        Self::new(PriceIds {
            basic: crate::config::STRIPE_BASIC_PRICE_ID.clone(),
            pro: crate::config::STRIPE_PRO_PRICE_ID.clone(),
            expert: crate::config::STRIPE_EXPERT_PRICE_ID.clone(),
        })
    }

    pub fn entries(&self) -> &[PlanCatalogEntry] {
        &self.entries
    }

    pub fn get(&self, tier: Tier) -> &PlanCatalogEntry {
        // every tier has an entry, see `new`
        self.entries
            .iter()
            .find(|entry| entry.tier == tier)
            .unwrap_or(&self.entries[0])
    }

    pub fn quota_for(&self, tier: Tier) -> i64 {
        self.get(tier).quota
    }

    pub fn match_by_price_id(&self, price_id: &str) -> Option<Tier> {
        if price_id.is_empty() {
            return None;
        }
        self.entries
            .iter()
            .find(|entry| entry.price_id.as_deref() == Some(price_id))
            .map(|entry| entry.tier)
    }
}
