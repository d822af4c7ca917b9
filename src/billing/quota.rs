use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use super::catalog::PlanCatalog;
use super::models::{Entitlement, QuotaStatus, Tier};
use super::store::{ApplyOutcome, EntitlementStore};
use super::BillingError;

/// Length of one billing cycle for quota resets.
pub fn billing_period() -> Duration {
    Duration::days(30)
}

/// FREE entitlement created alongside every new account.
pub fn starting_entitlement(user_id: &str, catalog: &PlanCatalog, now: DateTime<Utc>) -> Entitlement {
    Entitlement {
        user_id: user_id.to_string(),
        tier: Tier::Free,
        monthly_quota: catalog.quota_for(Tier::Free),
        used_quota: 0,
        quota_reset_date: now + billing_period(),
        subscription_status: "free".to_string(),
        stripe_customer_id: None,
        stripe_subscription_id: None,
        subscription_end_date: None,
    }
}

/// What a single consumption attempt does to an entitlement row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumption {
    /// Cycle expired: ceiling refreshed, reset date advanced, this call counted.
    Reset { allowed: bool },
    Consumed,
    Denied,
}

impl Consumption {
    pub fn allowed(&self) -> bool {
        match self {
            Consumption::Reset { allowed } => *allowed,
            Consumption::Consumed => true,
            Consumption::Denied => false,
        }
    }
}

/// Decide and apply one consumption to `entitlement` in place.
pub fn consume_one(
    entitlement: &mut Entitlement,
    catalog: &PlanCatalog,
    now: DateTime<Utc>,
) -> Consumption {
    if now > entitlement.quota_reset_date {
        entitlement.monthly_quota = catalog.quota_for(entitlement.tier);
        entitlement.quota_reset_date = now + billing_period();
        entitlement.used_quota = 0;
        let allowed = entitlement.has_capacity();
        if allowed {
            entitlement.used_quota = 1;
        }
        return Consumption::Reset { allowed };
    }

    if entitlement.has_capacity() {
        entitlement.used_quota += 1;
        Consumption::Consumed
    } else {
        Consumption::Denied
    }
}

// key: billing-quota-gate -> synchronous check-and-consume
#[derive(Clone)]
pub struct QuotaGate {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<PlanCatalog>,
}

impl QuotaGate {
    pub fn new(store: Arc<dyn EntitlementStore>, catalog: Arc<PlanCatalog>) -> Self {
        Self { store, catalog }
    }

    pub async fn check_and_consume(&self, user_id: &str) -> Result<bool, BillingError> {
        self.check_and_consume_at(user_id, Utc::now()).await
    }

    pub async fn check_and_consume_at(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, BillingError> {
        let catalog = self.catalog.clone();
        let mut decision = Consumption::Denied;
        let outcome = self
            .store
            .apply(
                user_id,
                &mut |entitlement| {
                    decision = consume_one(entitlement, &catalog, now);
                    decision != Consumption::Denied
                },
                None,
            )
            .await?;

        match outcome {
            ApplyOutcome::Missing => Err(BillingError::NotFound),
            ApplyOutcome::Applied(entitlement) => {
                if let Consumption::Reset { allowed } = decision {
                    info!(
                        %user_id,
                        tier = %entitlement.tier,
                        reset_at = %entitlement.quota_reset_date,
                        allowed,
                        "quota cycle reset on consumption"
                    );
                }
                Ok(decision.allowed())
            }
            ApplyOutcome::Unchanged(entitlement) => {
                debug!(
                    %user_id,
                    used = entitlement.used_quota,
                    quota = entitlement.monthly_quota,
                    "quota exhausted"
                );
                Ok(false)
            }
            ApplyOutcome::Stale => Ok(false),
        }
    }

    /// Side-effect free, even past the reset date.
    pub async fn status(&self, user_id: &str) -> Result<QuotaStatus, BillingError> {
        let entitlement = self
            .store
            .entitlement(user_id)
            .await?
            .ok_or(BillingError::NotFound)?;
        Ok(QuotaStatus::from_entitlement(&entitlement))
    }
}
