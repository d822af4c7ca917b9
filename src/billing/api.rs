use std::sync::Arc;

use axum::{extract::Extension, Json};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tracing::{error, info};

use super::adapters::{BillingProviderAdapter, CheckoutRequest};
use super::catalog::{PlanCatalog, PlanCatalogEntry};
use super::models::{QuotaStatus, Tier};
use super::quota::QuotaGate;
use super::store::{ApplyOutcome, EntitlementStore};
use crate::config;
use crate::db;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;

#[derive(Debug, Deserialize)]
pub struct CheckoutBody {
    pub tier: String,
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    pub url: String,
}

// key: billing-api -> rest endpoints
pub async fn list_plans(
    Extension(catalog): Extension<Arc<PlanCatalog>>,
) -> Json<Vec<PlanCatalogEntry>> {
    Json(catalog.entries().to_vec())
}

pub async fn quota_status(
    Extension(gate): Extension<QuotaGate>,
    AuthUser { user_id }: AuthUser,
) -> AppResult<Json<QuotaStatus>> {
    Ok(Json(gate.status(&user_id).await?))
}

pub async fn checkout(
    Extension(pool): Extension<PgPool>,
    Extension(catalog): Extension<Arc<PlanCatalog>>,
    Extension(store): Extension<Arc<dyn EntitlementStore>>,
    Extension(provider): Extension<Arc<dyn BillingProviderAdapter>>,
    AuthUser { user_id }: AuthUser,
    Json(body): Json<CheckoutBody>,
) -> AppResult<Json<CheckoutResponse>> {
    let tier: Tier = body
        .tier
        .parse()
        .map_err(|err: super::models::UnknownTier| AppError::BadRequest(err.to_string()))?;
    let price_id = catalog
        .get(tier)
        .price_id
        .clone()
        .ok_or_else(|| AppError::BadRequest(format!("tier {tier} is not purchasable")))?;

    let entitlement = store
        .entitlement(&user_id)
        .await
        .map_err(super::BillingError::from)?
        .ok_or(AppError::NotFound)?;

    let customer_id = match entitlement.stripe_customer_id {
        Some(customer_id) => customer_id,
        None => {
            let profile = db::users::find_profile(&pool, &user_id)
                .await?
                .ok_or(AppError::NotFound)?;
            let created = provider
                .create_customer(&profile.email, profile.name.as_deref(), &user_id)
                .await
                .map_err(|err| {
                    error!(?err, %user_id, "failed to create billing customer");
                    AppError::BadGateway(format!("{err:#}"))
                })?;
            remember_customer(store.as_ref(), &user_id, &created).await?
        }
    };

    let base = config::APP_BASE_URL.trim_end_matches('/');
    let success_url = format!("{base}/dashboard?success=true");
    let cancel_url = format!("{base}/pricing?canceled=true");
    let session = provider
        .create_checkout_session(CheckoutRequest {
            customer_id: &customer_id,
            price_id: &price_id,
            user_id: &user_id,
            success_url: &success_url,
            cancel_url: &cancel_url,
        })
        .await
        .map_err(|err| {
            error!(?err, %user_id, "failed to create checkout session");
            AppError::BadGateway(format!("{err:#}"))
        })?;

    info!(%user_id, %tier, session = %session.id, "created checkout session");
    let url = session
        .url
        .ok_or_else(|| AppError::BadGateway("checkout session has no url".into()))?;
    Ok(Json(CheckoutResponse { url }))
}

/// Store the customer id unless a concurrent checkout already did; returns the winner.
async fn remember_customer(
    store: &dyn EntitlementStore,
    user_id: &str,
    customer_id: &str,
) -> AppResult<String> {
    let outcome = store
        .apply(
            user_id,
            &mut |entitlement| {
                if entitlement.stripe_customer_id.is_some() {
                    return false;
                }
                entitlement.stripe_customer_id = Some(customer_id.to_string());
                true
            },
            None,
        )
        .await
        .map_err(super::BillingError::from)?;

    match outcome {
        ApplyOutcome::Applied(entitlement) | ApplyOutcome::Unchanged(entitlement) => Ok(entitlement
            .stripe_customer_id
            .unwrap_or_else(|| customer_id.to_string())),
        ApplyOutcome::Stale | ApplyOutcome::Missing => Err(AppError::NotFound),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::catalog::PriceIds;
    use crate::billing::models::Entitlement;
    use crate::billing::store::MemoryEntitlementStore;
    use chrono::{Duration, Utc};

    fn free_entitlement(customer: Option<&str>) -> Entitlement {
        Entitlement {
            user_id: "u1".into(),
            tier: Tier::Free,
            monthly_quota: 10,
            used_quota: 0,
            quota_reset_date: Utc::now() + Duration::days(30),
            subscription_status: "free".into(),
            stripe_customer_id: customer.map(str::to_string),
            stripe_subscription_id: None,
            subscription_end_date: None,
        }
    }

    #[tokio::test]
    async fn plans_list_every_tier_in_order() {
        let catalog = Arc::new(PlanCatalog::new(PriceIds::default()));
        let Json(plans) = list_plans(Extension(catalog)).await;
        let tiers: Vec<Tier> = plans.iter().map(|plan| plan.tier).collect();
        assert_eq!(tiers, Tier::ALL.to_vec());
    }

    #[tokio::test]
    async fn first_customer_id_wins() {
        let store = MemoryEntitlementStore::new();
        store.insert_entitlement(&free_entitlement(None)).await.unwrap();

        let first = remember_customer(&store, "u1", "cus_first").await.unwrap();
        let second = remember_customer(&store, "u1", "cus_second").await.unwrap();
        assert_eq!(first, "cus_first");
        assert_eq!(second, "cus_first");
        let stored = store.entitlement("u1").await.unwrap().unwrap();
        assert_eq!(stored.stripe_customer_id.as_deref(), Some("cus_first"));
    }

    #[tokio::test]
    async fn remembering_customer_for_unknown_user_fails() {
        let store = MemoryEntitlementStore::new();
        let err = remember_customer(&store, "ghost", "cus_1").await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }
}
