#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use axum::Router;
use chrono::Utc;
use dreambook_billing::billing::adapters::{CheckoutRequest, CheckoutSession};
use dreambook_billing::billing::events::SubscriptionObject;
use dreambook_billing::billing::{
    BillingProviderAdapter, Entitlement, EntitlementStore, MemoryEntitlementStore, PlanCatalog,
    PriceIds, QuotaGate, Reconciler, ReconcilerConfig, Tier,
};
use dreambook_billing::generation::{DreamAnalysis, DreamGenerator, DreamInput, LocalStubGenerator};
use dreambook_billing::routes::{app, AppServices};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;

pub const JWT_SECRET: &str = "integration-secret";
pub const WEBHOOK_SECRET: &str = "whsec_integration";

pub struct NoProvider;

#[async_trait]
impl BillingProviderAdapter for NoProvider {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<SubscriptionObject> {
        Err(anyhow!("unexpected lookup of {subscription_id}"))
    }

    async fn create_customer(&self, _email: &str, _name: Option<&str>, _user_id: &str) -> Result<String> {
        Err(anyhow!("unexpected customer creation"))
    }

    async fn create_checkout_session(&self, _request: CheckoutRequest<'_>) -> Result<CheckoutSession> {
        Err(anyhow!("unexpected checkout"))
    }
}

/// Counts invocations so tests can prove a denied request never reached generation.
#[derive(Default)]
pub struct CountingGenerator {
    pub calls: AtomicUsize,
}

#[async_trait]
impl DreamGenerator for CountingGenerator {
    async fn analyze(&self, input: &DreamInput) -> Result<DreamAnalysis> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        LocalStubGenerator.analyze(input).await
    }

    fn name(&self) -> &'static str {
        "counting"
    }
}

pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryEntitlementStore>,
    pub generator: Arc<CountingGenerator>,
}

pub fn test_app() -> TestApp {
    std::env::set_var("JWT_SECRET", JWT_SECRET);
    let catalog = Arc::new(PlanCatalog::new(PriceIds {
        basic: Some("price_basic".into()),
        pro: Some("price_pro".into()),
        expert: Some("price_expert".into()),
    }));
    let store = Arc::new(MemoryEntitlementStore::new());
    let provider: Arc<dyn BillingProviderAdapter> = Arc::new(NoProvider);
    let shared: Arc<dyn EntitlementStore> = store.clone();
    let reconciler = Arc::new(Reconciler::new(
        shared.clone(),
        catalog.clone(),
        provider.clone(),
        ReconcilerConfig {
            webhook_secret: WEBHOOK_SECRET.into(),
            signature_tolerance_secs: 300,
            lookup_timeout: Duration::from_millis(200),
        },
    ));
    let generator = Arc::new(CountingGenerator::default());
    let router = app(AppServices {
        catalog: catalog.clone(),
        store: shared.clone(),
        provider,
        reconciler,
        gate: QuotaGate::new(shared, catalog),
        generator: generator.clone(),
    });
    TestApp {
        router,
        store,
        generator,
    }
}

pub fn entitlement(user_id: &str, tier: Tier, monthly_quota: i64, used_quota: i64) -> Entitlement {
    Entitlement {
        user_id: user_id.into(),
        tier,
        monthly_quota,
        used_quota,
        quota_reset_date: Utc::now() + chrono::Duration::days(20),
        subscription_status: "active".into(),
        stripe_customer_id: Some("cus_1".into()),
        stripe_subscription_id: None,
        subscription_end_date: None,
    }
}

pub fn bearer(user_id: &str) -> String {
    let claims = json!({"sub": user_id, "exp": 9_999_999_999u64});
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .unwrap();
    format!("Bearer {token}")
}
