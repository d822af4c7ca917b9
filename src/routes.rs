use std::sync::Arc;

use axum::{
    routing::{get, post},
    Extension, Router,
};

use crate::billing::{self, BillingProviderAdapter, EntitlementStore, PlanCatalog, QuotaGate, Reconciler};
use crate::generation::DreamGenerator;
use crate::{auth, dreams, webhooks};

/// Long-lived collaborators built once in `main` and handed to handlers as extensions.
#[derive(Clone)]
pub struct AppServices {
    pub catalog: Arc<PlanCatalog>,
    pub store: Arc<dyn EntitlementStore>,
    pub provider: Arc<dyn BillingProviderAdapter>,
    pub reconciler: Arc<Reconciler>,
    pub gate: QuotaGate,
    pub generator: Arc<dyn DreamGenerator>,
}

pub async fn root() -> &'static str {
    "Dreambook API"
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/register", post(auth::register_user))
        .route("/api/login", post(auth::login_user))
        .route("/api/logout", post(auth::logout_user))
        .route("/api/me", get(auth::current_user))
        .route("/api/plans", get(billing::billing_list_plans))
        .route("/api/user/quota", get(billing::quota_status))
        .route("/api/subscription/checkout", post(billing::billing_checkout))
        .route("/api/dreams/analyze", post(dreams::analyze_dream))
        .route("/api/webhooks/stripe", post(webhooks::stripe_webhook))
}

/// Everything except the database pool and metrics layer, which `main` adds.
pub fn app(services: AppServices) -> Router {
    Router::new()
        .route("/", get(root))
        .merge(api_routes())
        .layer(Extension(services.catalog))
        .layer(Extension(services.store))
        .layer(Extension(services.provider))
        .layer(Extension(services.reconciler))
        .layer(Extension(services.gate))
        .layer(Extension(services.generator))
}
