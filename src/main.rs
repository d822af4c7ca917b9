use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Extension};
use axum_prometheus::PrometheusMetricLayer;
use dreambook_billing::billing::{
    BillingProviderAdapter, EntitlementStore, PlanCatalog, QuotaGate, Reconciler,
    ReconcilerConfig, StripeAdapter, UnconfiguredAdapter,
};
use dreambook_billing::config;
use dreambook_billing::db::PgEntitlementStore;
use dreambook_billing::generation;
use dreambook_billing::routes::{app, AppServices};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    // Fail fast if the JWT secret is missing
    let _ = config::JWT_SECRET.as_str();
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let lookup_timeout = Duration::from_millis(*config::BILLING_LOOKUP_TIMEOUT_MS);
    let catalog = Arc::new(PlanCatalog::from_env());
    let store: Arc<dyn EntitlementStore> = Arc::new(PgEntitlementStore::new(pool.clone()));
    let provider: Arc<dyn BillingProviderAdapter> = match config::STRIPE_SECRET_KEY.as_deref() {
        Some(secret_key) => Arc::new(StripeAdapter::new(
            config::STRIPE_API_BASE.as_str(),
            secret_key,
            lookup_timeout,
        )?),
        None => {
            tracing::warn!("STRIPE_SECRET_KEY not set; checkout and invoice lookups will fail");
            Arc::new(UnconfiguredAdapter)
        }
    };
    if config::STRIPE_WEBHOOK_SECRET.is_empty() {
        tracing::warn!("STRIPE_WEBHOOK_SECRET not set; every webhook delivery will be rejected");
    }

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        catalog.clone(),
        provider.clone(),
        ReconcilerConfig {
            webhook_secret: config::STRIPE_WEBHOOK_SECRET.clone(),
            signature_tolerance_secs: *config::STRIPE_WEBHOOK_TOLERANCE_SECS,
            lookup_timeout,
        },
    ));
    let gate = QuotaGate::new(store.clone(), catalog.clone());
    let generator = generation::select(
        config::OPENAI_API_KEY.as_deref(),
        config::OPENAI_API_BASE.as_str(),
        config::OPENAI_MODEL.as_str(),
    )?;

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = app(AppServices {
        catalog,
        store,
        provider,
        reconciler,
        gate,
        generator,
    })
    .route(
        "/metrics",
        get(move || async move { metrics_handle.render() }),
    )
    .layer(prometheus_layer)
    .layer(Extension(pool.clone()));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
