use std::time::Duration;

use thiserror::Error;

pub mod adapters;
pub mod api;
pub mod catalog;
pub mod events;
pub mod models;
pub mod quota;
pub mod reconciliation;
pub mod signature;
pub mod store;

pub use adapters::{BillingProviderAdapter, StripeAdapter, UnconfiguredAdapter};
pub use api::{checkout as billing_checkout, list_plans as billing_list_plans, quota_status};
pub use catalog::{PlanCatalog, PlanCatalogEntry, PriceIds};
pub use models::{Entitlement, QuotaStatus, SubscriptionRecord, Tier, UNLIMITED_QUOTA};
pub use quota::QuotaGate;
pub use reconciliation::{ReconcileOutcome, Reconciler, ReconcilerConfig};
pub use signature::SignatureError;
pub use store::{EntitlementStore, MemoryEntitlementStore};

// key: billing-errors -> domain failures surfaced by the gate and reconciler
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("entitlement not found")]
    NotFound,
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(#[from] SignatureError),
    #[error("unresolvable billing event: {0}")]
    UnresolvableEvent(String),
    #[error("malformed billing event: {0}")]
    MalformedEvent(String),
    #[error("billing provider lookup timed out after {0:?}")]
    UpstreamTimeout(Duration),
    #[error("billing provider lookup failed: {0:#}")]
    Upstream(anyhow::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
