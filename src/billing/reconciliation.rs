use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::adapters::BillingProviderAdapter;
use super::catalog::PlanCatalog;
use super::events::{BillingEvent, EventKind, SubscriptionObject};
use super::models::{SubscriptionRecord, Tier, UNLIMITED_QUOTA};
use super::quota::billing_period;
use super::signature::{verify_signature, SignatureError};
use super::store::{ApplyOutcome, EntitlementStore, SubscriptionWrite};
use super::BillingError;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub webhook_secret: String,
    pub signature_tolerance_secs: i64,
    pub lookup_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied { user_id: String },
    /// A newer event for the same subscription was already applied.
    Stale { user_id: String },
    /// Acknowledged without mutation; the event cannot be mapped to a user.
    Unresolvable { reason: String },
    /// Event type or state with nothing to reconcile.
    Ignored,
}

// key: billing-reconciliation -> webhook events into entitlement state
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn EntitlementStore>,
    catalog: Arc<PlanCatalog>,
    provider: Arc<dyn BillingProviderAdapter>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn EntitlementStore>,
        catalog: Arc<PlanCatalog>,
        provider: Arc<dyn BillingProviderAdapter>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            catalog,
            provider,
            config,
        }
    }

    /// Verify, parse and apply one webhook delivery.
    pub async fn handle_billing_event(
        &self,
        raw_body: &[u8],
        signature: Option<&str>,
    ) -> Result<ReconcileOutcome, BillingError> {
        let header = signature.ok_or(SignatureError::Missing);
        let verified = header.and_then(|header| {
            verify_signature(
                &self.config.webhook_secret,
                raw_body,
                header,
                self.config.signature_tolerance_secs,
                Utc::now().timestamp(),
            )
        });
        if let Err(err) = verified {
            warn!(reason = %err, "rejected billing webhook with invalid signature");
            return Err(BillingError::InvalidSignature(err));
        }

        let event: BillingEvent = serde_json::from_slice(raw_body)
            .map_err(|err| BillingError::MalformedEvent(err.to_string()))?;
        info!(event_id = %event.id, event_type = %event.event_type, "processing billing event");

        match self.apply_event(&event).await {
            Err(BillingError::UnresolvableEvent(reason)) => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    %reason,
                    "skipping billing event that cannot be reconciled"
                );
                Ok(ReconcileOutcome::Unresolvable { reason })
            }
            other => other,
        }
    }

    /// Apply an already authenticated event.
    pub async fn apply_event(&self, event: &BillingEvent) -> Result<ReconcileOutcome, BillingError> {
        match event.kind() {
            EventKind::SubscriptionCreated | EventKind::SubscriptionUpdated => {
                let subscription = parse(event.subscription())?;
                self.subscription_changed(event, &subscription).await
            }
            EventKind::SubscriptionDeleted => {
                let subscription = parse(event.subscription())?;
                self.subscription_deleted(event, &subscription).await
            }
            EventKind::InvoicePaymentSucceeded => {
                let invoice = parse(event.invoice())?;
                let Some(subscription_id) = invoice.subscription_id() else {
                    return Ok(ReconcileOutcome::Ignored);
                };
                let subscription = self.fetch_subscription(subscription_id).await?;
                self.payment_succeeded(event, &subscription).await
            }
            EventKind::InvoicePaymentFailed => {
                let invoice = parse(event.invoice())?;
                let Some(subscription_id) = invoice.subscription_id() else {
                    return Ok(ReconcileOutcome::Ignored);
                };
                let subscription = self.fetch_subscription(subscription_id).await?;
                self.payment_failed(event, &subscription).await
            }
            EventKind::Other => {
                info!(event_id = %event.id, event_type = %event.event_type, "unhandled billing event type");
                Ok(ReconcileOutcome::Ignored)
            }
        }
    }

    async fn subscription_changed(
        &self,
        event: &BillingEvent,
        subscription: &SubscriptionObject,
    ) -> Result<ReconcileOutcome, BillingError> {
        let user_id = require_user(subscription)?;
        let tier = self.tier_for(subscription);
        let ceiling = self.catalog.quota_for(tier);
        let period_end = subscription.period_end();
        let status = subscription.status.clone();
        let customer_id = subscription.customer_id().map(str::to_string);

        let record = subscription_record(event, subscription, &user_id, tier, &status);

        let outcome = self
            .store
            .apply(
                &user_id,
                &mut |entitlement| {
                    entitlement.tier = tier;
                    entitlement.subscription_status = status.clone();
                    entitlement.stripe_subscription_id = Some(subscription.id.clone());
                    if let Some(customer_id) = &customer_id {
                        entitlement.stripe_customer_id = Some(customer_id.clone());
                    }
                    entitlement.monthly_quota = ceiling;
                    entitlement.quota_reset_date = period_end;
                    entitlement.subscription_end_date = Some(period_end);
                    if status == "active" {
                        // new cycle beginning
                        entitlement.used_quota = 0;
                    } else if ceiling != UNLIMITED_QUOTA {
                        entitlement.used_quota = entitlement.used_quota.min(ceiling);
                    }
                    true
                },
                Some(SubscriptionWrite::Upsert(record)),
            )
            .await?;

        let outcome = finish(outcome, user_id)?;
        if let ReconcileOutcome::Applied { user_id } = &outcome {
            info!(%user_id, %tier, status = %subscription.status, "updated subscription entitlement");
        }
        Ok(outcome)
    }

    async fn subscription_deleted(
        &self,
        event: &BillingEvent,
        subscription: &SubscriptionObject,
    ) -> Result<ReconcileOutcome, BillingError> {
        let user_id = require_user(subscription)?;
        let free_ceiling = self.catalog.quota_for(Tier::Free);
        let reset_at = Utc::now() + billing_period();
        let tombstone = subscription_record(
            event,
            subscription,
            &user_id,
            self.tier_for(subscription),
            "canceled",
        );

        let outcome = self
            .store
            .apply(
                &user_id,
                &mut |entitlement| {
                    entitlement.tier = Tier::Free;
                    entitlement.subscription_status = "canceled".to_string();
                    entitlement.stripe_subscription_id = None;
                    entitlement.subscription_end_date = None;
                    entitlement.monthly_quota = free_ceiling;
                    entitlement.used_quota = 0;
                    entitlement.quota_reset_date = reset_at;
                    true
                },
                // upsert, so a deletion seen before its creation still blocks older events
                Some(SubscriptionWrite::Upsert(tombstone)),
            )
            .await?;

        let outcome = finish(outcome, user_id)?;
        if let ReconcileOutcome::Applied { user_id } = &outcome {
            info!(%user_id, subscription = %subscription.id, "canceled subscription, downgraded to FREE");
        }
        Ok(outcome)
    }

    async fn payment_succeeded(
        &self,
        event: &BillingEvent,
        subscription: &SubscriptionObject,
    ) -> Result<ReconcileOutcome, BillingError> {
        let user_id = require_user(subscription)?;
        if subscription.status == "canceled" {
            info!(%user_id, subscription = %subscription.id, "payment for canceled subscription, quota left alone");
            return Ok(ReconcileOutcome::Ignored);
        }
        let catalog = self.catalog.clone();
        let period_end = subscription.period_end();

        let outcome = self
            .store
            .apply(
                &user_id,
                &mut |entitlement| {
                    entitlement.monthly_quota = catalog.quota_for(entitlement.tier);
                    entitlement.used_quota = 0;
                    entitlement.quota_reset_date = period_end;
                    true
                },
                Some(SubscriptionWrite::SetStatus {
                    stripe_subscription_id: subscription.id.clone(),
                    status: subscription.status.clone(),
                    event_at: event.created_at(),
                }),
            )
            .await?;

        let outcome = finish(outcome, user_id)?;
        if let ReconcileOutcome::Applied { user_id } = &outcome {
            info!(%user_id, subscription = %subscription.id, "payment succeeded, quota cycle renewed");
        }
        Ok(outcome)
    }

    async fn payment_failed(
        &self,
        event: &BillingEvent,
        subscription: &SubscriptionObject,
    ) -> Result<ReconcileOutcome, BillingError> {
        let user_id = require_user(subscription)?;
        warn!(%user_id, subscription = %subscription.id, status = %subscription.status, "payment failed");
        if subscription.status != "past_due" {
            return Ok(ReconcileOutcome::Ignored);
        }

        let outcome = self
            .store
            .apply(
                &user_id,
                &mut |entitlement| {
                    entitlement.subscription_status = "past_due".to_string();
                    true
                },
                Some(SubscriptionWrite::SetStatus {
                    stripe_subscription_id: subscription.id.clone(),
                    status: "past_due".to_string(),
                    event_at: event.created_at(),
                }),
            )
            .await?;
        finish(outcome, user_id)
    }

    fn tier_for(&self, subscription: &SubscriptionObject) -> Tier {
        subscription
            .price_id()
            .and_then(|price| self.catalog.match_by_price_id(price))
            .unwrap_or(Tier::Free)
    }

    async fn fetch_subscription(
        &self,
        subscription_id: &str,
    ) -> Result<SubscriptionObject, BillingError> {
        let timeout = self.config.lookup_timeout;
        match tokio::time::timeout(timeout, self.provider.retrieve_subscription(subscription_id))
            .await
        {
            Ok(Ok(subscription)) => Ok(subscription),
            Ok(Err(err)) => {
                error!(?err, %subscription_id, "billing provider subscription lookup failed");
                Err(BillingError::Upstream(err))
            }
            Err(_) => {
                error!(
                    %subscription_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "billing provider subscription lookup timed out; reconciliation abandoned for this delivery"
                );
                Err(BillingError::UpstreamTimeout(timeout))
            }
        }
    }
}

fn subscription_record(
    event: &BillingEvent,
    subscription: &SubscriptionObject,
    user_id: &str,
    tier: Tier,
    status: &str,
) -> SubscriptionRecord {
    SubscriptionRecord {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        tier,
        status: status.to_string(),
        stripe_subscription_id: subscription.id.clone(),
        stripe_price_id: subscription.price_id().map(str::to_string),
        stripe_customer_id: subscription.customer_id().map(str::to_string),
        current_period_start: subscription.period_start(),
        current_period_end: subscription.period_end(),
        cancel_at_period_end: subscription.cancel_at_period_end,
        last_event_at: event.created_at(),
    }
}

fn parse<T>(result: serde_json::Result<T>) -> Result<T, BillingError> {
    result.map_err(|err| BillingError::MalformedEvent(err.to_string()))
}

fn require_user(subscription: &SubscriptionObject) -> Result<String, BillingError> {
    subscription.user_id().map(str::to_string).ok_or_else(|| {
        BillingError::UnresolvableEvent(format!(
            "subscription {} has no userId metadata",
            subscription.id
        ))
    })
}

fn finish(outcome: ApplyOutcome, user_id: String) -> Result<ReconcileOutcome, BillingError> {
    match outcome {
        ApplyOutcome::Applied(_) | ApplyOutcome::Unchanged(_) => {
            Ok(ReconcileOutcome::Applied { user_id })
        }
        ApplyOutcome::Stale => {
            info!(%user_id, "ignoring stale billing event, a newer one was already applied");
            Ok(ReconcileOutcome::Stale { user_id })
        }
        ApplyOutcome::Missing => {
            warn!(%user_id, "billing event references a user without entitlement");
            Err(BillingError::NotFound)
        }
    }
}
