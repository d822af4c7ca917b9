use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::models::{Entitlement, SubscriptionRecord};

/// Mutation run against the locked entitlement row. Returning `false` leaves
/// the row (and any paired subscription write) untouched.
pub type EntitlementUpdate<'a> = dyn FnMut(&mut Entitlement) -> bool + Send + 'a;

/// Subscription-record change committed together with an entitlement update.
#[derive(Debug, Clone)]
pub enum SubscriptionWrite {
    /// Insert or overwrite the record keyed by its provider subscription id.
    Upsert(SubscriptionRecord),
    /// Transition an existing record's status; absent records are left alone.
    SetStatus {
        stripe_subscription_id: String,
        status: String,
        event_at: DateTime<Utc>,
    },
}

impl SubscriptionWrite {
    pub fn stripe_subscription_id(&self) -> &str {
        match self {
            SubscriptionWrite::Upsert(record) => &record.stripe_subscription_id,
            SubscriptionWrite::SetStatus {
                stripe_subscription_id,
                ..
            } => stripe_subscription_id,
        }
    }

    pub fn event_at(&self) -> DateTime<Utc> {
        match self {
            SubscriptionWrite::Upsert(record) => record.last_event_at,
            SubscriptionWrite::SetStatus { event_at, .. } => *event_at,
        }
    }

    /// A write is stale when the stored record already reflects a strictly newer event.
    pub fn is_stale_against(&self, existing: Option<&SubscriptionRecord>) -> bool {
        existing
            .map(|record| record.last_event_at > self.event_at())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied(Entitlement),
    Unchanged(Entitlement),
    /// The paired subscription write lost against a newer event; nothing was written.
    Stale,
    /// No entitlement row for the user; nothing was written.
    Missing,
}

// key: billing-store -> atomic entitlement + subscription persistence
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    async fn insert_entitlement(&self, entitlement: &Entitlement) -> Result<()>;

    async fn entitlement(&self, user_id: &str) -> Result<Option<Entitlement>>;

    async fn subscription(&self, stripe_subscription_id: &str)
        -> Result<Option<SubscriptionRecord>>;

    /// Lock the user's entitlement, run `update` and commit the result together
    /// with `subscription` as one unit.
    async fn apply(
        &self,
        user_id: &str,
        update: &mut EntitlementUpdate<'_>,
        subscription: Option<SubscriptionWrite>,
    ) -> Result<ApplyOutcome>;
}

#[derive(Default)]
struct MemoryState {
    entitlements: HashMap<String, Entitlement>,
    subscriptions: HashMap<String, SubscriptionRecord>,
}

/// In-process store for tests and local runs without Postgres.
#[derive(Default)]
pub struct MemoryEntitlementStore {
    state: Mutex<MemoryState>,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscription_count(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn insert_entitlement(&self, entitlement: &Entitlement) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.entitlements.contains_key(&entitlement.user_id) {
            return Err(anyhow!(
                "entitlement already exists for user {}",
                entitlement.user_id
            ));
        }
        state
            .entitlements
            .insert(entitlement.user_id.clone(), entitlement.clone());
        Ok(())
    }

    async fn entitlement(&self, user_id: &str) -> Result<Option<Entitlement>> {
        Ok(self.state.lock().await.entitlements.get(user_id).cloned())
    }

    async fn subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>> {
        Ok(self
            .state
            .lock()
            .await
            .subscriptions
            .get(stripe_subscription_id)
            .cloned())
    }

    async fn apply(
        &self,
        user_id: &str,
        update: &mut EntitlementUpdate<'_>,
        subscription: Option<SubscriptionWrite>,
    ) -> Result<ApplyOutcome> {
        let mut state = self.state.lock().await;
        let Some(current) = state.entitlements.get(user_id).cloned() else {
            return Ok(ApplyOutcome::Missing);
        };

        if let Some(write) = &subscription {
            let existing = state.subscriptions.get(write.stripe_subscription_id());
            if write.is_stale_against(existing) {
                return Ok(ApplyOutcome::Stale);
            }
        }

        let mut next = current.clone();
        if !update(&mut next) {
            return Ok(ApplyOutcome::Unchanged(current));
        }

        match subscription {
            Some(SubscriptionWrite::Upsert(mut record)) => {
                if let Some(existing) = state.subscriptions.get(&record.stripe_subscription_id) {
                    record.id = existing.id;
                }
                state
                    .subscriptions
                    .insert(record.stripe_subscription_id.clone(), record);
            }
            Some(SubscriptionWrite::SetStatus {
                stripe_subscription_id,
                status,
                event_at,
            }) => {
                if let Some(existing) = state.subscriptions.get_mut(&stripe_subscription_id) {
                    existing.status = status;
                    existing.last_event_at = existing.last_event_at.max(event_at);
                }
            }
            None => {}
        }

        state.entitlements.insert(user_id.to_string(), next.clone());
        Ok(ApplyOutcome::Applied(next))
    }
}
