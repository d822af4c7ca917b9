use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{Executor, PgPool, Postgres, Row};

use crate::billing::models::{Entitlement, SubscriptionRecord};
use crate::billing::store::{ApplyOutcome, EntitlementStore, EntitlementUpdate, SubscriptionWrite};

const ENTITLEMENT_COLUMNS: &str = r#"
    user_id,
    tier,
    monthly_quota,
    used_quota,
    quota_reset_date,
    subscription_status,
    stripe_customer_id,
    stripe_subscription_id,
    subscription_end_date
"#;

const SUBSCRIPTION_COLUMNS: &str = r#"
    id,
    user_id,
    tier,
    status,
    stripe_subscription_id,
    stripe_price_id,
    stripe_customer_id,
    current_period_start,
    current_period_end,
    cancel_at_period_end,
    last_event_at
"#;

fn entitlement_from_row(row: &PgRow) -> Result<Entitlement> {
    let tier: String = row.try_get("tier")?;
    Ok(Entitlement {
        user_id: row.try_get("user_id")?,
        tier: tier.parse()?,
        monthly_quota: row.try_get("monthly_quota")?,
        used_quota: row.try_get("used_quota")?,
        quota_reset_date: row.try_get("quota_reset_date")?,
        subscription_status: row.try_get("subscription_status")?,
        stripe_customer_id: row.try_get("stripe_customer_id")?,
        stripe_subscription_id: row.try_get("stripe_subscription_id")?,
        subscription_end_date: row.try_get("subscription_end_date")?,
    })
}

fn subscription_from_row(row: &PgRow) -> Result<SubscriptionRecord> {
    let tier: String = row.try_get("tier")?;
    Ok(SubscriptionRecord {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        tier: tier.parse()?,
        status: row.try_get("status")?,
        stripe_subscription_id: row.try_get("stripe_subscription_id")?,
        stripe_price_id: row.try_get("stripe_price_id")?,
        stripe_customer_id: row.try_get("stripe_customer_id")?,
        current_period_start: row.try_get("current_period_start")?,
        current_period_end: row.try_get("current_period_end")?,
        cancel_at_period_end: row.try_get("cancel_at_period_end")?,
        last_event_at: row.try_get("last_event_at")?,
    })
}

// key: billing-db -> entitlement rows
pub async fn insert_entitlement<'c, E>(executor: E, entitlement: &Entitlement) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO entitlements (
            user_id,
            tier,
            monthly_quota,
            used_quota,
            quota_reset_date,
            subscription_status,
            stripe_customer_id,
            stripe_subscription_id,
            subscription_end_date
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(&entitlement.user_id)
    .bind(entitlement.tier.as_str())
    .bind(entitlement.monthly_quota)
    .bind(entitlement.used_quota)
    .bind(entitlement.quota_reset_date)
    .bind(&entitlement.subscription_status)
    .bind(&entitlement.stripe_customer_id)
    .bind(&entitlement.stripe_subscription_id)
    .bind(entitlement.subscription_end_date)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn overwrite_entitlement<'c, E>(executor: E, entitlement: &Entitlement) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        UPDATE entitlements
        SET
            tier = $2,
            monthly_quota = $3,
            used_quota = $4,
            quota_reset_date = $5,
            subscription_status = $6,
            stripe_customer_id = $7,
            stripe_subscription_id = $8,
            subscription_end_date = $9,
            updated_at = NOW()
        WHERE user_id = $1
        "#,
    )
    .bind(&entitlement.user_id)
    .bind(entitlement.tier.as_str())
    .bind(entitlement.monthly_quota)
    .bind(entitlement.used_quota)
    .bind(entitlement.quota_reset_date)
    .bind(&entitlement.subscription_status)
    .bind(&entitlement.stripe_customer_id)
    .bind(&entitlement.stripe_subscription_id)
    .bind(entitlement.subscription_end_date)
    .execute(executor)
    .await?;
    Ok(())
}

// key: billing-db -> subscription rows, natural key stripe_subscription_id
pub async fn upsert_subscription<'c, E>(executor: E, record: &SubscriptionRecord) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO subscriptions (
            id,
            user_id,
            tier,
            status,
            stripe_subscription_id,
            stripe_price_id,
            stripe_customer_id,
            current_period_start,
            current_period_end,
            cancel_at_period_end,
            last_event_at
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (stripe_subscription_id)
        DO UPDATE SET
            tier = EXCLUDED.tier,
            status = EXCLUDED.status,
            stripe_price_id = EXCLUDED.stripe_price_id,
            stripe_customer_id = EXCLUDED.stripe_customer_id,
            current_period_start = EXCLUDED.current_period_start,
            current_period_end = EXCLUDED.current_period_end,
            cancel_at_period_end = EXCLUDED.cancel_at_period_end,
            last_event_at = GREATEST(subscriptions.last_event_at, EXCLUDED.last_event_at),
            updated_at = NOW()
        "#,
    )
    .bind(record.id)
    .bind(&record.user_id)
    .bind(record.tier.as_str())
    .bind(&record.status)
    .bind(&record.stripe_subscription_id)
    .bind(&record.stripe_price_id)
    .bind(&record.stripe_customer_id)
    .bind(record.current_period_start)
    .bind(record.current_period_end)
    .bind(record.cancel_at_period_end)
    .bind(record.last_event_at)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn set_subscription_status<'c, E>(
    executor: E,
    stripe_subscription_id: &str,
    status: &str,
    event_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        UPDATE subscriptions
        SET
            status = $2,
            last_event_at = GREATEST(last_event_at, $3),
            updated_at = NOW()
        WHERE stripe_subscription_id = $1
        "#,
    )
    .bind(stripe_subscription_id)
    .bind(status)
    .bind(event_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

// key: billing-db-store -> row-locked read-modify-write
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn insert_entitlement(&self, entitlement: &Entitlement) -> Result<()> {
        insert_entitlement(&self.pool, entitlement).await?;
        Ok(())
    }

    async fn entitlement(&self, user_id: &str) -> Result<Option<Entitlement>> {
        let row = sqlx::query(&format!(
            "SELECT {ENTITLEMENT_COLUMNS} FROM entitlements WHERE user_id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(entitlement_from_row).transpose()
    }

    async fn subscription(
        &self,
        stripe_subscription_id: &str,
    ) -> Result<Option<SubscriptionRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stripe_subscription_id = $1"
        ))
        .bind(stripe_subscription_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(subscription_from_row).transpose()
    }

    async fn apply(
        &self,
        user_id: &str,
        update: &mut EntitlementUpdate<'_>,
        subscription: Option<SubscriptionWrite>,
    ) -> Result<ApplyOutcome> {
        // Dropping `tx` on any early return rolls the whole unit back.
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {ENTITLEMENT_COLUMNS} FROM entitlements WHERE user_id = $1 FOR UPDATE"
        ))
        .bind(user_id)
        .fetch_optional(&mut tx)
        .await?;
        let Some(row) = row else {
            return Ok(ApplyOutcome::Missing);
        };
        let current = entitlement_from_row(&row)?;

        if let Some(write) = &subscription {
            let existing = sqlx::query(&format!(
                "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE stripe_subscription_id = $1 FOR UPDATE"
            ))
            .bind(write.stripe_subscription_id())
            .fetch_optional(&mut tx)
            .await?;
            let existing = existing.as_ref().map(subscription_from_row).transpose()?;
            if write.is_stale_against(existing.as_ref()) {
                return Ok(ApplyOutcome::Stale);
            }
        }

        let mut next = current.clone();
        if !update(&mut next) {
            return Ok(ApplyOutcome::Unchanged(current));
        }

        match &subscription {
            Some(SubscriptionWrite::Upsert(record)) => {
                upsert_subscription(&mut tx, record).await?;
            }
            Some(SubscriptionWrite::SetStatus {
                stripe_subscription_id,
                status,
                event_at,
            }) => {
                set_subscription_status(&mut tx, stripe_subscription_id, status, *event_at)
                    .await?;
            }
            None => {}
        }
        overwrite_entitlement(&mut tx, &next).await?;

        tx.commit()
            .await
            .with_context(|| format!("failed to commit entitlement update for {user_id}"))?;
        Ok(ApplyOutcome::Applied(next))
    }
}
