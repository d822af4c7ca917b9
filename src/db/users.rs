use sqlx::{Executor, Postgres, Row};

use crate::billing::Tier;

#[derive(Debug, Clone)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    /// `None` only for accounts created before entitlements existed.
    pub tier: Option<Tier>,
}

// key: users-db -> account rows
pub async fn insert_user<'c, E>(
    executor: E,
    id: &str,
    email: &str,
    name: Option<&str>,
    password_hash: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query("INSERT INTO users (id, email, name, password_hash) VALUES ($1, $2, $3, $4)")
        .bind(id)
        .bind(email)
        .bind(name)
        .bind(password_hash)
        .execute(executor)
        .await?;
    Ok(())
}

pub async fn find_profile<'c, E>(executor: E, user_id: &str) -> Result<Option<UserProfile>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        SELECT u.id, u.email, u.name, e.tier
        FROM users u
        LEFT JOIN entitlements e ON e.user_id = u.id
        WHERE u.id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let tier: Option<String> = row.try_get("tier")?;
    Ok(Some(UserProfile {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        name: row.try_get("name")?,
        tier: tier.and_then(|value| value.parse().ok()),
    }))
}
