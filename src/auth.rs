use std::sync::Arc;

use crate::billing::{quota::starting_entitlement, PlanCatalog, Tier};
use crate::db;
use crate::error::{AppError, AppResult};
use crate::extractor::AuthUser;
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use tracing::{error, info};
use uuid::Uuid;

#[derive(Deserialize)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
struct Claims {
    sub: String,
    exp: usize,
}

#[derive(Serialize)]
pub struct RegisteredUser {
    pub id: String,
    pub email: String,
    pub tier: Tier,
}

#[derive(Serialize)]
pub struct UserInfo {
    pub id: String,
    pub email: String,
    pub name: Option<String>,
    pub tier: Tier,
}

/// Creates the account and its FREE entitlement in one transaction.
pub async fn register_user(
    Extension(pool): Extension<PgPool>,
    Extension(catalog): Extension<Arc<PlanCatalog>>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<RegisteredUser>)> {
    if payload.password.len() < 8 {
        return Err(AppError::BadRequest("Password too short".into()));
    }
    let email = payload.email.trim().to_ascii_lowercase();
    if email.is_empty() {
        return Err(AppError::BadRequest("Email required".into()));
    }
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(payload.password.as_bytes(), &salt)
        .map_err(|e| AppError::Message(format!("Hashing failed: {}", e)))?;

    let user_id = Uuid::new_v4().to_string();
    let entitlement = starting_entitlement(&user_id, &catalog, Utc::now());

    let mut tx = pool.begin().await?;
    let inserted = db::users::insert_user(
        &mut tx,
        &user_id,
        &email,
        payload.name.as_deref(),
        &hash.to_string(),
    )
    .await;
    if let Err(e) = inserted {
        if let sqlx::Error::Database(db_err) = &e {
            if db_err.constraint() == Some("users_email_key") {
                return Err(AppError::BadRequest("Email already registered".into()));
            }
        }
        return Err(AppError::Db(e));
    }
    db::billing::insert_entitlement(&mut tx, &entitlement).await?;
    tx.commit().await?;

    info!(%user_id, "registered user on FREE tier");
    Ok((
        StatusCode::CREATED,
        Json(RegisteredUser {
            id: user_id,
            email,
            tier: Tier::Free,
        }),
    ))
}

pub async fn login_user(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<(HeaderMap, &'static str)> {
    let email = payload.email.trim().to_ascii_lowercase();
    let rec = sqlx::query("SELECT id, password_hash FROM users WHERE email = $1")
        .bind(&email)
        .fetch_optional(&pool)
        .await
        .map_err(|e| {
            error!(?e, "DB error while fetching user");
            AppError::Db(e)
        })?;
    let rec = rec.ok_or(AppError::Unauthorized)?;
    let id: String = rec.get("id");
    let pass_hash: String = rec.get("password_hash");
    let parsed = PasswordHash::new(&pass_hash).map_err(|e| {
        error!(?e, "Hash parse error");
        AppError::Message(format!("Hash error: {}", e))
    })?;
    if Argon2::default()
        .verify_password(payload.password.as_bytes(), &parsed)
        .is_err()
    {
        return Err(AppError::Unauthorized);
    }
    let exp = Utc::now()
        .checked_add_signed(Duration::hours(24))
        .ok_or_else(|| AppError::Message("Token expiry overflow".into()))?
        .timestamp() as usize;
    let claims = Claims { sub: id, exp };
    let secret = crate::config::JWT_SECRET.as_str();
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| {
        error!(?e, "Token encoding error");
        AppError::Message("Token error".into())
    })?;
    let mut headers = HeaderMap::new();
    let cookie = format!("auth_token={token}; HttpOnly; Secure; SameSite=Strict; Path=/")
        .parse()
        .map_err(|_| AppError::Message("Token error".into()))?;
    headers.insert(axum::http::header::SET_COOKIE, cookie);
    Ok((headers, "Login successful"))
}

pub async fn logout_user() -> (HeaderMap, &'static str) {
    let mut headers = HeaderMap::new();
    headers.insert(
        axum::http::header::SET_COOKIE,
        axum::http::HeaderValue::from_static("auth_token=deleted; HttpOnly; Path=/; Max-Age=0"),
    );
    (headers, "Logged out")
}

pub async fn current_user(
    Extension(pool): Extension<PgPool>,
    AuthUser { user_id }: AuthUser,
) -> AppResult<Json<UserInfo>> {
    let profile = db::users::find_profile(&pool, &user_id)
        .await
        .map_err(|e| {
            error!(?e, "DB error while fetching user profile");
            AppError::Db(e)
        })?
        .ok_or(AppError::NotFound)?;
    Ok(Json(UserInfo {
        id: profile.id,
        email: profile.email,
        name: profile.name,
        tier: profile.tier.unwrap_or(Tier::Free),
    }))
}
