use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::billing::{BillingError, Tier};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("monthly generation quota exhausted")]
    QuotaExceeded { upgrade: Option<Tier> },
    #[error("bad gateway: {0}")]
    BadGateway(String),
    #[error("gateway timeout: {0}")]
    GatewayTimeout(String),
    #[error("{0}")]
    Message(String),
}

impl From<BillingError> for AppError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::NotFound => AppError::NotFound,
            BillingError::InvalidSignature(reason) => {
                AppError::BadRequest(format!("Webhook Error: {reason}"))
            }
            BillingError::MalformedEvent(reason) => {
                AppError::BadRequest(format!("Webhook Error: {reason}"))
            }
            BillingError::UnresolvableEvent(reason) => AppError::BadRequest(reason),
            err @ BillingError::UpstreamTimeout(_) => AppError::GatewayTimeout(err.to_string()),
            err @ BillingError::Upstream(_) => AppError::BadGateway(err.to_string()),
            BillingError::Internal(err) => AppError::Message(format!("{err:#}")),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            AppError::GatewayTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            AppError::Db(_) | AppError::Http(_) | AppError::Message(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        if status.is_server_error() {
            tracing::error!(?self);
        } else {
            tracing::debug!(?self);
        }

        if let AppError::QuotaExceeded { upgrade } = &self {
            let message = match upgrade {
                Some(tier) => format!(
                    "You have used all generations for this month. Upgrade to {tier} for more."
                ),
                None => "You have used all generations for this month.".to_string(),
            };
            return (status, Json(json!({ "error": message, "upgrade": upgrade }))).into_response();
        }
        (status, self.to_string()).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
