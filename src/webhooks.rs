use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::billing::Reconciler;
use crate::error::AppResult;

pub const SIGNATURE_HEADER: &str = "stripe-signature";

// key: webhooks-billing -> provider entrypoint
/// The raw body is passed through untouched; signature verification needs the exact bytes.
pub async fn stripe_webhook(
    Extension(reconciler): Extension<Arc<Reconciler>>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());
    reconciler.handle_billing_event(&body, signature).await?;
    Ok(Json(json!({ "received": true })))
}
