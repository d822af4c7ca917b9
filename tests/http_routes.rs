use std::sync::atomic::Ordering;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use dreambook_billing::billing::signature::sign_payload;
use dreambook_billing::billing::{EntitlementStore, Tier, UNLIMITED_QUOTA};
use serde_json::{json, Value};
use tower::ServiceExt;

mod common;

use common::{bearer, entitlement, test_app, WEBHOOK_SECRET};

async fn json_body(response: axum::response::Response) -> Value {
    let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
    serde_json::from_slice(&body).unwrap()
}

fn analyze_request(user_id: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/dreams/analyze")
        .header("content-type", "application/json")
        .header("authorization", bearer(user_id))
        .body(Body::from(
            json!({"title": "Sky", "content": "Flying above the clouds"}).to_string(),
        ))
        .unwrap()
}

fn subscription_event(user_id: &str, price: &str, status: &str) -> Vec<u8> {
    let period_end = (Utc::now() + chrono::Duration::days(30)).timestamp();
    serde_json::to_vec(&json!({
        "id": "evt_http_1",
        "type": "customer.subscription.updated",
        "created": Utc::now().timestamp(),
        "data": {"object": {
            "id": "sub_http",
            "customer": "cus_1",
            "status": status,
            "metadata": {"userId": user_id},
            "items": {"data": [{"price": {"id": price}}]},
            "current_period_start": period_end - 30 * 86_400,
            "current_period_end": period_end
        }}
    }))
    .unwrap()
}

fn webhook_request(body: Vec<u8>, signature: Option<String>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri("/api/webhooks/stripe")
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header("stripe-signature", signature);
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn plans_are_public() {
    let app = test_app();
    let response = app
        .router
        .oneshot(Request::builder().uri("/api/plans").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let plans = json_body(response).await;
    let tiers: Vec<&str> = plans
        .as_array()
        .unwrap()
        .iter()
        .map(|plan| plan["tier"].as_str().unwrap())
        .collect();
    assert_eq!(tiers, vec!["FREE", "BASIC", "PRO", "EXPERT"]);
    assert_eq!(plans[3]["quota"], UNLIMITED_QUOTA);
}

#[tokio::test]
async fn quota_requires_auth_and_reports_usage() {
    let app = test_app();
    app.store
        .insert_entitlement(&entitlement("u1", Tier::Basic, 100, 25))
        .await
        .unwrap();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/api/user/quota").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = app
        .router
        .oneshot(
            Request::builder()
                .uri("/api/user/quota")
                .header("authorization", bearer("u1"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let quota = json_body(response).await;
    assert_eq!(quota["tier"], "BASIC");
    assert_eq!(quota["used"], 25);
    assert_eq!(quota["remaining"], 75);
    assert_eq!(quota["percentage"], 25.0);
    assert_eq!(quota["recommendedUpgrade"], "PRO");
}

#[tokio::test]
async fn analyze_consumes_quota_then_denies_without_generating() {
    let app = test_app();
    app.store
        .insert_entitlement(&entitlement("u1", Tier::Free, 10, 9))
        .await
        .unwrap();

    let response = app.router.clone().oneshot(analyze_request("u1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["quota"]["remaining"], 0);
    assert_eq!(app.generator.calls.load(Ordering::SeqCst), 1);

    let response = app.router.clone().oneshot(analyze_request("u1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body = json_body(response).await;
    assert_eq!(body["upgrade"], "BASIC");
    assert_eq!(app.generator.calls.load(Ordering::SeqCst), 1);

    let stored = app.store.entitlement("u1").await.unwrap().unwrap();
    assert_eq!(stored.used_quota, 10);
}

#[tokio::test]
async fn analyze_for_unknown_user_is_not_found() {
    let app = test_app();
    let response = app.router.oneshot(analyze_request("ghost")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(app.generator.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn signed_webhook_upgrades_entitlement() {
    let app = test_app();
    app.store
        .insert_entitlement(&entitlement("u1", Tier::Free, 10, 6))
        .await
        .unwrap();
    let body = subscription_event("u1", "price_pro", "active");
    let signature = sign_payload(WEBHOOK_SECRET, &body, Utc::now().timestamp());

    let response = app
        .router
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({"received": true}));

    let stored = app.store.entitlement("u1").await.unwrap().unwrap();
    assert_eq!(stored.tier, Tier::Pro);
    assert_eq!(stored.monthly_quota, 500);
    assert_eq!(stored.used_quota, 0);
    assert_eq!(app.store.subscription_count().await, 1);
}

#[tokio::test]
async fn forged_or_unsigned_webhook_is_rejected() {
    let app = test_app();
    app.store
        .insert_entitlement(&entitlement("u1", Tier::Free, 10, 6))
        .await
        .unwrap();
    let before = app.store.entitlement("u1").await.unwrap().unwrap();
    let body = subscription_event("u1", "price_expert", "active");

    let forged = sign_payload("whsec_attacker", &body, Utc::now().timestamp());
    let response = app
        .router
        .clone()
        .oneshot(webhook_request(body.clone(), Some(forged)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = app
        .router
        .oneshot(webhook_request(body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    assert_eq!(app.store.entitlement("u1").await.unwrap().unwrap(), before);
    assert_eq!(app.store.subscription_count().await, 0);
}

#[tokio::test]
async fn webhook_without_user_metadata_is_acknowledged() {
    let app = test_app();
    let body = subscription_event(" ", "price_pro", "active");
    let signature = sign_payload(WEBHOOK_SECRET, &body, Utc::now().timestamp());

    let response = app
        .router
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(app.store.subscription_count().await, 0);
}

#[tokio::test]
async fn invoice_lookup_failure_is_bad_gateway() {
    let app = test_app();
    app.store
        .insert_entitlement(&entitlement("u1", Tier::Pro, 500, 100))
        .await
        .unwrap();
    let body = serde_json::to_vec(&json!({
        "id": "evt_invoice",
        "type": "invoice.payment_succeeded",
        "created": Utc::now().timestamp(),
        "data": {"object": {"id": "in_1", "subscription": "sub_http"}}
    }))
    .unwrap();
    let signature = sign_payload(WEBHOOK_SECRET, &body, Utc::now().timestamp());

    let response = app
        .router
        .oneshot(webhook_request(body, Some(signature)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let stored = app.store.entitlement("u1").await.unwrap().unwrap();
    assert_eq!(stored.used_quota, 100);
}
