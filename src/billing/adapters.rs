use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::events::SubscriptionObject;

#[derive(Debug, Clone)]
pub struct CheckoutRequest<'a> {
    pub customer_id: &'a str,
    pub price_id: &'a str,
    pub user_id: &'a str,
    pub success_url: &'a str,
    pub cancel_url: &'a str,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
}

// key: billing-adapter -> provider integration
#[async_trait]
pub trait BillingProviderAdapter: Send + Sync {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<SubscriptionObject>;

    async fn create_customer(&self, email: &str, name: Option<&str>, user_id: &str)
        -> Result<String>;

    async fn create_checkout_session(&self, request: CheckoutRequest<'_>)
        -> Result<CheckoutSession>;
}

// key: billing-adapter-stripe -> REST client, form-encoded requests
pub struct StripeAdapter {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
}

#[derive(Debug, Deserialize)]
struct CustomerResponse {
    id: String,
}

impl StripeAdapter {
    pub fn new(
        base_url: impl Into<String>,
        secret_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build billing provider client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            secret_key: secret_key.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn send<T: for<'de> Deserialize<'de>>(
        &self,
        request: reqwest::RequestBuilder,
        action: &str,
    ) -> Result<T> {
        let response = request
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .with_context(|| format!("failed to contact billing provider to {action}"))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "billing provider rejected request to {action}: {status} {body}"
            ));
        }
        response
            .json()
            .await
            .with_context(|| format!("failed to decode billing provider response to {action}"))
    }
}

#[async_trait]
impl BillingProviderAdapter for StripeAdapter {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<SubscriptionObject> {
        let request = self
            .client
            .get(self.endpoint(&format!("v1/subscriptions/{subscription_id}")));
        self.send(request, "retrieve subscription").await
    }

    async fn create_customer(
        &self,
        email: &str,
        name: Option<&str>,
        user_id: &str,
    ) -> Result<String> {
        let mut form = vec![
            ("email", email.to_string()),
            ("metadata[source]", "dreambook_app".to_string()),
            ("metadata[userId]", user_id.to_string()),
        ];
        if let Some(name) = name {
            form.push(("name", name.to_string()));
        }
        let request = self.client.post(self.endpoint("v1/customers")).form(&form);
        let customer: CustomerResponse = self.send(request, "create customer").await?;
        Ok(customer.id)
    }

    async fn create_checkout_session(
        &self,
        request: CheckoutRequest<'_>,
    ) -> Result<CheckoutSession> {
        // userId goes on the subscription too, webhook reconciliation keys on it
        let form = [
            ("customer", request.customer_id),
            ("mode", "subscription"),
            ("billing_address_collection", "auto"),
            ("line_items[0][price]", request.price_id),
            ("line_items[0][quantity]", "1"),
            ("success_url", request.success_url),
            ("cancel_url", request.cancel_url),
            ("metadata[userId]", request.user_id),
            ("subscription_data[metadata][userId]", request.user_id),
        ];
        let http = self
            .client
            .post(self.endpoint("v1/checkout/sessions"))
            .form(&form);
        self.send(http, "create checkout session").await
    }
}

/// Adapter used when no provider secret is configured; every call fails.
pub struct UnconfiguredAdapter;

#[async_trait]
impl BillingProviderAdapter for UnconfiguredAdapter {
    async fn retrieve_subscription(&self, subscription_id: &str) -> Result<SubscriptionObject> {
        Err(anyhow!(
            "billing provider not configured; cannot retrieve {subscription_id}"
        ))
    }

    async fn create_customer(
        &self,
        _email: &str,
        _name: Option<&str>,
        _user_id: &str,
    ) -> Result<String> {
        Err(anyhow!("billing provider not configured"))
    }

    async fn create_checkout_session(
        &self,
        _request: CheckoutRequest<'_>,
    ) -> Result<CheckoutSession> {
        Err(anyhow!("billing provider not configured"))
    }
}
