use std::collections::HashMap;

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::Value;

// key: billing-events -> provider webhook envelope
#[derive(Debug, Clone, Deserialize)]
pub struct BillingEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    /// Unix seconds at which the provider created the event.
    #[serde(default)]
    pub created: i64,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaymentSucceeded,
    InvoicePaymentFailed,
    Other,
}

impl BillingEvent {
    pub fn kind(&self) -> EventKind {
        let name = self
            .event_type
            .strip_prefix("customer.")
            .unwrap_or(&self.event_type);
        match name {
            "subscription.created" => EventKind::SubscriptionCreated,
            "subscription.updated" => EventKind::SubscriptionUpdated,
            "subscription.deleted" => EventKind::SubscriptionDeleted,
            "invoice.payment_succeeded" => EventKind::InvoicePaymentSucceeded,
            "invoice.payment_failed" => EventKind::InvoicePaymentFailed,
            _ => EventKind::Other,
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        unix_to_datetime(self.created).unwrap_or_else(Utc::now)
    }

    pub fn subscription(&self) -> serde_json::Result<SubscriptionObject> {
        serde_json::from_value(self.data.object.clone())
    }

    pub fn invoice(&self) -> serde_json::Result<InvoiceObject> {
        serde_json::from_value(self.data.object.clone())
    }
}

/// Subscription object as embedded in events or returned by the provider API.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionObject {
    pub id: String,
    #[serde(default)]
    pub customer: Option<CustomerRef>,
    pub status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: SubscriptionItems,
    pub current_period_start: i64,
    pub current_period_end: i64,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

/// The provider sends either a bare id or an expanded customer object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum CustomerRef {
    Id(String),
    Object { id: String },
}

impl CustomerRef {
    pub fn id(&self) -> &str {
        match self {
            CustomerRef::Id(id) => id,
            CustomerRef::Object { id } => id,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Price,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
}

impl SubscriptionObject {
    pub fn user_id(&self) -> Option<&str> {
        self.metadata
            .get("userId")
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(CustomerRef::id)
    }

    pub fn period_start(&self) -> DateTime<Utc> {
        unix_to_datetime(self.current_period_start).unwrap_or_else(Utc::now)
    }

    pub fn period_end(&self) -> DateTime<Utc> {
        unix_to_datetime(self.current_period_end).unwrap_or_else(Utc::now)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvoiceObject {
    pub id: String,
    #[serde(default)]
    pub subscription: Option<SubscriptionRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SubscriptionRef {
    Id(String),
    Object { id: String },
}

impl InvoiceObject {
    pub fn subscription_id(&self) -> Option<&str> {
        let id = match self.subscription.as_ref()? {
            SubscriptionRef::Id(id) => id.as_str(),
            SubscriptionRef::Object { id } => id.as_str(),
        };
        Some(id).filter(|id| !id.is_empty())
    }
}

fn unix_to_datetime(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}
