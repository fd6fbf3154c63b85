//! Message envelopes published to the work queues.
//!
//! These are the JSON bodies the workers deserialize:
//! - `email.message.send`: [`EmailMessage`] or [`RawEmailMessage`]
//! - `email.message.schedule`: [`ScheduledEmail`]
//! - `billing.event.process`: [`BillingEvent`]

use serde::{Deserialize, Serialize};

/// Options accepted by [`crate::Publisher::publish`].
#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Overrides the routing key (defaults to the queue name)
    pub routing_key: Option<String>,
    /// Overrides the generated UUID message id
    pub message_id: Option<String>,
}

/// Templated email job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailMessage {
    pub template: String,
    pub data: serde_json::Value,
}

/// Fully rendered email, sent as-is by the mail backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEmail {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub body: String,
}

/// Raw email job. The `raw` flag lets workers tell it apart from a templated job
/// on the same queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEmailMessage {
    pub raw: bool,
    pub email: RawEmail,
}

impl RawEmailMessage {
    pub fn new(email: RawEmail) -> Self {
        Self { raw: true, email }
    }
}

/// Templated email held back until `scheduled_for` (UTC ISO-8601).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEmail {
    pub template: String,
    pub data: serde_json::Value,
    pub scheduled_for: String,
}

/// Identity of an inbound payment-provider webhook event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebhookEvent {
    pub id: String,
    pub event_type: String,
}

impl WebhookEvent {
    pub fn new(id: impl Into<String>, event_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
        }
    }
}

/// Billing job. `payload` is the provider's raw JSON body, kept verbatim so the
/// worker can re-verify it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillingEvent {
    pub event_id: String,
    pub event_type: String,
    pub payload: String,
    pub received_at: String,
}
