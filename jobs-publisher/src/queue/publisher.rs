//! RabbitMQ job publisher with broker-outage fallback.
//!
//! Every convenience method goes through [`Publisher::publish`]. When that
//! fails, email sends run their [`Fallback`] against the mail backend; billing
//! events never do, because the webhook caller needs the real error to ask the
//! payment provider for a retry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::fallback::Fallback;
use super::topology::{
    self, FieldValue, BILLING_QUEUE, EMAIL_QUEUE, EMAIL_SCHEDULE_QUEUE, SCHEMA_VERSION,
};
use super::types::{
    BillingEvent, EmailMessage, PublishOptions, RawEmail, RawEmailMessage, ScheduledEmail,
    WebhookEvent,
};
use crate::billing::BillingProcessor;
use crate::broker::{MessageProperties, DEFAULT_EXCHANGE};
use crate::connection::ConnectionManager;
use crate::errors::{DeliveryError, JobsError, Result};
use crate::mail::Mailer;

/// Source of "now" for message timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What the mail backend sends when an email job falls back.
#[derive(Debug, Clone)]
enum EmailJob {
    Template {
        template: String,
        data: serde_json::Value,
    },
    Raw(RawEmail),
}

/// Publishes jobs to the broker, falling back to direct mail delivery.
///
/// Cheap to clone; clones share the connection manager and backends.
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<PublisherInner>,
}

struct PublisherInner {
    connection: Arc<ConnectionManager>,
    mailer: Arc<dyn Mailer>,
    billing: Arc<dyn BillingProcessor>,
    clock: Clock,
}

impl Publisher {
    pub fn new(
        connection: Arc<ConnectionManager>,
        mailer: Arc<dyn Mailer>,
        billing: Arc<dyn BillingProcessor>,
    ) -> Self {
        Self::with_clock(connection, mailer, billing, Arc::new(Utc::now))
    }

    pub fn with_clock(
        connection: Arc<ConnectionManager>,
        mailer: Arc<dyn Mailer>,
        billing: Arc<dyn BillingProcessor>,
        clock: Clock,
    ) -> Self {
        Self {
            inner: Arc::new(PublisherInner {
                connection,
                mailer,
                billing,
                clock,
            }),
        }
    }

    fn jobs_enabled(&self) -> bool {
        self.inner.connection.config().jobs_enabled
    }

    /// Fallback configured for callers without an opinion.
    pub fn default_fallback(&self) -> Fallback {
        self.inner.connection.config().default_fallback
    }

    fn now(&self) -> DateTime<Utc> {
        (self.inner.clock)()
    }

    /// Publish `payload` as JSON to `queue_name` on the default exchange.
    ///
    /// Returns the message id sent with the message. Delivery mode follows
    /// the durability of the queue the routing key names. Does not retry or
    /// buffer; that is left to the caller.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        queue_name: &str,
        payload: &T,
        options: PublishOptions,
    ) -> Result<String> {
        let session = self.inner.connection.session().await?;

        let body = serde_json::to_vec(payload)?;
        let message_id = options
            .message_id
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let routing_key = options.routing_key.as_deref().unwrap_or(queue_name);

        let properties = MessageProperties {
            message_id: message_id.clone(),
            content_type: "application/json",
            persistent: topology::queue(routing_key).map_or(true, |q| q.durable),
            timestamp: self.now().timestamp().max(0) as u64,
            headers: BTreeMap::from([(
                "x-schema-version".to_string(),
                FieldValue::Int(i64::from(SCHEMA_VERSION)),
            )]),
        };

        let channel = session.pool.checkout().await?;
        channel
            .basic_publish(DEFAULT_EXCHANGE, routing_key, &body, &properties)
            .await?;

        info!(
            queue = %queue_name,
            routing_key = %routing_key,
            message_id = %message_id,
            body_length = body.len(),
            "jobs_message_published"
        );

        Ok(message_id)
    }

    /// Queue a templated email. `Ok(false)` means the fallback path was taken.
    pub async fn enqueue_email(
        &self,
        template: &str,
        data: serde_json::Value,
        fallback: Fallback,
    ) -> Result<bool> {
        let message = EmailMessage {
            template: template.to_string(),
            data,
        };

        self.send_email(EMAIL_QUEUE, &message, fallback, || EmailJob::Template {
            template: message.template.clone(),
            data: message.data.clone(),
        })
        .await
    }

    /// [`Self::enqueue_email`] with the configured default fallback.
    pub async fn enqueue_email_default(
        &self,
        template: &str,
        data: serde_json::Value,
    ) -> Result<bool> {
        self.enqueue_email(template, data, self.default_fallback()).await
    }

    /// Queue an already rendered email. Same contract as [`Self::enqueue_email`].
    pub async fn enqueue_email_raw(&self, email: RawEmail, fallback: Fallback) -> Result<bool> {
        let message = RawEmailMessage::new(email);

        self.send_email(EMAIL_QUEUE, &message, fallback, || {
            EmailJob::Raw(message.email.clone())
        })
        .await
    }

    /// Queue a templated email for delivery after `delay`.
    ///
    /// On fallback the email is delivered right away; the schedule only
    /// exists on the broker side.
    pub async fn schedule_email(
        &self,
        template: &str,
        data: serde_json::Value,
        delay: Duration,
        fallback: Fallback,
    ) -> Result<bool> {
        let scheduled_for = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| self.now().checked_add_signed(delay))
            .ok_or_else(|| JobsError::InvalidSchedule(format!("{delay:?} is out of range")))?;

        let message = ScheduledEmail {
            template: template.to_string(),
            data,
            scheduled_for: iso8601(scheduled_for),
        };

        self.send_email(EMAIL_SCHEDULE_QUEUE, &message, fallback, || {
            EmailJob::Template {
                template: message.template.clone(),
                data: message.data.clone(),
            }
        })
        .await
    }

    /// Queue a payment-provider webhook event for the billing worker.
    ///
    /// Publish errors are returned unchanged, with no fallback. With jobs
    /// disabled the event is processed in-process and `Ok(false)` returned.
    pub async fn enqueue_billing_event(&self, event: &WebhookEvent, payload: &str) -> Result<bool> {
        let message = BillingEvent {
            event_id: event.id.clone(),
            event_type: event.event_type.clone(),
            payload: payload.to_string(),
            received_at: iso8601(self.now()),
        };

        if !self.jobs_enabled() {
            info!(
                event_id = %message.event_id,
                event_type = %message.event_type,
                "billing_event_processing_locally"
            );

            self.inner
                .billing
                .process(&message)
                .await
                .map_err(|e| JobsError::Billing {
                    event_id: message.event_id.clone(),
                    reason: format!("{e:#}"),
                })?;

            return Ok(false);
        }

        let message_id = self
            .publish(BILLING_QUEUE, &message, PublishOptions::default())
            .await
            .inspect_err(|e| {
                error!(
                    event_id = %message.event_id,
                    event_type = %message.event_type,
                    error = %e,
                    "billing_event_publish_failed"
                );
            })?;

        info!(
            event_id = %message.event_id,
            event_type = %message.event_type,
            message_id = %message_id,
            "billing_event_enqueued"
        );

        Ok(true)
    }

    /// Publish an email job, running `fallback` if the broker cannot take it.
    async fn send_email<T, F>(
        &self,
        queue: &str,
        payload: &T,
        fallback: Fallback,
        job: F,
    ) -> Result<bool>
    where
        T: Serialize + Sync,
        F: FnOnce() -> EmailJob,
    {
        if !self.jobs_enabled() {
            return self
                .run_fallback(queue, job(), fallback, "jobs disabled".to_string())
                .await;
        }

        match self.publish(queue, payload, PublishOptions::default()).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_recoverable() => {
                warn!(
                    queue = %queue,
                    fallback = %fallback,
                    error = %e,
                    "jobs_publish_failed_using_fallback"
                );
                self.run_fallback(queue, job(), fallback, e.to_string()).await
            }
            Err(e) => Err(e),
        }
    }

    async fn run_fallback(
        &self,
        queue: &str,
        job: EmailJob,
        fallback: Fallback,
        reason: String,
    ) -> Result<bool> {
        match fallback {
            Fallback::Sync => {
                deliver(self.inner.mailer.as_ref(), &job).await?;
                info!(queue = %queue, "jobs_fallback_sync_delivered");
                Ok(false)
            }
            Fallback::AsyncThread => {
                self.spawn_delivery(queue, job);
                Ok(false)
            }
            Fallback::Raise => Err(DeliveryError::BrokerUnavailable {
                queue: queue.to_string(),
                reason,
            }
            .into()),
            Fallback::None => {
                warn!(queue = %queue, reason = %reason, "jobs_message_dropped");
                Ok(false)
            }
        }
    }

    /// Deliver on a detached task. Failures are logged, never returned.
    fn spawn_delivery(&self, queue: &str, job: EmailJob) {
        let mailer = Arc::clone(&self.inner.mailer);
        let queue = queue.to_string();

        tokio::spawn(async move {
            match deliver(mailer.as_ref(), &job).await {
                Ok(()) => info!(queue = %queue, "jobs_fallback_async_delivered"),
                Err(e) => error!(queue = %queue, error = %e, "jobs_fallback_async_failed"),
            }
        });
    }
}

async fn deliver(mailer: &dyn Mailer, job: &EmailJob) -> Result<(), DeliveryError> {
    match job {
        EmailJob::Template { template, data } => mailer.deliver(template, data).await,
        EmailJob::Raw(email) => mailer.deliver_raw(email).await,
    }
}

/// UTC, second precision, `Z` suffix.
fn iso8601(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}
