//! Queue module for RabbitMQ job publishing.
//!
//! This module provides:
//! - The static queue topology shared with the workers
//! - Message envelopes for each work queue
//! - The publisher and its fallback strategies
//!
//! ## Flow
//!
//! ```text
//! caller → Publisher → publish → channel pool → broker
//!                         └─ on failure → Fallback → mail backend
//! ```

pub mod fallback;
pub mod publisher;
pub mod topology;
pub mod types;

pub use fallback::Fallback;
pub use publisher::{Clock, Publisher};
pub use topology::{
    DeadLetterConfig, QueueDefinition, BILLING_QUEUE, DEAD_LETTERS, EMAIL_QUEUE,
    EMAIL_SCHEDULE_QUEUE, IDEMPOTENCY_TTL, QUEUES, SCHEMA_VERSION,
};
pub use types::{
    BillingEvent, EmailMessage, PublishOptions, RawEmail, RawEmailMessage, ScheduledEmail,
    WebhookEvent,
};
