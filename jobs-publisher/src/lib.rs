//! Onetime Jobs - RabbitMQ job publishing with broker-outage fallback.
//!
//! The application hands email and billing jobs to a [`Publisher`], which
//! publishes them for the worker processes. When the broker is unreachable,
//! email jobs fall back to direct delivery through a [`Mailer`]; billing
//! events surface the error so webhook callers can ask for a retry.
//!
//! ## Architecture
//!
//! ```text
//! Config → ConnectionManager (connection + channel pool)
//!             ├─ InfrastructureInitializer → dead-letter exchanges/queues
//!             └─ Publisher → work queues, or Fallback → Mailer
//! ```

pub mod billing;
pub mod broker;
pub mod config;
pub mod connection;
pub mod errors;
pub mod mail;
pub mod queue;
pub mod setup;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export commonly used types
pub use billing::BillingProcessor;
pub use broker::AmqpConnector;
pub use config::Config;
pub use connection::ConnectionManager;
pub use errors::{BrokerError, DeliveryError, JobsError};
pub use mail::{mailer_from_config, HttpMailer, LogMailer, Mailer};
pub use queue::{Fallback, PublishOptions, Publisher, RawEmail, WebhookEvent};
pub use setup::InfrastructureInitializer;
