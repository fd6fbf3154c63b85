//! Mail backends used when the broker cannot take an email job.
//!
//! The application normally supplies its own [`Mailer`]. Two are provided:
//! - [`HttpMailer`]: posts to a JSON mail relay
//! - [`LogMailer`]: only logs, for development without a relay

pub mod http;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use crate::config::Config;
use crate::errors::DeliveryError;
use crate::queue::RawEmail;

pub use http::HttpMailer;

#[async_trait]
pub trait Mailer: Send + Sync {
    /// Render and send a templated email.
    async fn deliver(&self, template: &str, data: &serde_json::Value) -> Result<(), DeliveryError>;

    /// Send an already rendered email.
    async fn deliver_raw(&self, email: &RawEmail) -> Result<(), DeliveryError>;
}

#[derive(Debug, Clone, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn deliver(&self, template: &str, data: &serde_json::Value) -> Result<(), DeliveryError> {
        info!(
            template = %template,
            recipient = data.get("email").and_then(|v| v.as_str()).unwrap_or("unknown"),
            "mail_logged"
        );
        Ok(())
    }

    async fn deliver_raw(&self, email: &RawEmail) -> Result<(), DeliveryError> {
        info!(to = %email.to, subject = %email.subject, "mail_raw_logged");
        Ok(())
    }
}

/// Pick the relay when one is configured, otherwise log.
pub fn mailer_from_config(config: &Config) -> Result<Arc<dyn Mailer>, DeliveryError> {
    match &config.mail_api_url {
        Some(url) => Ok(Arc::new(HttpMailer::from_config(url, config)?)),
        None => Ok(Arc::new(LogMailer)),
    }
}
