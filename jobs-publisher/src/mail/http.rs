//! JSON mail relay client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{header, Client};
use serde::Serialize;
use tracing::{info, warn};

use super::Mailer;
use crate::config::Config;
use crate::errors::DeliveryError;
use crate::queue::RawEmail;

/// Request body understood by the relay.
#[derive(Debug, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum RelayRequest<'a> {
    Template {
        from: &'a str,
        template: &'a str,
        data: &'a serde_json::Value,
    },
    Raw {
        #[serde(flatten)]
        email: &'a RawEmail,
    },
}

pub struct HttpMailer {
    client: Client,
    url: String,
    token: Option<String>,
    from: String,
}

impl HttpMailer {
    pub fn from_config(url: &str, config: &Config) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.mail_timeout_ms))
            .build()?;

        Ok(Self {
            client,
            url: url.to_string(),
            token: config.mail_api_token.clone(),
            from: config.mail_from.clone(),
        })
    }

    async fn send(&self, request: &RelayRequest<'_>) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(request)
            .map_err(|e| DeliveryError::Backend(format!("failed to encode request: {e}")))?;

        let mut builder = self
            .client
            .post(&self.url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body);

        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        let status = response.status();

        if !status.is_success() {
            warn!(status = status.as_u16(), "mail_relay_rejected");
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
            });
        }

        info!(status = status.as_u16(), "mail_relay_accepted");
        Ok(())
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn deliver(&self, template: &str, data: &serde_json::Value) -> Result<(), DeliveryError> {
        self.send(&RelayRequest::Template {
            from: &self.from,
            template,
            data,
        })
        .await
    }

    async fn deliver_raw(&self, email: &RawEmail) -> Result<(), DeliveryError> {
        self.send(&RelayRequest::Raw { email }).await
    }
}
