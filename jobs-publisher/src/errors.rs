//! Error types for the jobs publishing layer.
//!
//! The split mirrors how callers recover:
//! - [`BrokerError`]: anything the broker client reported
//! - [`DeliveryError`]: the mail backend or the `raise` fallback
//! - [`JobsError`]: what the public API returns

use std::time::Duration;

use thiserror::Error;

/// Errors reported by the broker client or its in-memory stand-ins.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("broker connection closed")]
    ConnectionClosed,

    #[error("timed out after {0:?} connecting to broker")]
    ConnectTimeout(Duration),

    #[error("broker rejected message {message_id}")]
    Nacked { message_id: String },

    #[error("broker unreachable: {0}")]
    Unreachable(String),
}

/// Errors raised while delivering mail outside the broker.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("Broker unavailable, message to {queue} not delivered: {reason}")]
    BrokerUnavailable { queue: String, reason: String },

    #[error("mail relay request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("mail relay responded with status {status}")]
    Rejected { status: u16 },

    #[error("mail backend failed: {0}")]
    Backend(String),
}

/// Errors returned by the publisher, initializer and connection manager.
#[derive(Debug, Error)]
pub enum JobsError {
    #[error("Channel pool not initialized; call connect before publishing")]
    ChannelPoolNotInitialized,

    #[error("timed out after {0:?} waiting for a broker channel")]
    PoolTimeout(Duration),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error("failed to serialize message payload: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error("unknown fallback strategy: {0:?} (expected sync, async_thread, raise or none)")]
    InvalidFallback(String),

    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    #[error("invalid queue topology: {0}")]
    Topology(String),

    #[error("billing event {event_id} failed to process locally: {reason}")]
    Billing { event_id: String, reason: String },
}

impl JobsError {
    /// Whether an email send may recover from this error through its fallback.
    ///
    /// Only the missing channel pool is a programming/configuration error;
    /// everything else that happens during a publish counts as the broker
    /// being unavailable.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, JobsError::ChannelPoolNotInitialized)
    }
}

pub type Result<T, E = JobsError> = std::result::Result<T, E>;
