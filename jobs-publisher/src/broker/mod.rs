//! Broker abstraction.
//!
//! The publisher only needs a handful of AMQP operations, so they sit behind
//! small object-safe traits:
//! - [`Connector`]: opens a [`BrokerConnection`]
//! - [`BrokerConnection`]: hands out channels and closes
//! - [`BrokerChannel`]: declares topology and publishes
//!
//! [`amqp`] implements them on top of `lapin`; [`pool`] multiplexes channels
//! over a single connection.

pub mod amqp;
pub mod pool;

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::BrokerError;
use crate::queue::topology::FieldValue;

pub use amqp::AmqpConnector;
pub use pool::{ChannelPool, PooledChannel};

/// The default (nameless, direct) exchange.
pub const DEFAULT_EXCHANGE: &str = "";

/// Exchange types this crate declares. Dead-letter exchanges are fanout;
/// work queues sit behind the default exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeKind {
    Fanout,
}

/// Parameters of a `queue.declare`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueDeclaration {
    pub name: String,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: BTreeMap<String, FieldValue>,
}

impl QueueDeclaration {
    /// A durable queue with no arguments.
    pub fn durable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            durable: true,
            auto_delete: false,
            arguments: BTreeMap::new(),
        }
    }
}

/// Properties attached to a published message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub message_id: String,
    pub content_type: &'static str,
    pub persistent: bool,
    /// Unix seconds
    pub timestamp: u64,
    pub headers: BTreeMap<String, FieldValue>,
}

#[async_trait]
pub trait BrokerChannel: Send + Sync {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError>;

    async fn queue_declare(&self, declaration: &QueueDeclaration) -> Result<(), BrokerError>;

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError>;

    /// Publish and wait for the broker to confirm.
    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError>;

    async fn close(&self) -> Result<(), BrokerError>;

    fn is_open(&self) -> bool;
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}
