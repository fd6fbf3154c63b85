//! In-memory broker, mailer and billing doubles for unit tests.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::billing::BillingProcessor;
use crate::broker::{
    BrokerChannel, BrokerConnection, Connector, ExchangeKind, MessageProperties, QueueDeclaration,
};
use crate::config::Config;
use crate::errors::{BrokerError, DeliveryError};
use crate::mail::Mailer;
use crate::queue::{BillingEvent, RawEmail};

/// Config with jobs enabled and short timeouts.
pub fn enabled_config() -> Config {
    Config {
        jobs_enabled: true,
        channel_pool_timeout_ms: 200,
        connect_timeout_ms: 1000,
        ..Config::default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrokerOp {
    ExchangeDeclare {
        name: String,
        kind: ExchangeKind,
        durable: bool,
    },
    QueueDeclare(QueueDeclaration),
    QueueBind {
        queue: String,
        exchange: String,
        routing_key: String,
    },
    Publish {
        exchange: String,
        routing_key: String,
        body: serde_json::Value,
        properties: MessageProperties,
    },
}

#[derive(Default)]
struct BrokerState {
    ops: Mutex<Vec<BrokerOp>>,
    connections: Mutex<Vec<Arc<AtomicBool>>>,
    connect_calls: AtomicUsize,
    close_calls: AtomicUsize,
    channels_opened: AtomicUsize,
    channel_generation: AtomicUsize,
    connect_delay_ms: AtomicU64,
    unreachable: AtomicBool,
    fail_publish: AtomicBool,
    fail_close: AtomicBool,
}

impl BrokerState {
    fn record(&self, op: BrokerOp) {
        self.ops.lock().unwrap().push(op);
    }
}

/// A broker that records every operation.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    state: Arc<BrokerState>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(MemoryConnector {
            state: Arc::clone(&self.state),
        })
    }

    /// A connection that bypasses the connector (and its counters).
    pub fn connection(&self) -> Arc<dyn BrokerConnection> {
        Arc::new(MemoryConnection::new(Arc::clone(&self.state)))
    }

    pub fn ops(&self) -> Vec<BrokerOp> {
        self.state.ops.lock().unwrap().clone()
    }

    /// `(exchange, routing_key, body, properties)` of each publish, in order.
    pub fn publishes(&self) -> Vec<(String, String, serde_json::Value, MessageProperties)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                BrokerOp::Publish {
                    exchange,
                    routing_key,
                    body,
                    properties,
                } => Some((exchange, routing_key, body, properties)),
                _ => None,
            })
            .collect()
    }

    pub fn declared_queues(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                BrokerOp::QueueDeclare(declaration) => Some(declaration.name),
                _ => None,
            })
            .collect()
    }

    pub fn connect_calls(&self) -> usize {
        self.state.connect_calls.load(Ordering::SeqCst)
    }

    pub fn close_calls(&self) -> usize {
        self.state.close_calls.load(Ordering::SeqCst)
    }

    pub fn channels_opened(&self) -> usize {
        self.state.channels_opened.load(Ordering::SeqCst)
    }

    /// Close every channel opened so far.
    pub fn close_channels(&self) {
        self.state.channel_generation.fetch_add(1, Ordering::SeqCst);
    }

    /// Close every connection from the broker side, as a restart would.
    pub fn drop_connections(&self) {
        for open in self.state.connections.lock().unwrap().iter() {
            open.store(false, Ordering::SeqCst);
        }
    }

    pub fn set_unreachable(&self, value: bool) {
        self.state.unreachable.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_publish(&self, value: bool) {
        self.state.fail_publish.store(value, Ordering::SeqCst);
    }

    pub fn set_fail_close(&self, value: bool) {
        self.state.fail_close.store(value, Ordering::SeqCst);
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

struct MemoryConnector {
    state: Arc<BrokerState>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, _url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        self.state.connect_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable("connection refused".to_string()));
        }

        Ok(Arc::new(MemoryConnection::new(Arc::clone(&self.state))))
    }
}

struct MemoryConnection {
    state: Arc<BrokerState>,
    open: Arc<AtomicBool>,
}

impl MemoryConnection {
    fn new(state: Arc<BrokerState>) -> Self {
        let open = Arc::new(AtomicBool::new(true));
        state.connections.lock().unwrap().push(Arc::clone(&open));
        Self { state, open }
    }
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        if !self.is_open() {
            return Err(BrokerError::ConnectionClosed);
        }

        self.state.channels_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryChannel {
            state: Arc::clone(&self.state),
            connection_open: Arc::clone(&self.open),
            generation: self.state.channel_generation.load(Ordering::SeqCst),
        }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.state.close_calls.fetch_add(1, Ordering::SeqCst);

        if self.state.fail_close.load(Ordering::SeqCst) {
            return Err(BrokerError::Unreachable("close failed".to_string()));
        }

        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

struct MemoryChannel {
    state: Arc<BrokerState>,
    connection_open: Arc<AtomicBool>,
    generation: usize,
}

impl MemoryChannel {
    fn ensure_open(&self) -> Result<(), BrokerError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(BrokerError::ConnectionClosed)
        }
    }
}

#[async_trait]
impl BrokerChannel for MemoryChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.state.record(BrokerOp::ExchangeDeclare {
            name: name.to_string(),
            kind,
            durable,
        });
        Ok(())
    }

    async fn queue_declare(&self, declaration: &QueueDeclaration) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.state.record(BrokerOp::QueueDeclare(declaration.clone()));
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        self.state.record(BrokerOp::QueueBind {
            queue: queue.to_string(),
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
        });
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), BrokerError> {
        self.ensure_open()?;
        if self.state.fail_publish.load(Ordering::SeqCst) {
            return Err(BrokerError::ConnectionClosed);
        }

        self.state.record(BrokerOp::Publish {
            exchange: exchange.to_string(),
            routing_key: routing_key.to_string(),
            body: serde_json::from_slice(body).unwrap_or(serde_json::Value::Null),
            properties: properties.clone(),
        });
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.connection_open.load(Ordering::SeqCst)
            && self.generation == self.state.channel_generation.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    Template {
        template: String,
        data: serde_json::Value,
    },
    Raw(RawEmail),
}

/// Records every delivery attempt, optionally slow or failing.
#[derive(Default)]
pub struct RecordingMailer {
    deliveries: Mutex<Vec<Delivery>>,
    delay: Duration,
    fail: bool,
}

impl RecordingMailer {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    /// Poll until `count` deliveries were attempted or `timeout` passes.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.deliveries.lock().unwrap().len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        false
    }

    async fn attempt(&self, delivery: Delivery) -> Result<(), DeliveryError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.deliveries.lock().unwrap().push(delivery);

        if self.fail {
            return Err(DeliveryError::Backend("smtp unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn deliver(&self, template: &str, data: &serde_json::Value) -> Result<(), DeliveryError> {
        self.attempt(Delivery::Template {
            template: template.to_string(),
            data: data.clone(),
        })
        .await
    }

    async fn deliver_raw(&self, email: &RawEmail) -> Result<(), DeliveryError> {
        self.attempt(Delivery::Raw(email.clone())).await
    }
}

#[derive(Default)]
pub struct RecordingBilling {
    events: Mutex<Vec<BillingEvent>>,
    fail: bool,
}

impl RecordingBilling {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn events(&self) -> Vec<BillingEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingProcessor for RecordingBilling {
    async fn process(&self, event: &BillingEvent) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("subscription not found");
        }
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}
