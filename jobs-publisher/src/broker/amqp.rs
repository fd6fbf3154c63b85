//! `lapin` implementation of the broker traits.

use std::sync::Arc;

use async_trait::async_trait;
use lapin::{
    options::{
        BasicPublishOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel, Connection, ConnectionProperties,
};
use tracing::info;

use super::{
    BrokerChannel, BrokerConnection, Connector, ExchangeKind, MessageProperties, QueueDeclaration,
};
use crate::errors::BrokerError;
use crate::queue::topology::FieldValue;

/// Opens real RabbitMQ connections.
#[derive(Debug, Clone, Default)]
pub struct AmqpConnector;

#[async_trait]
impl Connector for AmqpConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        info!("rabbitmq_connecting");

        let conn = Connection::connect(url, ConnectionProperties::default()).await?;

        info!("rabbitmq_connected");

        Ok(Arc::new(AmqpConnection { inner: conn }))
    }
}

pub struct AmqpConnection {
    inner: Connection,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn create_channel(&self) -> Result<Box<dyn BrokerChannel>, BrokerError> {
        let ch = self.inner.create_channel().await?;

        // Confirms make basic_publish resolve only once the broker has the message
        ch.confirm_select(ConfirmSelectOptions::default()).await?;

        Ok(Box::new(AmqpChannel { inner: ch }))
    }

    async fn close(&self) -> Result<(), BrokerError> {
        self.inner.close(200, "Normal shutdown").await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }
}

pub struct AmqpChannel {
    inner: Channel,
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn exchange_declare(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), BrokerError> {
        let kind = match kind {
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        };

        self.inner
            .exchange_declare(
                name,
                kind,
                ExchangeDeclareOptions {
                    durable,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn queue_declare(&self, declaration: &QueueDeclaration) -> Result<(), BrokerError> {
        let mut arguments = FieldTable::default();
        for (key, value) in &declaration.arguments {
            arguments.insert(ShortString::from(key.as_str()), amqp_value(value));
        }

        self.inner
            .queue_declare(
                &declaration.name,
                QueueDeclareOptions {
                    durable: declaration.durable,
                    auto_delete: declaration.auto_delete,
                    ..Default::default()
                },
                arguments,
            )
            .await?;
        Ok(())
    }

    async fn queue_bind(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), BrokerError> {
        self.inner
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;
        Ok(())
    }

    async fn basic_publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: &[u8],
        properties: &MessageProperties,
    ) -> Result<(), BrokerError> {
        let mut headers = FieldTable::default();
        for (key, value) in &properties.headers {
            headers.insert(ShortString::from(key.as_str()), amqp_value(value));
        }

        let confirmation = self
            .inner
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                body,
                BasicProperties::default()
                    .with_delivery_mode(if properties.persistent { 2 } else { 1 })
                    .with_content_type(properties.content_type.into())
                    .with_message_id(properties.message_id.clone().into())
                    .with_timestamp(properties.timestamp)
                    .with_headers(headers),
            )
            .await?
            .await?;

        if confirmation.is_nack() {
            return Err(BrokerError::Nacked {
                message_id: properties.message_id.clone(),
            });
        }

        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.status().connected()
    }
}

fn amqp_value(value: &FieldValue) -> AMQPValue {
    match value {
        FieldValue::Str(s) => AMQPValue::LongString(LongString::from(*s)),
        FieldValue::Int(i) => AMQPValue::LongLongInt(*i),
    }
}
