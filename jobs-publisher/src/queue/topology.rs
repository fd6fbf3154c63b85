//! Static queue topology shared with the consuming workers.
//!
//! Queue names and their arguments are a contract with the worker processes
//! that declare and consume them. This crate only declares the dead-letter
//! side (see [`crate::setup`]).

use std::collections::HashSet;

use crate::errors::{JobsError, Result};

/// Version of the message envelopes, sent as the `x-schema-version` header.
pub const SCHEMA_VERSION: u32 = 1;

/// Seconds during which consumers treat a repeated `message_id` as a duplicate.
pub const IDEMPOTENCY_TTL: u64 = 3600;

/// Queue argument naming the dead-letter exchange.
pub const ARG_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";

/// Queue argument holding the per-message TTL in milliseconds.
pub const ARG_MESSAGE_TTL: &str = "x-message-ttl";

pub const EMAIL_QUEUE: &str = "email.message.send";
pub const EMAIL_SCHEDULE_QUEUE: &str = "email.message.schedule";
pub const NOTIFICATION_QUEUE: &str = "notifications.alert.push";
pub const BILLING_QUEUE: &str = "billing.event.process";
pub const WEBHOOK_QUEUE: &str = "webhooks.payload.deliver";
pub const TRANSIENT_QUEUE: &str = "system.transient";

/// Value of a queue argument or message header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldValue {
    Str(&'static str),
    Int(i64),
}

/// Declaration of a named work queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueDefinition {
    pub name: &'static str,
    pub durable: bool,
    pub auto_delete: bool,
    pub arguments: &'static [(&'static str, FieldValue)],
}

impl QueueDefinition {
    pub fn argument(&self, key: &str) -> Option<FieldValue> {
        self.arguments
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    /// Name of the dead-letter exchange this queue routes rejects to.
    pub fn dead_letter_exchange(&self) -> Option<&'static str> {
        match self.argument(ARG_DEAD_LETTER_EXCHANGE) {
            Some(FieldValue::Str(name)) => Some(name),
            _ => None,
        }
    }

    pub fn message_ttl_ms(&self) -> Option<i64> {
        match self.argument(ARG_MESSAGE_TTL) {
            Some(FieldValue::Int(ttl)) => Some(ttl),
            _ => None,
        }
    }
}

/// A dead-letter exchange and the queue bound to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeadLetterConfig {
    pub exchange_name: &'static str,
    pub queue_name: &'static str,
}

const fn durable_with_dlx(
    name: &'static str,
    arguments: &'static [(&'static str, FieldValue)],
) -> QueueDefinition {
    QueueDefinition {
        name,
        durable: true,
        auto_delete: false,
        arguments,
    }
}

pub static QUEUES: &[QueueDefinition] = &[
    durable_with_dlx(
        EMAIL_QUEUE,
        &[(ARG_DEAD_LETTER_EXCHANGE, FieldValue::Str("dlx.email.message"))],
    ),
    durable_with_dlx(
        EMAIL_SCHEDULE_QUEUE,
        &[(ARG_DEAD_LETTER_EXCHANGE, FieldValue::Str("dlx.email.message"))],
    ),
    durable_with_dlx(
        NOTIFICATION_QUEUE,
        &[(ARG_DEAD_LETTER_EXCHANGE, FieldValue::Str("dlx.notifications.alert"))],
    ),
    durable_with_dlx(
        BILLING_QUEUE,
        &[(ARG_DEAD_LETTER_EXCHANGE, FieldValue::Str("dlx.billing.event"))],
    ),
    durable_with_dlx(
        WEBHOOK_QUEUE,
        &[(ARG_DEAD_LETTER_EXCHANGE, FieldValue::Str("dlx.webhooks.payload"))],
    ),
    QueueDefinition {
        name: TRANSIENT_QUEUE,
        durable: false,
        auto_delete: true,
        arguments: &[(ARG_MESSAGE_TTL, FieldValue::Int(300_000))],
    },
];

pub static DEAD_LETTERS: &[DeadLetterConfig] = &[
    DeadLetterConfig {
        exchange_name: "dlx.email.message",
        queue_name: "dlq.email.message",
    },
    DeadLetterConfig {
        exchange_name: "dlx.notifications.alert",
        queue_name: "dlq.notifications.alert",
    },
    DeadLetterConfig {
        exchange_name: "dlx.webhooks.payload",
        queue_name: "dlq.webhooks.payload",
    },
    DeadLetterConfig {
        exchange_name: "dlx.billing.event",
        queue_name: "dlq.billing.event",
    },
];

/// Look up a work queue by name.
pub fn queue(name: &str) -> Option<&'static QueueDefinition> {
    QUEUES.iter().find(|q| q.name == name)
}

/// Look up a dead-letter config by exchange name.
pub fn dead_letter(exchange_name: &str) -> Option<&'static DeadLetterConfig> {
    DEAD_LETTERS.iter().find(|d| d.exchange_name == exchange_name)
}

/// Check the static tables against each other.
pub fn validate_topology() -> Result<()> {
    validate(QUEUES, DEAD_LETTERS)
}

fn validate(queues: &[QueueDefinition], dead_letters: &[DeadLetterConfig]) -> Result<()> {
    let mut names = HashSet::new();
    for q in queues {
        if !names.insert(q.name) {
            return Err(JobsError::Topology(format!("duplicate queue {}", q.name)));
        }

        match q.dead_letter_exchange() {
            Some(dlx) if !dead_letters.iter().any(|d| d.exchange_name == dlx) => {
                return Err(JobsError::Topology(format!(
                    "queue {} references undeclared dead-letter exchange {}",
                    q.name, dlx
                )));
            }
            None if q.durable => {
                return Err(JobsError::Topology(format!(
                    "durable queue {} has no dead-letter exchange",
                    q.name
                )));
            }
            _ => {}
        }

        if !q.durable && (!q.auto_delete || q.message_ttl_ms().is_none()) {
            return Err(JobsError::Topology(format!(
                "transient queue {} must be auto-delete with a message TTL",
                q.name
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_topology_is_valid() {
        validate_topology().unwrap();
        assert_eq!(QUEUES.len(), 6);
        assert_eq!(DEAD_LETTERS.len(), 4);
    }

    #[test]
    fn test_queue_lookup() {
        let q = queue(BILLING_QUEUE).unwrap();
        assert!(q.durable);
        assert_eq!(q.dead_letter_exchange(), Some("dlx.billing.event"));
        assert_eq!(dead_letter("dlx.billing.event").unwrap().queue_name, "dlq.billing.event");
        assert!(queue("some.queue").is_none());
    }

    #[test]
    fn test_transient_queue_shape() {
        let q = queue(TRANSIENT_QUEUE).unwrap();
        assert!(!q.durable);
        assert!(q.auto_delete);
        assert_eq!(q.message_ttl_ms(), Some(300_000));
        assert_eq!(q.dead_letter_exchange(), None);
    }

    #[test]
    fn test_missing_dead_letter_config_rejected() {
        let queues = [durable_with_dlx(
            "orders.place",
            &[(ARG_DEAD_LETTER_EXCHANGE, FieldValue::Str("dlx.orders"))],
        )];
        let err = validate(&queues, DEAD_LETTERS).unwrap_err();
        assert!(err.to_string().contains("dlx.orders"));
    }

    #[test]
    fn test_durable_queue_without_dlx_rejected() {
        let queues = [durable_with_dlx("orders.place", &[])];
        assert!(validate(&queues, DEAD_LETTERS).is_err());
    }

    #[test]
    fn test_duplicate_queue_rejected() {
        let dup = queue(EMAIL_QUEUE).copied().unwrap();
        assert!(validate(&[dup, dup], DEAD_LETTERS).is_err());
    }
}
